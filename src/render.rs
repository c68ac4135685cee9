//! Draw commands and renderers.
//!
//! Programs never touch the framebuffer. Each frame they push [`DrawCommand`]s
//! onto a [`Canvas`] along with the regions they changed; the frame loop hands
//! the canvas to a [`Renderer`], which composites it (or throws it away).

use std::path::Path;
use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::error::{Error, Result};

pub type Color = [u8; 4];

pub const BLACK: Color = [0, 0, 0, 255];
pub const WHITE: Color = [255, 255, 255, 255];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Rect { x, y, w, h }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }
}

#[derive(Clone, Debug)]
pub enum DrawCommand {
    /// Wipe the whole display.
    Clear(Color),
    /// Composite `pixels` with its top-left at (x, y). `mask` restricts the
    /// blit to a sub-rectangle of the source.
    Blit {
        pixels: Arc<RgbaImage>,
        x: f32,
        y: f32,
        alpha: f32,
        mask: Option<Rect>,
    },
    Rect {
        rect: Rect,
        color: Color,
    },
    Circle {
        cx: f32,
        cy: f32,
        radius: f32,
        color: Color,
        /// 0 fills the circle.
        width: f32,
    },
    /// Horizontal indicator: a track with a filled portion of `value` in 0..=1.
    Slider {
        rect: Rect,
        value: f32,
        color: Color,
    },
    Text {
        text: String,
        x: f32,
        y: f32,
        color: Color,
    },
}

/// Per-frame command list plus the dirty regions that need flushing.
#[derive(Debug, Default)]
pub struct Canvas {
    width: u32,
    height: u32,
    commands: Vec<DrawCommand>,
    dirty: Vec<Rect>,
    full: bool,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Canvas {
            width,
            height,
            commands: Vec::new(),
            dirty: Vec::new(),
            full: false,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn push(&mut self, cmd: DrawCommand) {
        self.commands.push(cmd);
    }

    pub fn clear(&mut self, color: Color) {
        self.push(DrawCommand::Clear(color));
        self.mark_full();
    }

    pub fn blit(&mut self, pixels: Arc<RgbaImage>, x: f32, y: f32, alpha: f32) {
        self.push(DrawCommand::Blit {
            pixels,
            x,
            y,
            alpha,
            mask: None,
        });
    }

    pub fn mark(&mut self, r: Rect) {
        self.dirty.push(r);
    }

    pub fn mark_full(&mut self) {
        self.full = true;
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// Regions to flush; the whole display when anything asked for it.
    pub fn dirty_regions(&self) -> Vec<Rect> {
        if self.full {
            vec![Rect::new(0.0, 0.0, self.width as f32, self.height as f32)]
        } else {
            self.dirty.clone()
        }
    }

    pub fn needs_flush(&self) -> bool {
        self.full || !self.dirty.is_empty()
    }

    pub fn reset(&mut self) {
        self.commands.clear();
        self.dirty.clear();
        self.full = false;
    }
}

pub trait Renderer {
    fn present(&mut self, canvas: &Canvas) -> Result<()>;
}

/// Composites commands into an in-memory RGBA framebuffer. Text is left to
/// real display backends.
pub struct SoftwareRenderer {
    frame: RgbaImage,
}

impl SoftwareRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        SoftwareRenderer {
            frame: RgbaImage::from_pixel(width, height, Rgba(BLACK)),
        }
    }

    pub fn frame(&self) -> &RgbaImage {
        &self.frame
    }

    pub fn save_screen(&self, path: &Path) -> Result<()> {
        self.frame
            .save(path)
            .map_err(|e| Error::image(path.to_path_buf(), e))
    }

    fn draw(&mut self, cmd: &DrawCommand) {
        match cmd {
            DrawCommand::Clear(c) => {
                for px in self.frame.pixels_mut() {
                    *px = Rgba(*c);
                }
            }
            DrawCommand::Blit {
                pixels,
                x,
                y,
                alpha,
                mask,
            } => self.blit(pixels, *x, *y, *alpha, *mask),
            DrawCommand::Rect { rect, color } => self.fill_rect(*rect, *color),
            DrawCommand::Circle {
                cx,
                cy,
                radius,
                color,
                width,
            } => self.circle(*cx, *cy, *radius, *width, *color),
            DrawCommand::Slider { rect, value, color } => {
                let v = value.clamp(0.0, 1.0);
                self.fill_rect(*rect, [color[0] / 3, color[1] / 3, color[2] / 3, color[3]]);
                self.fill_rect(Rect::new(rect.x, rect.y, rect.w * v, rect.h), *color);
            }
            DrawCommand::Text { .. } => {}
        }
    }

    fn put(&mut self, x: i64, y: i64, src: Color, alpha: f32) {
        if x < 0 || y < 0 || x >= self.frame.width() as i64 || y >= self.frame.height() as i64 {
            return;
        }
        let a = alpha * src[3] as f32 / 255.0;
        if a <= 0.0 {
            return;
        }
        let dst = self.frame.get_pixel_mut(x as u32, y as u32);
        for i in 0..3 {
            dst.0[i] = (src[i] as f32 * a + dst.0[i] as f32 * (1.0 - a)).round() as u8;
        }
        dst.0[3] = 255;
    }

    fn blit(&mut self, src: &RgbaImage, x: f32, y: f32, alpha: f32, mask: Option<Rect>) {
        let alpha = alpha.clamp(0.0, 1.0);
        if alpha <= 0.0 {
            return;
        }
        let (ox, oy) = (x.round() as i64, y.round() as i64);
        for (sx, sy, px) in src.enumerate_pixels() {
            if let Some(m) = mask {
                if !m.contains(sx as f32, sy as f32) {
                    continue;
                }
            }
            self.put(ox + sx as i64, oy + sy as i64, px.0, alpha);
        }
    }

    fn fill_rect(&mut self, r: Rect, color: Color) {
        let (x0, y0) = (r.x.round() as i64, r.y.round() as i64);
        let (x1, y1) = ((r.x + r.w).round() as i64, (r.y + r.h).round() as i64);
        for y in y0..y1 {
            for x in x0..x1 {
                self.put(x, y, color, 1.0);
            }
        }
    }

    fn circle(&mut self, cx: f32, cy: f32, radius: f32, width: f32, color: Color) {
        let r = radius.max(0.0);
        let inner = if width > 0.0 { (r - width).max(0.0) } else { 0.0 };
        let (x0, x1) = ((cx - r).floor() as i64, (cx + r).ceil() as i64);
        let (y0, y1) = ((cy - r).floor() as i64, (cy + r).ceil() as i64);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let d = ((x as f32 + 0.5 - cx).powi(2) + (y as f32 + 0.5 - cy).powi(2)).sqrt();
                if d <= r && d >= inner {
                    self.put(x, y, color, 1.0);
                }
            }
        }
    }
}

impl Renderer for SoftwareRenderer {
    fn present(&mut self, canvas: &Canvas) -> Result<()> {
        for cmd in canvas.commands() {
            self.draw(cmd);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_tracks_dirty_regions() {
        let mut c = Canvas::new(800, 480);
        assert!(!c.needs_flush());
        c.mark(Rect::new(10.0, 10.0, 5.0, 5.0));
        assert_eq!(c.dirty_regions().len(), 1);
        c.clear(BLACK);
        assert_eq!(c.dirty_regions(), vec![Rect::new(0.0, 0.0, 800.0, 480.0)]);
        c.reset();
        assert!(!c.needs_flush());
        assert!(c.commands().is_empty());
    }

    #[test]
    fn blit_respects_alpha() {
        let mut r = SoftwareRenderer::new(4, 4);
        let mut c = Canvas::new(4, 4);
        let src = Arc::new(RgbaImage::from_pixel(2, 2, Rgba([200, 100, 0, 255])));
        c.blit(src, 1.0, 1.0, 0.5);
        r.present(&c).unwrap();
        assert_eq!(r.frame().get_pixel(1, 1).0, [100, 50, 0, 255]);
        assert_eq!(r.frame().get_pixel(0, 0).0, BLACK);
        assert_eq!(r.frame().get_pixel(3, 3).0, BLACK);
    }

    #[test]
    fn transparent_pixels_do_not_draw() {
        let mut r = SoftwareRenderer::new(2, 1);
        let mut c = Canvas::new(2, 1);
        c.clear(WHITE);
        let mut src = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 255]));
        src.put_pixel(1, 0, Rgba([0, 0, 0, 0]));
        c.blit(Arc::new(src), 0.0, 0.0, 1.0);
        r.present(&c).unwrap();
        assert_eq!(r.frame().get_pixel(0, 0).0, BLACK);
        assert_eq!(r.frame().get_pixel(1, 0).0, WHITE);
    }

    #[test]
    fn masked_blit_clips_source() {
        let mut r = SoftwareRenderer::new(4, 1);
        let mut c = Canvas::new(4, 1);
        c.push(DrawCommand::Blit {
            pixels: Arc::new(RgbaImage::from_pixel(4, 1, Rgba(WHITE))),
            x: 0.0,
            y: 0.0,
            alpha: 1.0,
            mask: Some(Rect::new(0.0, 0.0, 2.0, 1.0)),
        });
        r.present(&c).unwrap();
        assert_eq!(r.frame().get_pixel(1, 0).0, WHITE);
        assert_eq!(r.frame().get_pixel(2, 0).0, BLACK);
    }

    #[test]
    fn offscreen_drawing_is_clipped() {
        let mut r = SoftwareRenderer::new(4, 4);
        let mut c = Canvas::new(4, 4);
        c.push(DrawCommand::Circle {
            cx: -10.0,
            cy: -10.0,
            radius: 12.0,
            color: WHITE,
            width: 0.0,
        });
        c.push(DrawCommand::Rect {
            rect: Rect::new(3.0, 3.0, 10.0, 10.0),
            color: WHITE,
        });
        r.present(&c).unwrap();
        assert_eq!(r.frame().get_pixel(3, 3).0, WHITE);
    }

    #[test]
    fn save_screen_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let r = SoftwareRenderer::new(8, 8);
        let path = dir.path().join("screen.png");
        r.save_screen(&path).unwrap();
        assert_eq!(image::image_dimensions(&path).unwrap(), (8, 8));
    }
}
