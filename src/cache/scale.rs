//! Variant geometry and pixel transforms.
//!
//! A variant is a scaled copy of a decoded photo for one target box and mode.
//! Scaling always preserves aspect ratio: `Plain` fits inside the box,
//! `Fill` overfills it and crops the centre, `Square` does the same against
//! a square box of the shorter side, and `Circular` is `Square` with
//! everything outside the inscribed circle made transparent.

use std::fmt;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    Plain,
    Fill,
    Square,
    Circular,
}

impl Mode {
    fn separator(self) -> char {
        match self {
            Mode::Plain => 'x',
            Mode::Fill => 'f',
            Mode::Square => 's',
            Mode::Circular => 'c',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub width: u32,
    pub height: u32,
    pub mode: Mode,
}

impl VariantKey {
    pub fn new(width: u32, height: u32, mode: Mode) -> Self {
        VariantKey {
            width: width.max(1),
            height: height.max(1),
            mode,
        }
    }

    /// The box actually filled: square modes use the shorter side.
    pub fn target_box(&self) -> (u32, u32) {
        match self.mode {
            Mode::Square | Mode::Circular => {
                let s = self.width.min(self.height);
                (s, s)
            }
            Mode::Plain | Mode::Fill => (self.width, self.height),
        }
    }

    fn crops(&self) -> bool {
        self.mode != Mode::Plain
    }

    /// Requests at or above the source size are served by the full decode,
    /// except circular ones which always need the mask applied.
    pub fn needs_variant(&self, source: (u32, u32)) -> bool {
        self.mode == Mode::Circular || self.width < source.0 || self.height < source.1
    }
}

/// `800x480`, `300c300` etc.
impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.width, self.mode.separator(), self.height)
    }
}

/// Size of the scaled image before any crop.
pub fn scaled_size(source: (u32, u32), key: &VariantKey) -> (u32, u32) {
    let (ix, iy) = (source.0.max(1) as f64, source.1.max(1) as f64);
    let (bx, by) = key.target_box();
    let (fx, fy) = (bx as f64 / ix, by as f64 / iy);
    let factor = if key.crops() { fx.max(fy) } else { fx.min(fy) };
    let sx = (ix * factor).round().max(1.0) as u32;
    let sy = (iy * factor).round().max(1.0) as u32;
    if key.crops() {
        // rounding must never leave the box underfilled
        (sx.max(bx), sy.max(by))
    } else {
        (sx.min(bx), sy.min(by))
    }
}

/// Produce the variant for `key` from a full decode.
pub fn render(full: &RgbaImage, key: &VariantKey) -> RgbaImage {
    let (sx, sy) = scaled_size(full.dimensions(), key);
    let mut out = imageops::resize(full, sx, sy, FilterType::Triangle);

    if key.crops() {
        let (bx, by) = key.target_box();
        let (cw, ch) = (bx.min(sx), by.min(sy));
        if (cw, ch) != (sx, sy) {
            let left = (sx - cw) / 2;
            let top = (sy - ch) / 2;
            out = imageops::crop_imm(&out, left, top, cw, ch).to_image();
        }
    }

    if key.mode == Mode::Circular {
        circular_mask(&mut out);
    }
    out
}

/// Zero the alpha of every pixel outside the inscribed circle.
pub fn circular_mask(img: &mut RgbaImage) {
    let (w, h) = img.dimensions();
    let r = w.min(h) as f64 / 2.0;
    let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);
    for (x, y, px) in img.enumerate_pixels_mut() {
        let dx = x as f64 + 0.5 - cx;
        let dy = y as f64 + 0.5 - cy;
        if dx * dx + dy * dy > r * r {
            px.0[3] = 0;
        }
    }
}

/// Replace pure black with (1,1,1) so true black stays free as a colour key.
pub fn remove_pure_black(img: &mut RgbaImage) {
    for px in img.pixels_mut() {
        if px.0[0] == 0 && px.0[1] == 0 && px.0[2] == 0 {
            *px = Rgba([1, 1, 1, px.0[3]]);
        }
    }
}
