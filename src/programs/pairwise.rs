//! Pairwise rating: two photos side by side, split by a line the viewer can
//! drag towards the one they like less.
//!
//! Each side is a [`FadeSlot`] on its own timer. The line rests at a neutral
//! position biased by the two ratings. Dragging it past either threshold
//! rates the pair and swaps out the loser. Line and pickers fade in as
//! someone approaches the frame.

use crate::cache::ImageCache;
use crate::error::Result;
use crate::render::{DrawCommand, Rect, BLACK, WHITE};
use crate::touch::InteractionState;

use super::fade::{FadeSlot, Step};
use super::ProgramContext;

const DEFAULT_HOLD: f64 = 30.0;
const SWITCH_TIME: f64 = 4.0;
/// The second slot starts on a longer hold so the sides don't swap together.
const SECOND_SLOT_STAGGER: f64 = 1.5;
const RATE_DELTA: f32 = 0.2;
/// A drag only moves the line if it started this close to neutral.
const GRAB_RANGE: f32 = 0.06;
const LOW_MARK: f32 = 0.15;
const HIGH_MARK: f32 = 0.85;
const SETTLE: f32 = 0.2;
const DEBOUNCE: f64 = 0.5;
const MAX_LINE_WIDTH: f32 = 6.0;
const PICKER_RADIUS: f32 = 14.0;
const ARMED: [u8; 4] = [230, 60, 60, 255];

pub struct Pairwise {
    slots: [FadeSlot; 2],
    line: f32,
    last_line: f32,
    neutral: f32,
    line_width: f32,
    picker_alpha: f32,
    plus_pos: f32,
    min_pos: f32,
    last_swap: f64,
}

impl Pairwise {
    pub fn new() -> Self {
        Pairwise {
            slots: [FadeSlot::new(DEFAULT_HOLD), FadeSlot::new(DEFAULT_HOLD)],
            line: 0.5,
            last_line: 0.5,
            neutral: 0.5,
            line_width: 0.0,
            picker_alpha: 1.0,
            plus_pos: 0.5,
            min_pos: 0.5,
            last_swap: 0.0,
        }
    }

    pub(super) fn update(&mut self, ctx: &mut ProgramContext<'_>, first: bool) -> Result<bool> {
        let now = ctx.now;
        let (w, _) = ctx.size();
        let input = ctx.input;
        let interactive = input.state > InteractionState::Rest;
        let mut dirty = first || interactive;

        if first {
            for (i, slot) in self.slots.iter_mut().enumerate() {
                slot.fill(ctx.cache, now);
                if i == 1 {
                    slot.hold *= SECOND_SLOT_STAGGER;
                }
            }
        }
        for slot in &mut self.slots {
            if slot.forget_missing(ctx.cache) || slot.image.is_none() {
                slot.swap = true;
            }
        }

        let mut rate_now = false;
        let mut settle = true;
        if input.state >= InteractionState::Dragging {
            if let Some(origin) = input.drag_origin {
                if (origin.x / w - self.neutral).abs() < GRAB_RANGE {
                    settle = false;
                    self.line = input.pos.x / w;
                    rate_now = input.state == InteractionState::ReleasedDrag;
                }
            }
        }
        if settle {
            if let (Some(a), Some(b)) = (self.slots[0].image, self.slots[1].image) {
                let rating = |id| ctx.cache.image(id).map(|i| i.rating).unwrap_or(0.0);
                self.neutral = 0.5 + rating(a) / 10.0 - rating(b) / 10.0;
            }
            self.line += SETTLE * (self.neutral - self.line);
        }

        self.plus_pos = self.neutral + 0.8 * (self.line - self.neutral);
        self.min_pos = self.neutral + 1.2 * (self.line - self.neutral);

        if self.line < LOW_MARK || self.line > HIGH_MARK {
            // 1 when the line moved left, squeezing the left photo
            let preferred = usize::from(self.line < self.neutral);
            if rate_now && self.last_swap < now - DEBOUNCE {
                self.rate(ctx, preferred)?;
                self.slots[1 - preferred].swap = true;
                self.last_swap = now;
            }
            dirty = true;
        }

        if (self.line - self.last_line).abs() > 0.0015 {
            self.last_line = self.line;
            dirty = true;
        }

        let d = ctx.distance;
        let mut width = (20.0 / (d + 0.5).powi(3)).clamp(0.0, MAX_LINE_WIDTH);
        if interactive {
            width = (self.line_width + 1.0).min(MAX_LINE_WIDTH);
        } else if width < 0.8 {
            width = 0.0;
        }
        if width != self.line_width {
            self.line_width = width;
            dirty = true;
        }

        let mut alpha = (-10.0 / 3.0 * d + 8.0 / 3.0).clamp(0.0, 1.0);
        if interactive {
            alpha = (self.picker_alpha + 0.1).min(1.0);
        } else if alpha < 0.004 {
            alpha = 0.0;
        }
        if alpha != self.picker_alpha {
            self.picker_alpha = alpha;
            dirty = true;
        }

        for i in 0..2 {
            let slot = &mut self.slots[i];
            if !slot.swap && interactive {
                slot.hold_off(now, SWITCH_TIME);
                continue;
            }
            match slot.step(ctx.cache, now, SWITCH_TIME, DEFAULT_HOLD)? {
                Step::Holding => {}
                Step::Fading => dirty = true,
                Step::Swapped => {
                    dirty = true;
                    if i == 1 {
                        let (t0, t1) = (self.slots[0].ends_at(), self.slots[1].ends_at());
                        if (t0 - t1).abs() < DEFAULT_HOLD / 2.0 {
                            self.slots[1].hold += 1.0;
                        }
                    }
                }
            }
        }

        if dirty {
            self.draw(ctx);
        }
        Ok(dirty)
    }

    fn rate(&mut self, ctx: &mut ProgramContext<'_>, preferred: usize) -> Result<()> {
        let (Some(a), Some(b)) = (self.slots[0].image, self.slots[1].image) else {
            return Ok(());
        };
        ctx.cache.rate(a, preferred == 0, RATE_DELTA)?;
        ctx.cache.rate(b, preferred == 1, RATE_DELTA)?;
        let cmp = if preferred == 0 { ">" } else { "<" };
        let detail = format!("{} {} {}", ctx.file_name(a), cmp, ctx.file_name(b));
        ctx.action("dd.rate", detail);
        Ok(())
    }

    pub(super) fn release(&mut self, cache: &mut ImageCache, now: f64) -> Result<()> {
        for slot in &mut self.slots {
            slot.release(cache, now, DEFAULT_HOLD)?;
        }
        Ok(())
    }

    pub(super) fn draw(&self, ctx: &mut ProgramContext<'_>) {
        let (w, h) = ctx.size();
        let size = (w as u32, h as u32);
        let split = self.line.clamp(0.0, 1.0) * w;

        ctx.canvas.clear(BLACK);
        self.slots[0].draw(
            ctx,
            (split / 2.0 - w / 2.0, 0.0),
            size,
            Some(Rect::new(w / 2.0 - split / 2.0, 0.0, split, h)),
        );
        self.slots[1].draw(
            ctx,
            (split / 2.0, 0.0),
            size,
            Some(Rect::new(split / 2.0, 0.0, w - split, h)),
        );

        if self.line_width > 0.0 {
            ctx.canvas.push(DrawCommand::Rect {
                rect: Rect::new(split - self.line_width / 2.0, 0.0, self.line_width, h),
                color: WHITE,
            });
        }

        if self.picker_alpha > 0.0 {
            let a = (self.picker_alpha * 255.0) as u8;
            let span = (self.plus_pos - self.min_pos).abs() * w;
            if span > self.line_width + 60.0 {
                ctx.canvas.push(DrawCommand::Rect {
                    rect: Rect::new(split - span / 2.0, h / 2.0 - 1.5, span, 3.0),
                    color: [255, 255, 255, a],
                });
            }
            let base = if (0.5 - self.line).abs() < 0.35 {
                WHITE
            } else {
                ARMED
            };
            for pos in [self.min_pos, self.plus_pos] {
                ctx.canvas.push(DrawCommand::Circle {
                    cx: pos * w,
                    cy: h / 2.0,
                    radius: PICKER_RADIUS,
                    color: [base[0], base[1], base[2], a],
                    width: 0.0,
                });
            }
        }
    }
}
