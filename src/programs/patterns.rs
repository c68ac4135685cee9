//! Pattern grid: one large photo on the left and a column of four
//! thumbnails on the right. Slots crossfade on staggered timers; touching
//! the frame re-picks all of them at once.

use crate::cache::ImageCache;
use crate::error::Result;
use crate::render::BLACK;
use crate::touch::InteractionState;

use super::fade::{FadeSlot, Step};
use super::{centred, ProgramContext};

const SLOTS: usize = 5;
const DEFAULT_HOLD: f64 = 30.0;
const SWITCH_TIME: f64 = 4.0;
/// Extra initial hold per slot so the grid doesn't change all at once.
const STAGGER: f64 = 6.0;
const DEBOUNCE: f64 = 0.5;

/// Centre and size of each slot as fractions of the display.
fn layout(index: usize) -> ((f32, f32), (f32, f32)) {
    if index == 0 {
        ((0.4, 0.5), (0.8, 1.0))
    } else {
        ((0.90625, 0.117 + (index - 1) as f32 * 0.256), (0.1875, 0.234))
    }
}

pub struct Patterns {
    slots: Vec<FadeSlot>,
    last_swap: f64,
}

impl Patterns {
    pub fn new() -> Self {
        Patterns {
            slots: vec![FadeSlot::new(DEFAULT_HOLD); SLOTS],
            last_swap: 0.0,
        }
    }

    pub(super) fn update(&mut self, ctx: &mut ProgramContext<'_>, first: bool) -> Result<bool> {
        let now = ctx.now;
        let interactive = ctx.input.state > InteractionState::Rest;
        let mut dirty = first;

        if first {
            for (i, slot) in self.slots.iter_mut().enumerate() {
                slot.fill(ctx.cache, now);
                slot.hold = DEFAULT_HOLD + i as f64 * STAGGER;
            }
            self.last_swap = now;
        }

        let repick = interactive && self.last_swap < now - DEBOUNCE;
        for slot in &mut self.slots {
            slot.forget_missing(ctx.cache);
            if repick || slot.image.is_none() {
                slot.swap = true;
            }
            match slot.step(ctx.cache, now, SWITCH_TIME, DEFAULT_HOLD)? {
                Step::Holding => {}
                Step::Fading => dirty = true,
                Step::Swapped => {
                    dirty = true;
                    self.last_swap = now;
                }
            }
        }

        if dirty {
            self.draw(ctx);
        }
        Ok(dirty)
    }

    pub(super) fn release(&mut self, cache: &mut ImageCache, now: f64) -> Result<()> {
        for slot in &mut self.slots {
            slot.release(cache, now, DEFAULT_HOLD)?;
        }
        Ok(())
    }

    pub(super) fn draw(&self, ctx: &mut ProgramContext<'_>) {
        let (w, h) = ctx.size();
        ctx.canvas.clear(BLACK);
        for (i, slot) in self.slots.iter().enumerate() {
            let ((cx, cy), (sw, sh)) = layout(i);
            let size = ((sw * w).round() as u32, (sh * h).round() as u32);
            let pos = centred(cx * w, cy * h, size);
            slot.draw(ctx, pos, size, None);
        }
    }
}
