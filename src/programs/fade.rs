//! A display slot that holds one photo and crossfades to the next.

use crate::cache::{ImageCache, ImageId, Mode};
use crate::error::Result;
use crate::render::{DrawCommand, Rect};

use super::ProgramContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Holding,
    Fading,
    Swapped,
}

#[derive(Clone, Debug)]
pub struct FadeSlot {
    pub image: Option<ImageId>,
    /// Chosen early so it can fade in.
    pub incoming: Option<ImageId>,
    /// Weight of `incoming`, 0..=1.
    pub alpha: f32,
    pub since: f64,
    pub hold: f64,
    /// Swap at the next step regardless of the timer.
    pub swap: bool,
}

impl FadeSlot {
    pub fn new(hold: f64) -> Self {
        FadeSlot {
            image: None,
            incoming: None,
            alpha: 0.0,
            since: 0.0,
            hold,
            swap: false,
        }
    }

    pub fn ends_at(&self) -> f64 {
        self.since + self.hold
    }

    pub fn fill(&mut self, cache: &mut ImageCache, now: f64) {
        self.image = cache.next(true);
        self.incoming = cache.next(true);
        self.alpha = 0.0;
        self.since = now;
        self.swap = false;
    }

    /// Drop ids a rescan removed from the catalog. Returns true if any were.
    pub fn forget_missing(&mut self, cache: &ImageCache) -> bool {
        let mut lost = false;
        for id in [&mut self.image, &mut self.incoming] {
            if id.is_some_and(|i| cache.image(i).is_none()) {
                *id = None;
                lost = true;
            }
        }
        lost
    }

    /// Keep the current photo until a few seconds after `now`.
    pub fn hold_off(&mut self, now: f64, switch_time: f64) {
        let until = now + switch_time + 2.0;
        if self.ends_at() < until {
            self.hold = until - self.since;
            self.alpha = 0.0;
        }
    }

    /// Fade in the last `switch_time` seconds of the hold, then swap.
    pub fn step(
        &mut self,
        cache: &mut ImageCache,
        now: f64,
        switch_time: f64,
        default_hold: f64,
    ) -> Result<Step> {
        let fade_from = self.ends_at() - switch_time;
        if !self.swap && now <= fade_from {
            return Ok(Step::Holding);
        }
        self.alpha = ((now - fade_from) / switch_time).clamp(0.0, 1.0) as f32;
        if !self.swap && now <= self.ends_at() {
            return Ok(Step::Fading);
        }

        if let Some(id) = self.image {
            cache.unload(id, Some(self.since), now)?;
        }
        self.image = self.incoming.take().or_else(|| cache.next(true));
        self.incoming = cache.next(true);
        self.alpha = 0.0;
        self.since = now;
        self.hold = default_hold;
        self.swap = false;
        Ok(Step::Swapped)
    }

    /// Unload both photos, crediting the current one with its screen time.
    pub fn release(&mut self, cache: &mut ImageCache, now: f64, default_hold: f64) -> Result<()> {
        self.forget_missing(cache);
        if let Some(id) = self.image.take() {
            cache.unload(id, Some(self.since), now)?;
        }
        if let Some(id) = self.incoming.take() {
            cache.unload(id, None, now)?;
        }
        *self = FadeSlot::new(default_hold);
        Ok(())
    }

    /// Draw the slot's photos as a `size` Fill variant with the top-left at
    /// `pos`, clipped to `mask` in source coordinates.
    pub fn draw(
        &self,
        ctx: &mut ProgramContext<'_>,
        pos: (f32, f32),
        size: (u32, u32),
        mask: Option<Rect>,
    ) {
        let layers = [(self.image, 1.0 - self.alpha), (self.incoming, self.alpha)];
        for (id, alpha) in layers {
            let Some(id) = id else { continue };
            if alpha <= 0.0 {
                continue;
            }
            if let Some(pixels) = ctx.fetch(id, size, Mode::Fill) {
                ctx.canvas.push(DrawCommand::Blit {
                    pixels,
                    x: pos.0,
                    y: pos.1,
                    alpha,
                    mask,
                });
            }
        }
    }
}
