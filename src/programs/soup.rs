//! Photo soup: round photos drifting across the screen, nudged by mutual
//! attraction and repulsion. A photo can be grabbed and flung off screen,
//! which costs it some rating and removes it from the soup.

use std::f32::consts::PI;

use crate::cache::{ImageCache, ImageId, Mode};
use crate::error::Result;
use crate::render::{DrawCommand, Rect, BLACK, WHITE};
use crate::touch::{InputSnapshot, InteractionState};

use super::{centred, ProgramContext};

const DEFAULT_GOAL: usize = 3;
const MIN_GOAL: usize = 2;
const MAX_GOAL: usize = 6;
const MAX_GOAL_DEBUG: usize = 11;
/// Seconds without touches, and between additions, before the soup grows.
const IDLE_GROW: (f64, f64) = (900.0, 2700.0);
const IDLE_GROW_DEBUG: (f64, f64) = (20.0, 45.0);
/// A photo leaving the screen this soon after a touch was flung.
const FLING_WINDOW: f64 = 10.0;
const FLING_PENALTY: f32 = 0.1;
const ADD_DEBOUNCE: f64 = 0.5;
/// Add button hit area: left of x, below y.
const ADD_BUTTON: (f32, f32) = (90.0, 400.0);
/// Diameters are rounded to this many pixels so a slowly easing size reuses
/// cached variants.
const SIZE_STEP: f32 = 8.0;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Floater {
    key: u64,
    image: Option<ImageId>,
    since: f64,
    x: f32,
    y: f32,
    /// Heading in radians, screen y pointing up.
    angle: f32,
    speed: f32,
    size: f32,
    user_control: bool,
    user_last_ix: f64,
}

pub struct Soup {
    floaters: Vec<Floater>,
    next_key: u64,
    grabbed: Option<u64>,
    goal: usize,
    max_goal: usize,
    base_size: f32,
    last_addition: f64,
    idle_grow: (f64, f64),
}

fn angle(ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    (ay - by).atan2(bx - ax)
}

fn distance(ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    ((bx - ax).powi(2) + (ay - by).powi(2)).sqrt()
}

impl Soup {
    pub fn new(debug: bool) -> Self {
        Soup {
            floaters: Vec::new(),
            next_key: 0,
            grabbed: None,
            goal: DEFAULT_GOAL,
            max_goal: if debug { MAX_GOAL_DEBUG } else { MAX_GOAL },
            base_size: 1.0,
            last_addition: 0.0,
            idle_grow: if debug { IDLE_GROW_DEBUG } else { IDLE_GROW },
        }
    }

    pub fn goal(&self) -> usize {
        self.goal
    }

    pub fn len(&self) -> usize {
        self.floaters.len()
    }

    fn diameter(&self, f: &Floater, height: f32) -> f32 {
        f.size * self.base_size * height
    }

    fn on_screen(&self, f: &Floater, w: f32, h: f32) -> bool {
        let r = self.diameter(f, h) / 2.0;
        !(f.x + r < 0.0 || f.x - r > w || f.y + r < 0.0 || f.y - r > h)
    }

    pub(super) fn update(&mut self, ctx: &mut ProgramContext<'_>, first: bool) -> Result<bool> {
        let now = ctx.now;
        let (w, h) = ctx.size();
        let input = ctx.input;
        let mut dirty = first;

        let base = 2.3 / self.floaters.len().max(1) as f32 + 0.1;
        self.base_size += 0.2 * ((0.8 * base).clamp(0.1, 2.0) - self.base_size);

        let (idle, gap) = self.idle_grow;
        if input.last_touch < now - idle && self.last_addition < now - gap {
            self.goal = (self.goal + 1).min(self.max_goal);
        }

        if input.fresh_release
            && input.state == InteractionState::ReleasedTap
            && input.pos.x < ADD_BUTTON.0
            && input.pos.y > ADD_BUTTON.1
            && self.last_addition < now - ADD_DEBOUNCE
        {
            self.goal = (self.goal + 1).min(self.max_goal);
            ctx.action("ps.add", format!("new total of {} images", self.floaters.len()));
        }

        self.handle_drag(input, now, h);

        for f in &mut self.floaters {
            if f.image.is_some_and(|id| ctx.cache.image(id).is_none()) {
                f.image = None;
            }
        }

        if self.goal > self.floaters.len() {
            self.floaters.push(Floater {
                key: self.next_key,
                image: None,
                since: now,
                x: 0.0,
                y: 0.0,
                angle: 0.0,
                speed: 0.0,
                size: 1.0,
                user_control: false,
                user_last_ix: 0.0,
            });
            self.next_key += 1;
            self.last_addition = now;
        }

        let mut i = 0;
        while i < self.floaters.len() {
            let f = self.floaters[i];
            if f.image.is_none() || !self.on_screen(&f, w, h) {
                dirty = true;
                if self.goal >= self.floaters.len() && now - f.user_last_ix >= FLING_WINDOW {
                    self.renew(ctx, i, w, h)?;
                } else {
                    if self.goal >= self.floaters.len() {
                        self.fling(ctx, i)?;
                    }
                    if let Some(id) = f.image {
                        ctx.cache.unload(id, Some(f.since), now)?;
                    }
                    if self.grabbed == Some(f.key) {
                        self.grabbed = None;
                    }
                    self.floaters.remove(i);
                    continue;
                }
            } else if self.drift(ctx.cache, i, w, h) {
                dirty = true;
            }
            i += 1;
        }

        if dirty {
            self.draw(ctx);
        }
        Ok(dirty)
    }

    fn handle_drag(&mut self, input: InputSnapshot, now: f64, h: f32) {
        if input.state >= InteractionState::Dragging && input.state < InteractionState::Released {
            match self.grabbed.and_then(|k| self.floaters.iter().position(|f| f.key == k)) {
                None => {
                    let (px, py) = (input.pos.x, input.pos.y);
                    let mut best: Option<(usize, f32)> = None;
                    for (i, f) in self.floaters.iter().enumerate() {
                        let d = distance(px, py, f.x, f.y);
                        if d < self.diameter(f, h) / 2.0 && best.is_none_or(|(_, b)| d < b) {
                            best = Some((i, d));
                        }
                    }
                    if let Some((i, _)) = best {
                        let last = self.floaters.len() - 1;
                        self.floaters.swap(i, last);
                        let f = &mut self.floaters[last];
                        f.user_control = true;
                        f.user_last_ix = now;
                        self.grabbed = Some(f.key);
                    }
                }
                Some(i) => {
                    let f = &mut self.floaters[i];
                    f.user_last_ix = now;
                    f.angle = angle(f.x, f.y, input.pos.x, input.pos.y);
                    f.speed = input.magnitude;
                }
            }
        } else if input.state >= InteractionState::Released {
            if let Some(k) = self.grabbed.take() {
                if let Some(f) = self.floaters.iter_mut().find(|f| f.key == k) {
                    f.user_control = false;
                }
            }
        }
    }

    fn renew(&mut self, ctx: &mut ProgramContext<'_>, i: usize, w: f32, h: f32) -> Result<()> {
        let now = ctx.now;
        let f = self.floaters[i];
        if let Some(id) = f.image {
            ctx.cache.unload(id, Some(f.since), now)?;
        }
        let cache = &mut *ctx.cache;
        let x = cache.random_range(0.0, 1.0) as f32 * w;
        let y = cache.random_range(0.0, 1.0) as f32 * h;
        let heading = 2.0 * PI * cache.random_range(0.0, 1.0) as f32;
        let speed = (1.3 * cache.random_range(0.0, 1.0) as f32).max(0.15);
        let image = cache.next(true);

        let f = &mut self.floaters[i];
        f.image = image;
        f.since = now;
        f.x = x;
        f.y = y;
        f.angle = heading;
        f.speed = speed;
        Ok(())
    }

    /// A photo thrown off screen: one fewer in the soup, and it loses rating
    /// to the ones that stayed.
    fn fling(&mut self, ctx: &mut ProgramContext<'_>, i: usize) -> Result<()> {
        let Some(id) = self.floaters[i].image else {
            return Ok(());
        };
        let n = self.floaters.len();
        self.goal = self.goal.saturating_sub(1).max(MIN_GOAL);
        ctx.cache.rate(id, false, FLING_PENALTY)?;
        if n > 1 {
            let share = FLING_PENALTY / (n - 1) as f32;
            for (j, other) in self.floaters.iter().enumerate() {
                if j == i {
                    continue;
                }
                if let Some(o) = other.image {
                    ctx.cache.rate(o, true, share)?;
                }
            }
        }
        let detail = format!("{}, amid {} images", ctx.file_name(id), n);
        ctx.action("ps.flung", detail);
        Ok(())
    }

    /// Move floater `i` one step. Returns whether it moved.
    fn drift(&mut self, cache: &ImageCache, i: usize, w: f32, h: f32) -> bool {
        let n = self.floaters.len();
        let (cx, cy) = (w / 2.0, h / 2.0);
        let mut f = self.floaters[i];

        if let Some(img) = f.image.and_then(|id| cache.image(id)) {
            f.size = 1.0 + img.rating / 3.0;
        }

        if !f.user_control && n <= 4 {
            let from_centre = distance(f.x, f.y, cx, cy);
            if from_centre > 0.9 * h {
                let k = (from_centre / h).clamp(0.0, 0.01);
                f.angle = (1.0 - k) * f.angle + k * angle(f.x, f.y, cx, cy);
            }
        }

        let mut vx = f.speed * f.angle.cos();
        let mut vy = -f.speed * f.angle.sin();

        if !f.user_control {
            for (j, o) in self.floaters.iter().enumerate() {
                if j == i {
                    continue;
                }
                let d = distance(f.x, f.y, o.x, o.y);
                let attraction = if f.user_control || o.user_control {
                    -0.0002 * d
                } else {
                    0.0001 * d
                };
                let gap = (d - (self.diameter(&f, h) + self.diameter(o, h)) / 2.0).max(0.05);
                let force = attraction - 0.005 / gap.powi(2);
                let a = angle(f.x, f.y, o.x, o.y);
                vx += force * a.cos();
                vy -= force * a.sin();
            }
        }

        f.x += vx;
        f.y += vy;
        self.floaters[i] = f;
        vx != 0.0 || vy != 0.0
    }

    pub(super) fn release(&mut self, cache: &mut ImageCache, now: f64) -> Result<()> {
        for f in self.floaters.drain(..) {
            if let Some(id) = f.image.filter(|id| cache.image(*id).is_some()) {
                cache.unload(id, Some(f.since), now)?;
            }
        }
        self.grabbed = None;
        self.goal = DEFAULT_GOAL;
        Ok(())
    }

    pub(super) fn draw(&self, ctx: &mut ProgramContext<'_>) {
        let (_, h) = ctx.size();
        ctx.canvas.clear(BLACK);
        for f in &self.floaters {
            let Some(id) = f.image else { continue };
            let d = ((self.diameter(f, h) / SIZE_STEP).round() * SIZE_STEP).max(SIZE_STEP) as u32;
            if let Some(pixels) = ctx.fetch(id, (d, d), Mode::Circular) {
                let (x, y) = centred(f.x, f.y, (d, d));
                ctx.canvas.blit(pixels, x, y, 1.0);
            }
        }

        if self.goal < self.max_goal {
            let (cx, cy) = (ADD_BUTTON.0 / 2.0, h - (h - ADD_BUTTON.1) / 2.0);
            ctx.canvas.push(DrawCommand::Circle {
                cx,
                cy,
                radius: 26.0,
                color: WHITE,
                width: 3.0,
            });
            ctx.canvas.push(DrawCommand::Rect {
                rect: Rect::new(cx - 12.0, cy - 1.5, 24.0, 3.0),
                color: WHITE,
            });
            ctx.canvas.push(DrawCommand::Rect {
                rect: Rect::new(cx - 1.5, cy - 12.0, 3.0, 24.0),
                color: WHITE,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::cache_with;
    use crate::programs::tests::{idle, touching, H, W};
    use crate::programs::{ProgramContext, ProgramEvent};
    use crate::render::Canvas;

    fn step(
        s: &mut Soup,
        cache: &mut ImageCache,
        input: InputSnapshot,
        now: f64,
        first: bool,
    ) -> Vec<ProgramEvent> {
        let mut canvas = Canvas::new(W, H);
        let mut events = Vec::new();
        let mut ctx = ProgramContext {
            cache,
            input,
            distance: 2.0,
            memory_percent: 40.0,
            now,
            canvas: &mut canvas,
            events: &mut events,
        };
        s.update(&mut ctx, first).unwrap();
        events
    }

    /// Settle a fresh soup at `t0` with the default goal.
    fn settled(cache: &mut ImageCache, t0: f64) -> Soup {
        let mut s = Soup::new(false);
        let mut input = idle(t0);
        input.last_touch = t0;
        step(&mut s, cache, input, t0, true);
        for k in 1..5 {
            let t = t0 + k as f64 * 0.04;
            step(&mut s, cache, input, t, false);
        }
        s
    }

    // ── geometry ──

    #[test]
    fn angles_point_up_for_smaller_y() {
        assert!((angle(0.0, 0.0, 10.0, 0.0)).abs() < 1e-6);
        assert!((angle(0.0, 10.0, 0.0, 0.0) - PI / 2.0).abs() < 1e-6);
        assert!((distance(0.0, 0.0, 3.0, 4.0) - 5.0).abs() < 1e-6);
    }

    // ── population ──

    #[test]
    fn grows_to_goal_one_per_frame() {
        let (_d, mut cache) = cache_with(25);
        let mut s = Soup::new(false);
        let mut input = idle(0.0);
        input.last_touch = 0.0;
        step(&mut s, &mut cache, input, 0.0, true);
        assert_eq!(s.len(), 1);
        step(&mut s, &mut cache, input, 0.04, false);
        step(&mut s, &mut cache, input, 0.08, false);
        step(&mut s, &mut cache, input, 0.12, false);
        assert_eq!(s.len(), 3);
        assert!(s.floaters.iter().all(|f| f.image.is_some()));
    }

    #[test]
    fn add_button_raises_goal() {
        let (_d, mut cache) = cache_with(25);
        let mut s = settled(&mut cache, 100.0);
        let tap = touching(InteractionState::ReleasedTap, 40.0, 450.0, 101.0);
        let events = step(&mut s, &mut cache, tap, 101.0, false);
        assert_eq!(s.goal(), 4);
        assert!(matches!(&events[..], [ProgramEvent::Action { kind: "ps.add", .. }]));
        // the same tap seen again is ignored
        let mut again = tap;
        again.fresh_release = false;
        step(&mut s, &mut cache, again, 101.04, false);
        assert_eq!(s.goal(), 4);
    }

    #[test]
    fn goal_is_capped() {
        let (_d, mut cache) = cache_with(25);
        let mut s = settled(&mut cache, 100.0);
        for k in 0..20 {
            let t = 200.0 + k as f64;
            let tap = touching(InteractionState::ReleasedTap, 40.0, 450.0, t);
            step(&mut s, &mut cache, tap, t, false);
        }
        assert_eq!(s.goal(), MAX_GOAL);
    }

    #[test]
    fn idle_soup_grows_slowly() {
        let (_d, mut cache) = cache_with(25);
        let mut s = settled(&mut cache, 100.0);
        let quiet = idle(5000.0);
        step(&mut s, &mut cache, quiet, 5000.0, false);
        assert_eq!(s.goal(), 4);
        step(&mut s, &mut cache, quiet, 5001.0, false);
        assert_eq!(s.goal(), 4);
    }

    // ── interaction ──

    #[test]
    fn grab_and_fling() {
        let (_d, mut cache) = cache_with(25);
        let mut s = settled(&mut cache, 100.0);
        let n = s.len();
        let target = s.floaters[0];
        let others: Vec<ImageId> = s.floaters[1..].iter().filter_map(|f| f.image).collect();

        let grab = touching(InteractionState::Dragging, target.x, target.y, 101.0);
        step(&mut s, &mut cache, grab, 101.0, false);
        let held = *s.floaters.last().unwrap();
        assert_eq!(held.key, target.key);
        assert!(held.user_control);

        // throw it off the left edge
        let mut pull = touching(InteractionState::Dragging, -5000.0, held.y, 101.1);
        pull.magnitude = 5000.0;
        step(&mut s, &mut cache, pull, 101.1, false);
        let release = touching(InteractionState::ReleasedDrag, -5000.0, held.y, 101.2);
        let events = step(&mut s, &mut cache, release, 101.2, false);

        assert!(s.floaters.iter().all(|f| f.key != target.key));
        assert_eq!(s.len(), n - 1);
        assert_eq!(s.goal(), MIN_GOAL);
        let flung = target.image.unwrap();
        assert!((cache.image(flung).unwrap().rating + FLING_PENALTY).abs() < 1e-6);
        for o in others {
            assert!(cache.image(o).unwrap().rating > 0.0);
        }
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgramEvent::Action { kind: "ps.flung", .. })));
    }

    #[test]
    fn release_resets_goal_and_unloads() {
        let (_d, mut cache) = cache_with(25);
        let mut s = settled(&mut cache, 100.0);
        s.goal = 5;
        s.release(&mut cache, 130.0).unwrap();
        assert_eq!(s.len(), 0);
        assert_eq!(s.goal(), DEFAULT_GOAL);
        assert_eq!(cache.loaded_count(), 0);
    }
}
