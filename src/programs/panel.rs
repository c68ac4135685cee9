//! Pull-down status panel shared by every program.
//!
//! The panel hangs above the display with only its bottom bar able to peek
//! in. Dragging from the top edge pulls it down; releasing past half height
//! leaves it open, otherwise it springs back. An open panel is pushed up again
//! by dragging its bar. While open it shows catalog and sensor status, one
//! button per program, and two hold-to-confirm buttons that restart or power
//! off the frame.
//!
//! Layout coordinates are for an 800x480 display and scale with the canvas.

use crate::clock::stamp;
use crate::render::{Color, DrawCommand, Rect, WHITE};
use crate::sensor::FAR_M;
use crate::touch::InteractionState;

use super::{ProgramContext, ProgramEvent, ProgramKind};

pub const BAR_H: f32 = 32.0;
/// Resting bar position when closed: just above the display.
pub const CLOSED_POS: f32 = -34.0;
/// How far from the bar centre a drag may start and still grab it.
const GRAB_MARGIN: f32 = 22.0;
/// Fraction of the remaining distance covered per frame while settling.
const SETTLE: f32 = 0.2;
const SNAP: f32 = 0.1;
/// Open panel contents are refreshed this often.
const REFRESH_SECS: f64 = 1.0;

const REF_W: f32 = 800.0;
const REF_H: f32 = 480.0;
/// Horizontal span of each program button and the program it selects.
const PROGRAM_BUTTONS: [(f32, f32, usize); 4] = [
    (40.0, 168.0, 1),
    (188.0, 316.0, 2),
    (336.0, 464.0, 3),
    (484.0, 612.0, 0),
];
const BUTTON_ROW: (f32, f32) = (288.0, 416.0);
const HOLD_COLUMN: (f32, f32) = (670.0, 712.0);
const RESTART_ROW: (f32, f32) = (295.0, 347.0);
const POWER_ROW: (f32, f32) = (357.0, 409.0);

const PANEL_BG: Color = [24, 24, 28, 235];
const BAR_BG: Color = [48, 48, 56, 255];
const BUTTON: Color = [70, 70, 80, 255];
const BUTTON_ACTIVE: Color = [40, 110, 200, 255];
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug)]
pub struct StatusPanel {
    /// Top of the bar, in display pixels.
    pos: f32,
    /// Where the bar settles once released.
    neutral: f32,
    settling: bool,
    open: bool,
    last_paint: f64,
}

impl Default for StatusPanel {
    fn default() -> Self {
        StatusPanel {
            pos: CLOSED_POS,
            neutral: CLOSED_POS,
            settling: false,
            open: false,
            last_paint: 0.0,
        }
    }
}

fn open_pos(h: f32) -> f32 {
    h - BAR_H
}

fn within(v: f32, (lo, hi): (f32, f32)) -> bool {
    v > lo && v < hi
}

impl StatusPanel {
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Any part of the panel is on screen.
    pub fn is_visible(&self) -> bool {
        self.pos > -BAR_H
    }

    /// The panel hides everything beneath it.
    pub fn covers(&self, h: f32) -> bool {
        self.pos >= open_pos(h) - SNAP
    }

    pub fn pos(&self) -> f32 {
        self.pos
    }

    /// Start moving towards open or closed. `force` jumps there directly.
    pub fn set_state(&mut self, open: bool, force: bool, h: f32) {
        let target = if open { open_pos(h) } else { CLOSED_POS };
        if open != self.open || force {
            self.neutral = target;
            self.open = open;
            self.settling = true;
        }
        if force {
            self.pos = target;
        }
    }

    pub fn toggle(&mut self, h: f32) {
        self.set_state(!self.open, false, h);
    }

    /// Closed and out of sight, for when the owning program goes inactive.
    pub fn reset(&mut self) {
        *self = StatusPanel::default();
    }

    /// Follow the finger, settle, and turn releases on the open panel into
    /// events. Returns whether the panel needs repainting.
    pub fn update(&mut self, ctx: &mut ProgramContext<'_>) -> bool {
        let (w, h) = ctx.size();
        let input = ctx.input;
        let origin = input.drag_origin.unwrap_or(input.pos);
        let grabbed = input.state >= InteractionState::Dragging
            && (origin.y - (self.neutral + BAR_H / 2.0)).abs() < GRAB_MARGIN;

        if grabbed && (input.state == InteractionState::Dragging || input.fresh_release) {
            self.pos = (input.pos.y - BAR_H / 2.0).clamp(CLOSED_POS, open_pos(h));
            self.settling = true;
            if input.state == InteractionState::ReleasedDrag {
                let open = input.pos.y > h / 2.0;
                self.neutral = if open { open_pos(h) } else { CLOSED_POS };
            }
            self.open = if input.state == InteractionState::Dragging {
                self.pos > 0.0
            } else {
                self.neutral > 0.0
            };
            return true;
        }

        let mut repaint = false;
        if self.settling {
            self.pos += SETTLE * (self.neutral - self.pos);
            if (self.pos - self.neutral).abs() < SNAP {
                self.pos = self.neutral;
                self.settling = false;
            }
            repaint = true;
        }

        if self.open && input.fresh_release {
            self.press(ctx, w, h);
        }
        if self.open && ctx.now - self.last_paint >= REFRESH_SECS {
            repaint = true;
        }
        if repaint {
            self.last_paint = ctx.now;
        }
        repaint
    }

    /// A release over one of the open panel's buttons.
    fn press(&self, ctx: &mut ProgramContext<'_>, w: f32, h: f32) {
        let (sx, sy) = (w / REF_W, h / REF_H);
        let top = self.pos - open_pos(h);
        let x = ctx.input.pos.x / sx;
        let y = (ctx.input.pos.y - top) / sy;
        match ctx.input.state {
            InteractionState::ReleasedTap if within(y, BUTTON_ROW) => {
                if let Some(&(_, _, index)) = PROGRAM_BUTTONS.iter().find(|b| within(x, (b.0, b.1))) {
                    ctx.events.push(ProgramEvent::Prefer(index));
                }
            }
            InteractionState::ReleasedHold if within(x, HOLD_COLUMN) => {
                if within(y, RESTART_ROW) {
                    ctx.events.push(ProgramEvent::Exit { shutdown: false });
                } else if within(y, POWER_ROW) {
                    ctx.events.push(ProgramEvent::Exit { shutdown: true });
                }
            }
            _ => {}
        }
    }

    pub fn draw(&self, ctx: &mut ProgramContext<'_>, current: ProgramKind) {
        if !self.is_visible() {
            return;
        }
        let (w, h) = ctx.size();
        let (sx, sy) = (w / REF_W, h / REF_H);
        let top = self.pos - open_pos(h);
        let at = |x: f32, y: f32| (x * sx, top + y * sy);

        ctx.canvas.push(DrawCommand::Rect {
            rect: Rect::new(0.0, top, w, open_pos(h)),
            color: PANEL_BG,
        });
        ctx.canvas.push(DrawCommand::Rect {
            rect: Rect::new(0.0, self.pos, w, BAR_H),
            color: BAR_BG,
        });
        label(ctx, "status".into(), (8.0, self.pos + 8.0));
        label(ctx, format!("v{}", VERSION), (w - 80.0, self.pos + 8.0));

        if self.pos > 0.0 {
            let photos = format!("{} photos", ctx.cache.visible_count());
            let distance = format!("{:.2} m", ctx.distance);
            let memory = format!("{:.0}% memory", ctx.memory_percent);
            let time = stamp(ctx.now);
            label(ctx, photos, at(86.0, 44.0));
            label(ctx, distance, at(283.0, 44.0));
            let (x, y) = at(283.0, 66.0);
            ctx.canvas.push(DrawCommand::Slider {
                rect: Rect::new(x, y, 110.0 * sx, 5.0),
                value: (ctx.distance / FAR_M).clamp(0.0, 1.0),
                color: WHITE,
            });
            label(ctx, memory, at(283.0, 106.0));
            let (x, y) = at(283.0, 128.0);
            ctx.canvas.push(DrawCommand::Slider {
                rect: Rect::new(x, y, 110.0 * sx, 5.0),
                value: (ctx.memory_percent / 100.0).clamp(0.0, 1.0),
                color: WHITE,
            });
            label(ctx, time, at(86.0, 169.0));

            for &(x0, x1, index) in &PROGRAM_BUTTONS {
                let kind = ProgramKind::ALL[index];
                let (x, y) = at(x0, BUTTON_ROW.0);
                ctx.canvas.push(DrawCommand::Rect {
                    rect: Rect::new(x, y, (x1 - x0) * sx, (BUTTON_ROW.1 - BUTTON_ROW.0) * sy),
                    color: if kind == current { BUTTON_ACTIVE } else { BUTTON },
                });
                label(ctx, kind.name().into(), (x + 8.0, y + 8.0));
            }
            for row in [RESTART_ROW, POWER_ROW] {
                let (cx, cy) = at((HOLD_COLUMN.0 + HOLD_COLUMN.1) / 2.0, (row.0 + row.1) / 2.0);
                ctx.canvas.push(DrawCommand::Circle {
                    cx,
                    cy,
                    radius: 21.0 * sy,
                    color: WHITE,
                    width: 3.0,
                });
            }
        }
        ctx.canvas.mark_full();
    }
}

fn label(ctx: &mut ProgramContext<'_>, text: String, (x, y): (f32, f32)) {
    ctx.canvas.push(DrawCommand::Text {
        text,
        x,
        y,
        color: WHITE,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::cache_with;
    use crate::cache::ImageCache;
    use crate::programs::tests::{idle, touching, H, W};
    use crate::render::Canvas;
    use crate::touch::{InputSnapshot, Sample};

    fn step(
        panel: &mut StatusPanel,
        cache: &mut ImageCache,
        input: InputSnapshot,
        now: f64,
    ) -> (bool, Vec<ProgramEvent>) {
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
        let repaint = panel.update(&mut ctx);
        (repaint, events)
    }

    /// A drag from `from_y` to `to_y`, either still down or just released.
    fn drag(from_y: f32, to_y: f32, state: InteractionState, now: f64) -> InputSnapshot {
        InputSnapshot {
            drag_origin: Some(Sample { x: 400.0, y: from_y, t: now - 0.5 }),
            ..touching(state, 400.0, to_y, now)
        }
    }

    fn settle(panel: &mut StatusPanel, cache: &mut ImageCache, now: f64) {
        for i in 0..60 {
            step(panel, cache, idle(now), now + i as f64 * 0.04);
        }
    }

    fn opened(cache: &mut ImageCache) -> StatusPanel {
        let mut panel = StatusPanel::default();
        panel.set_state(true, true, H as f32);
        step(&mut panel, cache, idle(0.0), 0.0);
        panel
    }

    #[test]
    fn pull_past_half_opens() {
        let (_d, mut cache) = cache_with(1);
        let mut panel = StatusPanel::default();
        assert!(!panel.is_visible());

        let (repaint, _) = step(&mut panel, &mut cache, drag(2.0, 200.0, InteractionState::Dragging, 1.0), 1.0);
        assert!(repaint);
        assert_eq!(panel.pos(), 184.0);
        assert!(panel.is_open());

        step(&mut panel, &mut cache, drag(2.0, 300.0, InteractionState::ReleasedDrag, 1.1), 1.1);
        settle(&mut panel, &mut cache, 1.2);
        assert!(panel.is_open());
        assert_eq!(panel.pos(), 448.0);
        assert!(panel.covers(H as f32));
    }

    #[test]
    fn short_pull_springs_back() {
        let (_d, mut cache) = cache_with(1);
        let mut panel = StatusPanel::default();
        step(&mut panel, &mut cache, drag(2.0, 150.0, InteractionState::Dragging, 1.0), 1.0);
        step(&mut panel, &mut cache, drag(2.0, 180.0, InteractionState::ReleasedDrag, 1.1), 1.1);
        assert!(!panel.is_open());
        settle(&mut panel, &mut cache, 1.2);
        assert_eq!(panel.pos(), CLOSED_POS);
        assert!(!panel.is_visible());
    }

    #[test]
    fn drags_elsewhere_leave_it_alone() {
        let (_d, mut cache) = cache_with(1);
        let mut panel = StatusPanel::default();
        let (repaint, _) = step(&mut panel, &mut cache, drag(200.0, 400.0, InteractionState::Dragging, 1.0), 1.0);
        assert!(!repaint);
        assert_eq!(panel.pos(), CLOSED_POS);
    }

    #[test]
    fn bar_drag_closes_an_open_panel() {
        let (_d, mut cache) = cache_with(1);
        let mut panel = opened(&mut cache);
        step(&mut panel, &mut cache, drag(465.0, 100.0, InteractionState::Dragging, 1.0), 1.0);
        step(&mut panel, &mut cache, drag(465.0, 60.0, InteractionState::ReleasedDrag, 1.1), 1.1);
        assert!(!panel.is_open());
        settle(&mut panel, &mut cache, 1.2);
        assert_eq!(panel.pos(), CLOSED_POS);
    }

    #[test]
    fn toggle_animates_both_ways() {
        let (_d, mut cache) = cache_with(1);
        let mut panel = StatusPanel::default();
        panel.toggle(H as f32);
        assert!(panel.is_open());
        let (repaint, _) = step(&mut panel, &mut cache, idle(1.0), 1.0);
        assert!(repaint);
        assert!(panel.pos() > CLOSED_POS && panel.pos() < 448.0);
        settle(&mut panel, &mut cache, 1.1);
        assert_eq!(panel.pos(), 448.0);

        panel.toggle(H as f32);
        settle(&mut panel, &mut cache, 5.0);
        assert_eq!(panel.pos(), CLOSED_POS);
        // once settled closed there is nothing more to paint
        let (repaint, _) = step(&mut panel, &mut cache, idle(9.0), 9.0);
        assert!(!repaint);
    }

    #[test]
    fn tap_on_program_button_prefers_it() {
        let (_d, mut cache) = cache_with(1);
        let mut panel = opened(&mut cache);
        let tap = |x| touching(InteractionState::ReleasedTap, x, 350.0, 2.0);
        assert_eq!(step(&mut panel, &mut cache, tap(100.0), 2.0).1, vec![ProgramEvent::Prefer(1)]);
        assert_eq!(step(&mut panel, &mut cache, tap(550.0), 2.0).1, vec![ProgramEvent::Prefer(0)]);
        assert!(step(&mut panel, &mut cache, tap(178.0), 2.0).1.is_empty());
    }

    #[test]
    fn holds_restart_or_power_off() {
        let (_d, mut cache) = cache_with(1);
        let mut panel = opened(&mut cache);
        let hold = |y| touching(InteractionState::ReleasedHold, 690.0, y, 2.0);
        assert_eq!(
            step(&mut panel, &mut cache, hold(320.0), 2.0).1,
            vec![ProgramEvent::Exit { shutdown: false }]
        );
        assert_eq!(
            step(&mut panel, &mut cache, hold(380.0), 2.0).1,
            vec![ProgramEvent::Exit { shutdown: true }]
        );
        // a tap on restart is not enough
        let tap = touching(InteractionState::ReleasedTap, 690.0, 320.0, 2.0);
        assert!(step(&mut panel, &mut cache, tap, 2.0).1.is_empty());
    }

    #[test]
    fn closed_panel_ignores_button_presses() {
        let (_d, mut cache) = cache_with(1);
        let mut panel = StatusPanel::default();
        let hold = touching(InteractionState::ReleasedHold, 690.0, 320.0, 2.0);
        assert!(step(&mut panel, &mut cache, hold, 2.0).1.is_empty());
    }

    #[test]
    fn reset_hides_at_once() {
        let (_d, mut cache) = cache_with(1);
        let mut panel = opened(&mut cache);
        panel.reset();
        assert!(!panel.is_open());
        assert!(!panel.is_visible());
        assert!(!step(&mut panel, &mut cache, idle(5.0), 5.0).0);
    }

    #[test]
    fn open_panel_draws_buttons() {
        let (_d, mut cache) = cache_with(1);
        let panel = opened(&mut cache);
        let mut canvas = Canvas::new(W, H);
        let mut events = Vec::new();
        let mut ctx = ProgramContext {
            cache: &mut cache,
            input: idle(3.0),
            distance: 2.0,
            memory_percent: 40.0,
            now: 3.0,
            canvas: &mut canvas,
            events: &mut events,
        };
        panel.draw(&mut ctx, ProgramKind::Soup);
        assert!(canvas.needs_flush());
        let highlighted = canvas
            .commands()
            .iter()
            .filter(|c| matches!(c, DrawCommand::Rect { color, .. } if *color == BUTTON_ACTIVE))
            .count();
        assert_eq!(highlighted, 1);
        assert!(canvas
            .commands()
            .iter()
            .any(|c| matches!(c, DrawCommand::Text { text, .. } if text == "40% memory")));
    }
}
