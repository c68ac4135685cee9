//! Touch gesture recognizer.
//!
//! The touch driver runs on its own thread and pushes immutable
//! [`TouchEvent`]s through a [`TouchFeed`]. The frame loop calls
//! [`Recognizer::update`] once per tick, which drains the channel and advances
//! the interaction state machine, so everything a program reads from the
//! resulting [`InputSnapshot`] is consistent and at most one frame old.

use std::sync::mpsc;

use log::debug;

/// Straight-line distance beyond which a release counts as a drag.
pub const DRAG_DISTANCE: f32 = 30.0;
/// Releases quicker than this (and short) are taps, slower ones holds.
pub const TAP_SECS: f64 = 1.5;
/// Without samples for this long, a non-dragging state falls back to REST.
pub const REST_TIMEOUT: f64 = 0.25;
/// An activity window closes after this much silence.
pub const ACTIVITY_GAP: f64 = 15.0;
/// Activity windows at or below this length are not reported.
pub const ACTIVITY_MIN: f64 = 2.0;

/// Ordered: everything from `Released` on is a released state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum InteractionState {
    Rest,
    Moving,
    Dragging,
    Released,
    ReleasedTap,
    ReleasedHold,
    ReleasedDrag,
}

impl InteractionState {
    pub fn is_released(self) -> bool {
        self >= InteractionState::Released
    }

    /// The user is touching or moving right now.
    pub fn is_engaged(self) -> bool {
        self != InteractionState::Rest && self < InteractionState::Released
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub x: f32,
    pub y: f32,
    pub t: f64,
}

impl Sample {
    pub fn distance(&self, other: &Sample) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TouchKind {
    Press,
    Move,
    Release,
}

/// One raw sample from the driver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TouchEvent {
    pub kind: TouchKind,
    pub slot: u8,
    pub x: f32,
    pub y: f32,
    pub t: f64,
    pub valid: bool,
}

/// Producer handle given to the touch driver thread.
#[derive(Clone)]
pub struct TouchFeed(mpsc::Sender<TouchEvent>);

impl TouchFeed {
    /// Returns false once the recognizer is gone.
    pub fn send(&self, ev: TouchEvent) -> bool {
        self.0.send(ev).is_ok()
    }

    pub fn press(&self, slot: u8, x: f32, y: f32, t: f64) -> bool {
        self.emit(TouchKind::Press, slot, x, y, t)
    }

    pub fn move_to(&self, slot: u8, x: f32, y: f32, t: f64) -> bool {
        self.emit(TouchKind::Move, slot, x, y, t)
    }

    pub fn release(&self, slot: u8, x: f32, y: f32, t: f64) -> bool {
        self.emit(TouchKind::Release, slot, x, y, t)
    }

    fn emit(&self, kind: TouchKind, slot: u8, x: f32, y: f32, t: f64) -> bool {
        self.send(TouchEvent {
            kind,
            slot,
            x,
            y,
            t,
            valid: true,
        })
    }
}

/// What the recognizer tells its owner after an update.
#[derive(Clone, Debug, PartialEq)]
pub enum TouchSignal {
    /// The chord slot was released: go to the next program.
    NextProgram,
    /// An activity window longer than [`ACTIVITY_MIN`] just closed.
    ActivityEnded { secs: f64 },
}

/// Read-only view handed to programs each frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputSnapshot {
    pub state: InteractionState,
    pub pos: Sample,
    /// Pixels moved since the previous update.
    pub magnitude: f32,
    /// First sample of the current or just-finished drag.
    pub drag_origin: Option<Sample>,
    pub last_touch: f64,
    /// True only on the update that processed a release.
    pub fresh_release: bool,
}

impl Default for InputSnapshot {
    fn default() -> Self {
        InputSnapshot {
            state: InteractionState::Rest,
            pos: Sample {
                x: 0.0,
                y: 0.0,
                t: 0.0,
            },
            magnitude: 0.0,
            drag_origin: None,
            last_touch: 0.0,
            fresh_release: false,
        }
    }
}

impl InputSnapshot {
    /// Seconds since the surface was last touched.
    pub fn idle_for(&self, now: f64) -> f64 {
        now - self.last_touch
    }
}

pub struct Recognizer {
    rx: mpsc::Receiver<TouchEvent>,
    chord_slot: u8,
    state: InteractionState,
    pos: Sample,
    last_pos: Sample,
    magnitude: f32,
    drag: Vec<Sample>,
    last_touch: f64,
    activity_start: Option<f64>,
    fresh_release: bool,
    next_requested: bool,
}

impl Recognizer {
    /// `now` seeds the last-touch time, so a freshly started frame counts as
    /// just touched.
    pub fn new(chord_slot: u8, now: f64) -> (Self, TouchFeed) {
        let (tx, rx) = mpsc::channel();
        let origin = Sample { x: 0.0, y: 0.0, t: now };
        (
            Recognizer {
                rx,
                chord_slot,
                state: InteractionState::Rest,
                pos: origin,
                last_pos: origin,
                magnitude: 0.0,
                drag: Vec::new(),
                last_touch: now,
                activity_start: None,
                fresh_release: false,
                next_requested: false,
            },
            TouchFeed(tx),
        )
    }

    pub fn state(&self) -> InteractionState {
        self.state
    }

    pub fn drag_path(&self) -> &[Sample] {
        &self.drag
    }

    pub fn last_touch(&self) -> f64 {
        self.last_touch
    }

    pub fn snapshot(&self) -> InputSnapshot {
        InputSnapshot {
            state: self.state,
            pos: self.pos,
            magnitude: self.magnitude,
            drag_origin: self.drag.first().copied(),
            last_touch: self.last_touch,
            fresh_release: self.fresh_release,
        }
    }

    /// Drain pending samples and advance timers.
    pub fn update(&mut self, now: f64) -> Vec<TouchSignal> {
        self.fresh_release = false;
        while let Ok(ev) = self.rx.try_recv() {
            self.handle(ev);
        }

        let mut signals = Vec::new();
        if std::mem::take(&mut self.next_requested) {
            signals.push(TouchSignal::NextProgram);
        }

        if self.last_touch < now - REST_TIMEOUT && self.state != InteractionState::Dragging {
            self.state = InteractionState::Rest;
        } else if self.state.is_engaged() {
            if self.activity_start.is_none() {
                self.activity_start = Some(now);
            }
            self.magnitude = self.pos.distance(&self.last_pos);
        }

        if let Some(start) = self.activity_start {
            if self.last_touch < now - ACTIVITY_GAP {
                let secs = self.last_touch - start;
                if secs > ACTIVITY_MIN {
                    signals.push(TouchSignal::ActivityEnded { secs });
                }
                self.activity_start = None;
            }
        }

        self.last_pos = self.pos;
        signals
    }

    fn handle(&mut self, ev: TouchEvent) {
        if !ev.valid {
            return;
        }
        self.last_touch = self.last_touch.max(ev.t);

        if ev.slot != 0 {
            if ev.slot == self.chord_slot && ev.kind == TouchKind::Release {
                debug!("touch: chord release on slot {}", ev.slot);
                self.next_requested = true;
            }
            return;
        }

        self.pos = Sample {
            x: ev.x,
            y: ev.y,
            t: ev.t,
        };
        match ev.kind {
            TouchKind::Press => {
                self.drag.clear();
                self.drag.push(self.pos);
                self.state = InteractionState::Dragging;
            }
            TouchKind::Move => match self.state {
                // pointer motion without a press, e.g. a mouse
                s if s == InteractionState::Rest || s.is_released() => {
                    self.state = InteractionState::Moving;
                }
                s => {
                    // a second move sample means the finger is down
                    if s == InteractionState::Moving {
                        self.drag.clear();
                    }
                    self.state = InteractionState::Dragging;
                    self.drag.push(self.pos);
                }
            },
            TouchKind::Release => {
                self.drag.push(self.pos);
                self.state = classify(&self.drag);
                self.fresh_release = true;
            }
        }
    }
}

/// Release classification from the drag path's endpoints.
pub fn classify(path: &[Sample]) -> InteractionState {
    let (first, last) = match (path.first(), path.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return InteractionState::ReleasedTap,
    };
    if first.distance(last) > DRAG_DISTANCE {
        InteractionState::ReleasedDrag
    } else if last.t - first.t < TAP_SECS {
        InteractionState::ReleasedTap
    } else {
        InteractionState::ReleasedHold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(x: f32, y: f32, t: f64) -> Sample {
        Sample { x, y, t }
    }

    // ── classification ──────────────────────────────────────────────────

    #[test]
    fn short_quick_release_is_tap() {
        let t0 = 1000.0;
        assert_eq!(
            classify(&[s(0.0, 0.0, t0), s(5.0, 5.0, t0 + 0.1)]),
            InteractionState::ReleasedTap
        );
    }

    #[test]
    fn short_slow_release_is_hold() {
        let t0 = 1000.0;
        assert_eq!(
            classify(&[s(0.0, 0.0, t0), s(5.0, 5.0, t0 + 2.0)]),
            InteractionState::ReleasedHold
        );
    }

    #[test]
    fn long_release_is_drag() {
        let t0 = 1000.0;
        assert_eq!(
            classify(&[s(0.0, 0.0, t0), s(100.0, 0.0, t0 + 0.3)]),
            InteractionState::ReleasedDrag
        );
    }

    #[test]
    fn state_order() {
        assert!(InteractionState::Rest < InteractionState::Moving);
        assert!(InteractionState::Dragging < InteractionState::Released);
        assert!(InteractionState::ReleasedDrag.is_released());
        assert!(!InteractionState::Dragging.is_released());
        assert!(InteractionState::Moving.is_engaged());
        assert!(!InteractionState::Rest.is_engaged());
        assert!(!InteractionState::ReleasedTap.is_engaged());
    }

    // ── state machine ───────────────────────────────────────────────────

    #[test]
    fn press_move_release_cycle() {
        let (mut r, feed) = Recognizer::new(5, 0.0);
        feed.press(0, 10.0, 10.0, 1.0);
        r.update(1.0);
        assert_eq!(r.state(), InteractionState::Dragging);
        assert_eq!(r.drag_path().len(), 1);

        feed.move_to(0, 60.0, 10.0, 1.1);
        feed.move_to(0, 90.0, 10.0, 1.2);
        r.update(1.2);
        assert_eq!(r.drag_path().len(), 3);
        assert_eq!(r.snapshot().magnitude, 80.0);

        feed.release(0, 90.0, 10.0, 1.3);
        r.update(1.3);
        assert_eq!(r.state(), InteractionState::ReleasedDrag);
        assert!(r.snapshot().fresh_release);
        assert_eq!(r.snapshot().drag_origin, Some(s(10.0, 10.0, 1.0)));

        r.update(1.35);
        assert!(!r.snapshot().fresh_release);
        assert_eq!(r.state(), InteractionState::ReleasedDrag);

        r.update(1.6);
        assert_eq!(r.state(), InteractionState::Rest);
    }

    #[test]
    fn press_resets_path() {
        let (mut r, feed) = Recognizer::new(5, 0.0);
        feed.press(0, 0.0, 0.0, 1.0);
        feed.move_to(0, 1.0, 0.0, 1.05);
        feed.release(0, 2.0, 0.0, 1.1);
        feed.press(0, 50.0, 50.0, 1.2);
        r.update(1.2);
        assert_eq!(r.drag_path(), &[s(50.0, 50.0, 1.2)]);
    }

    #[test]
    fn move_without_press_is_moving() {
        let (mut r, feed) = Recognizer::new(5, 0.0);
        feed.move_to(0, 5.0, 5.0, 1.0);
        r.update(1.0);
        assert_eq!(r.state(), InteractionState::Moving);
        assert!(r.drag_path().is_empty());
    }

    #[test]
    fn second_move_promotes_to_dragging() {
        let (mut r, feed) = Recognizer::new(5, 0.0);
        feed.move_to(0, 5.0, 5.0, 1.0);
        feed.move_to(0, 50.0, 5.0, 1.05);
        r.update(1.05);
        assert_eq!(r.state(), InteractionState::Dragging);
        assert_eq!(r.drag_path(), &[s(50.0, 5.0, 1.05)]);

        feed.move_to(0, 80.0, 5.0, 1.1);
        feed.release(0, 90.0, 5.0, 1.15);
        r.update(1.15);
        assert_eq!(r.state(), InteractionState::ReleasedDrag);
    }

    #[test]
    fn move_after_release_is_moving_again() {
        let (mut r, feed) = Recognizer::new(5, 0.0);
        feed.press(0, 0.0, 0.0, 1.0);
        feed.release(0, 1.0, 0.0, 1.1);
        feed.move_to(0, 5.0, 0.0, 1.2);
        r.update(1.2);
        assert_eq!(r.state(), InteractionState::Moving);
    }

    #[test]
    fn dragging_survives_timeout() {
        let (mut r, feed) = Recognizer::new(5, 0.0);
        feed.press(0, 5.0, 5.0, 1.0);
        r.update(1.0);
        r.update(3.0);
        assert_eq!(r.state(), InteractionState::Dragging);
    }

    #[test]
    fn invalid_samples_dropped() {
        let (mut r, feed) = Recognizer::new(5, 0.0);
        feed.send(TouchEvent {
            kind: TouchKind::Press,
            slot: 0,
            x: 1.0,
            y: 1.0,
            t: 4.0,
            valid: false,
        });
        r.update(4.0);
        assert_eq!(r.state(), InteractionState::Rest);
        assert_eq!(r.last_touch(), 0.0);
    }

    #[test]
    fn chord_release_requests_next_program() {
        let (mut r, feed) = Recognizer::new(5, 0.0);
        feed.press(5, 1.0, 1.0, 1.0);
        assert!(r.update(1.0).is_empty());
        feed.release(5, 1.0, 1.0, 1.1);
        assert_eq!(r.update(1.1), vec![TouchSignal::NextProgram]);
        assert_eq!(r.state(), InteractionState::Rest);
        assert_eq!(r.last_touch(), 1.1);
    }

    // ── activity ────────────────────────────────────────────────────────

    #[test]
    fn long_activity_is_reported_once() {
        let (mut r, feed) = Recognizer::new(5, 0.0);
        feed.press(0, 0.0, 0.0, 100.0);
        r.update(100.0);
        feed.move_to(0, 10.0, 0.0, 104.0);
        r.update(104.0);
        feed.release(0, 10.0, 0.0, 105.0);
        r.update(105.0);

        assert!(r.update(110.0).is_empty());
        let sig = r.update(120.5);
        assert_eq!(sig, vec![TouchSignal::ActivityEnded { secs: 5.0 }]);
        assert!(r.update(130.0).is_empty());
    }

    #[test]
    fn short_activity_is_not_reported() {
        let (mut r, feed) = Recognizer::new(5, 0.0);
        feed.press(0, 0.0, 0.0, 100.0);
        r.update(100.0);
        feed.release(0, 0.0, 0.0, 100.5);
        r.update(100.5);
        assert!(r.update(200.0).is_empty());
    }

    #[test]
    fn feed_reports_disconnect() {
        let (r, feed) = Recognizer::new(5, 0.0);
        drop(r);
        assert!(!feed.press(0, 0.0, 0.0, 1.0));
    }
}
