//! Idle program: a black screen.

use crate::render::BLACK;
use crate::touch::InteractionState;

use super::ProgramContext;

/// A tap only wakes the frame after it has been blank this long.
const WAKE_AFTER_SECS: f64 = 10.0;

pub(super) fn update(ctx: &mut ProgramContext<'_>, first: bool, active_since: f64) -> bool {
    if ctx.input.fresh_release
        && ctx.input.state == InteractionState::ReleasedTap
        && active_since < ctx.now - WAKE_AFTER_SECS
    {
        ctx.request_switch();
    }
    if first {
        draw(ctx);
    }
    first
}

pub(super) fn draw(ctx: &mut ProgramContext<'_>) {
    ctx.canvas.clear(BLACK);
}

#[cfg(test)]
mod tests {
    use crate::cache::tests::cache_with;
    use crate::programs::tests::{frame, idle, settings, touching};
    use crate::programs::{Program, ProgramEvent, ProgramKind};
    use crate::touch::InteractionState;

    #[test]
    fn clears_once() {
        let (_d, mut cache) = cache_with(1);
        let mut p = Program::new(ProgramKind::Blank, &settings(), Vec::new());
        p.activate(100.0);
        assert!(frame(&mut p, &mut cache, idle(100.0), 100.0).0);
        assert!(!frame(&mut p, &mut cache, idle(100.1), 100.1).0);
    }

    #[test]
    fn tap_wakes_only_after_a_while() {
        let (_d, mut cache) = cache_with(1);
        let mut p = Program::new(ProgramKind::Blank, &settings(), Vec::new());
        p.activate(100.0);
        let tap = |t| touching(InteractionState::ReleasedTap, 400.0, 240.0, t);

        let (_, events) = frame(&mut p, &mut cache, tap(105.0), 105.0);
        assert!(events.is_empty());

        let (_, events) = frame(&mut p, &mut cache, tap(111.0), 111.0);
        assert_eq!(events, vec![ProgramEvent::RequestSwitch]);

        let mut stale = tap(112.0);
        stale.fresh_release = false;
        let (_, events) = frame(&mut p, &mut cache, stale, 112.0);
        assert!(events.is_empty());
    }
}
