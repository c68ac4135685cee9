//! Presentation programs.
//!
//! A [`Program`] wraps one of a closed set of behaviours ([`ProgramKind`])
//! with the bookkeeping every behaviour shares: whether it is active, since
//! when, its `{since, duration}` history and its maximum active time. The
//! scheduler owns one `Program` per kind and drives exactly one of them per
//! frame through [`Program::update`].

mod blank;
mod fade;
mod pairwise;
mod panel;
mod patterns;
mod soup;

use std::sync::Arc;

use image::RgbaImage;
use log::debug;

use crate::cache::{ImageCache, ImageId, Mode};
use crate::error::Result;
use crate::render::Canvas;
use crate::store::Interval;
use crate::touch::InputSnapshot;

pub use fade::FadeSlot;
pub use pairwise::Pairwise;
pub use patterns::Patterns;
pub use soup::Soup;

use panel::StatusPanel;

/// The blank program never runs longer than this, even outside the night.
const BLANK_MAX_SECS: f64 = 3600.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    Blank,
    Pairwise,
    Soup,
    Patterns,
}

impl ProgramKind {
    /// Scheduler order. Index 0 is the idle/night program.
    pub const ALL: [ProgramKind; 4] = [
        ProgramKind::Blank,
        ProgramKind::Pairwise,
        ProgramKind::Soup,
        ProgramKind::Patterns,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProgramKind::Blank => "blank",
            ProgramKind::Pairwise => "pairwise",
            ProgramKind::Soup => "soup",
            ProgramKind::Patterns => "patterns",
        }
    }
}

/// Values the factory needs from the configuration.
#[derive(Clone, Copy, Debug)]
pub struct ProgramSettings {
    pub min_images: usize,
    pub max_time: f64,
    pub debug: bool,
}

/// Something a program wants recorded or done outside its own state.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgramEvent {
    Action { kind: &'static str, detail: String },
    RequestSwitch,
    /// Make the program at this scheduler index the preferred one.
    Prefer(usize),
    /// Leave the frame loop. `shutdown` asks for the machine to power off.
    Exit { shutdown: bool },
}

/// Collaborators handed to the active program for one frame.
pub struct ProgramContext<'a> {
    pub cache: &'a mut ImageCache,
    pub input: InputSnapshot,
    /// Proximity distance in metres.
    pub distance: f32,
    pub memory_percent: f32,
    pub now: f64,
    pub canvas: &'a mut Canvas,
    pub events: &'a mut Vec<ProgramEvent>,
}

impl ProgramContext<'_> {
    pub fn size(&self) -> (f32, f32) {
        let (w, h) = self.canvas.size();
        (w as f32, h as f32)
    }

    pub fn action(&mut self, kind: &'static str, detail: impl Into<String>) {
        self.events.push(ProgramEvent::Action {
            kind,
            detail: detail.into(),
        });
    }

    pub fn request_switch(&mut self) {
        self.events.push(ProgramEvent::RequestSwitch);
    }

    /// Pixels for drawing, or `None` when the photo can't be produced. The
    /// cache has already logged and benched a photo that failed to decode.
    pub fn fetch(&mut self, id: ImageId, size: (u32, u32), mode: Mode) -> Option<Arc<RgbaImage>> {
        match self.cache.get(id, size, mode, self.now) {
            Ok(px) => Some(px),
            Err(e) => {
                debug!("programs: skipping image {}: {}", id.0, e);
                None
            }
        }
    }

    /// File name of `id` for action logs.
    pub fn file_name(&self, id: ImageId) -> String {
        self.cache
            .image(id)
            .and_then(|i| i.path.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("#{}", id.0))
    }
}

enum Behavior {
    Blank,
    Pairwise(Pairwise),
    Soup(Soup),
    Patterns(Patterns),
}

pub struct Program {
    kind: ProgramKind,
    behavior: Behavior,
    active: bool,
    active_since: f64,
    first_run: bool,
    max_time: f64,
    min_images: usize,
    shown: Vec<Interval>,
    panel: StatusPanel,
}

impl Program {
    /// Factory: a fresh, inactive program of `kind` with its prior history.
    pub fn new(kind: ProgramKind, settings: &ProgramSettings, shown: Vec<Interval>) -> Self {
        let (behavior, max_time) = match kind {
            ProgramKind::Blank => (Behavior::Blank, BLANK_MAX_SECS.min(settings.max_time)),
            ProgramKind::Pairwise => (Behavior::Pairwise(Pairwise::new()), settings.max_time),
            ProgramKind::Soup => (Behavior::Soup(Soup::new(settings.debug)), settings.max_time),
            ProgramKind::Patterns => (Behavior::Patterns(Patterns::new()), settings.max_time),
        };
        Program {
            kind,
            behavior,
            active: false,
            active_since: 0.0,
            first_run: false,
            max_time,
            min_images: settings.min_images,
            shown,
            panel: StatusPanel::default(),
        }
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn active_since(&self) -> f64 {
        self.active_since
    }

    pub fn max_time(&self) -> f64 {
        self.max_time
    }

    pub fn shown(&self) -> &[Interval] {
        &self.shown
    }

    pub fn panel_open(&self) -> bool {
        self.panel.is_open()
    }

    pub fn toggle_panel(&mut self, height: f32) {
        self.panel.toggle(height);
    }

    /// Whether the catalog can feed this program right now.
    pub fn can_run(&self, cache: &ImageCache) -> bool {
        match self.kind {
            ProgramKind::Blank => true,
            _ => cache.visible_count() >= self.min_images,
        }
    }

    pub fn activate(&mut self, now: f64) {
        self.active = true;
        self.active_since = now;
        self.first_run = true;
    }

    /// Release everything the behaviour holds and record the interval.
    pub fn deactivate(&mut self, cache: &mut ImageCache, now: f64) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.panel.reset();
        let duration = now - self.active_since;
        if duration >= 1.0 {
            self.shown.push(Interval {
                since: self.active_since as i64,
                duration: duration as u32,
            });
        }
        match &mut self.behavior {
            Behavior::Blank => Ok(()),
            Behavior::Pairwise(p) => p.release(cache, now),
            Behavior::Soup(s) => s.release(cache, now),
            Behavior::Patterns(p) => p.release(cache, now),
        }
    }

    /// Advance one frame. Returns whether anything was drawn.
    ///
    /// The behaviour is paused while the status panel is open; whenever the
    /// panel moves, the behaviour is redrawn beneath it.
    pub fn update(&mut self, ctx: &mut ProgramContext<'_>) -> Result<bool> {
        let first = std::mem::take(&mut self.first_run);
        let repaint = self.panel.update(ctx);

        let mut drawn = false;
        if first || !self.panel.is_open() {
            drawn = match &mut self.behavior {
                Behavior::Blank => blank::update(ctx, first, self.active_since),
                Behavior::Pairwise(p) => p.update(ctx, first)?,
                Behavior::Soup(s) => s.update(ctx, first)?,
                Behavior::Patterns(p) => p.update(ctx, first)?,
            };
        }

        if repaint && !drawn && !self.panel.covers(ctx.size().1) {
            self.draw_behavior(ctx);
            drawn = true;
        }
        if (repaint || drawn) && self.panel.is_visible() {
            self.panel.draw(ctx, self.kind);
            drawn = true;
        }
        Ok(drawn)
    }

    fn draw_behavior(&self, ctx: &mut ProgramContext<'_>) {
        match &self.behavior {
            Behavior::Blank => blank::draw(ctx),
            Behavior::Pairwise(p) => p.draw(ctx),
            Behavior::Soup(s) => s.draw(ctx),
            Behavior::Patterns(p) => p.draw(ctx),
        }
    }
}

/// Top-left corner that centres a `size` box on (cx, cy).
fn centred(cx: f32, cy: f32, size: (u32, u32)) -> (f32, f32) {
    (cx - size.0 as f32 / 2.0, cy - size.1 as f32 / 2.0)
}
