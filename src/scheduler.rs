//! Program scheduler and per-frame tick.
//!
//! The scheduler owns every collaborator the frame loop touches: the image
//! cache, touch recognizer, proximity sensor, persistence and the importer
//! handle. Each [`Scheduler::tick`] updates those, decides whether the active
//! program should change, and runs the active program for one frame.
//!
//! Switching rules:
//! - a switch is wanted once the deadline passes, or at night once the active
//!   program has been up longer than the night ceiling;
//! - nothing switches while someone touched the frame recently;
//! - at night the blank program is the only target, during the day a random
//!   photo program other than the current one;
//! - a target that can't run is skipped and the deadline backs off.

use std::sync::mpsc;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::Rng;

use crate::cache::ImageCache;
use crate::clock::{in_window, Clock};
use crate::config::Config;
use crate::error::Result;
use crate::importer::{ImportEvent, Importer};
use crate::memory::MemoryMonitor;
use crate::programs::{Program, ProgramContext, ProgramEvent, ProgramKind, ProgramSettings};
use crate::render::{Canvas, DrawCommand, Rect, WHITE};
use crate::sensor::{ProximitySensor, FAR_M, NEAR_M};
use crate::store::Persistence;
use crate::touch::{InteractionState, Recognizer, TouchSignal};

/// The first switch away from the blank startup screen.
const STARTUP_GRACE: f64 = 30.0;
/// Seconds since last use before memory pressure drops an image.
const PRESSURE_KEEP: f64 = 5.0;

/// Everything the scheduler drives, assembled by the caller.
pub struct Collaborators {
    pub cache: ImageCache,
    pub persistence: Persistence,
    pub recognizer: Recognizer,
    pub sensor: ProximitySensor,
    pub memory: Box<dyn MemoryMonitor>,
    pub clock: Box<dyn Clock>,
    pub rng: StdRng,
}

/// Switching policy knobs, copied out of [`Config`].
#[derive(Clone, Copy, Debug)]
struct Policy {
    night: (u32, u32),
    night_ceiling: f64,
    backoff: f64,
    quiet: f64,
    memory_floor_mb: u64,
    memory_every: f64,
    debug: bool,
}

pub struct Scheduler {
    programs: Vec<Program>,
    active: usize,
    preferred: usize,
    deadline: f64,
    switch_requested: bool,
    exit_requested: bool,

    cache: ImageCache,
    persistence: Persistence,
    recognizer: Recognizer,
    sensor: ProximitySensor,
    memory: Box<dyn MemoryMonitor>,
    clock: Box<dyn Clock>,
    rng: StdRng,
    importer: Option<(Importer, mpsc::Receiver<ImportEvent>)>,
    catalog: std::path::PathBuf,

    canvas: Canvas,
    events: Vec<ProgramEvent>,
    policy: Policy,
    last_memory_check: f64,
    memory_percent: f32,
}

impl Scheduler {
    /// Build every program and start on the blank one.
    pub fn new(config: &Config, parts: Collaborators, now: f64) -> Self {
        let settings = ProgramSettings {
            min_images: config.min_catalog_images,
            max_time: config.program_max_secs,
            debug: config.debug,
        };
        let mut persistence = parts.persistence;
        let programs = ProgramKind::ALL
            .iter()
            .map(|&kind| Program::new(kind, &settings, persistence.program_history(kind.name())))
            .collect();
        persistence.log(now, "photoframe started.");

        let (w, h) = config.display();
        let mut s = Scheduler {
            programs,
            active: 0,
            preferred: 0,
            deadline: now + STARTUP_GRACE,
            switch_requested: false,
            exit_requested: false,
            cache: parts.cache,
            persistence,
            recognizer: parts.recognizer,
            sensor: parts.sensor,
            memory: parts.memory,
            clock: parts.clock,
            rng: parts.rng,
            importer: None,
            catalog: config.catalog_dir.clone(),
            canvas: Canvas::new(w, h),
            events: Vec::new(),
            policy: Policy {
                night: (config.night_start_hour, config.night_end_hour),
                night_ceiling: config.night_ceiling_secs,
                backoff: config.switch_backoff_secs,
                quiet: config.interaction_quiet_secs,
                memory_floor_mb: config.memory_floor_mb,
                memory_every: config.memory_check_secs,
                debug: config.debug,
            },
            last_memory_check: now,
            memory_percent: 0.0,
        };
        s.programs[0].activate(now);
        s
    }

    pub fn attach_importer(&mut self, importer: Importer, events: mpsc::Receiver<ImportEvent>) {
        self.importer = Some((importer, events));
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn preferred(&self) -> usize {
        self.preferred
    }

    pub fn deadline(&self) -> f64 {
        self.deadline
    }

    pub fn active_program(&self) -> &Program {
        &self.programs[self.active]
    }

    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Ask for a switch at the next tick, subject to the usual gates.
    pub fn request_switch(&mut self) {
        self.switch_requested = true;
    }

    /// Open or close the active program's status panel.
    pub fn toggle_status_panel(&mut self) {
        let h = self.canvas.size().1 as f32;
        self.programs[self.active].toggle_panel(h);
    }

    /// Move the preferred program one step along, wrapping.
    pub fn set_next_program(&mut self) {
        self.preferred = (self.preferred + 1) % self.programs.len();
    }

    pub fn is_night(&self, now: f64) -> bool {
        let (start, end) = self.policy.night;
        in_window(self.clock.hour_of_day(now), start, end)
    }

    /// Advance one frame. Returns whether the canvas has anything to flush.
    pub fn tick(&mut self, now: f64) -> Result<bool> {
        self.canvas.reset();

        self.check_memory(now);
        self.poll_importer(now);
        self.sensor.update();
        for signal in self.recognizer.update(now) {
            match signal {
                TouchSignal::NextProgram => self.set_next_program(),
                TouchSignal::ActivityEnded { secs } => {
                    let detail = format!("{:.0} sec, in {}", secs, self.programs[self.active].name());
                    self.persistence.action(now, "touches", detail);
                }
            }
        }
        let input = self.recognizer.snapshot();

        let night = self.is_night(now);
        let active_for = now - self.programs[self.active].active_since();
        if (now > self.deadline || (night && active_for > self.policy.night_ceiling))
            && input.idle_for(now) > self.policy.quiet
        {
            self.switch_requested = true;
        }

        if self.switch_requested {
            if night {
                self.preferred = 0;
            } else {
                self.preferred = self.pick_other();
            }
        }

        if self.preferred != self.active {
            if self.set_active(self.preferred, now)? {
                let mut span = self.programs[self.active].max_time() * self.rng.random_range(0.75..1.25);
                if night {
                    span /= 2.0;
                }
                self.deadline = now + span;
            } else {
                self.deadline = self.deadline.max(now) + self.policy.backoff;
            }
            self.switch_requested = false;
        } else if night && self.switch_requested {
            // already blank
            self.switch_requested = false;
        }

        let mut ctx = ProgramContext {
            cache: &mut self.cache,
            input,
            distance: self.sensor.distance(),
            memory_percent: self.memory_percent,
            now,
            canvas: &mut self.canvas,
            events: &mut self.events,
        };
        let drawn = self.programs[self.active].update(&mut ctx)?;
        self.drain_events(now);

        if self.policy.debug {
            self.draw_overlay();
        }

        if self.cache.take_dirty() {
            self.persistence.mark_dirty();
        }
        if self.persistence.save_due(now) {
            self.save(now);
        }
        if self.persistence.export_due(now) {
            self.persistence.export(now);
        }

        Ok(drawn || self.canvas.needs_flush())
    }

    /// A uniformly random photo program other than the active one.
    fn pick_other(&mut self) -> usize {
        let candidates: Vec<usize> = (1..self.programs.len()).filter(|&i| i != self.active).collect();
        if candidates.is_empty() {
            return self.active;
        }
        candidates[self.rng.random_range(0..candidates.len())]
    }

    /// Switch to `index` if it can run. On refusal the preferred index falls
    /// back to the active one.
    fn set_active(&mut self, index: usize, now: f64) -> Result<bool> {
        if !self.programs[index].can_run(&self.cache) {
            debug!(
                "scheduler: {} can't run with {} visible images",
                self.programs[index].name(),
                self.cache.visible_count()
            );
            self.preferred = self.active;
            return Ok(false);
        }

        let previous = self.active;
        self.programs[previous].deactivate(&mut self.cache, now)?;
        self.cache.check_use(0.0, now);
        self.active = index;
        self.preferred = index;
        self.programs[index].activate(now);

        let name = self.programs[previous].name();
        self.persistence
            .data
            .programs
            .insert(name.to_string(), self.programs[previous].shown().to_vec());
        self.persistence
            .log(now, format!("Switching to program {}", self.programs[index].name()));
        Ok(true)
    }

    fn drain_events(&mut self, now: f64) {
        for ev in std::mem::take(&mut self.events) {
            match ev {
                ProgramEvent::Action { kind, detail } => self.persistence.action(now, kind, detail),
                ProgramEvent::RequestSwitch => self.request_switch(),
                ProgramEvent::Prefer(index) => {
                    self.preferred = index.min(self.programs.len() - 1);
                    debug!("scheduler: {} preferred", self.programs[self.preferred].name());
                }
                ProgramEvent::Exit { shutdown } => {
                    let line = if shutdown {
                        "power off requested from the status panel."
                    } else {
                        "restart requested from the status panel."
                    };
                    info!("scheduler: {}", line);
                    self.persistence.log(now, line);
                    self.exit_requested = true;
                }
            }
        }
    }

    fn check_memory(&mut self, now: f64) {
        if now - self.last_memory_check < self.policy.memory_every {
            return;
        }
        self.last_memory_check = now;
        let Some(sample) = self.memory.sample() else {
            return;
        };
        self.memory_percent = sample.used_percent;
        if sample.available_mb < self.policy.memory_floor_mb {
            let freed = self.cache.check_use(PRESSURE_KEEP, now);
            debug!(
                "scheduler: {} MB available, released {} images",
                sample.available_mb, freed
            );
        }
    }

    fn poll_importer(&mut self, now: f64) {
        let mut rescan = false;
        let mut lost = false;
        if let Some((_, rx)) = &self.importer {
            loop {
                match rx.try_recv() {
                    Ok(ImportEvent::RescanRequested { imported }) => {
                        debug!("scheduler: importer added {}", imported);
                        rescan = true;
                    }
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        lost = true;
                        break;
                    }
                }
            }
        }
        if lost {
            warn!("scheduler: importer stopped unexpectedly");
            self.importer = None;
        }
        if rescan {
            let added = self.cache.scan(&self.catalog);
            let detail = format!("+{}, for a total of {}", added, self.cache.len());
            self.persistence.action(now, "images.scan", detail);
        }
    }

    fn draw_overlay(&mut self) {
        let (w, _) = self.canvas.size();
        let w = w as f32;
        let d = self.sensor.distance();
        let bar = Rect::new(0.0, 0.0, w, 6.0);
        self.canvas.push(DrawCommand::Slider {
            rect: bar,
            value: (d - NEAR_M) / (FAR_M - NEAR_M),
            color: WHITE,
        });
        self.canvas.push(DrawCommand::Text {
            text: format!(
                "{} | {:.2} m | mem {:.0}% | {} loaded",
                self.programs[self.active].name(),
                d,
                self.memory_percent,
                self.cache.loaded_count()
            ),
            x: 4.0,
            y: 10.0,
            color: WHITE,
        });
        self.canvas.mark(Rect::new(0.0, 0.0, w, 30.0));

        let input = self.recognizer.snapshot();
        if input.state > InteractionState::Rest {
            self.canvas.push(DrawCommand::Circle {
                cx: input.pos.x,
                cy: input.pos.y,
                radius: 12.0,
                color: WHITE,
                width: 2.0,
            });
            self.canvas
                .mark(Rect::new(input.pos.x - 14.0, input.pos.y - 14.0, 28.0, 28.0));
        }
    }

    /// Copy live catalog and program state into the snapshot and write it.
    fn save(&mut self, now: f64) {
        self.persistence.data.images = self.cache.records();
        for p in &self.programs {
            self.persistence
                .data
                .programs
                .insert(p.name().to_string(), p.shown().to_vec());
        }
        self.persistence.save(now);
    }

    /// Close the active program, stop the importer and flush everything.
    pub fn shutdown(&mut self, now: f64, clean: bool) {
        let line = if clean {
            "photoframe closing."
        } else {
            "photoframe closing, with errors."
        };
        self.persistence.log(now, line);
        if let Err(e) = self.programs[self.active].deactivate(&mut self.cache, now) {
            warn!("scheduler: closing {}: {}", self.programs[self.active].name(), e);
        }
        if let Some((mut importer, _)) = self.importer.take() {
            importer.stop();
        }
        self.cache.unload_all();
        self.persistence.mark_dirty();
        self.save(now);
        self.persistence.export(now);
    }
}
