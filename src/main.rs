// photoframe: unattended touchscreen photo frame.
// Programs (pairwise rating, soup, pattern grid, blank) take turns on the
// display; a background importer feeds new uploads into the catalog.
// Usage: photoframe [--debug] [--nonet] [--config PATH] [scan|import|status]

const VERSION: &str = env!("CARGO_PKG_VERSION");
const GIT_HASH: &str = env!("GIT_HASH");

mod cache;
mod cli;
mod clock;
mod config;
mod drivers;
mod error;
mod importer;
mod memory;
mod programs;
mod render;
mod scanner;
mod scheduler;
mod sensor;
mod store;
mod touch;

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use cache::ImageCache;
use clock::{Clock, SystemClock};
use config::Config;
use importer::{ImportSettings, Importer};
use memory::SystemMemory;
use render::{Renderer, SoftwareRenderer};
use scheduler::{Collaborators, Scheduler};
use sensor::ProximitySensor;
use store::Persistence;
use touch::Recognizer;

#[derive(Parser, Debug)]
#[command(name = "photoframe", about = "Touchscreen photo frame")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Verbose logging, short program lifetimes, small catalog minimum
    #[arg(long, global = true)]
    debug: bool,

    /// Don't start the background importer
    #[arg(long, global = true)]
    nonet: bool,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the catalog folder and report its size
    Scan,
    /// Run one importer pass over the inbox
    Import,
    /// Show catalog and store statistics
    Status,
}

// ── Signals ─────────────────────────────────────────────────────────────

static EXIT: AtomicBool = AtomicBool::new(false);
static SCREENSHOT: AtomicBool = AtomicBool::new(false);
static PANEL: AtomicBool = AtomicBool::new(false);

extern "C" fn on_exit_signal(_: libc::c_int) {
    EXIT.store(true, Ordering::SeqCst);
}

extern "C" fn on_screenshot_signal(_: libc::c_int) {
    SCREENSHOT.store(true, Ordering::SeqCst);
}

extern "C" fn on_panel_signal(_: libc::c_int) {
    PANEL.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    #[cfg(unix)]
    unsafe {
        for sig in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGTSTP] {
            libc::signal(sig, on_exit_signal as libc::sighandler_t);
        }
        libc::signal(libc::SIGUSR1, on_screenshot_signal as libc::sighandler_t);
        libc::signal(libc::SIGUSR2, on_panel_signal as libc::sighandler_t);
    }
}

fn main() {
    let args = Cli::parse();

    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match Config::load(args.config.as_deref()) {
        Ok(c) => c.with_debug(args.debug).with_nonet(args.nonet),
        Err(e) => {
            error!("photoframe: {}", e);
            std::process::exit(2);
        }
    };

    // ── CLI subcommands (exit after) ────────────────────────────────────
    if let Some(cmd) = args.command {
        let result = match cmd {
            Commands::Scan => cli::scan(&config),
            Commands::Import => cli::import(&config),
            Commands::Status => cli::status(&config),
        };
        if let Err(e) = result {
            error!("photoframe: {:#}", e);
            std::process::exit(1);
        }
        return;
    }

    info!("photoframe {} ({})", VERSION, GIT_HASH);
    if let Err(e) = run(&config) {
        error!("photoframe: {:#}", e);
        std::process::exit(1);
    }
}

fn run(config: &Config) -> Result<()> {
    install_signal_handlers();
    let clock = SystemClock;
    let now = clock.now();

    // ── Store and catalog ───────────────────────────────────────────────
    let persistence = Persistence::open(
        &config.store_path,
        Some(config.export_path()),
        config.save_interval_secs,
        config.export_interval_secs,
        now,
    );
    std::fs::create_dir_all(&config.catalog_dir)
        .with_context(|| format!("creating {}", config.catalog_dir.display()))?;
    let mut cache = ImageCache::new(config.recent_ring);
    cache.restore(persistence.data.images.clone());
    cache.scan(&config.catalog_dir);
    info!("catalog: {} photos in {}", cache.len(), config.catalog_dir.display());

    // ── Input ───────────────────────────────────────────────────────────
    let (recognizer, touch_feed) = Recognizer::new(config.chord_slot, now);
    match &config.touch_source {
        Some(path) => {
            if let Err(e) = drivers::spawn_touch(path, touch_feed) {
                warn!("touch input: {}: {}", path.display(), e);
            }
        }
        None => info!("touch input: no source configured"),
    }
    let sensor = match &config.sensor_source {
        Some(path) => {
            let (sensor, feed) = ProximitySensor::with_feed();
            match drivers::spawn_sensor(path, feed) {
                Ok(_) => sensor,
                Err(e) => {
                    warn!("sensor input: {}: {}, using synthetic distance", path.display(), e);
                    ProximitySensor::synthetic()
                }
            }
        }
        None => {
            info!("sensor input: no source configured, using synthetic distance");
            ProximitySensor::synthetic()
        }
    };

    let parts = Collaborators {
        cache,
        persistence,
        recognizer,
        sensor,
        memory: Box::new(SystemMemory::new()),
        clock: Box::new(clock),
        rng: StdRng::from_os_rng(),
    };
    let mut sched = Scheduler::new(config, parts, now);

    // ── Importer ────────────────────────────────────────────────────────
    if config.nonet {
        info!("importer: disabled (--nonet)");
    } else {
        let settings = ImportSettings {
            inbox: config.inbox_dir.clone(),
            catalog: config.catalog_dir.clone(),
            size: config.display(),
            interval: Duration::from_secs_f64(config.import_interval_secs),
        };
        match Importer::start(settings) {
            Ok((importer, events)) => sched.attach_importer(importer, events),
            Err(e) => warn!("importer: not started: {}", e),
        }
    }

    let (w, h) = config.display();
    let mut renderer = SoftwareRenderer::new(w, h);
    let result = frame_loop(&mut sched, &mut renderer, config);

    sched.shutdown(clock.now(), result.is_ok());
    result
}

fn frame_loop(sched: &mut Scheduler, renderer: &mut SoftwareRenderer, config: &Config) -> Result<()> {
    let clock = SystemClock;
    let budget = Duration::from_millis(config.frame_ms);
    let floor = Duration::from_millis(config.floor_sleep_ms);
    let shots_dir = config
        .store_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    while !EXIT.load(Ordering::SeqCst) && !sched.exit_requested() {
        let started = Instant::now();
        let now = clock.now();
        if PANEL.swap(false, Ordering::SeqCst) {
            sched.toggle_status_panel();
        }

        let redraw = match panic::catch_unwind(AssertUnwindSafe(|| sched.tick(now))) {
            Ok(r) => r.context("frame tick failed")?,
            Err(_) => anyhow::bail!("frame tick panicked"),
        };
        if redraw {
            renderer.present(sched.canvas()).context("presenting frame")?;
        }

        if SCREENSHOT.swap(false, Ordering::SeqCst) {
            let path = next_screenshot(&shots_dir);
            match renderer.save_screen(&path) {
                Ok(()) => info!("screenshot: {}", path.display()),
                Err(e) => warn!("screenshot: {}", e),
            }
        }

        std::thread::sleep(budget.saturating_sub(started.elapsed()).max(floor));
    }
    info!("photoframe: leaving frame loop");
    Ok(())
}

/// First unused `N.png` in `dir`.
fn next_screenshot(dir: &Path) -> PathBuf {
    (0u32..)
        .map(|n| dir.join(format!("{}.png", n)))
        .find(|p| !p.exists())
        .unwrap_or_else(|| dir.join("screen.png"))
}
