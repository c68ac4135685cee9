//! Background importer: normalizes uploaded photos into the catalog.
//!
//! Runs on its own thread. Each pass walks the inbox; every photo gets a
//! stable output name derived from its file name and byte size, is rotated
//! upright from its EXIF orientation, fill-cropped to the display size,
//! stripped of pure black, written into the catalog under a temp name and
//! renamed into place, and finally removed from the inbox. When a pass
//! imports anything the frame loop receives [`ImportEvent::RescanRequested`].
//!
//! Passes run every `interval` and also when `notify` reports inbox changes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, RgbaImage};
use log::{debug, info, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};

use crate::cache::scale::{self, Mode, VariantKey};
use crate::error::{Error, Result};
use crate::scanner;

/// Messages to the importer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportCmd {
    /// Run a pass now instead of waiting for the interval.
    Poke,
    /// Finish the current pass and exit.
    Stop,
}

/// Messages from the importer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportEvent {
    RescanRequested { imported: usize },
}

#[derive(Clone, Debug)]
pub struct ImportSettings {
    pub inbox: PathBuf,
    pub catalog: PathBuf,
    pub size: (u32, u32),
    pub interval: Duration,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Handle to the running importer. Dropping it stops and joins the thread.
pub struct Importer {
    cmd_tx: mpsc::Sender<ImportCmd>,
    thread: Option<JoinHandle<()>>,
}

impl Importer {
    pub fn start(settings: ImportSettings) -> Result<(Self, mpsc::Receiver<ImportEvent>)> {
        std::fs::create_dir_all(&settings.inbox)?;
        std::fs::create_dir_all(&settings.catalog)?;

        let (tx, rx) = mpsc::channel();
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let poke = cmd_tx.clone();

        let thread = thread::Builder::new()
            .name("importer".into())
            .spawn(move || run_importer(settings, tx, cmd_rx, poke))?;

        Ok((
            Importer {
                cmd_tx,
                thread: Some(thread),
            },
            rx,
        ))
    }

    pub fn poke(&self) {
        self.cmd_tx.send(ImportCmd::Poke).ok();
    }

    pub fn stop(&mut self) {
        self.cmd_tx.send(ImportCmd::Stop).ok();
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                warn!("importer: thread panicked");
            }
        }
    }
}

impl Drop for Importer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_inbox(inbox: &Path, poke: mpsc::Sender<ImportCmd>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(ev) = res {
            if matches!(ev.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                poke.send(ImportCmd::Poke).ok();
            }
        }
    })?;
    watcher.watch(inbox, RecursiveMode::Recursive)?;
    Ok(watcher)
}

fn run_importer(
    settings: ImportSettings,
    tx: mpsc::Sender<ImportEvent>,
    cmd_rx: mpsc::Receiver<ImportCmd>,
    poke: mpsc::Sender<ImportCmd>,
) {
    let _watcher = match watch_inbox(&settings.inbox, poke) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!("importer: cannot watch {} ({}), polling only", settings.inbox.display(), e);
            None
        }
    };
    let mut failed = HashSet::new();
    info!("importer: {} -> {}", settings.inbox.display(), settings.catalog.display());

    loop {
        let report = import_pass(&settings, &mut failed);
        if report.imported > 0 {
            info!(
                "importer: {} imported, {} duplicates",
                report.imported, report.duplicates
            );
            let ev = ImportEvent::RescanRequested {
                imported: report.imported,
            };
            if tx.send(ev).is_err() {
                break;
            }
        }

        match cmd_rx.recv_timeout(settings.interval) {
            Ok(ImportCmd::Stop) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Ok(ImportCmd::Poke) => {
                // coalesce bursts of filesystem events
                while let Ok(cmd) = cmd_rx.try_recv() {
                    if cmd == ImportCmd::Stop {
                        info!("importer: stopped");
                        return;
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }

    info!("importer: stopped");
}

/// One sweep over the inbox. `failed` remembers (path, size) pairs that
/// could not be decoded so they are not retried until they change; entries
/// whose file is gone or has a new size are dropped first.
pub fn import_pass(
    settings: &ImportSettings,
    failed: &mut HashSet<(PathBuf, u64)>,
) -> ImportReport {
    failed.retain(|(path, size)| {
        std::fs::metadata(path).is_ok_and(|m| m.len() == *size)
    });
    let mut report = ImportReport::default();

    for path in scanner::discover(&settings.inbox) {
        let size = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(_) => continue,
        };
        if failed.contains(&(path.clone(), size)) {
            continue;
        }
        match import_one(&path, size, settings) {
            Ok(true) => report.imported += 1,
            Ok(false) => report.duplicates += 1,
            Err(e) => {
                // possibly still uploading; it will be retried once its size changes
                warn!("importer: {}: {}", path.display(), e);
                failed.insert((path, size));
                report.failed += 1;
            }
        }
    }
    report
}

/// Returns false when the output already existed.
fn import_one(path: &Path, size: u64, settings: &ImportSettings) -> Result<bool> {
    let name = output_name(path, size);
    let out = settings.catalog.join(&name);

    if out.exists() {
        debug!("importer: {} already imported as {}", path.display(), name);
        std::fs::remove_file(path)?;
        return Ok(false);
    }

    let img = normalize(path, settings.size)?;
    let tmp = settings.catalog.join(format!(".{}.part", name));
    DynamicImage::ImageRgba8(img)
        .to_rgb8()
        .save_with_format(&tmp, ImageFormat::Jpeg)
        .map_err(|e| Error::image(tmp.clone(), e))?;
    std::fs::rename(&tmp, &out)?;
    std::fs::remove_file(path)?;
    debug!("importer: {} -> {}", path.display(), name);
    Ok(true)
}

/// Stable catalog name: 12 hex digits of a hash over the file name and size.
pub fn output_name(path: &Path, size: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
            .as_bytes(),
    );
    hasher.update(size.to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}.jpg", &digest[..12])
}

/// Decode upright, fill-crop to `size`, and remove pure black.
pub fn normalize(path: &Path, size: (u32, u32)) -> Result<RgbaImage> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()
        .map_err(|e| Error::image(path, e))?;
    let orientation = decoder
        .orientation()
        .unwrap_or(image::metadata::Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder).map_err(|e| Error::image(path, e))?;
    img.apply_orientation(orientation);

    let mut out = scale::render(&img.to_rgba8(), &VariantKey::new(size.0, size.1, Mode::Fill));
    scale::remove_pure_black(&mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn settings(root: &Path) -> ImportSettings {
        ImportSettings {
            inbox: root.join("inbox"),
            catalog: root.join("images"),
            size: (80, 48),
            interval: Duration::from_millis(50),
        }
    }

    fn upload(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 255]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn output_name_is_stable() {
        let a = output_name(Path::new("/in/IMG_1.jpg"), 1234);
        assert_eq!(a, output_name(Path::new("/other/IMG_1.jpg"), 1234));
        assert_ne!(a, output_name(Path::new("/in/IMG_1.jpg"), 1235));
        assert_eq!(a.len(), 16);
        assert!(a.ends_with(".jpg"));
    }

    #[test]
    fn normalize_fills_box_and_lifts_black() {
        let dir = tempfile::tempdir().unwrap();
        let p = upload(dir.path(), "tall.png", 30, 60);
        let img = normalize(&p, (80, 48)).unwrap();
        assert_eq!(img.dimensions(), (80, 48));
        assert_eq!(img.get_pixel(40, 24).0, [1, 1, 1, 255]);
    }

    #[test]
    fn pass_imports_and_removes_originals() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        std::fs::create_dir_all(&s.catalog).unwrap();
        upload(&s.inbox, "a.png", 100, 60);
        upload(&s.inbox, "b.png", 60, 100);

        let report = import_pass(&s, &mut HashSet::new());
        assert_eq!(report.imported, 2);
        assert!(scanner::discover(&s.inbox).is_empty());
        let out = scanner::discover(&s.catalog);
        assert_eq!(out.len(), 2);
        for p in &out {
            assert_eq!(image::image_dimensions(p).unwrap(), (80, 48));
        }
    }

    #[test]
    fn duplicate_upload_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        std::fs::create_dir_all(&s.catalog).unwrap();
        upload(&s.inbox, "a.png", 100, 60);
        import_pass(&s, &mut HashSet::new());

        upload(&s.inbox, "a.png", 100, 60);
        let report = import_pass(&s, &mut HashSet::new());
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.imported, 0);
        assert!(scanner::discover(&s.inbox).is_empty());
        assert_eq!(scanner::discover(&s.catalog).len(), 1);
    }

    #[test]
    fn broken_upload_is_kept_and_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        std::fs::create_dir_all(&s.inbox).unwrap();
        std::fs::create_dir_all(&s.catalog).unwrap();
        std::fs::write(s.inbox.join("half.jpg"), b"\xff\xd8\xff partial").unwrap();

        let mut failed = HashSet::new();
        assert_eq!(import_pass(&s, &mut failed).failed, 1);
        assert!(s.inbox.join("half.jpg").exists());
        assert_eq!(import_pass(&s, &mut failed), ImportReport::default());
    }

    #[test]
    fn failures_are_forgotten_once_the_file_goes() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        std::fs::create_dir_all(&s.inbox).unwrap();
        std::fs::create_dir_all(&s.catalog).unwrap();
        let half = s.inbox.join("half.jpg");
        std::fs::write(&half, b"\xff\xd8\xff partial").unwrap();

        let mut failed = HashSet::new();
        import_pass(&s, &mut failed);
        assert_eq!(failed.len(), 1);

        std::fs::remove_file(&half).unwrap();
        import_pass(&s, &mut failed);
        assert!(failed.is_empty());
    }

    #[test]
    fn watcher_on_missing_inbox_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel();
        match watch_inbox(&dir.path().join("nope"), tx) {
            Err(Error::Watch(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("watching a missing folder succeeded"),
        }
    }

    #[test]
    fn worker_signals_rescan_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        upload(&s.inbox, "a.png", 100, 60);

        let (mut importer, rx) = Importer::start(s.clone()).unwrap();
        let ev = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(ev, ImportEvent::RescanRequested { imported: 1 });
        importer.stop();
        assert_eq!(scanner::discover(&s.catalog).len(), 1);
    }

    #[test]
    fn drop_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let (importer, _rx) = Importer::start(settings(dir.path())).unwrap();
        importer.poke();
        drop(importer);
    }
}
