//! Image catalog and decode cache.
//!
//! Every photo in the catalog folder is an [`Image`] keyed by its absolute
//! path. Pixels are decoded lazily on the first [`ImageCache::get`] and kept,
//! together with any scaled variants, until the image is unloaded: explicitly
//! by a program, by a [`ImageCache::check_use`] sweep, or at shutdown.
//! Ratings, the hidden flag and presentation history outlive the pixels and
//! are merged back in from the store on every scan. A photo that fails to
//! decode is benched until its file changes on disk; that state is never
//! persisted.

pub mod scale;

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use image::RgbaImage;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scanner;

pub use scale::{Mode, VariantKey};

/// Rejection sampling gives up after this many draws and takes the last one.
const MAX_RATED_DRAWS: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u32);

/// Persisted part of an image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub rating: f32,
    pub hidden: bool,
    /// Whole seconds per presentation.
    pub shown: Vec<u32>,
}

/// Size and modification time of a file, to notice rewrites.
type FileStamp = (u64, Option<SystemTime>);

fn file_stamp(path: &Path) -> FileStamp {
    match std::fs::metadata(path) {
        Ok(m) => (m.len(), m.modified().ok()),
        Err(_) => (0, None),
    }
}

#[derive(Debug)]
pub struct Image {
    pub path: PathBuf,
    full: Option<Arc<RgbaImage>>,
    variants: HashMap<VariantKey, Arc<RgbaImage>>,
    pub last_use: f64,
    pub rating: f32,
    pub hidden: bool,
    pub shown: Vec<u32>,
    /// Stamp of the file as it was when decoding failed.
    broken: Option<FileStamp>,
}

impl Image {
    fn new(path: PathBuf) -> Self {
        Image {
            path,
            full: None,
            variants: HashMap::new(),
            last_use: 0.0,
            rating: 0.0,
            hidden: false,
            shown: Vec::new(),
            broken: None,
        }
    }

    /// Not hidden by the user and not known to be undecodable.
    pub fn is_drawable(&self) -> bool {
        !self.hidden && self.broken.is_none()
    }

    pub fn is_broken(&self) -> bool {
        self.broken.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.full.is_some()
    }

    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }

    fn merge(&mut self, rec: &ImageRecord) {
        self.rating = rec.rating.clamp(-1.0, 1.0);
        self.hidden = rec.hidden;
        self.shown = rec.shown.clone();
    }

    fn record(&self) -> ImageRecord {
        ImageRecord {
            path: self.path.clone(),
            rating: self.rating,
            hidden: self.hidden,
            shown: self.shown.clone(),
        }
    }

    fn was_shown(&mut self, secs: f64) {
        if secs >= 1.0 {
            self.shown.push(secs as u32);
        }
    }

    fn drop_pixels(&mut self) {
        self.full = None;
        self.variants.clear();
    }
}

pub struct ImageCache {
    images: HashMap<ImageId, Image>,
    by_path: HashMap<PathBuf, ImageId>,
    /// Catalog order; `next` draws from here.
    order: Vec<ImageId>,
    next_id: u32,
    /// Prior state for paths not (yet) in the catalog.
    history: HashMap<PathBuf, ImageRecord>,
    recent: VecDeque<ImageId>,
    recent_cap: usize,
    rng: StdRng,
    dirty: bool,
}

impl ImageCache {
    pub fn new(recent_cap: usize) -> Self {
        Self::with_rng(recent_cap, StdRng::from_os_rng())
    }

    pub fn with_rng(recent_cap: usize, rng: StdRng) -> Self {
        ImageCache {
            images: HashMap::new(),
            by_path: HashMap::new(),
            order: Vec::new(),
            next_id: 0,
            history: HashMap::new(),
            recent: VecDeque::with_capacity(recent_cap),
            recent_cap,
            rng,
            dirty: false,
        }
    }

    /// Seed prior ratings/history. Applied to entries already in the catalog
    /// and to any path a later scan discovers.
    pub fn restore(&mut self, records: Vec<ImageRecord>) {
        for rec in records {
            if let Some(id) = self.by_path.get(&rec.path) {
                if let Some(img) = self.images.get_mut(id) {
                    img.merge(&rec);
                }
            }
            self.history.insert(rec.path.clone(), rec);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Images eligible for display.
    pub fn visible_count(&self) -> usize {
        self.order
            .iter()
            .filter(|id| self.images.get(id).is_some_and(Image::is_drawable))
            .count()
    }

    pub fn loaded_count(&self) -> usize {
        self.images.values().filter(|i| i.is_loaded()).count()
    }

    pub fn image(&self, id: ImageId) -> Option<&Image> {
        self.images.get(&id)
    }

    pub fn ids(&self) -> &[ImageId] {
        &self.order
    }

    pub fn id_of(&self, path: &Path) -> Option<ImageId> {
        self.by_path.get(path).copied()
    }

    fn entry(&mut self, id: ImageId) -> Result<&mut Image> {
        self.images.get_mut(&id).ok_or(Error::UnknownImage(id))
    }

    /// Sync the catalog with `folder`: add new files, drop entries whose file
    /// is gone. Returns the number of entries added; rescanning an unchanged
    /// folder adds nothing.
    pub fn scan(&mut self, folder: &Path) -> usize {
        let found = scanner::discover(folder);
        let mut added = 0usize;

        for path in &found {
            if let Some(id) = self.by_path.get(path) {
                if let Some(img) = self.images.get_mut(id) {
                    if img.broken.is_some_and(|was| was != file_stamp(path)) {
                        debug!("cache: {} changed, retrying", path.display());
                        img.broken = None;
                    }
                }
                continue;
            }
            let id = ImageId(self.next_id);
            self.next_id += 1;
            let mut img = Image::new(path.clone());
            if let Some(rec) = self.history.get(path) {
                img.merge(rec);
            }
            self.images.insert(id, img);
            self.by_path.insert(path.clone(), id);
            self.order.push(id);
            added += 1;
        }

        let gone: Vec<ImageId> = self
            .order
            .iter()
            .copied()
            .filter(|id| {
                self.images
                    .get(id)
                    .map(|i| found.binary_search(&i.path).is_err())
                    .unwrap_or(true)
            })
            .collect();
        for id in &gone {
            if let Some(img) = self.images.remove(id) {
                debug!("cache: pruned {}", img.path.display());
                self.history.insert(img.path.clone(), img.record());
                self.by_path.remove(&img.path);
            }
        }
        if !gone.is_empty() {
            self.order.retain(|id| !gone.contains(id));
            self.recent.retain(|id| !gone.contains(id));
        }

        if added > 0 || !gone.is_empty() {
            self.dirty = true;
            info!(
                "cache: scan {} +{} -{}, {} total",
                folder.display(),
                added,
                gone.len(),
                self.order.len()
            );
        }
        added
    }

    /// Pixels for `id` at `size` in `mode`, decoding and scaling on demand.
    /// A photo that fails to decode is benched until a scan sees its file
    /// change.
    pub fn get(
        &mut self,
        id: ImageId,
        size: (u32, u32),
        mode: Mode,
        now: f64,
    ) -> Result<Arc<RgbaImage>> {
        let img = self.entry(id)?;
        img.last_use = now;

        let full = match &img.full {
            Some(full) => full.clone(),
            None => match image::open(&img.path) {
                Ok(decoded) => {
                    let full = Arc::new(decoded.into_rgba8());
                    img.full = Some(full.clone());
                    full
                }
                Err(e) => {
                    warn!("cache: cannot decode {}: {}", img.path.display(), e);
                    img.broken = Some(file_stamp(&img.path));
                    return Err(Error::image(img.path.clone(), e));
                }
            },
        };

        let key = VariantKey::new(size.0, size.1, mode);
        if !key.needs_variant(full.dimensions()) {
            return Ok(full);
        }
        if let Some(v) = img.variants.get(&key) {
            return Ok(v.clone());
        }
        let variant = Arc::new(scale::render(&full, &key));
        img.variants.insert(key, variant.clone());
        Ok(variant)
    }

    /// Release pixels. With `since`, the time on screen is added to history.
    pub fn unload(&mut self, id: ImageId, since: Option<f64>, now: f64) -> Result<()> {
        let img = self.entry(id)?;
        img.drop_pixels();
        if let Some(since) = since {
            img.was_shown(now - since);
            self.dirty = true;
        }
        Ok(())
    }

    /// Unload every image not requested since `now - threshold`. A zero
    /// threshold keeps whatever was fetched at `now` itself.
    pub fn check_use(&mut self, threshold: f64, now: f64) -> usize {
        let cutoff = now - threshold;
        let mut freed = 0;
        for img in self.images.values_mut() {
            if img.is_loaded() && img.last_use < cutoff {
                img.drop_pixels();
                freed += 1;
            }
        }
        if freed > 0 {
            debug!("cache: released {} images (threshold {:.0}s)", freed, threshold);
        }
        freed
    }

    /// Unload everything, for shutdown.
    pub fn unload_all(&mut self) {
        for img in self.images.values_mut() {
            img.drop_pixels();
        }
    }

    pub fn rate(&mut self, id: ImageId, positive: bool, delta: f32) -> Result<f32> {
        let img = self.entry(id)?;
        let d = if positive { delta } else { -delta };
        img.rating = (img.rating + d).clamp(-1.0, 1.0);
        let r = img.rating;
        self.dirty = true;
        Ok(r)
    }

    pub fn hide(&mut self, id: ImageId, hidden: bool) -> Result<()> {
        self.entry(id)?.hidden = hidden;
        self.dirty = true;
        Ok(())
    }

    /// Pick a random visible image, avoiding the recently returned ones.
    /// With `rated`, candidates are accepted with a bias towards high ratings.
    /// `None` only when nothing is visible.
    pub fn next(&mut self, rated: bool) -> Option<ImageId> {
        let visible: Vec<ImageId> = self
            .order
            .iter()
            .copied()
            .filter(|id| self.images.get(id).is_some_and(Image::is_drawable))
            .collect();
        if visible.is_empty() {
            return None;
        }
        let fresh: Vec<ImageId> = visible
            .iter()
            .copied()
            .filter(|id| !self.recent.contains(id))
            .collect();
        // small catalogs may have everything in the ring
        let pool = if fresh.is_empty() { &visible } else { &fresh };

        let mut pick = pool[self.rng.random_range(0..pool.len())];
        if rated {
            for _ in 0..MAX_RATED_DRAWS {
                let rating = self.images.get(&pick).map(|i| i.rating).unwrap_or(0.0);
                if self.rng.random::<f64>() + rating as f64 / 3.0 >= 0.5 {
                    break;
                }
                pick = pool[self.rng.random_range(0..pool.len())];
            }
        }

        if self.recent_cap > 0 {
            if self.recent.len() >= self.recent_cap {
                self.recent.pop_front();
            }
            self.recent.push_back(pick);
        }
        Some(pick)
    }

    /// Random float in [lo, hi), shared with programs so a seeded cache makes
    /// whole runs reproducible.
    pub fn random_range(&mut self, lo: f64, hi: f64) -> f64 {
        if hi <= lo {
            return lo;
        }
        self.rng.random_range(lo..hi)
    }

    pub fn records(&self) -> Vec<ImageRecord> {
        self.order
            .iter()
            .filter_map(|id| self.images.get(id))
            .map(Image::record)
            .collect()
    }

    /// True once after anything persisted has changed.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
