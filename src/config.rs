//! Runtime configuration, read from an optional TOML file. Every field has a
//! default so an empty (or absent) file yields a working appliance.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub display_width: u32,
    pub display_height: u32,

    /// Normalized photos live here; the cache scans it.
    pub catalog_dir: PathBuf,
    /// The importer picks up new uploads from here.
    pub inbox_dir: PathBuf,
    pub store_path: PathBuf,

    pub frame_ms: u64,
    pub floor_sleep_ms: u64,

    pub night_start_hour: u32,
    pub night_end_hour: u32,
    /// Longest a program may stay up at night before the blank screen takes over.
    pub night_ceiling_secs: f64,

    pub memory_floor_mb: u64,
    pub memory_check_secs: f64,

    pub import_interval_secs: f64,
    pub save_interval_secs: f64,
    pub export_interval_secs: f64,

    pub switch_backoff_secs: f64,
    pub interaction_quiet_secs: f64,

    pub min_catalog_images: usize,
    pub program_max_secs: f64,
    pub recent_ring: usize,

    pub chord_slot: u8,
    /// FIFO or file the touch driver writes `press|move|release SLOT X Y` lines to.
    pub touch_source: Option<PathBuf>,
    /// Same for the proximity driver (`m METRES` or `d LEVEL`). Without one the
    /// distance sweeps synthetically.
    pub sensor_source: Option<PathBuf>,

    #[serde(skip)]
    pub debug: bool,
    #[serde(skip)]
    pub nonet: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data = data_dir();
        Config {
            display_width: 800,
            display_height: 480,
            catalog_dir: data.join("images"),
            inbox_dir: data.join("inbox"),
            store_path: data.join("photoframe.db"),
            frame_ms: 40,
            floor_sleep_ms: 5,
            night_start_hour: 0,
            night_end_hour: 6,
            night_ceiling_secs: 600.0,
            memory_floor_mb: 500,
            memory_check_secs: 1.0,
            import_interval_secs: 10.0,
            save_interval_secs: 120.0,
            export_interval_secs: 7200.0,
            switch_backoff_secs: 60.0,
            interaction_quiet_secs: 60.0,
            min_catalog_images: 20,
            program_max_secs: 3.0 * 3600.0,
            recent_ring: 15,
            chord_slot: 5,
            touch_source: None,
            sensor_source: None,
            debug: false,
            nonet: false,
        }
    }
}

impl Config {
    /// Load `path` if given, otherwise defaults. Missing files are an error only
    /// when the path was requested explicitly.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                Self::parse(&text, p)
            }
            None => Ok(Config::default()),
        }
    }

    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|source| Error::Config {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Debug mode shortens program lifetimes and relaxes the catalog minimum.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        if debug {
            self.min_catalog_images = self.min_catalog_images.min(4);
            self.program_max_secs = self.program_max_secs.min(600.0);
        }
        self
    }

    pub fn with_nonet(mut self, nonet: bool) -> Self {
        self.nonet = nonet;
        self
    }

    pub fn display(&self) -> (u32, u32) {
        (self.display_width, self.display_height)
    }

    /// Human-readable dump written next to the store.
    pub fn export_path(&self) -> PathBuf {
        self.store_path
            .parent()
            .unwrap_or(Path::new("."))
            .join("data.log")
    }
}

/// Data directory for the store and default catalog, mirroring the platform
/// conventions `directories` resolves.
pub fn data_dir() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("dev", "photoframe", "photoframe") {
        dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = Config::parse("", Path::new("x.toml")).unwrap();
        assert_eq!(cfg.display(), (800, 480));
        assert_eq!(cfg.min_catalog_images, 20);
        assert_eq!(cfg.night_end_hour, 6);
        assert_eq!(cfg.recent_ring, 15);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = Config::parse(
            "display_width = 1024\nnight_start_hour = 22\ncatalog_dir = \"/srv/photos\"\n",
            Path::new("x.toml"),
        )
        .unwrap();
        assert_eq!(cfg.display_width, 1024);
        assert_eq!(cfg.display_height, 480);
        assert_eq!(cfg.night_start_hour, 22);
        assert_eq!(cfg.catalog_dir, PathBuf::from("/srv/photos"));
        assert_eq!(cfg.touch_source, None);
    }

    #[test]
    fn input_sources_are_optional_paths() {
        let cfg = Config::parse(
            "touch_source = \"/run/frame/touch\"\nsensor_source = \"/run/frame/range\"\n",
            Path::new("x.toml"),
        )
        .unwrap();
        assert_eq!(cfg.touch_source, Some(PathBuf::from("/run/frame/touch")));
        assert_eq!(cfg.sensor_source, Some(PathBuf::from("/run/frame/range")));
    }

    #[test]
    fn bad_toml_reports_path() {
        let err = Config::parse("display_width = \"wide\"", Path::new("frame.toml")).unwrap_err();
        assert!(err.to_string().contains("frame.toml"));
    }

    #[test]
    fn load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());
        assert!(Config::load(None).is_ok());
    }

    #[test]
    fn debug_relaxes_thresholds() {
        let cfg = Config::default().with_debug(true);
        assert!(cfg.debug);
        assert_eq!(cfg.min_catalog_images, 4);
        assert_eq!(cfg.program_max_secs, 600.0);
    }

    #[test]
    fn export_sits_next_to_store() {
        let mut cfg = Config::default();
        cfg.store_path = PathBuf::from("/var/lib/frame/frame.db");
        assert_eq!(cfg.export_path(), PathBuf::from("/var/lib/frame/data.log"));
    }
}
