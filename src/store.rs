//! Persisted appliance state: log, program history, image ratings and the
//! interaction log.
//!
//! SQLite with a versioned schema (`PRAGMA user_version`). The state is read
//! once at startup into a [`Snapshot`] and written back whole, time-gated by
//! [`Persistence`], so frame-loop mutations never touch the disk directly.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::cache::ImageRecord;
use crate::clock::stamp;
use crate::error::Result;

/// Ordered schema steps; entry `i` upgrades a database at version `i`.
const MIGRATIONS: &[&str] = &[
    // v1
    "CREATE TABLE IF NOT EXISTS log (
        id    INTEGER PRIMARY KEY,
        at    REAL NOT NULL,
        line  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS programs (
        name   TEXT PRIMARY KEY,
        shown  TEXT NOT NULL DEFAULT '[]'
    );
    CREATE TABLE IF NOT EXISTS images (
        path    TEXT PRIMARY KEY,
        rating  REAL NOT NULL DEFAULT 0,
        shown   TEXT NOT NULL DEFAULT '[]'
    );
    CREATE TABLE IF NOT EXISTS interactions (
        id      INTEGER PRIMARY KEY,
        at      REAL NOT NULL,
        kind    TEXT NOT NULL,
        detail  TEXT NOT NULL
    );",
    // v2
    "ALTER TABLE images ADD COLUMN hidden INTEGER NOT NULL DEFAULT 0;",
];

pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

/// One presentation of a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub since: i64,
    pub duration: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogLine {
    pub at: f64,
    pub line: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Action {
    pub at: f64,
    pub kind: String,
    pub detail: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub log: Vec<LogLine>,
    pub programs: BTreeMap<String, Vec<Interval>>,
    pub images: Vec<ImageRecord>,
    pub interactions: Vec<Action>,
}

pub struct StoreStats {
    pub log_lines: i64,
    pub programs: i64,
    pub images: i64,
    pub rated: i64,
    pub hidden: i64,
    pub interactions: i64,
}

#[derive(Clone)]
pub struct Store(Arc<Mutex<Connection>>);

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::from_conn(conn)
    }

    pub fn open_memory() -> Result<Self> {
        Self::from_conn(Connection::open_in_memory()?)
    }

    fn from_conn(mut conn: Connection) -> Result<Self> {
        migrate(&mut conn)?;
        Ok(Store(Arc::new(Mutex::new(conn))))
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn version(&self) -> Result<i64> {
        Ok(self
            .conn()
            .query_row("PRAGMA user_version", [], |r| r.get(0))?)
    }

    pub fn load(&self) -> Result<Snapshot> {
        let db = self.conn();
        let mut snap = Snapshot::default();

        let mut stmt = db.prepare("SELECT at, line FROM log ORDER BY id")?;
        snap.log = stmt
            .query_map([], |r| {
                Ok(LogLine {
                    at: r.get(0)?,
                    line: r.get(1)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut stmt = db.prepare("SELECT name, shown FROM programs ORDER BY name")?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;
        for (name, shown) in rows {
            snap.programs.insert(name, serde_json::from_str(&shown)?);
        }

        let mut stmt = db.prepare("SELECT path, rating, hidden, shown FROM images ORDER BY path")?;
        let rows: Vec<(String, f64, bool, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
            .collect::<std::result::Result<_, _>>()?;
        for (path, rating, hidden, shown) in rows {
            snap.images.push(ImageRecord {
                path: PathBuf::from(path),
                rating: rating as f32,
                hidden,
                shown: serde_json::from_str(&shown)?,
            });
        }

        let mut stmt = db.prepare("SELECT at, kind, detail FROM interactions ORDER BY id")?;
        snap.interactions = stmt
            .query_map([], |r| {
                Ok(Action {
                    at: r.get(0)?,
                    kind: r.get(1)?,
                    detail: r.get(2)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;

        Ok(snap)
    }

    /// Replace the stored state with `snap` in one transaction.
    pub fn save(&self, snap: &Snapshot) -> Result<()> {
        let mut db = self.conn();
        let tx = db.transaction()?;
        tx.execute_batch(
            "DELETE FROM log; DELETE FROM programs; DELETE FROM images; DELETE FROM interactions;",
        )?;
        {
            let mut stmt = tx.prepare("INSERT INTO log (at, line) VALUES (?1, ?2)")?;
            for l in &snap.log {
                stmt.execute(params![l.at, l.line])?;
            }
            let mut stmt = tx.prepare("INSERT INTO programs (name, shown) VALUES (?1, ?2)")?;
            for (name, shown) in &snap.programs {
                stmt.execute(params![name, serde_json::to_string(shown)?])?;
            }
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO images (path, rating, hidden, shown) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for img in &snap.images {
                stmt.execute(params![
                    img.path.to_string_lossy(),
                    img.rating as f64,
                    img.hidden,
                    serde_json::to_string(&img.shown)?
                ])?;
            }
            let mut stmt =
                tx.prepare("INSERT INTO interactions (at, kind, detail) VALUES (?1, ?2, ?3)")?;
            for a in &snap.interactions {
                stmt.execute(params![a.at, a.kind, a.detail])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let db = self.conn();
        let count = |sql: &str| -> Result<i64> { Ok(db.query_row(sql, [], |r| r.get(0))?) };
        Ok(StoreStats {
            log_lines: count("SELECT COUNT(*) FROM log")?,
            programs: count("SELECT COUNT(*) FROM programs")?,
            images: count("SELECT COUNT(*) FROM images")?,
            rated: count("SELECT COUNT(*) FROM images WHERE rating != 0")?,
            hidden: count("SELECT COUNT(*) FROM images WHERE hidden != 0")?,
            interactions: count("SELECT COUNT(*) FROM interactions")?,
        })
    }
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if current >= SCHEMA_VERSION {
        return Ok(());
    }
    let tx = conn.transaction()?;
    for (i, step) in MIGRATIONS.iter().enumerate().skip(current.max(0) as usize) {
        debug!("store: migrating to v{}", i + 1);
        tx.execute_batch(step)?;
    }
    tx.execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION))?;
    tx.commit()?;
    info!("store: schema v{} -> v{}", current, SCHEMA_VERSION);
    Ok(())
}

// ── Persistence ─────────────────────────────────────────────────────────

/// In-memory state plus the time gates for writing it out.
pub struct Persistence {
    store: Option<Store>,
    export_path: Option<PathBuf>,
    pub data: Snapshot,
    dirty: bool,
    save_every: f64,
    export_every: f64,
    last_save: f64,
    last_export: f64,
}

impl Persistence {
    /// An unreadable or unwritable store is not fatal: the frame runs with
    /// empty history and skips saves.
    pub fn open(
        path: &Path,
        export_path: Option<PathBuf>,
        save_every: f64,
        export_every: f64,
        now: f64,
    ) -> Self {
        let (store, data) = match Store::open(path).and_then(|s| s.load().map(|d| (s, d))) {
            Ok((s, d)) => {
                info!(
                    "store: {} ({} images, {} log lines)",
                    path.display(),
                    d.images.len(),
                    d.log.len()
                );
                (Some(s), d)
            }
            Err(e) => {
                warn!("store: cannot open {}: {}; running without history", path.display(), e);
                (None, Snapshot::default())
            }
        };
        Self::with_store(store, data, export_path, save_every, export_every, now)
    }

    pub fn with_store(
        store: Option<Store>,
        data: Snapshot,
        export_path: Option<PathBuf>,
        save_every: f64,
        export_every: f64,
        now: f64,
    ) -> Self {
        Persistence {
            store,
            export_path,
            data,
            dirty: false,
            save_every,
            export_every,
            last_save: now,
            last_export: now,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn log(&mut self, now: f64, line: impl Into<String>) {
        let line = line.into();
        info!("{}", line);
        self.data.log.push(LogLine { at: now, line });
        self.dirty = true;
    }

    pub fn action(&mut self, now: f64, kind: &str, detail: impl Into<String>) {
        let detail = detail.into();
        info!("action {}: {}", kind, detail);
        self.data.interactions.push(Action {
            at: now,
            kind: kind.to_string(),
            detail,
        });
        self.dirty = true;
    }

    pub fn program_history(&self, name: &str) -> Vec<Interval> {
        self.data.programs.get(name).cloned().unwrap_or_default()
    }

    pub fn save_due(&self, now: f64) -> bool {
        self.dirty && now - self.last_save >= self.save_every
    }

    pub fn export_due(&self, now: f64) -> bool {
        now - self.last_export >= self.export_every
    }

    /// Write everything out. Failures are logged and the state stays dirty.
    pub fn save(&mut self, now: f64) {
        self.last_save = now;
        let Some(store) = &self.store else {
            return;
        };
        match store.save(&self.data) {
            Ok(()) => {
                self.dirty = false;
                debug!("store: saved");
            }
            Err(e) => warn!("store: save failed: {}", e),
        }
    }

    pub fn export(&mut self, now: f64) {
        self.last_export = now;
        let Some(path) = &self.export_path else {
            return;
        };
        if let Err(e) = std::fs::write(path, render_export(&self.data)) {
            warn!("store: export to {} failed: {}", path.display(), e);
        }
    }
}

/// Human-readable dump of the whole state.
pub fn render_export(data: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "LOG");
    for l in &data.log {
        let _ = writeln!(out, "{} - {}", stamp(l.at), l.line);
    }
    let _ = writeln!(out, "\nPROGRAMS");
    for (name, shown) in &data.programs {
        let total: u64 = shown.iter().map(|i| i.duration as u64).sum();
        let _ = writeln!(out, "{}: {} runs, {} sec", name, shown.len(), total);
    }
    let _ = writeln!(out, "\nINTERACTIONS");
    for a in &data.interactions {
        let _ = writeln!(out, "{} - {}: {}", stamp(a.at), a.kind, a.detail);
    }
    let _ = writeln!(out, "\nIMAGES");
    for img in &data.images {
        let _ = writeln!(
            out,
            "{}; rate: {:.2}; hidden: {}; shown: {:?}",
            img.path.display(),
            img.rating,
            img.hidden,
            img.shown
        );
    }
    out
}
