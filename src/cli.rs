//! CLI subcommand implementations.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cache::ImageCache;
use crate::config::Config;
use crate::importer::{self, ImportSettings};
use crate::store::Store;

pub fn scan(config: &Config) -> Result<()> {
    let dir = &config.catalog_dir;
    if !dir.is_dir() {
        anyhow::bail!("catalog folder {} does not exist", dir.display());
    }
    println!("Scanning {}...", dir.display());
    let mut cache = ImageCache::new(config.recent_ring);
    let count = cache.scan(dir);
    println!("Done. {} photos.", count);
    Ok(())
}

pub fn import(config: &Config) -> Result<()> {
    let settings = ImportSettings {
        inbox: config.inbox_dir.clone(),
        catalog: config.catalog_dir.clone(),
        size: config.display(),
        interval: Duration::from_secs_f64(config.import_interval_secs),
    };
    std::fs::create_dir_all(&settings.catalog)
        .with_context(|| format!("creating {}", settings.catalog.display()))?;
    println!(
        "Importing {} -> {}...",
        settings.inbox.display(),
        settings.catalog.display()
    );
    let report = importer::import_pass(&settings, &mut HashSet::new());
    println!(
        "Done. {} imported, {} duplicates, {} failed.",
        report.imported, report.duplicates, report.failed
    );
    Ok(())
}

pub fn status(config: &Config) -> Result<()> {
    let store = Store::open(&config.store_path)
        .with_context(|| format!("opening store {}", config.store_path.display()))?;
    let stats = store.stats()?;
    let snap = store.load()?;

    let mut cache = ImageCache::new(config.recent_ring);
    cache.restore(snap.images);
    cache.scan(&config.catalog_dir);

    println!("photoframe status");
    println!("=================");
    println!("store:    {} (schema v{})", config.store_path.display(), store.version()?);
    println!("catalog:  {} photos in {}", cache.len(), config.catalog_dir.display());
    println!("visible:  {}", cache.visible_count());
    println!("stored:   {} images ({} rated, {} hidden)", stats.images, stats.rated, stats.hidden);
    println!("log:      {} lines", stats.log_lines);
    println!("actions:  {}", stats.interactions);
    println!("programs: {} stored", stats.programs);
    for (name, shown) in &snap.programs {
        let secs: u64 = shown.iter().map(|i| i.duration as u64).sum();
        println!("  {:<10} {} runs, {} sec", name, shown.len(), secs);
    }
    Ok(())
}
