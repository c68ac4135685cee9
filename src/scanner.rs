//! Catalog scanner: discover photo files under a folder.
//!
//! Walks the tree, keeping only complete image files: temp/partial uploads,
//! dotfiles, VCS folders and zero-length files are skipped, so a scan racing
//! the importer never picks up a half-written photo.

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

const SKIP_DIRS: &[&str] = &[".git", ".svn", "@eaDir"];

pub fn is_photo_ext(ext: &str) -> bool {
    PHOTO_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

fn is_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(is_photo_ext)
        .unwrap_or(false)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.') || SKIP_DIRS.contains(&s))
            .unwrap_or(false)
}

/// Absolute paths of every photo under `root`, sorted for stable ordering.
/// A missing root yields an empty list.
pub fn discover(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !is_photo(path) {
            continue;
        }
        match entry.metadata() {
            Ok(m) if m.len() > 0 => {}
            _ => continue,
        }
        let abs = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        found.push(abs);
    }

    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str, bytes: &[u8]) {
        if let Some(parent) = dir.join(name).parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(dir.join(name), bytes).unwrap();
    }

    #[test]
    fn photo_ext_case_insensitive() {
        assert!(is_photo_ext("jpg"));
        assert!(is_photo_ext("JPEG"));
        assert!(is_photo_ext("Png"));
        assert!(!is_photo_ext("gif"));
        assert!(!is_photo_ext("part"));
        assert!(!is_photo_ext(""));
    }

    #[test]
    fn discover_filters_and_recurses() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.jpg", b"x");
        touch(dir.path(), "B.JPEG", b"x");
        touch(dir.path(), "nested/c.png", b"x");
        touch(dir.path(), "notes.txt", b"x");
        touch(dir.path(), "upload.jpg.part", b"x");
        touch(dir.path(), "empty.jpg", b"");
        touch(dir.path(), ".DS_Store", b"x");
        touch(dir.path(), ".git/d.jpg", b"x");

        let found = discover(dir.path());
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 3, "{:?}", names);
        assert!(names.contains(&"a.jpg".to_string()));
        assert!(names.contains(&"B.JPEG".to_string()));
        assert!(names.contains(&"c.png".to_string()));
        assert!(found.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn discover_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(&dir.path().join("gone")).is_empty());
    }

    #[test]
    fn discover_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "z.jpg", b"x");
        touch(dir.path(), "a.jpg", b"x");
        touch(dir.path(), "m.jpg", b"x");
        let found = discover(dir.path());
        let mut sorted = found.clone();
        sorted.sort();
        assert_eq!(found, sorted);
    }
}
