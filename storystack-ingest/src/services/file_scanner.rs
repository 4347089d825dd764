//! Photo discovery for command-line imports
//!
//! Walks the given paths, keeping files whose extension names an image
//! format and whose leading bytes confirm it. Symlinks are followed;
//! loops are reported by the walker and skipped. Unreadable entries are
//! logged and skipped.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

const MAGIC_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("File access error {0}: {1}")]
    FileAccess(PathBuf, String),
}

pub struct FileScanner {
    /// Entry names skipped entirely, matched exactly
    ignored_names: HashSet<String>,
}

impl FileScanner {
    /// Scanner with the usual OS and VCS clutter ignored
    pub fn new() -> Self {
        Self {
            ignored_names: [".DS_Store", "Thumbs.db", ".git", "@eaDir"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Image files under `paths`, sorted and without repeats
    ///
    /// A path naming a file is taken as-is if it is an image; a directory
    /// is walked recursively. Two paths resolving to the same file are
    /// reported once.
    pub fn scan(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>, ScanError> {
        let mut found = Vec::new();
        for path in paths {
            if !path.exists() {
                return Err(ScanError::PathNotFound(path.clone()));
            }
            if path.is_file() {
                if self.is_image_file(path)? {
                    found.push(path.clone());
                } else {
                    tracing::warn!(path = %path.display(), "Not an image, skipping");
                }
                continue;
            }
            found.extend(self.scan_dir(path));
        }

        found.sort();
        let mut resolved = HashSet::with_capacity(found.len());
        found.retain(|path| resolved.insert(path.canonicalize().unwrap_or_else(|_| path.clone())));
        Ok(found)
    }

    fn scan_dir(&self, root: &Path) -> Vec<PathBuf> {
        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| !self.is_ignored(e));

        let mut images = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => match self.is_image_file(entry.path()) {
                    Ok(true) => images.push(entry.into_path()),
                    Ok(false) => {}
                    Err(e) => tracing::warn!("Skipping {}: {}", entry.path().display(), e),
                },
                Ok(_) => {}
                Err(e) if e.loop_ancestor().is_some() => {
                    tracing::warn!("Symlink loop skipped: {}", e);
                }
                Err(e) => tracing::warn!("Error accessing entry: {}", e),
            }
        }

        tracing::debug!(root = %root.display(), found = images.len(), "Directory scanned");
        images
    }

    fn is_ignored(&self, entry: &DirEntry) -> bool {
        self.ignored_names
            .contains(entry.file_name().to_string_lossy().as_ref())
    }

    fn is_image_file(&self, path: &Path) -> Result<bool, ScanError> {
        let has_image_extension = path
            .extension()
            .and_then(|ext| image::ImageFormat::from_extension(ext))
            .is_some();
        if !has_image_extension {
            return Ok(false);
        }

        let mut file =
            File::open(path).map_err(|e| ScanError::FileAccess(path.to_path_buf(), e.to_string()))?;
        let mut buffer = [0u8; MAGIC_BYTES];
        let read = file
            .read(&mut buffer)
            .map_err(|e| ScanError::FileAccess(path.to_path_buf(), e.to_string()))?;

        Ok(image::guess_format(&buffer[..read]).is_ok())
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::fs;
    use tempfile::TempDir;

    fn write_png(path: &Path) {
        DynamicImage::ImageRgb8(RgbImage::new(4, 4))
            .save_with_format(path, ImageFormat::Png)
            .unwrap();
    }

    #[test]
    fn finds_images_recursively() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("trip/day1")).unwrap();
        write_png(&dir.path().join("a.png"));
        write_png(&dir.path().join("trip/day1/b.png"));
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        fs::write(dir.path().join("fake.jpg"), "not really a jpeg").unwrap();

        let found = FileScanner::new().scan(&[dir.path().to_path_buf()]).unwrap();

        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension().unwrap() == "png"));
    }

    #[test]
    fn ignores_clutter_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        write_png(&dir.path().join(".git/c.png"));

        let found = FileScanner::new().scan(&[dir.path().to_path_buf()]).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn ignore_list_matches_whole_names() {
        let dir = TempDir::new().unwrap();
        write_png(&dir.path().join("trip.gitaway.png"));
        write_png(&dir.path().join("Thumbs.db.png"));

        let found = FileScanner::new().scan(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn follows_symlinks_and_survives_loops() {
        let dir = TempDir::new().unwrap();
        let photos = dir.path().join("photos");
        let elsewhere = dir.path().join("elsewhere");
        fs::create_dir_all(&photos).unwrap();
        fs::create_dir_all(&elsewhere).unwrap();
        write_png(&elsewhere.join("linked.png"));
        std::os::unix::fs::symlink(elsewhere.join("linked.png"), photos.join("linked.png")).unwrap();
        std::os::unix::fs::symlink(&photos, photos.join("loop")).unwrap();

        let found = FileScanner::new().scan(&[photos.clone()]).unwrap();

        assert_eq!(found, vec![photos.join("linked.png")]);
    }

    #[test]
    fn explicit_file_and_duplicates() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.png");
        write_png(&file);

        let found = FileScanner::new()
            .scan(&[file.clone(), dir.path().to_path_buf()])
            .unwrap();
        assert_eq!(found, vec![file]);
    }

    #[test]
    fn missing_path_is_an_error() {
        let result = FileScanner::new().scan(&[PathBuf::from("/nonexistent/photos")]);
        assert!(matches!(result, Err(ScanError::PathNotFound(_))));
    }
}
