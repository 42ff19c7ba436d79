//! Filesystem-backed persistence for captured snapshots.

use crate::core::{Result, WatchError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Store for captured snapshot files, rooted at a single directory.
///
/// File names embed the capture time with nanosecond resolution
/// (`heap_<unix_nanos>.prof`), so lexical order equals capture order.
/// Files are immutable once written; only the retention sweep (or
/// external tooling) removes them.
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the store directory (and parents) if missing.
    ///
    /// Snapshots can expose process internals, so the directory is
    /// created owner-only (0o700) on unix.
    pub fn ensure_root(&self) -> Result<()> {
        if self.root.is_dir() {
            return Ok(());
        }
        create_private_dir(&self.root).map_err(|e| {
            WatchError::Startup(format!(
                "Failed to create snapshot directory '{}': {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Persists one snapshot under a freshly minted timestamp name and
    /// returns the file name.
    pub fn create(&self, bytes: &[u8]) -> Result<String> {
        let name = format!("heap_{}.prof", unix_nanos());
        let path = self.root.join(&name);
        fs::write(&path, bytes).map_err(|e| {
            WatchError::Capture(format!(
                "Failed to write snapshot '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(name)
    }

    /// Lists snapshot file names, oldest first.
    pub fn list(&self) -> Result<Vec<String>> {
        self.entries().map_err(|e| {
            WatchError::Store(format!(
                "Failed to read snapshot directory '{}': {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Reads one snapshot's contents.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.root.join(name);
        fs::read(&path).map_err(|e| {
            WatchError::Store(format!(
                "Failed to read snapshot '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Returns the newest snapshot's name and contents.
    pub fn latest(&self) -> Result<(String, Vec<u8>)> {
        let names = self.list()?;
        let name = names.into_iter().next_back().ok_or(WatchError::NotFound)?;
        let bytes = self.read(&name)?;
        Ok((name, bytes))
    }

    /// Deletes one snapshot.
    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.root.join(name);
        fs::remove_file(&path).map_err(|e| {
            WatchError::Store(format!(
                "Failed to remove snapshot '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Deletes oldest entries until at most `max` remain.
    ///
    /// The eviction decision is keyed on a live listing, never on a
    /// capture counter: files left over from earlier runs count toward
    /// the bound. Individual deletions that fail (a file vanished
    /// concurrently) are skipped. Returns the number of files removed.
    pub fn retain_newest(&self, max: usize) -> Result<usize> {
        let names = self.entries().map_err(|e| {
            WatchError::Sweep(format!(
                "Failed to list snapshot directory '{}': {}",
                self.root.display(),
                e
            ))
        })?;
        if names.len() <= max {
            return Ok(0);
        }
        let excess = names.len() - max;
        let mut removed = 0;
        for name in &names[..excess] {
            if fs::remove_file(self.root.join(name)).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn entries(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}
