//
// source_cache.rs
//
// Disk content cache for files read during resolution
//

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;

/// What a cached read is checked against before reuse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DiskStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl DiskStamp {
    fn of(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }
}

#[derive(Debug)]
struct CachedSource {
    stamp: DiskStamp,
    text: String,
}

/// Source text shared by the function search and the import follower.
///
/// Entries are re-read when the file's modification time or length changes.
#[derive(Debug, Default)]
pub struct SourceCache {
    entries: DashMap<PathBuf, CachedSource>,
    disk_reads: AtomicUsize,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the file's content, reading from disk when the cached copy is
    /// missing or stale.
    pub fn read(&self, path: &Path) -> std::io::Result<String> {
        let stamp = DiskStamp::of(path)?;
        if let Some(cached) = self.entries.get(path) {
            if cached.stamp == stamp {
                log::trace!("Source cache hit for {}", path.display());
                return Ok(cached.text.clone());
            }
        }

        let text = std::fs::read_to_string(path)?;
        self.disk_reads.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            path.to_path_buf(),
            CachedSource {
                stamp,
                text: text.clone(),
            },
        );
        Ok(text)
    }

    /// Number of reads that went to disk
    pub fn disk_reads(&self) -> usize {
        self.disk_reads.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_second_read_is_served_from_memory() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "export const x = 1;").unwrap();

        let cache = SourceCache::new();
        assert_eq!(cache.read(file.path()).unwrap(), "export const x = 1;");
        assert_eq!(cache.read(file.path()).unwrap(), "export const x = 1;");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.disk_reads(), 1);
    }

    #[test]
    fn test_changed_length_forces_reread() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "let a = 1;").unwrap();

        let cache = SourceCache::new();
        assert_eq!(cache.read(file.path()).unwrap(), "let a = 1;");

        write!(file, " let b = 2;").unwrap();
        file.flush().unwrap();
        assert_eq!(cache.read(file.path()).unwrap(), "let a = 1; let b = 2;");
        assert_eq!(cache.disk_reads(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_read_missing_file_errors() {
        let cache = SourceCache::new();
        assert!(cache.read(Path::new("/no/such/file.ts")).is_err());
        assert!(cache.is_empty());
    }
}
