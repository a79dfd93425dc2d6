//! Temporary TypeScript projects for tests.
//!
//! A fixture starts with a minimal `package.json`, so it loads as a valid
//! project root, and is deleted when dropped.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

pub struct FixtureProject {
    // Held for its Drop
    _dir: TempDir,
    root: PathBuf,
}

impl FixtureProject {
    /// Empty project with a `package.json`
    pub fn new() -> Self {
        Self::bare().file("package.json", "{\n  \"name\": \"fixture\",\n  \"private\": true\n}\n")
    }

    /// Empty directory with no project configuration at all
    pub fn bare() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory for fixture project");
        // Canonical so paths compare equal to what the engine reports
        let root = std::fs::canonicalize(dir.path()).expect("Failed to canonicalize fixture root");
        Self { _dir: dir, root }
    }

    /// Write `content` to `relative`, creating parent directories.
    pub fn file(self, relative: &str, content: &str) -> Self {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .unwrap_or_else(|e| panic!("Failed to create {}: {}", parent.display(), e));
        }
        std::fs::write(&path, content)
            .unwrap_or_else(|e| panic!("Failed to write fixture file {}: {}", relative, e));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

impl Default for FixtureProject {
    fn default() -> Self {
        Self::new()
    }
}
