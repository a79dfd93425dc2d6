//
// imports/mod.rs
//
// Import following: module resolution and export lookup
//

pub mod follow;
pub mod resolve;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::types::Position;

pub use follow::{context_for_import, FollowOutcome};
pub use resolve::resolve_module_path;

/// Modules and definitions already visited along one resolution chain.
///
/// Cloned when the chain branches, so siblings do not see each other's
/// visits.
#[derive(Debug, Clone, Default)]
pub struct ResolutionPath {
    modules: Vec<PathBuf>,
    definitions: HashSet<(PathBuf, Position)>,
    depth: usize,
}

impl ResolutionPath {
    /// A path starting in `file`, the file of the analyzed function
    pub fn start(file: &Path) -> Self {
        Self {
            modules: vec![file.to_path_buf()],
            definitions: HashSet::new(),
            depth: 0,
        }
    }

    pub fn contains_module(&self, path: &Path) -> bool {
        self.modules.iter().any(|m| m == path)
    }

    pub fn has_definition(&self, path: &Path, position: Position) -> bool {
        self.definitions.contains(&(path.to_path_buf(), position))
    }

    /// Number of nested function expansions on this path
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The path one level deeper, after stepping into the definition at
    /// `position` in `file`.
    pub fn enter(&self, file: &Path, position: Position) -> Self {
        let mut next = self.with_module(file);
        next.definitions.insert((file.to_path_buf(), position));
        next.depth += 1;
        next
    }

    /// The path with `file` recorded as visited, depth unchanged
    pub fn with_module(&self, file: &Path) -> Self {
        let mut next = self.clone();
        if !next.contains_module(file) {
            next.modules.push(file.to_path_buf());
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_records_module_and_definition() {
        let start = ResolutionPath::start(Path::new("/app/src/a.ts"));
        let next = start.enter(Path::new("/app/src/b.ts"), Position::new(3, 0));

        assert!(next.contains_module(Path::new("/app/src/a.ts")));
        assert!(next.contains_module(Path::new("/app/src/b.ts")));
        assert!(next.has_definition(Path::new("/app/src/b.ts"), Position::new(3, 0)));
        assert_eq!(next.depth(), 1);

        // The original is untouched
        assert!(!start.contains_module(Path::new("/app/src/b.ts")));
        assert_eq!(start.depth(), 0);
    }

    #[test]
    fn test_with_module_does_not_duplicate() {
        let path = ResolutionPath::start(Path::new("/app/a.ts"))
            .with_module(Path::new("/app/a.ts"))
            .with_module(Path::new("/app/b.ts"));
        assert!(path.contains_module(Path::new("/app/b.ts")));
        assert_eq!(path.modules.len(), 2);
        assert_eq!(path.depth(), 0);
    }
}
