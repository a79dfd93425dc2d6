//
// config.rs
//
// Configuration for function search and identifier resolution
//

use std::time::Duration;

use serde::Deserialize;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Executable used to start the code-intelligence server
    pub server_command: String,
    /// Arguments passed to `server_command`
    pub server_args: Vec<String>,
    /// Bounded wait for a single protocol request, in milliseconds
    pub request_timeout_ms: u64,
    /// Bounded wait for the initialize handshake, in milliseconds
    pub startup_timeout_ms: u64,
    /// Maximum number of identifiers resolved concurrently per function
    pub max_concurrent_resolutions: usize,
    /// How many levels of nested function context to expand
    pub max_expansion_depth: usize,
    /// File extensions searched for the target function
    pub source_extensions: Vec<String>,
    /// Directory names never descended into (hidden directories are always skipped)
    pub ignored_directories: Vec<String>,
    /// Visit directory entries sorted by file name instead of enumeration order
    pub sorted_traversal: bool,
}

impl Default for EngineConfig {
    /// Defaults start `typescript-language-server` through `npx`, search `.ts`
    /// and `.tsx` files, and skip the usual dependency directories.
    ///
    /// # Examples
    ///
    /// ```
    /// use scopetrace::config::EngineConfig;
    ///
    /// let cfg = EngineConfig::default();
    /// assert_eq!(cfg.server_command, "npx");
    /// assert_eq!(cfg.max_concurrent_resolutions, 8);
    /// assert!(cfg.ignored_directories.iter().any(|d| d == "node_modules"));
    /// ```
    fn default() -> Self {
        Self {
            server_command: "npx".to_string(),
            server_args: vec![
                "typescript-language-server".to_string(),
                "--stdio".to_string(),
            ],
            request_timeout_ms: 10_000,
            startup_timeout_ms: 60_000,
            max_concurrent_resolutions: 8,
            max_expansion_depth: 2,
            source_extensions: vec!["ts".to_string(), "tsx".to_string()],
            ignored_directories: DEPENDENCY_DIRECTORIES
                .iter()
                .map(|d| d.to_string())
                .collect(),
            sorted_traversal: false,
        }
    }
}

/// Directory names holding installed third-party code
pub const DEPENDENCY_DIRECTORIES: &[&str] =
    &["node_modules", "bower_components", "jspm_packages", "vendor"];

impl EngineConfig {
    /// Build a config from a JSON object, falling back to defaults for
    /// missing keys.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Whether a directory with this name is skipped by the tree walker
    pub fn is_ignored_directory(&self, name: &str) -> bool {
        name.starts_with('.') || self.ignored_directories.iter().any(|d| d == name)
    }

    /// Whether a file is a search candidate. Declaration files never hold
    /// function bodies and are skipped.
    pub fn is_source_file(&self, name: &str) -> bool {
        if is_declaration_file(name) {
            return false;
        }
        match name.rsplit_once('.') {
            Some((_, ext)) => self
                .source_extensions
                .iter()
                .any(|candidate| ext.eq_ignore_ascii_case(candidate)),
            None => false,
        }
    }
}

/// Type-only declaration file (`.d.ts`, `.d.mts`, `.d.cts`)
pub fn is_declaration_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".d.ts") || lower.ends_with(".d.mts") || lower.ends_with(".d.cts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.server_args, vec!["typescript-language-server", "--stdio"]);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_expansion_depth, 2);
        assert!(!config.sorted_traversal);
        assert_eq!(config.source_extensions, vec!["ts", "tsx"]);
    }

    #[test]
    fn test_from_json_merges_over_defaults() {
        let config = EngineConfig::from_json(json!({
            "serverCommand": "typescript-language-server",
            "serverArgs": ["--stdio"],
            "requestTimeoutMs": 250,
            "sortedTraversal": true
        }))
        .unwrap();
        assert_eq!(config.server_command, "typescript-language-server");
        assert_eq!(config.server_args, vec!["--stdio"]);
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert!(config.sorted_traversal);
        // Untouched keys keep their defaults
        assert_eq!(config.max_concurrent_resolutions, 8);
    }

    #[test]
    fn test_ignored_directories() {
        let config = EngineConfig::default();
        assert!(config.is_ignored_directory("node_modules"));
        assert!(config.is_ignored_directory(".git"));
        assert!(config.is_ignored_directory(".wrangler"));
        assert!(!config.is_ignored_directory("src"));
    }

    #[test]
    fn test_source_file_filter() {
        let config = EngineConfig::default();
        assert!(config.is_source_file("index.ts"));
        assert!(config.is_source_file("App.TSX"));
        assert!(!config.is_source_file("worker-configuration.d.ts"));
        assert!(!config.is_source_file("index.js"));
        assert!(!config.is_source_file("Makefile"));
    }
}
