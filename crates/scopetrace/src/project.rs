//
// project.rs
//
// Project configuration discovery (tsconfig.json / jsconfig.json / package.json)
//

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::error::EngineError;

const CONFIG_FILES: &[&str] = &["tsconfig.json", "jsconfig.json"];

/// Module-resolution settings of one project root
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectConfig {
    /// Absolute project root
    pub root: PathBuf,
    /// The tsconfig/jsconfig file that was read, if any
    pub config_file: Option<PathBuf>,
    /// `compilerOptions.baseUrl`, made absolute
    pub base_url: Option<PathBuf>,
    /// Directory of the configuration file that declared `paths`, which may
    /// be a base configuration reached through `extends`
    pub paths_dir: Option<PathBuf>,
    /// `compilerOptions.paths` in declaration order
    pub path_aliases: Vec<PathAlias>,
}

/// One `compilerOptions.paths` entry, e.g. `"@/*": ["./src/*"]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathAlias {
    pub pattern: String,
    pub targets: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTsConfig {
    extends: Option<Extends>,
    #[serde(default)]
    compiler_options: RawCompilerOptions,
}

/// `extends` takes one configuration or, since TypeScript 5.0, several
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Extends {
    One(String),
    Many(Vec<String>),
}

impl Extends {
    fn specifiers(&self) -> &[String] {
        match self {
            Extends::One(specifier) => std::slice::from_ref(specifier),
            Extends::Many(specifiers) => specifiers,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCompilerOptions {
    base_url: Option<String>,
    paths: Option<serde_json::Map<String, Value>>,
}

/// Module-resolution options after `extends` is applied. Relative values
/// are resolved against the file that declared them.
#[derive(Debug, Default)]
struct ResolutionOptions {
    base_url: Option<PathBuf>,
    paths: Option<(PathBuf, serde_json::Map<String, Value>)>,
}

impl ResolutionOptions {
    /// `self` with every option `over` sets replaced by its value
    fn overlay(self, over: ResolutionOptions) -> Self {
        Self {
            base_url: over.base_url.or(self.base_url),
            paths: over.paths.or(self.paths),
        }
    }
}

impl ProjectConfig {
    /// Load the configuration of `root`.
    ///
    /// Fails with a configuration error when `root` is not a directory, when
    /// neither a tsconfig/jsconfig nor a `package.json` exists, or when the
    /// tsconfig/jsconfig present cannot be parsed.
    pub fn load(root: &Path) -> Result<Self, EngineError> {
        let root = fs::canonicalize(root).map_err(|e| {
            EngineError::configuration(root, format!("project root is not accessible: {e}"))
        })?;
        if !root.is_dir() {
            return Err(EngineError::configuration(&root, "project root is not a directory"));
        }

        let config_file = CONFIG_FILES
            .iter()
            .map(|name| root.join(name))
            .find(|path| path.is_file());

        let Some(config_file) = config_file else {
            if root.join("package.json").is_file() {
                log::debug!(
                    "No tsconfig.json in {}, using package.json defaults",
                    root.display()
                );
                return Ok(Self {
                    root,
                    ..Self::default()
                });
            }
            return Err(EngineError::configuration(
                &root,
                "no tsconfig.json, jsconfig.json, or package.json found",
            ));
        };

        let options = load_config_chain(&config_file, &mut HashSet::new())?;
        let base_url = options.base_url;
        let (paths_dir, paths) = match options.paths {
            Some((dir, paths)) => (Some(dir), paths),
            None => (None, serde_json::Map::new()),
        };

        let mut path_aliases = Vec::new();
        for (pattern, targets) in paths {
            let targets: Vec<String> = match targets {
                Value::Array(items) => items
                    .into_iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect(),
                other => {
                    log::warn!(
                        "Ignoring paths entry '{}' in {}: expected an array, got {}",
                        pattern,
                        config_file.display(),
                        other
                    );
                    continue;
                }
            };
            path_aliases.push(PathAlias { pattern, targets });
        }

        log::debug!(
            "Loaded {} (baseUrl: {:?}, {} path aliases)",
            config_file.display(),
            base_url,
            path_aliases.len()
        );

        Ok(Self {
            root,
            config_file: Some(config_file),
            base_url,
            paths_dir,
            path_aliases,
        })
    }

    /// Directory that `paths` targets are relative to: `baseUrl` when set,
    /// otherwise the directory of the file declaring `paths`.
    pub fn paths_base(&self) -> PathBuf {
        self.base_url
            .clone()
            .or_else(|| self.paths_dir.clone())
            .or_else(|| {
                self.config_file
                    .as_ref()
                    .and_then(|f| f.parent())
                    .map(Path::to_path_buf)
            })
            .unwrap_or_else(|| self.root.clone())
    }
}

/// Read `path` and the configurations it extends, base first.
///
/// A base that cannot be found is skipped with a warning; a cycle of
/// `extends` is a configuration error.
fn load_config_chain(
    path: &Path,
    visited: &mut HashSet<PathBuf>,
) -> Result<ResolutionOptions, EngineError> {
    let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical.clone()) {
        return Err(EngineError::configuration(path, "`extends` forms a cycle"));
    }

    let text = fs::read_to_string(path).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawTsConfig = serde_json::from_str(&strip_jsonc(&text))
        .map_err(|e| EngineError::configuration(path, format!("cannot parse: {e}")))?;
    let config_dir = path.parent().unwrap_or(Path::new("/")).to_path_buf();

    let mut options = ResolutionOptions::default();
    for specifier in raw.extends.as_ref().map(Extends::specifiers).unwrap_or_default() {
        match resolve_extends(&config_dir, specifier) {
            Some(base) => {
                log::debug!("{} extends {}", path.display(), base.display());
                options = options.overlay(load_config_chain(&base, visited)?);
            }
            None => log::warn!(
                "Base configuration '{}' extended by {} not found",
                specifier,
                path.display()
            ),
        }
    }

    let own = ResolutionOptions {
        base_url: raw
            .compiler_options
            .base_url
            .as_deref()
            .map(|base| config_dir.join(base)),
        paths: raw
            .compiler_options
            .paths
            .map(|paths| (config_dir.clone(), paths)),
    };

    visited.remove(&canonical);
    Ok(options.overlay(own))
}

/// Locate the file an `extends` specifier names. Relative and absolute
/// specifiers are taken from `config_dir`; anything else is a package
/// looked up in the `node_modules` of `config_dir` and its ancestors.
fn resolve_extends(config_dir: &Path, specifier: &str) -> Option<PathBuf> {
    let is_path = specifier.starts_with("./")
        || specifier.starts_with("../")
        || Path::new(specifier).is_absolute();
    if is_path {
        return json_file_candidates(config_dir.join(specifier))
            .into_iter()
            .find(|candidate| candidate.is_file());
    }

    for dir in config_dir.ancestors() {
        let target = dir.join("node_modules").join(specifier);
        if target.is_dir() {
            let entry = package_tsconfig(&target).unwrap_or_else(|| target.join("tsconfig.json"));
            if entry.is_file() {
                return Some(entry);
            }
        }
        if let Some(found) = json_file_candidates(target)
            .into_iter()
            .find(|candidate| candidate.is_file())
        {
            return Some(found);
        }
    }
    None
}

/// `path` as written, then with `.json` appended when it lacks it
fn json_file_candidates(path: PathBuf) -> Vec<PathBuf> {
    if path.extension().is_some_and(|ext| ext == "json") {
        return vec![path];
    }
    let mut with_json = OsString::from(path.as_os_str());
    with_json.push(".json");
    vec![path, PathBuf::from(with_json)]
}

/// The `tsconfig` entry of a package's `package.json`, if it declares one
fn package_tsconfig(package_dir: &Path) -> Option<PathBuf> {
    let manifest = fs::read_to_string(package_dir.join("package.json")).ok()?;
    let manifest: Value = serde_json::from_str(&manifest).ok()?;
    manifest
        .get("tsconfig")
        .and_then(Value::as_str)
        .map(|entry| package_dir.join(entry))
}

impl PathAlias {
    /// Match `specifier` against this alias and return the substituted target
    /// candidates. Patterns contain at most one `*`.
    pub fn expand(&self, specifier: &str) -> Option<Vec<String>> {
        match self.pattern.split_once('*') {
            Some((prefix, suffix)) => {
                if specifier.len() < prefix.len() + suffix.len()
                    || !specifier.starts_with(prefix)
                    || !specifier.ends_with(suffix)
                {
                    return None;
                }
                let captured = &specifier[prefix.len()..specifier.len() - suffix.len()];
                Some(
                    self.targets
                        .iter()
                        .map(|t| t.replacen('*', captured, 1))
                        .collect(),
                )
            }
            None if self.pattern == specifier => Some(self.targets.clone()),
            None => None,
        }
    }
}

/// Strip `//` and `/* */` comments and trailing commas so tsconfig files
/// written as JSONC parse as plain JSON. String contents are left alone.
pub fn strip_jsonc(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }

    remove_trailing_commas(&out)
}

fn remove_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = input.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_strip_jsonc() {
        let input = r#"{
  // comment
  "compilerOptions": {
    /* block */ "baseUrl": ".",
    "paths": { "@/*": ["./src/*"], },
    "url": "http://example.com/*not a comment*/",
  },
}"#;
        let value: Value = serde_json::from_str(&strip_jsonc(input)).unwrap();
        assert_eq!(value["compilerOptions"]["baseUrl"], ".");
        assert_eq!(value["compilerOptions"]["paths"]["@/*"][0], "./src/*");
        assert_eq!(
            value["compilerOptions"]["url"],
            "http://example.com/*not a comment*/"
        );
    }

    #[test]
    fn test_alias_expansion() {
        let alias = PathAlias {
            pattern: "@/*".to_string(),
            targets: vec!["./src/*".to_string(), "./generated/*".to_string()],
        };
        assert_eq!(
            alias.expand("@/utils/auth"),
            Some(vec![
                "./src/utils/auth".to_string(),
                "./generated/utils/auth".to_string()
            ])
        );
        assert_eq!(alias.expand("hono"), None);

        let exact = PathAlias {
            pattern: "config".to_string(),
            targets: vec!["./src/config.ts".to_string()],
        };
        assert_eq!(exact.expand("config"), Some(vec!["./src/config.ts".to_string()]));
        assert_eq!(exact.expand("config2"), None);
    }

    #[test]
    fn test_load_tsconfig() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            r#"{
  "compilerOptions": {
    "baseUrl": "./src", // aliases below are relative to src
    "paths": { "~/*": ["./*"] }
  }
}"#,
        )
        .unwrap();

        let config = ProjectConfig::load(dir.path()).unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        assert_eq!(config.root, root);
        assert_eq!(config.base_url, Some(root.join("./src")));
        assert_eq!(config.path_aliases.len(), 1);
        assert_eq!(config.path_aliases[0].pattern, "~/*");
        assert_eq!(config.paths_base(), root.join("./src"));
    }

    #[test]
    fn test_paths_inherited_from_relative_base() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("config")).unwrap();
        fs::write(
            dir.path().join("config/tsconfig.base.json"),
            r#"{ "compilerOptions": { "paths": { "@/*": ["../src/*"] } } }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            r#"{ "extends": "./config/tsconfig.base", "compilerOptions": { "strict": true } }"#,
        )
        .unwrap();

        let config = ProjectConfig::load(dir.path()).unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        assert_eq!(config.path_aliases.len(), 1);
        assert_eq!(config.path_aliases[0].targets, vec!["../src/*".to_string()]);
        // Targets stay relative to the base file that declared them
        assert_eq!(config.paths_base(), root.join("config"));
    }

    #[test]
    fn test_child_options_override_base() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("base.json"),
            r#"{ "compilerOptions": { "baseUrl": "./lib", "paths": { "~/*": ["./*"] } } }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            r#"{
  "extends": ["./base.json"],
  "compilerOptions": { "baseUrl": "./src" },
}"#,
        )
        .unwrap();

        let config = ProjectConfig::load(dir.path()).unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        assert_eq!(config.base_url, Some(root.join("./src")));
        assert_eq!(config.path_aliases[0].pattern, "~/*");
        assert_eq!(config.paths_base(), root.join("./src"));
    }

    #[test]
    fn test_extends_package_from_node_modules() {
        let dir = TempDir::new().unwrap();
        let package = dir.path().join("node_modules/@acme/tsconfig");
        fs::create_dir_all(&package).unwrap();
        fs::write(
            package.join("package.json"),
            r#"{ "name": "@acme/tsconfig", "tsconfig": "base.json" }"#,
        )
        .unwrap();
        fs::write(
            package.join("base.json"),
            r##"{ "compilerOptions": { "paths": { "#lib/*": ["./lib/*"] } } }"##,
        )
        .unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            r#"{ "extends": "@acme/tsconfig" }"#,
        )
        .unwrap();

        let config = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(config.path_aliases[0].pattern, "#lib/*");
        assert_eq!(
            config.paths_dir,
            Some(fs::canonicalize(&package).unwrap())
        );
    }

    #[test]
    fn test_missing_base_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            r#"{ "extends": "@tsconfig/not-installed/tsconfig.json", "compilerOptions": { "paths": { "@/*": ["./src/*"] } } }"#,
        )
        .unwrap();
        let config = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(config.path_aliases.len(), 1);
    }

    #[test]
    fn test_extends_cycle_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("tsconfig.json"), r#"{ "extends": "./a.json" }"#).unwrap();
        fs::write(dir.path().join("a.json"), r#"{ "extends": "./tsconfig.json" }"#).unwrap();
        let err = ProjectConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn test_load_package_json_only() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), r#"{ "name": "app" }"#).unwrap();

        let config = ProjectConfig::load(dir.path()).unwrap();
        assert!(config.config_file.is_none());
        assert!(config.path_aliases.is_empty());
        assert_eq!(config.paths_base(), config.root);
    }

    #[test]
    fn test_missing_configuration_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = ProjectConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn test_malformed_tsconfig_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("tsconfig.json"), "{ compilerOptions: ").unwrap();
        let err = ProjectConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn test_nonexistent_root_is_an_error() {
        let err = ProjectConfig::load(Path::new("/definitely/not/a/project")).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }
}
