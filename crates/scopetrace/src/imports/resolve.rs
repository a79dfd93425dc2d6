//
// imports/resolve.rs
//
// Module specifier to on-disk path resolution
//

use std::path::{Component, Path, PathBuf};

use crate::project::ProjectConfig;

/// Extensions tried, in order, for a specifier written without one
const INFERRED_EXTENSIONS: &[&str] = &["ts", "tsx", "d.ts", "mts", "cts"];

/// Index files tried when a specifier names a directory
const INDEX_FILES: &[&str] = &["index.ts", "index.tsx", "index.d.ts"];

/// Whether `specifier` is written relative to the importing file
pub fn is_relative_specifier(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
}

/// Resolve the module `specifier` imported from `current_file` to an existing
/// source file.
///
/// Relative specifiers resolve against the importing file's directory.
/// Non-relative specifiers go through the project's `paths` aliases, then
/// `baseUrl`. Bare package names that match neither resolve to `None`.
pub fn resolve_module_path(
    project: &ProjectConfig,
    current_file: &Path,
    specifier: &str,
) -> Option<PathBuf> {
    if is_relative_specifier(specifier) {
        let base_dir = current_file.parent()?;
        let joined = if specifier.starts_with('/') {
            PathBuf::from(specifier)
        } else {
            base_dir.join(specifier)
        };
        return resolve_file_candidate(&joined);
    }

    let paths_base = project.paths_base();
    for alias in &project.path_aliases {
        let Some(targets) = alias.expand(specifier) else {
            continue;
        };
        for target in targets {
            if let Some(found) = resolve_file_candidate(&paths_base.join(&target)) {
                log::trace!(
                    "Resolved '{}' through alias '{}' to {}",
                    specifier,
                    alias.pattern,
                    found.display()
                );
                return Some(found);
            }
        }
    }

    if let Some(base_url) = &project.base_url {
        if let Some(found) = resolve_file_candidate(&base_url.join(specifier)) {
            return Some(found);
        }
    }

    None
}

/// Try `path` as written, then with inferred extensions, then as a directory
/// with an index file.
fn resolve_file_candidate(path: &Path) -> Option<PathBuf> {
    let path = normalize_path(path)?;

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        // ESM-style imports name the emitted `.js` file
        let mapped: &[&str] = match ext {
            "js" => &["ts", "tsx"],
            "jsx" => &["tsx"],
            "mjs" => &["mts"],
            "cjs" => &["cts"],
            _ => &[],
        };
        for replacement in mapped {
            let candidate = path.with_extension(replacement);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        if path.is_file() {
            return Some(path);
        }
    }

    for ext in INFERRED_EXTENSIONS {
        let candidate = append_extension(&path, ext);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    if path.is_dir() {
        for index in INDEX_FILES {
            let candidate = path.join(index);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    None
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(".");
    raw.push(ext);
    PathBuf::from(raw)
}

/// Lexically normalize `path`, dropping `.` and folding `..` into the
/// preceding normal component. Returns `None` when nothing is left.
pub fn normalize_path(path: &Path) -> Option<PathBuf> {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                // Never pop past the root or a prefix
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }

    if components.is_empty() {
        return None;
    }
    Some(components.iter().collect())
}

/// Package name of a file inside a dependency directory, e.g.
/// `node_modules/@hono/node-server/dist/index.d.ts` gives `@hono/node-server`.
pub fn package_name_from_path(path: &Path, dependency_dirs: &[&str]) -> Option<String> {
    let mut components = path.components().map(|c| c.as_os_str().to_string_lossy());
    let mut package = None;

    // The innermost dependency directory wins for nested installs
    while let Some(component) = components.next() {
        if dependency_dirs.iter().any(|d| *d == component) {
            let first = components.next()?;
            package = if first.starts_with('@') {
                let second = components.next()?;
                Some(format!("{first}/{second}"))
            } else {
                Some(first.into_owned())
            };
        }
    }
    package
}

/// Whether any component of `path` is a dependency directory
pub fn is_in_dependency_directory(path: &Path, dependency_dirs: &[&str]) -> bool {
    path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        dependency_dirs.iter().any(|d| *d == name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEPENDENCY_DIRECTORIES;
    use crate::project::PathAlias;
    use std::fs;
    use tempfile::TempDir;

    fn project_with(files: &[&str]) -> (TempDir, ProjectConfig) {
        let dir = TempDir::new().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "export {};\n").unwrap();
        }
        let project = ProjectConfig {
            root: dir.path().to_path_buf(),
            ..ProjectConfig::default()
        };
        (dir, project)
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/app/src/./utils/../auth.ts")),
            Some(PathBuf::from("/app/src/auth.ts"))
        );
        assert_eq!(
            normalize_path(Path::new("/../x.ts")),
            Some(PathBuf::from("/x.ts"))
        );
        assert_eq!(normalize_path(Path::new("./")), None);
    }

    #[test]
    fn test_relative_with_inferred_extension() {
        let (dir, project) = project_with(&["src/index.ts", "src/utils/auth.ts"]);
        let current = dir.path().join("src/index.ts");
        assert_eq!(
            resolve_module_path(&project, &current, "./utils/auth"),
            Some(dir.path().join("src/utils/auth.ts"))
        );
    }

    #[test]
    fn test_js_extension_maps_to_ts() {
        let (dir, project) = project_with(&["src/index.ts", "src/db.ts"]);
        let current = dir.path().join("src/index.ts");
        assert_eq!(
            resolve_module_path(&project, &current, "./db.js"),
            Some(dir.path().join("src/db.ts"))
        );
    }

    #[test]
    fn test_directory_index() {
        let (dir, project) = project_with(&["src/index.ts", "src/db/index.ts"]);
        let current = dir.path().join("src/index.ts");
        assert_eq!(
            resolve_module_path(&project, &current, "./db"),
            Some(dir.path().join("src/db/index.ts"))
        );
    }

    #[test]
    fn test_parent_directory_specifier() {
        let (dir, project) = project_with(&["src/routes/users.ts", "src/schema.tsx"]);
        let current = dir.path().join("src/routes/users.ts");
        assert_eq!(
            resolve_module_path(&project, &current, "../schema"),
            Some(dir.path().join("src/schema.tsx"))
        );
    }

    #[test]
    fn test_path_alias() {
        let (dir, mut project) = project_with(&["src/index.ts", "src/lib/db.ts"]);
        project.path_aliases.push(PathAlias {
            pattern: "@/*".to_string(),
            targets: vec!["./src/*".to_string()],
        });
        let current = dir.path().join("src/index.ts");
        assert_eq!(
            resolve_module_path(&project, &current, "@/lib/db"),
            Some(dir.path().join("src/lib/db.ts"))
        );
    }

    #[test]
    fn test_base_url() {
        let (dir, mut project) = project_with(&["src/index.ts", "src/lib/db.ts"]);
        project.base_url = Some(dir.path().join("src"));
        let current = dir.path().join("src/index.ts");
        assert_eq!(
            resolve_module_path(&project, &current, "lib/db"),
            Some(dir.path().join("src/lib/db.ts"))
        );
    }

    #[test]
    fn test_bare_package_and_missing_file() {
        let (dir, project) = project_with(&["src/index.ts"]);
        let current = dir.path().join("src/index.ts");
        assert_eq!(resolve_module_path(&project, &current, "hono"), None);
        assert_eq!(resolve_module_path(&project, &current, "./missing"), None);
    }

    #[test]
    fn test_package_name_from_path() {
        assert_eq!(
            package_name_from_path(
                Path::new("/app/node_modules/hono/dist/types/index.d.ts"),
                DEPENDENCY_DIRECTORIES
            ),
            Some("hono".to_string())
        );
        assert_eq!(
            package_name_from_path(
                Path::new("/app/node_modules/@hono/node-server/dist/index.d.ts"),
                DEPENDENCY_DIRECTORIES
            ),
            Some("@hono/node-server".to_string())
        );
        assert_eq!(
            package_name_from_path(
                Path::new("/app/node_modules/a/node_modules/b/index.d.ts"),
                DEPENDENCY_DIRECTORIES
            ),
            Some("b".to_string())
        );
        assert_eq!(
            package_name_from_path(Path::new("/app/src/index.ts"), DEPENDENCY_DIRECTORIES),
            None
        );
    }

    #[test]
    fn test_dependency_directory_detection() {
        assert!(is_in_dependency_directory(
            Path::new("/app/node_modules/@types/node/globals.d.ts"),
            DEPENDENCY_DIRECTORIES
        ));
        assert!(!is_in_dependency_directory(
            Path::new("/app/worker-configuration.d.ts"),
            DEPENDENCY_DIRECTORIES
        ));
    }
}
