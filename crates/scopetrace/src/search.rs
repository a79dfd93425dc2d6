//
// search.rs
//
// Locate a function in a project tree by its exact source text
//

use std::ops::Range;
use std::path::{Path, PathBuf};

use tree_sitter::Node;
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::parser_pool::parse_source;
use crate::scope::{
    analyze_out_of_scope_identifiers, is_function_kind, node_text, walk_preorder, Walk,
};
use crate::source_cache::SourceCache;
use crate::types::{FunctionLocation, IdentifierOccurrence};
use crate::utf16::point_to_utf16;

/// A function found by [`search_for_function`] together with its free
/// identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundFunction {
    pub location: FunctionLocation,
    pub identifiers: Vec<IdentifierOccurrence>,
    /// Byte range of the function node in its file
    pub byte_range: Range<usize>,
}

/// Normalize function text for identity comparison: trim, drop a leading
/// `async` qualifier, collapse whitespace runs to a single space.
///
/// ```
/// use scopetrace::search::normalize_function_text;
///
/// assert_eq!(
///     normalize_function_text("async (c) =>  {\n  return c.text('ok');\n}"),
///     "(c) => { return c.text('ok'); }"
/// );
/// ```
pub fn normalize_function_text(text: &str) -> String {
    let trimmed = text.trim();
    let without_async = match trimmed.strip_prefix("async") {
        Some(rest) if rest.starts_with(|c: char| c.is_whitespace() || c == '(') => rest,
        _ => trimmed,
    };
    without_async.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Search `root` for the first function whose normalized text equals the
/// normalized `text`.
pub fn search_for_function(root: &Path, text: &str, config: &EngineConfig) -> Option<FoundFunction> {
    search_with_cache(root, text, config, &SourceCache::new())
}

/// [`search_for_function`] reading files through `cache`.
pub fn search_with_cache(
    root: &Path,
    text: &str,
    config: &EngineConfig,
    cache: &SourceCache,
) -> Option<FoundFunction> {
    let target = normalize_function_text(text);
    if target.is_empty() {
        log::warn!("Refusing to search for empty function text");
        return None;
    }

    let mut walker = WalkDir::new(root).follow_links(false);
    if config.sorted_traversal {
        walker = walker.sort_by_file_name();
    }

    let entries = walker.into_iter().filter_entry(|entry| {
        // The search root itself may be a hidden temp directory
        entry.depth() == 0
            || !entry.file_type().is_dir()
            || !config.is_ignored_directory(&entry.file_name().to_string_lossy())
    });

    let mut files_scanned = 0usize;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file()
            || !config.is_source_file(&entry.file_name().to_string_lossy())
        {
            continue;
        }

        files_scanned += 1;
        if let Some(found) = search_file(entry.path(), &target, cache) {
            log::debug!(
                "Found function in {} after scanning {} files",
                found.location.file.display(),
                files_scanned
            );
            return Some(found);
        }
    }

    log::debug!(
        "No matching function under {} ({} files scanned)",
        root.display(),
        files_scanned
    );
    None
}

/// Search one file for a function matching the already-normalized `target`.
pub fn search_file(path: &Path, target: &str, cache: &SourceCache) -> Option<FoundFunction> {
    let content = match cache.read(path) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("Skipping unreadable file {}: {}", path.display(), e);
            return None;
        }
    };
    let tree = parse_source(path, &content)?;
    let node = find_matching_function(tree.root_node(), &content, target)?;

    Some(FoundFunction {
        location: function_location(path.to_path_buf(), node, &content),
        identifiers: analyze_out_of_scope_identifiers(node, &content),
        byte_range: node.byte_range(),
    })
}

fn find_matching_function<'t>(root: Node<'t>, content: &str, target: &str) -> Option<Node<'t>> {
    let mut found = None;
    walk_preorder(root, |node| {
        // Normalization only shrinks text, so shorter subtrees cannot match
        if node.byte_range().len() < target.len() {
            return Walk::SkipChildren;
        }
        if is_function_kind(node.kind())
            && normalize_function_text(node_text(node, content)) == target
        {
            found = Some(node);
            return Walk::Stop;
        }
        Walk::Descend
    });
    found
}

/// 1-based location of `node`, columns in UTF-16 units
pub fn function_location(file: PathBuf, node: Node, content: &str) -> FunctionLocation {
    let (start_line, start_column) = point_to_utf16(content, node.start_position());
    let (end_line, end_column) = point_to_utf16(content, node.end_position());
    FunctionLocation {
        file,
        start_line: start_line + 1,
        start_column: start_column + 1,
        end_line: end_line + 1,
        end_column: end_column + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    const HANDLER: &str = r#"async (c) => {
  const auth = getAuthHeader(c.req);
  return c.text(auth);
}"#;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_normalize_strips_async_and_whitespace() {
        assert_eq!(normalize_function_text("  async  function f() {}  "), "function f() {}");
        assert_eq!(normalize_function_text("async(x) => x"), "(x) => x");
        // Not a qualifier
        assert_eq!(normalize_function_text("asyncHandler => 1"), "asyncHandler => 1");
        assert_eq!(normalize_function_text("\n\t"), "");
    }

    #[test]
    fn test_finds_arrow_function_with_location() {
        let dir = TempDir::new().unwrap();
        let source = format!("import {{ Hono }} from \"hono\";\n\napp.get(\"/\", {HANDLER});\n");
        write(dir.path(), "src/index.ts", &source);

        let found = search_for_function(dir.path(), HANDLER, &EngineConfig::default())
            .expect("function should be found");
        assert_eq!(found.location.file, dir.path().join("src/index.ts"));
        assert_eq!(found.location.start_line, 3);
        assert_eq!(found.location.start_column, 14);
        assert_eq!(found.location.end_line, 6);
        assert_eq!(found.location.end_column, 2);
        let names: Vec<_> = found.identifiers.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["getAuthHeader"]);
        assert_eq!(&source[found.byte_range.clone()], HANDLER);
    }

    #[test]
    fn test_whitespace_and_async_differences_still_match() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "src/routes.ts",
            "export const list = async (c) => {\n    return c.json(   []   );\n};\n",
        );
        let found = search_for_function(
            dir.path(),
            "(c) => { return c.json( [] ); }",
            &EngineConfig::default(),
        );
        assert!(found.is_some());
    }

    #[test]
    fn test_skips_ignored_and_hidden_directories_and_declarations() {
        let dir = TempDir::new().unwrap();
        let body = "function shared() { return 1; }\n";
        write(dir.path(), "node_modules/pkg/index.ts", body);
        write(dir.path(), ".cache/index.ts", body);
        write(dir.path(), "types/index.d.ts", body);

        let target = "function shared() { return 1; }";
        let config = EngineConfig::default();
        assert!(search_for_function(dir.path(), target, &config).is_none());

        write(dir.path(), "src/shared.ts", body);
        let found =
            search_for_function(dir.path(), target, &config).expect("project copy should be found");
        assert_eq!(found.location.file, dir.path().join("src/shared.ts"));
    }

    #[test]
    fn test_first_match_in_sorted_order_wins() {
        let dir = TempDir::new().unwrap();
        let body = "export function dup() { return value; }\n";
        write(dir.path(), "b.ts", body);
        write(dir.path(), "a.ts", body);

        let config = EngineConfig {
            sorted_traversal: true,
            ..EngineConfig::default()
        };
        let found =
            search_for_function(dir.path(), "function dup() { return value; }", &config).unwrap();
        assert_eq!(found.location.file, dir.path().join("a.ts"));
    }

    #[test]
    fn test_outer_function_matches_before_inner() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "nested.ts",
            "function outer() { return () => 1; }\n",
        );
        let found = search_for_function(dir.path(), "() => 1", &EngineConfig::default()).unwrap();
        assert_eq!(found.location.start_column, 27);
    }

    #[test]
    fn test_no_match_returns_none() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.ts", "function a() {}\n");
        let config = EngineConfig::default();
        assert!(search_for_function(dir.path(), "function b() {}", &config).is_none());
    }

    proptest! {
        #[test]
        fn prop_normalization_is_idempotent(text in "[ b-z(){}=>;\\n\\t]{0,40}") {
            let once = normalize_function_text(&text);
            prop_assert_eq!(normalize_function_text(&once), once.clone());
            prop_assert!(!once.contains("  "));
        }

        #[test]
        fn prop_whitespace_variants_normalize_equal(
            parts in proptest::collection::vec("[a-z(){};=>]{1,5}", 1..8),
            seps in proptest::collection::vec("[ \\t\\n]{1,3}", 8),
        ) {
            let compact = parts.join(" ");
            let spaced: String = parts
                .iter()
                .zip(seps.iter())
                .map(|(p, s)| format!("{p}{s}"))
                .collect();
            prop_assert_eq!(normalize_function_text(&compact), normalize_function_text(&spaced));
        }
    }
}
