//
// lsp/mod.rs
//
// Code-intelligence client: trait seam, response decoding, and the stdio client
//

pub mod client;
pub mod launcher;
pub mod transport;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tower_lsp::lsp_types::GotoDefinitionResponse;
use url::Url;

use crate::error::ClientError;
use crate::types::{Position, Range};

pub use client::{ClientState, LspClient};
pub use launcher::{ServerLauncher, StdioLauncher};

/// Command that resolves through re-exports to the declaring symbol
pub const SOURCE_DEFINITION_COMMAND: &str = "_typescript.goToSourceDefinition";

/// A definition location on disk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DefinitionLocation {
    pub path: PathBuf,
    pub range: Range,
}

impl DefinitionLocation {
    pub fn start(&self) -> Position {
        self.range.start
    }
}

/// Operations the engine needs from a code-intelligence server.
///
/// Lookups separate "the server answered, and knows no definition"
/// (`Ok(None)`) from a failed exchange (`Err`). Only the former is a
/// stable answer.
#[async_trait]
pub trait CodeIntelligence: Send + Sync {
    /// Make the server aware of the current content of `path`. Sends the
    /// file once and re-syncs it when it has changed on disk since.
    async fn open_file(&self, path: &Path) -> Result<(), ClientError>;

    async fn definition(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Option<DefinitionLocation>, ClientError>;

    /// Like [`CodeIntelligence::definition`], but resolved through
    /// re-exports to the original declaration.
    async fn source_definition(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Option<DefinitionLocation>, ClientError>;

    async fn execute_command(
        &self,
        command: &str,
        arguments: Vec<Value>,
    ) -> Result<Option<Value>, ClientError>;

    /// Whether requests can still be served
    fn is_alive(&self) -> bool;

    async fn shutdown(&self);
}

pub fn file_uri(path: &Path) -> Result<Url, ClientError> {
    Url::from_file_path(path)
        .map_err(|_| ClientError::Protocol(format!("not an absolute path: {}", path.display())))
}

/// Decode a definition response, keeping the first location of an array.
pub fn location_from_response(value: Value) -> Option<DefinitionLocation> {
    if value.is_null() {
        return None;
    }
    let response: GotoDefinitionResponse = match serde_json::from_value(value) {
        Ok(response) => response,
        Err(e) => {
            log::warn!("Unparseable definition response: {}", e);
            return None;
        }
    };

    let (uri, range) = match response {
        GotoDefinitionResponse::Scalar(location) => (location.uri, location.range),
        GotoDefinitionResponse::Array(locations) => {
            if locations.len() > 1 {
                log::debug!("{} definitions returned, using the first", locations.len());
            }
            let location = locations.into_iter().next()?;
            (location.uri, location.range)
        }
        GotoDefinitionResponse::Link(links) => {
            let link = links.into_iter().next()?;
            (link.target_uri, link.target_selection_range)
        }
    };

    match uri.to_file_path() {
        Ok(path) => Some(DefinitionLocation {
            path,
            range: range.into(),
        }),
        Err(()) => {
            log::debug!("Ignoring definition in non-file document {}", uri);
            None
        }
    }
}

/// Protocol language identifier for a source path
pub fn language_id(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("tsx") => "typescriptreact",
        Some("jsx") => "javascriptreact",
        Some("js") | Some("mjs") | Some("cjs") => "javascript",
        _ => "typescript",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_element_array_is_unwrapped() {
        let location = location_from_response(json!([{
            "uri": "file:///app/src/utils/auth.ts",
            "range": {
                "start": { "line": 3, "character": 16 },
                "end": { "line": 3, "character": 29 }
            }
        }]))
        .unwrap();
        assert_eq!(location.path, PathBuf::from("/app/src/utils/auth.ts"));
        assert_eq!(location.start(), Position::new(3, 16));
    }

    #[test]
    fn test_link_uses_selection_range() {
        let location = location_from_response(json!([{
            "targetUri": "file:///app/src/db.ts",
            "targetRange": {
                "start": { "line": 0, "character": 0 },
                "end": { "line": 4, "character": 1 }
            },
            "targetSelectionRange": {
                "start": { "line": 0, "character": 13 },
                "end": { "line": 0, "character": 15 }
            }
        }]))
        .unwrap();
        assert_eq!(location.start(), Position::new(0, 13));
    }

    #[test]
    fn test_empty_and_malformed_responses() {
        assert_eq!(location_from_response(Value::Null), None);
        assert_eq!(location_from_response(json!([])), None);
        assert_eq!(location_from_response(json!({ "unexpected": true })), None);
        assert_eq!(
            location_from_response(json!({
                "uri": "untitled:Untitled-1",
                "range": {
                    "start": { "line": 0, "character": 0 },
                    "end": { "line": 0, "character": 1 }
                }
            })),
            None
        );
    }

    #[test]
    fn test_language_ids() {
        assert_eq!(language_id(Path::new("a.ts")), "typescript");
        assert_eq!(language_id(Path::new("a.tsx")), "typescriptreact");
        assert_eq!(language_id(Path::new("a.mjs")), "javascript");
    }
}
