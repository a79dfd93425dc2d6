//
// types.rs
//
// Data model shared by the search, scope, and resolution stages
//

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types;

/// A zero-based position in a document. `column` counts UTF-16 code units,
/// matching what the code-intelligence server expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl From<Position> for lsp_types::Position {
    fn from(pos: Position) -> Self {
        lsp_types::Position::new(pos.line, pos.column)
    }
}

impl From<lsp_types::Position> for Position {
    fn from(pos: lsp_types::Position) -> Self {
        Position::new(pos.line, pos.character)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl From<lsp_types::Range> for Range {
    fn from(range: lsp_types::Range) -> Self {
        Self {
            start: range.start.into(),
            end: range.end.into(),
        }
    }
}

/// An identifier referenced, but not declared, inside an analyzed function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentifierOccurrence {
    pub name: String,
    pub position: Position,
}

/// Where a searched function lives. Lines and columns are 1-based; the end is
/// exclusive at the node's textual end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionLocation {
    pub file: PathBuf,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    Function,
    Type,
    Unknown,
}

/// Text placed in definitions that live inside installed dependencies.
pub const THIRD_PARTY_PLACEHOLDER: &str = "#third-party-library-code";

/// The resolved textual definition of one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    pub kind: DefinitionKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    /// Installed package the definition came from, when it lives in a dependency directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
}

/// Why an entry ended where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Resolved,
    /// Classified as a runtime global; `definition` is `None` on purpose
    Global,
    /// Resolution failed or was cut by a cycle guard
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandedContextEntry {
    pub name: String,
    pub position: Position,
    pub definition: Option<Definition>,
    pub status: EntryStatus,
    /// Free identifiers of a function-kind definition, expanded in turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ExpandedContextEntry>,
}

impl ExpandedContextEntry {
    pub fn unresolved(occurrence: &IdentifierOccurrence) -> Self {
        Self {
            name: occurrence.name.clone(),
            position: occurrence.position,
            definition: None,
            status: EntryStatus::Unresolved,
            context: Vec::new(),
        }
    }
}

/// Result of expanding one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandedFunction {
    #[serde(flatten)]
    pub location: FunctionLocation,
    pub context: Vec<ExpandedContextEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expanded_function_json_shape() {
        let result = ExpandedFunction {
            location: FunctionLocation {
                file: PathBuf::from("/app/src/index.ts"),
                start_line: 10,
                start_column: 19,
                end_line: 16,
                end_column: 2,
            },
            context: vec![ExpandedContextEntry {
                name: "console".to_string(),
                position: Position::new(11, 2),
                definition: None,
                status: EntryStatus::Global,
                context: Vec::new(),
            }],
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "file": "/app/src/index.ts",
                "startLine": 10,
                "startColumn": 19,
                "endLine": 16,
                "endColumn": 2,
                "context": [{
                    "name": "console",
                    "position": { "line": 11, "column": 2 },
                    "definition": null,
                    "status": "global"
                }]
            })
        );
    }

    #[test]
    fn test_definition_omits_empty_optionals() {
        let def = Definition {
            kind: DefinitionKind::Function,
            text: "function f() {}".to_string(),
            source_file: None,
            range: None,
            package: None,
        };
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value, json!({ "kind": "function", "text": "function f() {}" }));
    }

    #[test]
    fn test_position_lsp_conversion() {
        let pos = Position::new(4, 7);
        let lsp: lsp_types::Position = pos.into();
        assert_eq!(lsp.line, 4);
        assert_eq!(lsp.character, 7);
        assert_eq!(Position::from(lsp), pos);
    }
}
