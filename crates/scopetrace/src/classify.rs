//
// classify.rs
//
// Separate runtime globals from project references that need expansion
//

use std::path::Path;

use crate::config::{is_declaration_file, DEPENDENCY_DIRECTORIES};
use crate::error::ClientError;
use crate::imports::resolve::is_in_dependency_directory;
use crate::lsp::{CodeIntelligence, DefinitionLocation};
use crate::types::IdentifierOccurrence;

/// Outcome of classifying one free identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Provided by the runtime; not expanded
    Global,
    /// A reference to resolve. Either location may be missing when the
    /// server had no answer.
    Local {
        definition: Option<DefinitionLocation>,
        source: Option<DefinitionLocation>,
    },
}

impl Classification {
    pub fn is_global(&self) -> bool {
        matches!(self, Classification::Global)
    }

    /// Location resolution should start from: the source definition when
    /// there is one, the plain definition otherwise.
    pub fn preferred_location(&self) -> Option<&DefinitionLocation> {
        match self {
            Classification::Global => None,
            Classification::Local { definition, source } => source.as_ref().or(definition.as_ref()),
        }
    }
}

/// Classify `occurrence`, found in `file`.
///
/// A definition in a declaration file outside the dependency directories is
/// an ambient project global (e.g. generated worker bindings). A definition in
/// a declaration file inside them is a global when no source definition
/// exists, which covers the runtime's own library files. A failed exchange
/// with the server is returned as an error, never as a classification.
pub async fn classify(
    client: &dyn CodeIntelligence,
    occurrence: &IdentifierOccurrence,
    file: &Path,
) -> Result<Classification, ClientError> {
    client.open_file(file).await?;

    let definition = client.definition(file, occurrence.position).await?;
    let Some(definition) = definition else {
        log::debug!(
            "No definition for '{}' at {}:{}",
            occurrence.name,
            occurrence.position.line,
            occurrence.position.column
        );
        // Re-exported symbols sometimes only answer the source lookup
        let source = client.source_definition(file, occurrence.position).await?;
        return Ok(Classification::Local {
            definition: None,
            source,
        });
    };

    let in_declaration_file = definition
        .path
        .file_name()
        .map(|name| is_declaration_file(&name.to_string_lossy()))
        .unwrap_or(false);

    if in_declaration_file && !is_in_dependency_directory(&definition.path, DEPENDENCY_DIRECTORIES) {
        log::debug!(
            "'{}' is an ambient global declared in {}",
            occurrence.name,
            definition.path.display()
        );
        return Ok(Classification::Global);
    }

    let source = client.source_definition(file, occurrence.position).await?;
    if in_declaration_file && source.is_none() {
        log::debug!(
            "'{}' is declared by library file {} with no source",
            occurrence.name,
            definition.path.display()
        );
        return Ok(Classification::Global);
    }

    Ok(Classification::Local {
        definition: Some(definition),
        source,
    })
}

/// Whether `occurrence` names a runtime global. Lookup failures never make
/// an identifier global.
pub async fn is_expected_global(
    client: &dyn CodeIntelligence,
    occurrence: &IdentifierOccurrence,
    file: &Path,
) -> bool {
    match classify(client, occurrence, file).await {
        Ok(classification) => classification.is_global(),
        Err(e) => {
            log::warn!("Could not classify '{}' in {}: {}", occurrence.name, file.display(), e);
            false
        }
    }
}
