//
// imports/follow.rs
//
// Resolve an imported name by reading the exporting module
//

use std::path::Path;

use tree_sitter::Node;

use super::resolve::{is_relative_specifier, resolve_module_path};
use super::ResolutionPath;
use crate::definition::{
    declaration_definition, named_child_of_kind, node_range, ImportBinding, ImportKind,
};
use crate::parser_pool::parse_source;
use crate::scope::{is_function_kind, node_text};
use crate::session::AnalysisSession;
use crate::types::{Definition, DefinitionKind, IdentifierOccurrence, THIRD_PARTY_PLACEHOLDER};

/// Result of following one import
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowOutcome {
    Found(Definition),
    /// Module or export could not be found; logged
    NotFound,
    /// The module is already on the resolution path
    CycleCut,
}

/// Top-level declarations an export can name
const NAMED_DECLARATION_KINDS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "class_declaration",
    "abstract_class_declaration",
    "type_alias_declaration",
    "interface_declaration",
    "enum_declaration",
    "internal_module",
];

/// What an export resolves to inside its module
enum ExportTarget<'t> {
    /// A declaration node, extracted like a local declaration
    Declaration(Node<'t>),
    /// The expression of `export default <expression>`
    Expression(Node<'t>),
}

/// Resolve `binding`, imported by `current_file`, to the declaration its
/// module exports. Re-exports from other modules are not followed.
pub fn context_for_import(
    session: &AnalysisSession,
    current_file: &Path,
    binding: &ImportBinding,
    occurrence: &IdentifierOccurrence,
    path: &ResolutionPath,
) -> FollowOutcome {
    let project = session.project();
    let Some(module_path) = resolve_module_path(project, current_file, &binding.module) else {
        let aliased = project
            .path_aliases
            .iter()
            .any(|alias| alias.expand(&binding.module).is_some());
        if !is_relative_specifier(&binding.module) && !aliased {
            log::debug!("'{}' comes from package '{}'", occurrence.name, binding.module);
            return FollowOutcome::Found(package_definition(&binding.module));
        }
        log::warn!(
            "Cannot resolve module '{}' imported by {}",
            binding.module,
            current_file.display()
        );
        return FollowOutcome::NotFound;
    };

    if path.contains_module(&module_path) {
        log::debug!(
            "Import cycle: {} is already on the path of '{}'",
            module_path.display(),
            occurrence.name
        );
        return FollowOutcome::CycleCut;
    }

    session.record_import_follow();
    let content = match session.sources().read(&module_path) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("Cannot read {}: {}", module_path.display(), e);
            return FollowOutcome::NotFound;
        }
    };
    let Some(tree) = parse_source(&module_path, &content) else {
        log::warn!("Cannot parse {}", module_path.display());
        return FollowOutcome::NotFound;
    };
    let root = tree.root_node();

    let export_name = match &binding.kind {
        ImportKind::Namespace => {
            return FollowOutcome::Found(Definition {
                kind: DefinitionKind::Unknown,
                text: content.clone(),
                source_file: Some(module_path.clone()),
                range: Some(node_range(root, &content)),
                package: None,
            });
        }
        ImportKind::Default => "default",
        ImportKind::Named { imported } => imported.as_str(),
    };

    match find_export(root, &content, export_name) {
        Some(ExportTarget::Declaration(node)) => {
            FollowOutcome::Found(declaration_definition(&module_path, node, &content))
        }
        Some(ExportTarget::Expression(node)) => {
            let kind = if is_function_kind(node.kind()) {
                DefinitionKind::Function
            } else {
                DefinitionKind::Unknown
            };
            FollowOutcome::Found(Definition {
                kind,
                text: node_text(node, &content).to_string(),
                source_file: Some(module_path.clone()),
                range: Some(node_range(node, &content)),
                package: None,
            })
        }
        None => {
            log::warn!(
                "{} has no local export '{}' (imported as '{}')",
                module_path.display(),
                export_name,
                binding.local
            );
            FollowOutcome::NotFound
        }
    }
}

fn package_definition(specifier: &str) -> Definition {
    Definition {
        kind: DefinitionKind::Unknown,
        text: THIRD_PARTY_PLACEHOLDER.to_string(),
        source_file: None,
        range: None,
        package: Some(package_name_from_specifier(specifier)),
    }
}

/// `@scope/name/sub` gives `@scope/name`, `name/sub` gives `name`
fn package_name_from_specifier(specifier: &str) -> String {
    let mut segments = specifier.split('/');
    match (segments.next(), segments.next()) {
        (Some(scope), Some(name)) if scope.starts_with('@') => format!("{scope}/{name}"),
        (Some(name), _) => name.to_string(),
        _ => specifier.to_string(),
    }
}

fn find_export<'t>(root: Node<'t>, content: &str, export_name: &str) -> Option<ExportTarget<'t>> {
    let mut cursor = root.walk();
    for statement in root.named_children(&mut cursor) {
        if statement.kind() != "export_statement" {
            continue;
        }
        // `export ... from "mod"` re-exports another module
        if statement.child_by_field_name("source").is_some() {
            continue;
        }

        let is_default = has_token(statement, "default");

        if let Some(declaration) = statement.child_by_field_name("declaration") {
            if is_default {
                if export_name == "default" {
                    return Some(ExportTarget::Declaration(declaration));
                }
                continue;
            }
            if let Some(node) = declaration_named(declaration, content, export_name) {
                return Some(ExportTarget::Declaration(node));
            }
            continue;
        }

        if let Some(value) = statement.child_by_field_name("value") {
            if export_name != "default" {
                continue;
            }
            if value.kind() == "identifier" {
                return find_top_level_declaration(root, content, node_text(value, content))
                    .map(ExportTarget::Declaration)
                    .or(Some(ExportTarget::Expression(value)));
            }
            return Some(ExportTarget::Expression(value));
        }

        if let Some(clause) = named_child_of_kind(statement, "export_clause") {
            let mut spec_cursor = clause.walk();
            for spec in clause.named_children(&mut spec_cursor) {
                if spec.kind() != "export_specifier" {
                    continue;
                }
                let Some(name) = spec.child_by_field_name("name") else {
                    continue;
                };
                let local = node_text(name, content);
                let exported = spec
                    .child_by_field_name("alias")
                    .map(|alias| node_text(alias, content))
                    .unwrap_or(local);
                if exported == export_name {
                    return find_top_level_declaration(root, content, local)
                        .map(ExportTarget::Declaration);
                }
            }
        }
    }
    None
}

/// Top-level declaration of `name`, exported or not. Overload signatures
/// are skipped in favor of the implementation.
fn find_top_level_declaration<'t>(root: Node<'t>, content: &str, name: &str) -> Option<Node<'t>> {
    let mut cursor = root.walk();
    for statement in root.named_children(&mut cursor) {
        let declaration = match statement.kind() {
            "export_statement" => match statement.child_by_field_name("declaration") {
                Some(declaration) => declaration,
                None => continue,
            },
            _ => statement,
        };
        if let Some(node) = declaration_named(declaration, content, name) {
            return Some(node);
        }
    }
    None
}

fn declaration_named<'t>(declaration: Node<'t>, content: &str, name: &str) -> Option<Node<'t>> {
    match declaration.kind() {
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = declaration.walk();
            let found = declaration
                .named_children(&mut cursor)
                .filter(|child| child.kind() == "variable_declarator")
                .find(|declarator| {
                    declarator
                        .child_by_field_name("name")
                        .is_some_and(|n| n.kind() == "identifier" && node_text(n, content) == name)
                });
            found
        }
        kind if NAMED_DECLARATION_KINDS.contains(&kind) => declaration
            .child_by_field_name("name")
            .filter(|n| node_text(*n, content) == name)
            .map(|_| declaration),
        _ => None,
    }
}

fn has_token(node: Node, token: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|child| !child.is_named() && child.kind() == token);
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::test_utils::{FixtureProject, ScriptedLauncher};
    use crate::types::Position;
    use std::sync::Arc;

    const AUTH: &str = r#"import type { HonoRequest } from "hono";

function readHeader(req: HonoRequest, name: string) {
  return req.header(name);
}

export function getAuthHeader(req: HonoRequest) {
  return readHeader(req, "Authorization");
}

export const TOKEN_PREFIX = "Bearer ";

const secret = () => "s3cr3t";
export { secret as signingSecret };

export default async function authenticate() {
  return true;
}

export { helper } from "./helpers";
"#;

    fn setup() -> (FixtureProject, Arc<AnalysisSession>) {
        let project = FixtureProject::new()
            .file("src/utils/auth.ts", AUTH)
            .file("src/index.ts", "export {};\n")
            .file("src/utils/helpers.ts", "export function helper() {}\n");
        let session = AnalysisSession::open(
            project.root(),
            EngineConfig::default(),
            ScriptedLauncher::new(),
        )
        .unwrap();
        (project, session)
    }

    fn named(imported: &str, local: &str) -> ImportBinding {
        ImportBinding {
            module: "./utils/auth".to_string(),
            kind: ImportKind::Named {
                imported: imported.to_string(),
            },
            local: local.to_string(),
        }
    }

    fn occurrence(name: &str) -> IdentifierOccurrence {
        IdentifierOccurrence {
            name: name.to_string(),
            position: Position::new(0, 0),
        }
    }

    fn follow(
        project: &FixtureProject,
        session: &AnalysisSession,
        binding: &ImportBinding,
    ) -> FollowOutcome {
        let index = project.path("src/index.ts");
        context_for_import(
            session,
            &index,
            binding,
            &occurrence(&binding.local),
            &ResolutionPath::start(&index),
        )
    }

    fn found(outcome: FollowOutcome) -> Definition {
        match outcome {
            FollowOutcome::Found(def) => def,
            other => panic!("expected a definition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_named_export_function() {
        let (project, session) = setup();
        let def = found(follow(&project, &session, &named("getAuthHeader", "getAuthHeader")));
        assert_eq!(def.kind, DefinitionKind::Function);
        assert_eq!(
            def.text,
            "export function getAuthHeader(req: HonoRequest) {\n  return readHeader(req, \"Authorization\");\n}"
        );
        assert_eq!(def.source_file, Some(project.path("src/utils/auth.ts")));
        assert_eq!(def.range.map(|r| r.start), Some(Position::new(6, 0)));
        assert_eq!(session.stats().import_follows, 1);
    }

    #[tokio::test]
    async fn test_aliased_import_of_const() {
        let (project, session) = setup();
        let def = found(follow(&project, &session, &named("TOKEN_PREFIX", "prefix")));
        assert_eq!(def.kind, DefinitionKind::Unknown);
        assert_eq!(def.text, "\"Bearer \"");
    }

    #[tokio::test]
    async fn test_export_list_alias() {
        let (project, session) = setup();
        let def = found(follow(&project, &session, &named("signingSecret", "signingSecret")));
        assert_eq!(def.kind, DefinitionKind::Function);
        assert_eq!(def.text, "() => \"s3cr3t\"");
    }

    #[tokio::test]
    async fn test_default_export_declaration() {
        let (project, session) = setup();
        let binding = ImportBinding {
            module: "./utils/auth".to_string(),
            kind: ImportKind::Default,
            local: "auth".to_string(),
        };
        let def = found(follow(&project, &session, &binding));
        assert_eq!(def.kind, DefinitionKind::Function);
        assert!(def.text.contains("async function authenticate()"));
    }

    #[tokio::test]
    async fn test_namespace_import_yields_module_text() {
        let (project, session) = setup();
        let binding = ImportBinding {
            module: "./utils/auth".to_string(),
            kind: ImportKind::Namespace,
            local: "auth".to_string(),
        };
        let def = found(follow(&project, &session, &binding));
        assert_eq!(def.kind, DefinitionKind::Unknown);
        assert_eq!(def.text, AUTH);
    }

    #[tokio::test]
    async fn test_reexports_and_unexported_names_are_not_found() {
        let (project, session) = setup();
        assert_eq!(follow(&project, &session, &named("helper", "helper")), FollowOutcome::NotFound);
        assert_eq!(
            follow(&project, &session, &named("readHeader", "readHeader")),
            FollowOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_missing_relative_module_is_not_found() {
        let (project, session) = setup();
        let binding = ImportBinding {
            module: "./nowhere".to_string(),
            kind: ImportKind::Default,
            local: "x".to_string(),
        };
        assert_eq!(follow(&project, &session, &binding), FollowOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_bare_package_yields_placeholder() {
        let (project, session) = setup();
        let binding = ImportBinding {
            module: "@hono/zod-validator/dist".to_string(),
            kind: ImportKind::Named {
                imported: "zValidator".to_string(),
            },
            local: "zValidator".to_string(),
        };
        let def = found(follow(&project, &session, &binding));
        assert_eq!(def.text, THIRD_PARTY_PLACEHOLDER);
        assert_eq!(def.package.as_deref(), Some("@hono/zod-validator"));
        assert_eq!(session.stats().import_follows, 0);
    }

    #[tokio::test]
    async fn test_module_on_path_is_cut() {
        let (project, session) = setup();
        let index = project.path("src/index.ts");
        let auth = project.path("src/utils/auth.ts");
        let path = ResolutionPath::start(&index).with_module(&auth);
        let binding = named("getAuthHeader", "getAuthHeader");
        assert_eq!(
            context_for_import(&session, &index, &binding, &occurrence("getAuthHeader"), &path),
            FollowOutcome::CycleCut
        );
    }

    #[test]
    fn test_package_names_from_specifiers() {
        assert_eq!(package_name_from_specifier("hono"), "hono");
        assert_eq!(package_name_from_specifier("hono/cors"), "hono");
        assert_eq!(package_name_from_specifier("@scope/pkg/sub"), "@scope/pkg");
    }
}
