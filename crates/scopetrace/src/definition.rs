//
// definition.rs
//
// Turn a definition location into declaration text or an import binding
//

use std::path::Path;

use tree_sitter::{Node, Tree};

use crate::parser_pool::parse_source;
use crate::scope::{is_function_kind, node_text, walk_preorder, Walk};
use crate::types::{Definition, DefinitionKind, Position, Range};
use crate::utf16::{point_to_utf16, utf16_to_point};

/// How an imported name is bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportKind {
    /// `import name from "mod"`
    Default,
    /// `import { imported as local } from "mod"`
    Named { imported: String },
    /// `import * as local from "mod"`
    Namespace,
}

/// One name bound by an import statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    /// Module specifier without quotes
    pub module: String,
    pub kind: ImportKind,
    /// Name the binding has in the importing file
    pub local: String,
}

/// What a definition location points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionSite {
    Declaration(Definition),
    Import(ImportBinding),
}

/// Node kinds a definition lookup can land in
const DECLARATION_KINDS: &[&str] = &[
    "variable_declarator",
    "function_declaration",
    "generator_function_declaration",
    "function_signature",
    "class_declaration",
    "abstract_class_declaration",
    "type_alias_declaration",
    "interface_declaration",
    "enum_declaration",
    "internal_module",
    "required_parameter",
    "optional_parameter",
    "method_definition",
    "public_field_definition",
    "export_statement",
];

/// Parse `content` and describe what sits at `position`.
///
/// `name` is the local name being resolved; it picks the right binding when
/// the location is an import statement.
pub fn definition_at(
    path: &Path,
    content: &str,
    position: Position,
    name: &str,
) -> Option<DefinitionSite> {
    let tree = parse_source(path, content)?;
    site_in_tree(path, &tree, content, position, name)
}

pub fn site_in_tree(
    path: &Path,
    tree: &Tree,
    content: &str,
    position: Position,
    name: &str,
) -> Option<DefinitionSite> {
    let point = utf16_to_point(content, position.line, position.column);
    let leaf = tree.root_node().descendant_for_point_range(point, point)?;

    let mut node = leaf;
    loop {
        if node.kind() == "import_statement" {
            return import_binding(node, content, name)
                .or_else(|| import_binding_containing(node, leaf, content))
                .map(DefinitionSite::Import);
        }
        if DECLARATION_KINDS.contains(&node.kind()) {
            return Some(DefinitionSite::Declaration(declaration_definition(
                path, node, content,
            )));
        }
        node = node.parent()?;
    }
}

/// Extract the text and kind of a declaration node.
///
/// Variable declarations yield their initializer. Function, type, and class
/// declarations yield the whole declaration, with its `export` keyword when
/// exported.
pub fn declaration_definition(path: &Path, node: Node, content: &str) -> Definition {
    let (kind, text_node) = match node.kind() {
        "variable_declarator" => match node.child_by_field_name("value") {
            Some(value) if is_function_kind(value.kind()) => (DefinitionKind::Function, value),
            Some(value) => (DefinitionKind::Unknown, value),
            None => (DefinitionKind::Unknown, node),
        },
        "function_declaration" | "generator_function_declaration" | "function_signature" => {
            (DefinitionKind::Function, with_export(node))
        }
        "type_alias_declaration" | "interface_declaration" => {
            (DefinitionKind::Type, with_export(node))
        }
        _ => (DefinitionKind::Unknown, with_export(node)),
    };

    Definition {
        kind,
        text: node_text(text_node, content).to_string(),
        source_file: Some(path.to_path_buf()),
        range: Some(node_range(text_node, content)),
        package: None,
    }
}

fn with_export(node: Node) -> Node {
    match node.parent() {
        Some(parent) if parent.kind() == "export_statement" => parent,
        _ => node,
    }
}

/// Zero-based UTF-16 range of `node`
pub fn node_range(node: Node, content: &str) -> Range {
    let (start_line, start_column) = point_to_utf16(content, node.start_position());
    let (end_line, end_column) = point_to_utf16(content, node.end_position());
    Range {
        start: Position::new(start_line, start_column),
        end: Position::new(end_line, end_column),
    }
}

/// The binding of `local` introduced by `import_statement`, if any
pub fn import_binding(import_statement: Node, content: &str, local: &str) -> Option<ImportBinding> {
    import_bindings(import_statement, content)
        .into_iter()
        .find(|binding| binding.local == local)
}

fn import_binding_containing(
    import_statement: Node,
    leaf: Node,
    content: &str,
) -> Option<ImportBinding> {
    let mut node = leaf;
    while node != import_statement {
        if matches!(node.kind(), "import_specifier" | "namespace_import") {
            let local = match node.child_by_field_name("alias") {
                Some(alias) => node_text(alias, content),
                None => node
                    .child_by_field_name("name")
                    .or_else(|| named_child_of_kind(node, "identifier"))
                    .map(|n| node_text(n, content))
                    .unwrap_or(""),
            };
            return import_binding(import_statement, content, local);
        }
        node = node.parent()?;
    }
    None
}

/// All names bound by `import_statement`, in source order
pub fn import_bindings(import_statement: Node, content: &str) -> Vec<ImportBinding> {
    let Some(module) = import_statement
        .child_by_field_name("source")
        .map(|source| string_literal_value(source, content))
    else {
        return Vec::new();
    };
    let Some(clause) = named_child_of_kind(import_statement, "import_clause") else {
        return Vec::new();
    };

    let mut bindings = Vec::new();
    let mut cursor = clause.walk();
    for child in clause.named_children(&mut cursor) {
        match child.kind() {
            "identifier" => bindings.push(ImportBinding {
                module: module.clone(),
                kind: ImportKind::Default,
                local: node_text(child, content).to_string(),
            }),
            "namespace_import" => {
                if let Some(ident) = named_child_of_kind(child, "identifier") {
                    bindings.push(ImportBinding {
                        module: module.clone(),
                        kind: ImportKind::Namespace,
                        local: node_text(ident, content).to_string(),
                    });
                }
            }
            "named_imports" => {
                let mut spec_cursor = child.walk();
                for spec in child.named_children(&mut spec_cursor) {
                    if spec.kind() != "import_specifier" {
                        continue;
                    }
                    let Some(name) = spec.child_by_field_name("name") else {
                        continue;
                    };
                    let imported = match name.kind() {
                        "string" => string_literal_value(name, content),
                        _ => node_text(name, content).to_string(),
                    };
                    let local = spec
                        .child_by_field_name("alias")
                        .map(|alias| node_text(alias, content).to_string())
                        .unwrap_or_else(|| imported.clone());
                    bindings.push(ImportBinding {
                        module: module.clone(),
                        kind: ImportKind::Named { imported },
                        local,
                    });
                }
            }
            _ => {}
        }
    }
    bindings
}

pub fn named_child_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|c| c.kind() == kind);
    found
}

/// Contents of a string literal node without its quotes
pub fn string_literal_value(node: Node, content: &str) -> String {
    let text = node_text(node, content);
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()
}

/// The function node spanning exactly `range`, or the first function inside
/// it. Used to analyze a resolved function definition in turn.
pub fn function_in_range<'t>(tree: &'t Tree, content: &str, range: Range) -> Option<Node<'t>> {
    let start = utf16_to_point(content, range.start.line, range.start.column);
    let end = utf16_to_point(content, range.end.line, range.end.column);
    let outer = tree.root_node().descendant_for_point_range(start, end)?;

    let mut found = None;
    walk_preorder(outer, |node| {
        if is_function_kind(node.kind()) {
            found = Some(node);
            Walk::Stop
        } else {
            Walk::Descend
        }
    });
    found
}
