//
// scope.rs
//
// Free-identifier analysis of a single function subtree
//

use std::collections::HashSet;

use indexmap::IndexMap;
use tree_sitter::Node;

use crate::types::{IdentifierOccurrence, Position};
use crate::utf16::point_to_utf16;

/// Control flow for [`walk_preorder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Descend,
    SkipChildren,
    Stop,
}

/// Visit `root` and its descendants depth-first, in document order.
pub fn walk_preorder<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>) -> Walk) {
    let mut cursor = root.walk();
    let mut depth = 0usize;
    loop {
        match visit(cursor.node()) {
            Walk::Stop => return,
            Walk::Descend => {
                if cursor.goto_first_child() {
                    depth += 1;
                    continue;
                }
            }
            Walk::SkipChildren => {}
        }
        loop {
            if depth == 0 {
                return;
            }
            if cursor.goto_next_sibling() {
                break;
            }
            cursor.goto_parent();
            depth -= 1;
        }
    }
}

pub fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// Node kinds that open a function body
pub const FUNCTION_KINDS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "function_expression",
    "function",
    "generator_function",
    "arrow_function",
];

pub fn is_function_kind(kind: &str) -> bool {
    FUNCTION_KINDS.contains(&kind)
}

/// Compute the identifiers `function` references without declaring them.
///
/// Declarations are collected first (parameters, variables, nested function
/// and class names, catch and loop bindings, type parameters), then every
/// identifier reference outside that set is reported once, at the position it
/// was last seen.
pub fn analyze_out_of_scope_identifiers(function: Node, source: &str) -> Vec<IdentifierOccurrence> {
    let declared = collect_declarations(function, source);
    collect_usages(function, source, &declared)
        .into_iter()
        .map(|(name, position)| IdentifierOccurrence { name, position })
        .collect()
}

/// First pass: every name bound inside `function`, including its own name.
pub fn collect_declarations(function: Node, source: &str) -> HashSet<String> {
    let mut declared = HashSet::new();

    walk_preorder(function, |node| {
        match node.kind() {
            "required_parameter" | "optional_parameter" => {
                if let Some(pattern) = node.child_by_field_name("pattern") {
                    collect_binding_names(pattern, source, &mut declared);
                }
            }
            "arrow_function" => {
                // `x => x` has a bare identifier instead of formal_parameters
                if let Some(param) = node.child_by_field_name("parameter") {
                    collect_binding_names(param, source, &mut declared);
                }
            }
            "variable_declarator" => {
                if let Some(name) = node.child_by_field_name("name") {
                    collect_binding_names(name, source, &mut declared);
                }
            }
            "catch_clause" => {
                if let Some(param) = node.child_by_field_name("parameter") {
                    collect_binding_names(param, source, &mut declared);
                }
            }
            "for_in_statement" => {
                // Only `for (const x of ...)` binds; `for (x of ...)` assigns
                if node.child_by_field_name("kind").is_some() {
                    if let Some(left) = node.child_by_field_name("left") {
                        collect_binding_names(left, source, &mut declared);
                    }
                }
            }
            "function_declaration"
            | "generator_function_declaration"
            | "function_expression"
            | "function"
            | "generator_function"
            | "class_declaration"
            | "class"
            | "type_parameter"
            | "type_alias_declaration"
            | "interface_declaration"
            | "enum_declaration" => {
                if let Some(name) = node.child_by_field_name("name") {
                    declared.insert(node_text(name, source).to_string());
                }
            }
            _ => {}
        }
        Walk::Descend
    });

    declared
}

/// Names bound by a binding pattern. Default values and property keys are
/// not bindings.
fn collect_binding_names(pattern: Node, source: &str, out: &mut HashSet<String>) {
    match pattern.kind() {
        "identifier" | "shorthand_property_identifier_pattern" => {
            out.insert(node_text(pattern, source).to_string());
        }
        "pair_pattern" => {
            if let Some(value) = pattern.child_by_field_name("value") {
                collect_binding_names(value, source, out);
            }
        }
        "assignment_pattern" | "object_assignment_pattern" => {
            if let Some(left) = pattern.child_by_field_name("left") {
                collect_binding_names(left, source, out);
            }
        }
        "object_pattern" | "array_pattern" | "rest_pattern" => {
            let mut cursor = pattern.walk();
            for child in pattern.named_children(&mut cursor) {
                collect_binding_names(child, source, out);
            }
        }
        _ => {}
    }
}

/// Second pass: references not in `declared`, in first-seen order with the
/// last-seen position.
pub fn collect_usages(
    function: Node,
    source: &str,
    declared: &HashSet<String>,
) -> IndexMap<String, Position> {
    let mut usages = IndexMap::new();

    walk_preorder(function, |node| match node.kind() {
        "identifier" | "type_identifier" | "shorthand_property_identifier" => {
            if is_reference(node, source) {
                let name = node_text(node, source);
                if !name.is_empty() && !declared.contains(name) {
                    let (line, column) = point_to_utf16(source, node.start_position());
                    usages.insert(name.to_string(), Position::new(line, column));
                }
            }
            Walk::SkipChildren
        }
        _ => Walk::Descend,
    });

    usages
}

fn is_reference(node: Node, source: &str) -> bool {
    let Some(parent) = node.parent() else {
        return true;
    };
    match parent.kind() {
        // `ns.Type`: only `ns` is looked up in scope
        "nested_type_identifier" | "nested_identifier" => {
            parent.child_by_field_name("name") != Some(node)
        }
        // `<div>` names an intrinsic element, `<Card>` a component
        "jsx_opening_element" | "jsx_closing_element" | "jsx_self_closing_element" => {
            !node_text(node, source).starts_with(|c: char| c.is_ascii_lowercase())
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser_pool::parse_source;
    use proptest::prelude::*;
    use std::path::Path;
    use tree_sitter::Tree;

    fn parse(code: &str) -> Tree {
        parse_source(Path::new("test.ts"), code).expect("parse should succeed")
    }

    fn first_function(tree: &Tree) -> Node<'_> {
        let mut found = None;
        walk_preorder(tree.root_node(), |node| {
            if is_function_kind(node.kind()) {
                found = Some(node);
                Walk::Stop
            } else {
                Walk::Descend
            }
        });
        found.expect("code should contain a function")
    }

    fn free_names(code: &str) -> Vec<String> {
        let tree = parse(code);
        analyze_out_of_scope_identifiers(first_function(&tree), code)
            .into_iter()
            .map(|occ| occ.name)
            .collect()
    }

    #[test]
    fn test_no_free_identifiers() {
        assert!(free_names("function add(a: number, b: number) { return a + b; }").is_empty());
    }

    #[test]
    fn test_parameters_and_locals_are_not_free() {
        let names = free_names(
            r#"async (c) => {
  const user = c.get("user");
  let count = 0;
  for (const item of user.items) { count += item.size; }
  return c.json({ count });
}"#,
        );
        assert!(names.is_empty(), "unexpected free identifiers: {names:?}");
    }

    #[test]
    fn test_member_property_is_never_reported() {
        let names = free_names("function f() { return obj.prop.deeper; }");
        assert_eq!(names, vec!["obj"]);
    }

    #[test]
    fn test_local_member_base_is_not_reported() {
        let names = free_names("function f(req) { const url = req.url; return url.length; }");
        assert!(names.is_empty());
    }

    #[test]
    fn test_free_identifiers_in_order() {
        let names = free_names(
            r#"const handler = async (c) => {
  const auth = getAuthHeader(c.req);
  if (!PASSPHRASES.includes(auth)) {
    return c.text("Unauthorized", 401);
  }
  console.log(helperFunction(auth));
  return c.text("ok");
};"#,
        );
        assert_eq!(
            names,
            vec!["getAuthHeader", "PASSPHRASES", "console", "helperFunction"]
        );
    }

    #[test]
    fn test_last_seen_position_wins() {
        let code = "function f() {\n  log(1);\n  log(2);\n}";
        let tree = parse(code);
        let occurrences = analyze_out_of_scope_identifiers(first_function(&tree), code);
        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].name, "log");
        assert_eq!(occurrences[0].position, Position::new(2, 2));
    }

    #[test]
    fn test_destructuring_bindings() {
        let names = free_names(
            r#"function f({ a, b: renamed, c = fallback }, [first, ...rest]) {
  const { d, e: { nested } } = source;
  return a + renamed + c + first + rest.length + d + nested;
}"#,
        );
        assert_eq!(names, vec!["fallback", "source"]);
    }

    #[test]
    fn test_type_references_are_free() {
        let names = free_names(
            "function getAuthHeader<T>(req: HonoRequest, extra: T): string { return req.header(HEADER) ?? ''; }",
        );
        assert_eq!(names, vec!["HonoRequest", "HEADER"]);
    }

    #[test]
    fn test_namespaced_type_reports_namespace_only() {
        let names = free_names("function f(e: Schema.User) { return e; }");
        assert_eq!(names, vec!["Schema"]);
    }

    #[test]
    fn test_own_name_and_nested_declarations() {
        let names = free_names(
            r#"function fib(n) {
  function inner(x) { return x; }
  try { risky(); } catch (err) { return inner(err); }
  return n < 2 ? n : fib(n - 1) + fib(n - 2);
}"#,
        );
        assert_eq!(names, vec!["risky"]);
    }

    #[test]
    fn test_shorthand_property_is_a_usage() {
        let names = free_names("function f() { return { db, limit: 10 }; }");
        assert_eq!(names, vec!["db"]);
    }

    #[test]
    fn test_unicode_positions_are_utf16() {
        let code = "function f() { const s = \"🎉\"; return s + tail; }";
        let tree = parse(code);
        let occurrences = analyze_out_of_scope_identifiers(first_function(&tree), code);
        assert_eq!(occurrences.len(), 1);
        // 🎉 is 4 bytes but 2 UTF-16 units
        let byte_col = code.find("tail").unwrap() as u32;
        assert_eq!(occurrences[0].position, Position::new(0, byte_col - 2));
    }

    #[test]
    fn test_jsx_intrinsic_elements_are_not_free() {
        let code = "function View() { return <div><Card title={title} /></div>; }";
        let tree = parse_source(Path::new("view.tsx"), code).unwrap();
        let names: Vec<String> = analyze_out_of_scope_identifiers(first_function(&tree), code)
            .into_iter()
            .map(|occ| occ.name)
            .collect();
        assert_eq!(names, vec!["Card", "title"]);
    }

    const RESERVED: &[&str] = &[
        "as", "do", "if", "in", "is", "of", "for", "let", "new", "try", "var", "case", "else",
        "enum", "null", "this", "true", "type", "void", "with", "break", "catch", "class",
        "const", "false", "super", "throw", "while", "yield", "async", "await", "return",
        "typeof", "delete", "export", "import", "switch", "static", "public", "default",
        "extends", "finally", "package", "private", "continue", "debugger", "function",
        "interface", "undefined", "protected", "implements", "instanceof", "declare",
        "module", "namespace", "keyof", "infer", "readonly", "unique", "any", "get", "set",
        "number", "string", "boolean", "symbol", "object", "never", "unknown", "bigint",
        "abstract", "override", "satisfies", "from", "asserts", "global", "accessor",
    ];

    fn ident() -> impl Strategy<Value = String> {
        "[a-z][a-zA-Z0-9]{0,6}".prop_filter("reserved word", |s| !RESERVED.contains(&s.as_str()))
    }

    proptest! {
        #[test]
        fn prop_declared_names_never_free(
            param in ident(),
            local in ident(),
            free in ident(),
        ) {
            prop_assume!(free != param && free != local && free != "f");
            prop_assume!(free != "value" && free != "size");
            let code = format!(
                "function f({param}) {{ const {local} = {param}.value; return {local}.size + {free}; }}"
            );
            let names = free_names(&code);
            prop_assert!(!names.contains(&param));
            prop_assert!(!names.contains(&local));
            prop_assert!(!names.iter().any(|n| n == "value" || n == "size"));
            prop_assert_eq!(names, vec![free]);
        }
    }
}
