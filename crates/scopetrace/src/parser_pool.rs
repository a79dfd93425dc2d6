//
// parser_pool.rs
//
// Thread-local parser pool for efficient parser reuse
//

use std::cell::RefCell;
use std::path::Path;
use tree_sitter::{Parser, Tree};

/// Grammar used to parse a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceLanguage {
    TypeScript,
    Tsx,
}

impl SourceLanguage {
    /// Pick the grammar from a file extension. `.tsx` and the JavaScript family
    /// go through the TSX grammar so JSX parses; everything else is TypeScript.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext)
                if ["tsx", "jsx", "js", "mjs", "cjs"]
                    .iter()
                    .any(|candidate| ext.eq_ignore_ascii_case(candidate)) =>
            {
                SourceLanguage::Tsx
            }
            _ => SourceLanguage::TypeScript,
        }
    }
}

fn new_parser(language: SourceLanguage) -> Parser {
    let mut parser = Parser::new();
    let grammar = match language {
        SourceLanguage::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT,
        SourceLanguage::Tsx => tree_sitter_typescript::LANGUAGE_TSX,
    };
    parser
        .set_language(&grammar.into())
        .expect("Failed to set TypeScript language");
    parser
}

thread_local! {
    static TS_PARSER: RefCell<Parser> = RefCell::new(new_parser(SourceLanguage::TypeScript));
    static TSX_PARSER: RefCell<Parser> = RefCell::new(new_parser(SourceLanguage::Tsx));
}

/// Execute a function with a thread-local parser instance for `language`.
/// The parser is reused across calls on the same thread.
pub fn with_parser<F, R>(language: SourceLanguage, f: F) -> R
where
    F: FnOnce(&mut Parser) -> R,
{
    match language {
        SourceLanguage::TypeScript => TS_PARSER.with(|parser| f(&mut parser.borrow_mut())),
        SourceLanguage::Tsx => TSX_PARSER.with(|parser| f(&mut parser.borrow_mut())),
    }
}

/// Parse `content` with the grammar chosen for `path`.
pub fn parse_source(path: &Path, content: &str) -> Option<Tree> {
    with_parser(SourceLanguage::from_path(path), |parser| {
        parser.parse(content, None)
    })
}
