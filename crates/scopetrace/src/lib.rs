//
// lib.rs
//
// Cross-file scope resolution for TypeScript functions
//
// Given the source text of a function captured at runtime, find it in a
// project, compute the identifiers it uses but does not declare, and resolve
// each one to the text of its declaration.
//

pub mod classify;
pub mod config;
pub mod definition;
pub mod error;
pub mod expand;
pub mod imports;
pub mod lsp;
pub mod parser_pool;
pub mod perf;
pub mod project;
pub mod scope;
pub mod search;
pub mod session;
pub mod source_cache;
pub mod types;
pub mod utf16;
// test_utils is available in test builds and when the `test-support` feature is enabled.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

pub use config::EngineConfig;
pub use error::{ClientError, EngineError};
pub use expand::{expand_function, expand_function_in};
pub use session::{AnalysisSession, SessionRegistry};
pub use types::{Definition, DefinitionKind, ExpandedContextEntry, ExpandedFunction};
