//! Scripted in-process code-intelligence server.
//!
//! Answers definition lookups from tree-sitter analysis of the fixture files
//! the way a real TypeScript server would for simple projects:
//!
//! - a name declared at the top level of the requesting file resolves to
//!   that declaration, for both lookups;
//! - an imported name resolves to its import statement, and has no source
//!   definition, so the engine has to follow the import itself;
//! - a name declared in a project `.d.ts` file resolves there;
//! - names registered with [`ScriptedLauncher::with_library_globals`]
//!   resolve into the runtime's library declaration files.
//!
//! Requests against files that were never opened fail like the "unknown
//! file" errors of the real server, and are counted. Launchers can also add
//! latency to definition lookups and make the next few of them time out.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tower_lsp::lsp_types;
use tree_sitter::Node;
use url::Url;
use walkdir::WalkDir;

use crate::config::{is_declaration_file, EngineConfig, DEPENDENCY_DIRECTORIES};
use crate::definition::{import_bindings, node_range};
use crate::error::ClientError;
use crate::lsp::{
    file_uri, location_from_response, CodeIntelligence, DefinitionLocation, ServerLauncher,
    SOURCE_DEFINITION_COMMAND,
};
use crate::parser_pool::parse_source;
use crate::scope::{node_text, walk_preorder, Walk};
use crate::types::{Position, Range};
use crate::utf16::utf16_to_point;

#[derive(Debug, Default)]
struct ScriptedStats {
    launches: AtomicUsize,
    live: AtomicUsize,
    definition_requests: AtomicUsize,
    source_definition_requests: AtomicUsize,
    unopened_requests: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    pending_timeouts: AtomicUsize,
    latency_ms: AtomicU64,
}

impl ScriptedStats {
    fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms.load(Ordering::SeqCst))
    }

    fn take_timeout(&self) -> bool {
        self.pending_timeouts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Counts one definition request as in flight until dropped
struct InFlight<'a>(&'a ScriptedStats);

impl<'a> InFlight<'a> {
    fn enter(stats: &'a ScriptedStats) -> Self {
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Launches [`ScriptedServer`]s and keeps counters across all of them.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    stats: Arc<ScriptedStats>,
    library_globals: Vec<String>,
}

impl ScriptedLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Launcher whose servers place `names` in the runtime library files
    pub fn with_library_globals(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            stats: Arc::default(),
            library_globals: names.iter().map(|n| n.to_string()).collect(),
        })
    }

    pub fn launches(&self) -> usize {
        self.stats.launches.load(Ordering::SeqCst)
    }

    /// Servers started and not shut down yet
    pub fn live_servers(&self) -> usize {
        self.stats.live.load(Ordering::SeqCst)
    }

    pub fn definition_requests(&self) -> usize {
        self.stats.definition_requests.load(Ordering::SeqCst)
    }

    pub fn source_definition_requests(&self) -> usize {
        self.stats.source_definition_requests.load(Ordering::SeqCst)
    }

    /// Lookups against files that had not been opened first
    pub fn unopened_requests(&self) -> usize {
        self.stats.unopened_requests.load(Ordering::SeqCst)
    }

    /// Most definition requests ever in flight at once
    pub fn peak_concurrent_definitions(&self) -> usize {
        self.stats.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Delay every definition answer by `latency`
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.stats.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Make the next `count` definition requests time out. The server stays
    /// alive.
    pub fn time_out_next_definitions(&self, count: usize) {
        self.stats.pending_timeouts.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServerLauncher for ScriptedLauncher {
    async fn launch(
        &self,
        root: &Path,
        _config: &EngineConfig,
    ) -> Result<Arc<dyn CodeIntelligence>, ClientError> {
        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        self.stats.live.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedServer::new(
            root,
            &self.library_globals,
            Arc::clone(&self.stats),
        )))
    }
}

/// How the scripted server knows a name
enum Answer {
    Declared(DefinitionLocation),
    Imported(DefinitionLocation),
    Ambient(DefinitionLocation),
}

pub struct ScriptedServer {
    ambient: HashMap<String, DefinitionLocation>,
    opened: Mutex<HashSet<PathBuf>>,
    alive: AtomicBool,
    stats: Arc<ScriptedStats>,
}

impl ScriptedServer {
    fn new(root: &Path, library_globals: &[String], stats: Arc<ScriptedStats>) -> Self {
        let mut ambient = project_declarations(root);
        let library = root.join("node_modules/typescript/lib/lib.es5.d.ts");
        for name in library_globals {
            ambient.insert(
                name.clone(),
                DefinitionLocation {
                    path: library.clone(),
                    range: Range {
                        start: Position::new(0, 0),
                        end: Position::new(0, 0),
                    },
                },
            );
        }
        Self {
            ambient,
            opened: Mutex::new(HashSet::new()),
            alive: AtomicBool::new(true),
            stats,
        }
    }

    fn ensure_alive(&self) -> Result<(), ClientError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(ClientError::ConnectionClosed)
        }
    }

    fn ensure_open(&self, path: &Path) -> Result<(), ClientError> {
        let open = self
            .opened
            .lock()
            .map(|opened| opened.contains(path))
            .unwrap_or(false);
        if open {
            return Ok(());
        }
        self.stats.unopened_requests.fetch_add(1, Ordering::SeqCst);
        Err(ClientError::Server {
            code: -32603,
            message: format!("Could not find source file: '{}'.", path.display()),
        })
    }

    fn answer(&self, path: &Path, position: Position) -> Option<Answer> {
        let content = std::fs::read_to_string(path).ok()?;
        let tree = parse_source(path, &content)?;
        let root = tree.root_node();
        let point = utf16_to_point(&content, position.line, position.column);
        let leaf = root.descendant_for_point_range(point, point)?;
        let name = node_text(leaf, &content);

        if let Some(node) = import_site(root, &content, name) {
            return Some(Answer::Imported(location(path, node, &content)));
        }
        if let Some((_, node)) = top_level_names(root, &content)
            .into_iter()
            .find(|(declared, _)| declared == name)
        {
            return Some(Answer::Declared(location(path, node, &content)));
        }
        self.ambient.get(name).cloned().map(Answer::Ambient)
    }
}

#[async_trait]
impl CodeIntelligence for ScriptedServer {
    async fn open_file(&self, path: &Path) -> Result<(), ClientError> {
        self.ensure_alive()?;
        if let Ok(mut opened) = self.opened.lock() {
            opened.insert(path.to_path_buf());
        }
        Ok(())
    }

    async fn definition(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Option<DefinitionLocation>, ClientError> {
        self.stats.definition_requests.fetch_add(1, Ordering::SeqCst);
        self.ensure_alive()?;

        let _in_flight = InFlight::enter(&self.stats);
        let latency = self.stats.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.stats.take_timeout() {
            return Err(ClientError::Timeout {
                method: "textDocument/definition".to_string(),
                timeout: latency,
            });
        }

        self.ensure_open(path)?;
        Ok(self.answer(path, position).map(|answer| match answer {
            Answer::Declared(location) | Answer::Imported(location) | Answer::Ambient(location) => {
                location
            }
        }))
    }

    async fn source_definition(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Option<DefinitionLocation>, ClientError> {
        let uri = file_uri(path)?;
        let position: lsp_types::Position = position.into();
        let value = self
            .execute_command(SOURCE_DEFINITION_COMMAND, vec![json!(uri), json!(position)])
            .await?;
        Ok(value.and_then(location_from_response))
    }

    async fn execute_command(
        &self,
        command: &str,
        arguments: Vec<Value>,
    ) -> Result<Option<Value>, ClientError> {
        self.ensure_alive()?;
        if command != SOURCE_DEFINITION_COMMAND {
            return Ok(None);
        }
        self.stats
            .source_definition_requests
            .fetch_add(1, Ordering::SeqCst);

        let (uri, position) = match (arguments.first(), arguments.get(1)) {
            (Some(uri), Some(position)) => (uri.clone(), position.clone()),
            _ => return Err(ClientError::Protocol("expected a uri and a position".to_string())),
        };
        let uri: Url =
            serde_json::from_value(uri).map_err(|e| ClientError::Protocol(e.to_string()))?;
        let position: lsp_types::Position =
            serde_json::from_value(position).map_err(|e| ClientError::Protocol(e.to_string()))?;
        let path = uri
            .to_file_path()
            .map_err(|()| ClientError::Protocol(format!("not a file uri: {uri}")))?;
        self.ensure_open(&path)?;

        match self.answer(&path, position.into()) {
            Some(Answer::Declared(location)) => {
                let uri = file_uri(&location.path)?;
                let range = lsp_types::Range::new(
                    location.range.start.into(),
                    location.range.end.into(),
                );
                serde_json::to_value(vec![lsp_types::Location::new(uri, range)])
                    .map(Some)
                    .map_err(|e| ClientError::Protocol(e.to_string()))
            }
            Some(Answer::Imported(_)) | Some(Answer::Ambient(_)) | None => Ok(None),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.stats.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn location(path: &Path, node: Node, content: &str) -> DefinitionLocation {
    DefinitionLocation {
        path: path.to_path_buf(),
        range: node_range(node, content),
    }
}

/// The identifier binding `name` in an import statement of `root`
fn import_site<'t>(root: Node<'t>, content: &str, name: &str) -> Option<Node<'t>> {
    let mut cursor = root.walk();
    for statement in root.named_children(&mut cursor) {
        if statement.kind() != "import_statement" {
            continue;
        }
        if !import_bindings(statement, content)
            .iter()
            .any(|binding| binding.local == name)
        {
            continue;
        }
        // The local name is the last identifier spelled `name`
        let mut site = statement;
        walk_preorder(statement, |node| {
            if node.kind() == "identifier" && node_text(node, content) == name {
                site = node;
            }
            Walk::Descend
        });
        return Some(site);
    }
    None
}

fn top_level_names<'t>(root: Node<'t>, content: &str) -> Vec<(String, Node<'t>)> {
    let mut names = Vec::new();
    let mut cursor = root.walk();
    for statement in root.named_children(&mut cursor) {
        collect_statement_names(statement, content, &mut names);
    }
    names
}

fn collect_statement_names<'t>(
    statement: Node<'t>,
    content: &str,
    names: &mut Vec<(String, Node<'t>)>,
) {
    match statement.kind() {
        "export_statement" => {
            if let Some(declaration) = statement.child_by_field_name("declaration") {
                collect_statement_names(declaration, content, names);
            }
        }
        "ambient_declaration" => {
            let mut cursor = statement.walk();
            for child in statement.named_children(&mut cursor) {
                collect_statement_names(child, content, names);
            }
        }
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = statement.walk();
            for declarator in statement.named_children(&mut cursor) {
                if let Some(name) = declarator.child_by_field_name("name") {
                    if name.kind() == "identifier" {
                        names.push((node_text(name, content).to_string(), name));
                    }
                }
            }
        }
        "function_declaration"
        | "generator_function_declaration"
        | "function_signature"
        | "class_declaration"
        | "abstract_class_declaration"
        | "interface_declaration"
        | "type_alias_declaration"
        | "enum_declaration"
        | "internal_module" => {
            if let Some(name) = statement.child_by_field_name("name") {
                names.push((node_text(name, content).to_string(), name));
            }
        }
        _ => {}
    }
}

/// Top-level names of the declaration files in the project itself
fn project_declarations(root: &Path) -> HashMap<String, DefinitionLocation> {
    let mut declarations = HashMap::new();
    let entries = WalkDir::new(root).into_iter().filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        entry.depth() == 0
            || !entry.file_type().is_dir()
            || !(name.starts_with('.') || DEPENDENCY_DIRECTORIES.contains(&&*name))
    });
    for entry in entries.filter_map(Result::ok) {
        if !entry.file_type().is_file()
            || !is_declaration_file(&entry.file_name().to_string_lossy())
        {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let Some(tree) = parse_source(entry.path(), &content) else {
            continue;
        };
        for (name, node) in top_level_names(tree.root_node(), &content) {
            declarations
                .entry(name)
                .or_insert_with(|| location(entry.path(), node, &content));
        }
    }
    declarations
}
