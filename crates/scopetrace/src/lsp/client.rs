//
// lsp/client.rs
//
// JSON-RPC client for a code-intelligence server over stdio
//

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tower_lsp::lsp_types::notification::{self, Notification};
use tower_lsp::lsp_types::request::{self, Request};
use tower_lsp::lsp_types::{
    ClientCapabilities, DidChangeTextDocumentParams, DidOpenTextDocumentParams,
    DynamicRegistrationClientCapabilities, ExecuteCommandParams, GotoCapability,
    GotoDefinitionParams, InitializeParams, InitializeResult, LogMessageParams,
    PublishDiagnosticsParams, ShowMessageParams, TextDocumentClientCapabilities,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem,
    TextDocumentPositionParams, VersionedTextDocumentIdentifier, WorkspaceClientCapabilities,
    WorkspaceFolder,
};

use super::transport::{read_message, write_message};
use super::{
    file_uri, language_id, location_from_response, CodeIntelligence, DefinitionLocation,
    SOURCE_DEFINITION_COMMAND,
};
use crate::config::EngineConfig;
use crate::error::ClientError;
use crate::types::Position;

/// Lifecycle of one server connection. `Broken` is terminal; the owning
/// session replaces a broken client with a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Uninitialized = 0,
    Handshaking = 1,
    Ready = 2,
    Broken = 3,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ClientState::Uninitialized,
            1 => ClientState::Handshaking,
            2 => ClientState::Ready,
            _ => ClientState::Broken,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClientState::Uninitialized => "uninitialized",
            ClientState::Handshaking => "handshaking",
            ClientState::Ready => "ready",
            ClientState::Broken => "broken",
        }
    }
}

#[derive(Debug)]
struct SharedState(AtomicU8);

impl SharedState {
    fn new(state: ClientState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn get(&self) -> ClientState {
        ClientState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ClientState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

type PendingRequests = Arc<DashMap<i64, oneshot::Sender<Result<Value, ClientError>>>>;

/// What the server was last told about one document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SyncedDocument {
    version: i32,
    digest: u64,
}

fn content_digest(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Client for one server process. Requests are multiplexed over a single
/// connection by id, so many lookups can be in flight at once.
pub struct LspClient {
    root: PathBuf,
    request_timeout: Duration,
    next_id: AtomicI64,
    outgoing: mpsc::UnboundedSender<String>,
    pending: PendingRequests,
    state: Arc<SharedState>,
    open_documents: DashMap<PathBuf, SyncedDocument>,
    child: Mutex<Option<Child>>,
    io_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LspClient {
    /// Spawn the configured server in `root` and complete the handshake.
    pub async fn start(root: &Path, config: &EngineConfig) -> Result<Self, ClientError> {
        let command_line = std::iter::once(config.server_command.as_str())
            .chain(config.server_args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        log::info!(
            "Starting code-intelligence server `{}` in {}",
            command_line,
            root.display()
        );

        let mut cmd = Command::new(&config.server_command);
        cmd.args(&config.server_args)
            .current_dir(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|source| ClientError::Spawn {
            command: command_line.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Protocol("server stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Protocol("server stdout is not piped".to_string()))?;
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::error!("server stderr: {}", line);
                }
            })
        });

        let client = Self::connect(
            stdout,
            stdin,
            root,
            config.request_timeout(),
            config.startup_timeout(),
        )
        .await?;

        if let Ok(mut guard) = client.child.lock() {
            *guard = Some(child);
        }
        if let (Some(task), Ok(mut tasks)) = (stderr_task, client.io_tasks.lock()) {
            tasks.push(task);
        }
        Ok(client)
    }

    /// Run the protocol over an existing byte stream pair and complete the
    /// handshake within `startup_timeout`.
    pub async fn connect<R, W>(
        reader: R,
        writer: W,
        root: &Path,
        request_timeout: Duration,
        startup_timeout: Duration,
    ) -> Result<Self, ClientError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let pending: PendingRequests = Arc::new(DashMap::new());
        let state = Arc::new(SharedState::new(ClientState::Uninitialized));

        let writer_task = tokio::spawn(write_loop(writer, outgoing_rx, state.clone()));
        let reader_task = tokio::spawn(read_loop(
            BufReader::new(reader),
            pending.clone(),
            outgoing.clone(),
            state.clone(),
        ));

        let client = Self {
            root: root.to_path_buf(),
            request_timeout,
            next_id: AtomicI64::new(1),
            outgoing,
            pending,
            state,
            open_documents: DashMap::new(),
            child: Mutex::new(None),
            io_tasks: Mutex::new(vec![writer_task, reader_task]),
        };
        client.initialize(startup_timeout).await?;
        Ok(client)
    }

    pub fn state(&self) -> ClientState {
        self.state.get()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Version the server holds for `path`, if it was opened
    pub fn document_version(&self, path: &Path) -> Option<i32> {
        self.open_documents.get(path).map(|doc| doc.version)
    }

    #[allow(deprecated)]
    async fn initialize(&self, timeout: Duration) -> Result<(), ClientError> {
        self.state.set(ClientState::Handshaking);

        let root_uri = file_uri(&self.root)?;
        let folder_name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(root_uri.clone()),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: folder_name,
            }]),
            initialization_options: Some(json!({
                "preferences": {
                    "allowIncompleteCompletions": true,
                    "includeCompletionsForModuleExports": true,
                    "includeCompletionsWithInsertText": true,
                }
            })),
            capabilities: client_capabilities(),
            ..InitializeParams::default()
        };

        let result = match self
            .send_request(request::Initialize::METHOD, to_params(params)?, timeout)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                log::error!("Code-intelligence server failed to initialize: {}", e);
                self.state.set(ClientState::Broken);
                return Err(e);
            }
        };
        match serde_json::from_value::<InitializeResult>(result) {
            Ok(init) => log::debug!(
                "Server initialized: {}",
                init.server_info
                    .map(|info| info.name)
                    .unwrap_or_else(|| "unnamed server".to_string())
            ),
            Err(e) => log::warn!("Unexpected initialize result: {}", e),
        }

        self.notify(notification::Initialized::METHOD, json!({}))?;
        self.state.set(ClientState::Ready);
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), ClientError> {
        match self.state.get() {
            ClientState::Ready => Ok(()),
            ClientState::Broken => Err(ClientError::ConnectionClosed),
            other => Err(ClientError::NotReady(other.as_str())),
        }
    }

    fn notify(&self, method: &str, params: Value) -> Result<(), ClientError> {
        let message = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.outgoing.send(message.to_string()).map_err(|_| {
            self.state.set(ClientState::Broken);
            ClientError::ConnectionClosed
        })
    }

    /// Send a request and wait for its response with the default timeout.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        self.ensure_ready()?;
        self.send_request(method, params, self.request_timeout).await
    }

    async fn send_request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        if self.outgoing.send(message.to_string()).is_err() {
            self.pending.remove(&id);
            self.state.set(ClientState::Broken);
            return Err(ClientError::ConnectionClosed);
        }
        log::trace!("-> {} (id {})", method, id);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped: the reader saw the stream close
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.pending.remove(&id);
                Err(ClientError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

}

impl Drop for LspClient {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.io_tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl CodeIntelligence for LspClient {
    async fn open_file(&self, path: &Path) -> Result<(), ClientError> {
        self.ensure_ready()?;
        let text = tokio::fs::read_to_string(path).await?;
        let digest = content_digest(&text);
        let uri = file_uri(path)?;

        // Notifications are queued while the entry is held, so any request
        // issued after this returns is written after the sync.
        match self.open_documents.entry(path.to_path_buf()) {
            Entry::Occupied(mut synced) => {
                if synced.get().digest == digest {
                    return Ok(());
                }
                let version = synced.get().version + 1;
                let params = DidChangeTextDocumentParams {
                    text_document: VersionedTextDocumentIdentifier { uri, version },
                    content_changes: vec![TextDocumentContentChangeEvent {
                        range: None,
                        range_length: None,
                        text,
                    }],
                };
                self.notify(notification::DidChangeTextDocument::METHOD, to_params(params)?)?;
                synced.insert(SyncedDocument { version, digest });
                log::debug!("Re-synced {} at version {}", path.display(), version);
                Ok(())
            }
            Entry::Vacant(slot) => {
                let params = DidOpenTextDocumentParams {
                    text_document: TextDocumentItem {
                        uri,
                        language_id: language_id(path).to_string(),
                        version: 1,
                        text,
                    },
                };
                self.notify(notification::DidOpenTextDocument::METHOD, to_params(params)?)?;
                slot.insert(SyncedDocument { version: 1, digest });
                log::trace!("Opened {}", path.display());
                Ok(())
            }
        }
    }

    async fn definition(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Option<DefinitionLocation>, ClientError> {
        let params = GotoDefinitionParams {
            text_document_position_params: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri: file_uri(path)? },
                position: position.into(),
            },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };
        let value = self
            .request(request::GotoDefinition::METHOD, to_params(params)?)
            .await?;
        Ok(location_from_response(value))
    }

    async fn source_definition(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Option<DefinitionLocation>, ClientError> {
        let uri = file_uri(path)?;
        let position: tower_lsp::lsp_types::Position = position.into();
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
        let params = ExecuteCommandParams {
            command: command.to_string(),
            arguments,
            work_done_progress_params: Default::default(),
        };
        match self.request(request::ExecuteCommand::METHOD, to_params(params)?).await? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }

    fn is_alive(&self) -> bool {
        self.state.get() == ClientState::Ready
    }

    async fn shutdown(&self) {
        if self.state.get() == ClientState::Ready {
            let timeout = self.request_timeout.min(Duration::from_secs(2));
            if let Err(e) = self
                .send_request(request::Shutdown::METHOD, Value::Null, timeout)
                .await
            {
                log::debug!("Shutdown request failed: {}", e);
            }
            let _ = self.notify(notification::Exit::METHOD, Value::Null);
        }
        self.state.set(ClientState::Broken);
        self.pending.clear();

        let child = self.child.lock().ok().and_then(|mut guard| guard.take());
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                log::debug!("Server already exited: {}", e);
            }
            let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
        }
        log::info!("Code-intelligence server for {} shut down", self.root.display());
    }
}

fn to_params<T: serde::Serialize>(params: T) -> Result<Value, ClientError> {
    serde_json::to_value(params).map_err(|e| ClientError::Protocol(e.to_string()))
}

fn client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        text_document: Some(TextDocumentClientCapabilities {
            definition: Some(GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(false),
            }),
            ..TextDocumentClientCapabilities::default()
        }),
        workspace: Some(WorkspaceClientCapabilities {
            execute_command: Some(DynamicRegistrationClientCapabilities {
                dynamic_registration: Some(false),
            }),
            workspace_folders: Some(true),
            ..WorkspaceClientCapabilities::default()
        }),
        ..ClientCapabilities::default()
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    state: Arc<SharedState>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(body) = outgoing.recv().await {
        if let Err(e) = write_message(&mut writer, &body).await {
            log::error!("Failed to write to code-intelligence server: {}", e);
            state.set(ClientState::Broken);
            break;
        }
    }
}

async fn read_loop<R>(
    mut reader: R,
    pending: PendingRequests,
    outgoing: mpsc::UnboundedSender<String>,
    state: Arc<SharedState>,
) where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        match read_message(&mut reader).await {
            Ok(Some(body)) => dispatch(&body, &pending, &outgoing),
            Ok(None) => {
                log::warn!("Code-intelligence server closed its output");
                break;
            }
            Err(e) => {
                log::error!("Failed to read from code-intelligence server: {}", e);
                break;
            }
        }
    }
    state.set(ClientState::Broken);
    // Dropping the senders fails every in-flight request
    pending.clear();
}

fn dispatch(body: &str, pending: &PendingRequests, outgoing: &mpsc::UnboundedSender<String>) {
    let message: Value = match serde_json::from_str(body) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("Discarding malformed message from server: {}", e);
            return;
        }
    };

    let method = message.get("method").and_then(Value::as_str);
    let id = message.get("id").filter(|id| !id.is_null());
    match (method, id) {
        (Some(method), Some(id)) => {
            answer_server_request(method, id, message.get("params"), outgoing)
        }
        (Some(method), None) => {
            handle_notification(method, message.get("params").cloned().unwrap_or(Value::Null))
        }
        (None, Some(id)) => {
            let Some(id) = id.as_i64() else {
                log::warn!("Response with non-numeric id {}", id);
                return;
            };
            let Some((_, sender)) = pending.remove(&id) else {
                log::debug!("Response for unknown or expired request {}", id);
                return;
            };
            let result = match message.get("error") {
                Some(error) => Err(ClientError::Server {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }),
                None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
            };
            let _ = sender.send(result);
        }
        (None, None) => log::warn!("Discarding message without method or id"),
    }
}

/// Answer requests the server sends us so it never blocks waiting on the client.
fn answer_server_request(
    method: &str,
    id: &Value,
    params: Option<&Value>,
    outgoing: &mpsc::UnboundedSender<String>,
) {
    log::debug!("Server request {} (id {})", method, id);
    let result = match method {
        // One (empty) configuration value per requested item
        "workspace/configuration" => {
            let items = params
                .and_then(|p| p.get("items"))
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            Value::Array(vec![Value::Null; items])
        }
        _ => Value::Null,
    };
    let reply = json!({ "jsonrpc": "2.0", "id": id, "result": result });
    let _ = outgoing.send(reply.to_string());
}

fn handle_notification(method: &str, params: Value) {
    match method {
        "textDocument/publishDiagnostics" => {
            match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                Ok(params) if params.diagnostics.is_empty() => {
                    log::debug!("[publishDiagnostics] No diagnostics for {}", params.uri);
                }
                Ok(params) => {
                    log::info!("[publishDiagnostics] Diagnostics for {}:", params.uri);
                    for diag in &params.diagnostics {
                        log::info!(
                            "- [{:?}] {} at {}:{}",
                            diag.severity,
                            diag.message,
                            diag.range.start.line,
                            diag.range.start.character
                        );
                    }
                }
                Err(e) => log::debug!("Unexpected publishDiagnostics params: {}", e),
            }
        }
        "window/logMessage" => {
            if let Ok(params) = serde_json::from_value::<LogMessageParams>(params) {
                log::info!("[logMessage] [{:?}] {}", params.typ, params.message);
            }
        }
        "window/showMessage" => {
            if let Ok(params) = serde_json::from_value::<ShowMessageParams>(params) {
                log::info!("[showMessage] [{:?}] {}", params.typ, params.message);
            }
        }
        other => log::trace!("Ignoring notification {}", other),
    }
}
