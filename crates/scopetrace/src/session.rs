//
// session.rs
//
// Per-project analysis session: server connection, resolution cache, stats
//

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::lsp::{CodeIntelligence, ServerLauncher};
use crate::project::ProjectConfig;
use crate::source_cache::SourceCache;
use crate::types::{Definition, EntryStatus, IdentifierOccurrence, Position};

/// Identity of one identifier resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolutionKey {
    pub file: PathBuf,
    pub name: String,
    pub position: Position,
}

impl ResolutionKey {
    pub fn new(file: &Path, occurrence: &IdentifierOccurrence) -> Self {
        Self {
            file: file.to_path_buf(),
            name: occurrence.name.clone(),
            position: occurrence.position,
        }
    }
}

/// A stored resolution outcome; a `None` definition is cached too
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResolution {
    pub status: EntryStatus,
    pub definition: Option<Definition>,
}

#[derive(Debug, Default)]
struct SessionStats {
    resolutions: AtomicUsize,
    cache_hits: AtomicUsize,
    import_follows: AtomicUsize,
    server_starts: AtomicUsize,
    functions_expanded: AtomicUsize,
}

/// Counters of work done by a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub resolutions: usize,
    pub cache_hits: usize,
    pub import_follows: usize,
    pub server_starts: usize,
    pub functions_expanded: usize,
    /// Source files read from disk rather than served from memory
    pub source_reads: usize,
}

/// State shared by every expansion against one project root.
///
/// The code-intelligence server is started on first use and started again
/// when the previous connection broke.
pub struct AnalysisSession {
    project: ProjectConfig,
    config: EngineConfig,
    launcher: Arc<dyn ServerLauncher>,
    client: Mutex<Option<Arc<dyn CodeIntelligence>>>,
    resolutions: DashMap<ResolutionKey, CachedResolution>,
    sources: SourceCache,
    stats: SessionStats,
}

impl AnalysisSession {
    /// Load the project configuration of `root` and create a session for it.
    /// No server is started yet.
    pub fn open(
        root: &Path,
        config: EngineConfig,
        launcher: Arc<dyn ServerLauncher>,
    ) -> Result<Arc<Self>, EngineError> {
        let project = ProjectConfig::load(root)?;
        log::info!("Opened analysis session for {}", project.root.display());
        Ok(Arc::new(Self {
            project,
            config,
            launcher,
            client: Mutex::new(None),
            resolutions: DashMap::new(),
            sources: SourceCache::new(),
            stats: SessionStats::default(),
        }))
    }

    pub fn root(&self) -> &Path {
        &self.project.root
    }

    pub fn project(&self) -> &ProjectConfig {
        &self.project
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sources(&self) -> &SourceCache {
        &self.sources
    }

    /// The live server connection, starting one if needed
    pub async fn client(&self) -> Result<Arc<dyn CodeIntelligence>, EngineError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            if client.is_alive() {
                return Ok(Arc::clone(client));
            }
            log::warn!(
                "Code-intelligence server for {} is gone, restarting",
                self.project.root.display()
            );
            client.shutdown().await;
        }

        let client = self.launcher.launch(&self.project.root, &self.config).await?;
        self.stats.server_starts.fetch_add(1, Ordering::Relaxed);
        *guard = Some(Arc::clone(&client));
        Ok(client)
    }

    pub fn cached(&self, key: &ResolutionKey) -> Option<CachedResolution> {
        let hit = self.resolutions.get(key).map(|entry| entry.value().clone());
        if hit.is_some() {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Last writer wins when two tasks resolve the same key
    pub fn store(&self, key: ResolutionKey, resolution: CachedResolution) {
        self.resolutions.insert(key, resolution);
    }

    pub fn cached_resolutions(&self) -> usize {
        self.resolutions.len()
    }

    pub(crate) fn record_resolution(&self) {
        self.stats.resolutions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_import_follow(&self) {
        self.stats.import_follows.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_function_expanded(&self) {
        self.stats.functions_expanded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            resolutions: self.stats.resolutions.load(Ordering::Relaxed),
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            import_follows: self.stats.import_follows.load(Ordering::Relaxed),
            server_starts: self.stats.server_starts.load(Ordering::Relaxed),
            functions_expanded: self.stats.functions_expanded.load(Ordering::Relaxed),
            source_reads: self.sources.disk_reads(),
        }
    }

    /// Stop the server, if one is running. The session can still be used
    /// afterwards and starts a new server on demand.
    pub async fn shutdown(&self) {
        let client = self.client.lock().await.take();
        if let Some(client) = client {
            client.shutdown().await;
        }
        log::debug!(
            "Session for {} closed: {:?}",
            self.project.root.display(),
            self.stats()
        );
    }
}

/// Sessions keyed by canonical project root
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<PathBuf, Arc<AnalysisSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session for `root`, creating it on first request
    pub fn session_for(
        &self,
        root: &Path,
        config: &EngineConfig,
        launcher: Arc<dyn ServerLauncher>,
    ) -> Result<Arc<AnalysisSession>, EngineError> {
        let key = std::fs::canonicalize(root).map_err(|e| EngineError::Io {
            path: root.to_path_buf(),
            source: e,
        })?;
        if let Some(existing) = self.sessions.get(&key) {
            return Ok(Arc::clone(existing.value()));
        }

        let session = AnalysisSession::open(&key, config.clone(), launcher)?;
        let entry = self.sessions.entry(key).or_insert(session);
        Ok(Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub async fn shutdown_all(&self) {
        let sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.sessions.clear();
        for session in sessions {
            session.shutdown().await;
        }
    }
}
