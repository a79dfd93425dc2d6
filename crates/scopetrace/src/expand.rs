//
// expand.rs
//
// Locate a function, then resolve every free identifier it references
//

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::classify::classify;
use crate::config::{EngineConfig, DEPENDENCY_DIRECTORIES};
use crate::definition::{definition_at, function_in_range, DefinitionSite};
use crate::error::EngineError;
use crate::imports::resolve::{is_in_dependency_directory, package_name_from_path};
use crate::imports::{context_for_import, FollowOutcome, ResolutionPath};
use crate::lsp::{DefinitionLocation, StdioLauncher};
use crate::parser_pool::parse_source;
use crate::perf::{self, TimingGuard};
use crate::scope::analyze_out_of_scope_identifiers;
use crate::search::search_with_cache;
use crate::session::{AnalysisSession, CachedResolution, ResolutionKey};
use crate::types::{
    Definition, DefinitionKind, EntryStatus, ExpandedContextEntry, ExpandedFunction,
    IdentifierOccurrence, THIRD_PARTY_PLACEHOLDER,
};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Find the function whose text matches `text` under `search_dir` and
/// resolve its free identifiers.
///
/// A relative `search_dir` is taken relative to the session root. Returns
/// `Ok(None)` when no function matches; identifiers that cannot be resolved
/// become unresolved entries rather than errors.
pub async fn expand_function(
    session: &Arc<AnalysisSession>,
    search_dir: &Path,
    text: &str,
) -> Result<Option<ExpandedFunction>, EngineError> {
    let guard = TimingGuard::new("expand_function").warn_after(5_000);
    let before = session.stats();

    let search_root = if search_dir.is_absolute() {
        search_dir.to_path_buf()
    } else {
        session.root().join(search_dir)
    };
    let search_root = std::fs::canonicalize(&search_root).map_err(|e| {
        EngineError::configuration(&search_root, format!("search directory is not accessible: {e}"))
    })?;

    let found = {
        let _search = TimingGuard::new("search_for_function")
            .detail(|| search_root.display().to_string());
        search_with_cache(&search_root, text, session.config(), session.sources())
    };
    let Some(found) = found else {
        log::info!("No function matching the given text under {}", search_root.display());
        return Ok(None);
    };

    session.record_function_expanded();
    log::info!(
        "Expanding function at {}:{}:{} ({} free identifiers)",
        found.location.file.display(),
        found.location.start_line,
        found.location.start_column,
        found.identifiers.len()
    );

    let limit = Arc::new(Semaphore::new(session.config().max_concurrent_resolutions.max(1)));
    let path = ResolutionPath::start(&found.location.file);
    let context = resolve_identifiers(
        Arc::clone(session),
        found.location.file.clone(),
        found.identifiers,
        path,
        limit,
    )
    .await;

    perf::log_expansion_summary(
        &found.location.file,
        context.len(),
        &before,
        &session.stats(),
        guard.elapsed(),
    );

    Ok(Some(ExpandedFunction {
        location: found.location,
        context,
    }))
}

/// Open a session on `project_root` with the stdio server, expand one
/// function, and shut the server down again.
pub async fn expand_function_in(
    project_root: &Path,
    search_dir: &Path,
    text: &str,
    config: EngineConfig,
) -> Result<Option<ExpandedFunction>, EngineError> {
    let session = AnalysisSession::open(project_root, config, Arc::new(StdioLauncher))?;
    let result = expand_function(&session, search_dir, text).await;
    session.shutdown().await;
    result
}

/// Resolve `identifiers` of a function in `file` concurrently, keeping
/// their order.
fn resolve_identifiers(
    session: Arc<AnalysisSession>,
    file: PathBuf,
    identifiers: Vec<IdentifierOccurrence>,
    path: ResolutionPath,
    limit: Arc<Semaphore>,
) -> BoxFuture<Vec<ExpandedContextEntry>> {
    Box::pin(async move {
        let mut tasks = JoinSet::new();
        for (index, occurrence) in identifiers.iter().cloned().enumerate() {
            let session = Arc::clone(&session);
            let file = file.clone();
            let path = path.clone();
            let limit = Arc::clone(&limit);
            tasks.spawn(async move {
                let entry = resolve_entry(session, file, occurrence, path, limit).await;
                (index, entry)
            });
        }

        let mut slots: Vec<Option<ExpandedContextEntry>> = vec![None; identifiers.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, entry)) => slots[index] = Some(entry),
                Err(e) => log::error!("Identifier resolution task failed: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(identifiers.iter())
            .map(|(slot, occurrence)| {
                slot.unwrap_or_else(|| ExpandedContextEntry::unresolved(occurrence))
            })
            .collect()
    })
}

async fn resolve_entry(
    session: Arc<AnalysisSession>,
    file: PathBuf,
    occurrence: IdentifierOccurrence,
    path: ResolutionPath,
    limit: Arc<Semaphore>,
) -> ExpandedContextEntry {
    let resolution = {
        // Released before nested expansion, which needs permits of its own
        let _permit = limit.acquire().await.ok();
        resolve_occurrence(&session, &file, &occurrence, &path).await
    };

    let mut entry = ExpandedContextEntry {
        name: occurrence.name,
        position: occurrence.position,
        definition: resolution.definition,
        status: resolution.status,
        context: Vec::new(),
    };

    if let Some(nested) = nested_target(&session, &entry, &path) {
        log::debug!(
            "Expanding '{}' in {} at depth {}",
            entry.name,
            nested.file.display(),
            nested.path.depth()
        );
        entry.context =
            resolve_identifiers(session, nested.file, nested.identifiers, nested.path, limit).await;
    }
    entry
}

/// A resolution, and whether it may be cached for the session
enum Outcome {
    Settled(CachedResolution),
    /// Depends on the server connection or the resolution path
    Transient(CachedResolution),
}

fn settled(status: EntryStatus, definition: Option<Definition>) -> Outcome {
    Outcome::Settled(CachedResolution { status, definition })
}

fn unresolved() -> CachedResolution {
    CachedResolution {
        status: EntryStatus::Unresolved,
        definition: None,
    }
}

async fn resolve_occurrence(
    session: &AnalysisSession,
    file: &Path,
    occurrence: &IdentifierOccurrence,
    path: &ResolutionPath,
) -> CachedResolution {
    let key = ResolutionKey::new(file, occurrence);
    if let Some(cached) = session.cached(&key) {
        log::trace!("Cached resolution for '{}' in {}", occurrence.name, file.display());
        return cached;
    }

    session.record_resolution();
    match lookup(session, file, occurrence, path).await {
        Outcome::Settled(resolution) => {
            session.store(key, resolution.clone());
            resolution
        }
        Outcome::Transient(resolution) => resolution,
    }
}

async fn lookup(
    session: &AnalysisSession,
    file: &Path,
    occurrence: &IdentifierOccurrence,
    path: &ResolutionPath,
) -> Outcome {
    let client = match session.client().await {
        Ok(client) => client,
        Err(e) => {
            log::warn!("No code-intelligence server for '{}': {}", occurrence.name, e);
            return Outcome::Transient(unresolved());
        }
    };

    let classification = match classify(client.as_ref(), occurrence, file).await {
        Ok(classification) => classification,
        Err(e) => {
            log::warn!(
                "Lookup for '{}' in {} failed: {}",
                occurrence.name,
                file.display(),
                e
            );
            return Outcome::Transient(unresolved());
        }
    };
    if classification.is_global() {
        return settled(EntryStatus::Global, None);
    }
    let Some(location) = classification.preferred_location() else {
        log::warn!("No definition found for '{}' in {}", occurrence.name, file.display());
        return Outcome::Settled(unresolved());
    };

    if is_in_dependency_directory(&location.path, DEPENDENCY_DIRECTORIES) {
        return settled(EntryStatus::Resolved, Some(dependency_definition(location)));
    }

    let content = match session.sources().read(&location.path) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("Cannot read definition file {}: {}", location.path.display(), e);
            return Outcome::Settled(unresolved());
        }
    };

    match definition_at(&location.path, &content, location.start(), &occurrence.name) {
        Some(DefinitionSite::Declaration(definition)) => {
            settled(EntryStatus::Resolved, Some(definition))
        }
        Some(DefinitionSite::Import(binding)) => {
            match context_for_import(session, &location.path, &binding, occurrence, path) {
                FollowOutcome::Found(definition) => settled(EntryStatus::Resolved, Some(definition)),
                FollowOutcome::NotFound => Outcome::Settled(unresolved()),
                FollowOutcome::CycleCut => Outcome::Transient(unresolved()),
            }
        }
        None => {
            log::warn!(
                "No declaration at {}:{}:{} for '{}'",
                location.path.display(),
                location.range.start.line,
                location.range.start.column,
                occurrence.name
            );
            Outcome::Settled(unresolved())
        }
    }
}

fn dependency_definition(location: &DefinitionLocation) -> Definition {
    Definition {
        kind: DefinitionKind::Unknown,
        text: THIRD_PARTY_PLACEHOLDER.to_string(),
        source_file: Some(location.path.clone()),
        range: Some(location.range),
        package: package_name_from_path(&location.path, DEPENDENCY_DIRECTORIES),
    }
}

struct NestedTarget {
    file: PathBuf,
    identifiers: Vec<IdentifierOccurrence>,
    path: ResolutionPath,
}

/// Free identifiers of a resolved function definition, when the entry
/// should be expanded one level further.
fn nested_target(
    session: &AnalysisSession,
    entry: &ExpandedContextEntry,
    path: &ResolutionPath,
) -> Option<NestedTarget> {
    if entry.status != EntryStatus::Resolved || path.depth() >= session.config().max_expansion_depth
    {
        return None;
    }
    let definition = entry.definition.as_ref()?;
    if definition.kind != DefinitionKind::Function {
        return None;
    }
    let file = definition.source_file.as_ref()?;
    let range = definition.range?;
    if path.has_definition(file, range.start) {
        return None;
    }

    let content = session.sources().read(file).ok()?;
    let tree = parse_source(file, &content)?;
    let node = function_in_range(&tree, &content, range)?;
    let identifiers = analyze_out_of_scope_identifiers(node, &content);
    if identifiers.is_empty() {
        return None;
    }

    Some(NestedTarget {
        file: file.clone(),
        identifiers,
        path: path.enter(file, range.start),
    })
}
