// perf.rs - Timing instrumentation for scopetrace
//
// Controlled via the SCOPETRACE_PERF environment variable.
//
// Usage:
//   SCOPETRACE_PERF=1 scopetrace --root .         # Log stage timings and expansion summaries
//   SCOPETRACE_PERF=verbose scopetrace --root .   # Also warn on stages over their threshold

use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::session::StatsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfMode {
    Off,
    Basic,
    Verbose,
}

impl PerfMode {
    /// Parse a `SCOPETRACE_PERF` value
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            None => PerfMode::Off,
            Some(v) if v.is_empty() || v == "0" || v == "false" => PerfMode::Off,
            Some(v) if v == "verbose" => PerfMode::Verbose,
            Some(_) => PerfMode::Basic,
        }
    }
}

static PERF_MODE: OnceLock<PerfMode> = OnceLock::new();

pub fn mode() -> PerfMode {
    *PERF_MODE.get_or_init(|| {
        PerfMode::from_env_value(std::env::var("SCOPETRACE_PERF").ok().as_deref())
    })
}

pub fn is_enabled() -> bool {
    mode() != PerfMode::Off
}

/// RAII timing guard for one engine stage, logged on drop
///
/// ```
/// use scopetrace::perf::TimingGuard;
///
/// let _guard = TimingGuard::new("search_for_function").warn_after(2_000);
/// // ... do work ...
/// ```
pub struct TimingGuard {
    start: Instant,
    stage: &'static str,
    detail: Option<String>,
    warn_after_ms: Option<u64>,
    mode: PerfMode,
}

impl TimingGuard {
    pub fn new(stage: &'static str) -> Self {
        Self {
            start: Instant::now(),
            stage,
            detail: None,
            warn_after_ms: None,
            mode: mode(),
        }
    }

    /// Warn in verbose mode when the stage takes longer than `threshold_ms`
    pub fn warn_after(mut self, threshold_ms: u64) -> Self {
        self.warn_after_ms = Some(threshold_ms);
        self
    }

    /// Attach context such as the file being processed. Only formatted when
    /// timing is enabled.
    pub fn detail(mut self, detail: impl FnOnce() -> String) -> Self {
        if self.mode != PerfMode::Off {
            self.detail = Some(detail());
        }
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if self.mode == PerfMode::Off {
            return;
        }

        let elapsed = self.start.elapsed();
        match &self.detail {
            Some(detail) => log::info!("[PERF] {} ({}) took {:?}", self.stage, detail, elapsed),
            None => log::info!("[PERF] {} took {:?}", self.stage, elapsed),
        }

        if let Some(threshold) = self.warn_after_ms {
            if self.mode == PerfMode::Verbose && elapsed.as_millis() > u128::from(threshold) {
                log::warn!(
                    "[PERF] {} exceeded threshold ({}ms > {}ms)",
                    self.stage,
                    elapsed.as_millis(),
                    threshold
                );
            }
        }
    }
}

/// Log how much work one expansion did, as the difference between session
/// counters taken before and after it.
pub fn log_expansion_summary(
    file: &Path,
    entries: usize,
    before: &StatsSnapshot,
    after: &StatsSnapshot,
    elapsed: Duration,
) {
    if !is_enabled() {
        return;
    }
    log::info!(
        "[PERF] expanded {} in {:?}: {} entries, {} resolutions, {} cache hits, {} import follows, {} file reads",
        file.display(),
        elapsed,
        entries,
        after.resolutions.saturating_sub(before.resolutions),
        after.cache_hits.saturating_sub(before.cache_hits),
        after.import_follows.saturating_sub(before.import_follows),
        after.source_reads.saturating_sub(before.source_reads),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!(PerfMode::from_env_value(None), PerfMode::Off);
        assert_eq!(PerfMode::from_env_value(Some("")), PerfMode::Off);
        assert_eq!(PerfMode::from_env_value(Some("0")), PerfMode::Off);
        assert_eq!(PerfMode::from_env_value(Some("FALSE")), PerfMode::Off);
        assert_eq!(PerfMode::from_env_value(Some("1")), PerfMode::Basic);
        assert_eq!(PerfMode::from_env_value(Some("Verbose")), PerfMode::Verbose);
    }

    #[test]
    fn test_guard_measures_elapsed_time() {
        let guard = TimingGuard::new("test_stage").warn_after(1_000);
        std::thread::sleep(Duration::from_millis(5));
        assert!(guard.elapsed() >= Duration::from_millis(5));
    }
}
