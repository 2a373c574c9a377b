//! Watch mode: clean capture files as they settle.
//!
//! A [`FileSource`] yields batches of candidate files, either by polling the
//! capture directory or from filesystem events. The [`Daemon`] runs the same
//! scan, back up, remove sequence on each batch that the one-shot commands
//! use, reloading the dynamic rules every cycle.

mod events;
mod poll;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backup::BackupManager;
use crate::config::{Config, WatchMode};
use crate::error::Result;
use crate::fsutil;
use crate::rules::{PhyMatchers, RuleStore};
use crate::sanitize::{process_file, FileKind, Mode};

pub use events::NotifySource;
pub use poll::PollSource;

/// Granularity at which waits notice a stop request.
const STOP_CHECK: Duration = Duration::from_millis(200);

/// A source of files that may need cleaning.
#[async_trait]
pub trait FileSource: Send {
    /// Which discovery mechanism this is.
    fn mode(&self) -> WatchMode;

    /// Wait for the next batch of candidate files.
    ///
    /// Returns `None` once the source has been stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying watcher fails.
    async fn next_ready(&mut self) -> Result<Option<Vec<PathBuf>>>;
}

/// A cloneable stop switch shared by the daemon and its source.
#[derive(Debug, Clone, Default)]
pub struct WatchHandle {
    stop_signal: Arc<AtomicBool>,
}

impl WatchHandle {
    /// Create a handle that has not been stopped.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the watch loop to stop.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Check if a stop was requested.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Clear a previous stop request.
    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }

    /// Sleep for `duration` or until stopped. Returns false if stopped.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.should_stop() {
                return false;
            }
            let step = remaining.min(STOP_CHECK);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
        !self.should_stop()
    }
}

/// Build the configured source for `root`.
///
/// # Errors
///
/// Returns an error if a filesystem watcher cannot be installed.
pub fn source_for(config: &Config, root: &Path, handle: WatchHandle) -> Result<Box<dyn FileSource>> {
    Ok(match config.watch.mode {
        WatchMode::Poll => Box::new(PollSource::new(root, config.watch_interval(), handle)),
        WatchMode::Notify => Box::new(NotifySource::new(
            root,
            config.settle_delay(),
            config.watch_interval(),
            config.in_use_threshold(),
            handle,
        )?),
    })
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Candidates offered by the source.
    pub candidates: usize,
    /// Files skipped because they have not changed since last processed.
    pub unchanged: usize,
    /// Files skipped because they are still being written.
    pub in_use: usize,
    /// Files that had matches and were cleaned (or would be, dry run).
    pub cleaned: usize,
    /// Records removed (or that would be, dry run).
    pub records_removed: usize,
    /// Files whose pass or backup failed.
    pub failed: usize,
}

/// Totals over the daemon's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DaemonStats {
    /// Cycles run.
    pub cycles: usize,
    /// Files cleaned.
    pub files_cleaned: usize,
    /// Records removed.
    pub records_removed: usize,
    /// Failures.
    pub failures: usize,
}

/// The watch loop.
#[derive(Debug)]
pub struct Daemon {
    store: RuleStore,
    backups: Option<BackupManager>,
    in_use: Duration,
    dry_run: bool,
    handle: WatchHandle,
    processed: HashMap<PathBuf, SystemTime>,
}

impl Daemon {
    /// A daemon that reads dynamic rules from `store` and, when `backups`
    /// is set, backs up each file before cleaning it.
    #[must_use]
    pub fn new(
        store: RuleStore,
        backups: Option<BackupManager>,
        in_use: Duration,
        handle: WatchHandle,
    ) -> Self {
        Self {
            store,
            backups,
            in_use,
            dry_run: false,
            handle,
            processed: HashMap::new(),
        }
    }

    /// Report matches without removing them.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// The stop switch.
    #[must_use]
    pub fn handle(&self) -> WatchHandle {
        self.handle.clone()
    }

    /// Run until the source is exhausted or the handle is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails.
    pub async fn run(&mut self, source: &mut dyn FileSource) -> Result<DaemonStats> {
        info!(mode = ?source.mode(), dry_run = self.dry_run, "Watch loop started");
        let mut stats = DaemonStats::default();

        while !self.handle.should_stop() {
            let Some(batch) = source.next_ready().await? else {
                break;
            };
            let cycle = self.run_cycle(&batch);
            stats.cycles += 1;
            stats.files_cleaned += cycle.cleaned;
            stats.records_removed += cycle.records_removed;
            stats.failures += cycle.failed;
        }

        info!(
            cycles = stats.cycles,
            files = stats.files_cleaned,
            removed = stats.records_removed,
            "Watch loop stopped"
        );
        Ok(stats)
    }

    /// Process one batch of candidates with freshly loaded rules.
    pub fn run_cycle(&mut self, candidates: &[PathBuf]) -> CycleReport {
        self.processed.retain(|path, _| path.exists());
        let mut report = CycleReport {
            candidates: candidates.len(),
            ..CycleReport::default()
        };
        if candidates.is_empty() {
            return report;
        }

        let matchers = match self.store.load_dynamic() {
            Ok(rules) => PhyMatchers::new(&rules),
            Err(e) => {
                warn!(error = %e, "Could not load rules; skipping cycle");
                report.failed = candidates.len();
                return report;
            }
        };

        for path in candidates {
            let Some(kind) = FileKind::of(path) else {
                continue;
            };
            let mtime = fsutil::modified(path);
            if mtime.is_some() && self.processed.get(path) == mtime.as_ref() {
                report.unchanged += 1;
                continue;
            }
            if fsutil::is_in_use(path, self.in_use) {
                debug!(path = %path.display(), "Still being written");
                report.in_use += 1;
                continue;
            }
            self.clean_file(path, kind, &matchers, &mut report);
        }

        if report.cleaned > 0 || report.failed > 0 {
            info!(
                cleaned = report.cleaned,
                removed = report.records_removed,
                failed = report.failed,
                "Cycle finished"
            );
        }
        report
    }

    fn clean_file(&mut self, path: &Path, kind: FileKind, matchers: &PhyMatchers, report: &mut CycleReport) {
        let scan = process_file(path, kind, matchers, Mode::Scan);
        if !scan.success {
            report.failed += 1;
            return;
        }
        if scan.removed_count == 0 || self.dry_run {
            if scan.removed_count > 0 {
                info!(path = %path.display(), matches = scan.removed_count, "Would remove (dry run)");
                report.cleaned += 1;
                report.records_removed += scan.removed_count;
            }
            self.remember(path);
            return;
        }

        if let Some(backups) = &self.backups {
            if let Err(e) = backups.create_backup(&[path.to_path_buf()]) {
                warn!(path = %path.display(), error = %e, "Backup failed; leaving file untouched");
                report.failed += 1;
                return;
            }
        }

        let result = process_file(path, kind, matchers, Mode::Apply);
        if result.success {
            report.cleaned += 1;
            report.records_removed += result.removed_count;
            self.remember(path);
        } else {
            report.failed += 1;
        }
    }

    fn remember(&mut self, path: &Path) {
        if let Some(mtime) = fsutil::modified(path) {
            self.processed.insert(path.to_path_buf(), mtime);
        }
    }
}
