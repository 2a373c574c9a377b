//! Filesystem-event driven discovery.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use notify::event::{Event, EventKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{FileSource, WatchHandle, STOP_CHECK};
use crate::config::WatchMode;
use crate::error::Result;
use crate::fsutil;
use crate::sanitize::{find_capture_files, FileKind};

/// Collects changed capture files from OS change notifications.
///
/// A changed file is offered once no further events have arrived for the
/// settle delay and it is no longer being written. Files still in use stay
/// pending and are rechecked every `recheck` interval.
pub struct NotifySource {
    root: PathBuf,
    settle: Duration,
    recheck: Duration,
    in_use: Duration,
    handle: WatchHandle,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    _watcher: RecommendedWatcher,
    pending: BTreeSet<PathBuf>,
    started: bool,
}

impl fmt::Debug for NotifySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifySource")
            .field("root", &self.root)
            .field("settle", &self.settle)
            .field("recheck", &self.recheck)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl NotifySource {
    /// Watch `root` recursively.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot be created or `root` cannot
    /// be watched.
    pub fn new(
        root: &Path,
        settle: Duration,
        recheck: Duration,
        in_use: Duration,
        handle: WatchHandle,
    ) -> Result<Self> {
        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // The receiver is gone only when the source was dropped.
            let _ = tx.send(res);
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        debug!(root = %root.display(), "Watching for changes");

        Ok(Self {
            root: root.to_path_buf(),
            settle,
            recheck,
            in_use,
            handle,
            events,
            _watcher: watcher,
            pending: BTreeSet::new(),
            started: false,
        })
    }

    fn absorb(&mut self, res: notify::Result<Event>) {
        match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_) | EventKind::Remove(_)) {
                    return;
                }
                for path in event.paths {
                    if FileKind::of(&path).is_some() {
                        self.pending.insert(path);
                    }
                }
            }
            Err(e) => warn!(error = %e, "Watcher reported an error"),
        }
    }

    /// Move settled, existing files out of `pending`.
    fn take_ready(&mut self) -> Vec<PathBuf> {
        self.pending.retain(|p| p.exists());
        let (ready, waiting): (BTreeSet<PathBuf>, BTreeSet<PathBuf>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| !fsutil::is_in_use(p, self.in_use));
        self.pending = waiting;
        ready.into_iter().collect()
    }
}

#[async_trait]
impl FileSource for NotifySource {
    fn mode(&self) -> WatchMode {
        WatchMode::Notify
    }

    async fn next_ready(&mut self) -> Result<Option<Vec<PathBuf>>> {
        if !self.started {
            self.started = true;
            if self.handle.should_stop() {
                return Ok(None);
            }
            let sweep = find_capture_files(&self.root)
                .into_iter()
                .map(|f| f.path)
                .collect();
            return Ok(Some(sweep));
        }

        let mut last_event: Option<Instant> = None;
        let mut last_check = Instant::now();
        loop {
            if self.handle.should_stop() {
                return Ok(None);
            }

            match tokio::time::timeout(STOP_CHECK, self.events.recv()).await {
                Ok(Some(res)) => {
                    self.absorb(res);
                    last_event = Some(Instant::now());
                    continue;
                }
                Ok(None) => return Ok(None),
                Err(_) => {}
            }

            let settled = last_event.is_some_and(|t| t.elapsed() >= self.settle);
            let recheck_due = !self.pending.is_empty() && last_check.elapsed() >= self.recheck;
            if settled || recheck_due {
                last_event = None;
                last_check = Instant::now();
                let ready = self.take_ready();
                if !ready.is_empty() {
                    debug!(files = ready.len(), pending = self.pending.len(), "Files settled");
                    return Ok(Some(ready));
                }
            }
        }
    }
}
