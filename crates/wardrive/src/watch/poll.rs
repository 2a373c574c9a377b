//! Interval polling of the capture directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use super::{FileSource, WatchHandle};
use crate::config::WatchMode;
use crate::error::Result;
use crate::sanitize::find_capture_files;

/// Rescans the whole tree every `interval`. The first scan is immediate.
#[derive(Debug)]
pub struct PollSource {
    root: PathBuf,
    interval: Duration,
    handle: WatchHandle,
    started: bool,
}

impl PollSource {
    /// Poll `root` every `interval` until `handle` is stopped.
    pub fn new(root: &Path, interval: Duration, handle: WatchHandle) -> Self {
        Self {
            root: root.to_path_buf(),
            interval,
            handle,
            started: false,
        }
    }
}

#[async_trait]
impl FileSource for PollSource {
    fn mode(&self) -> WatchMode {
        WatchMode::Poll
    }

    async fn next_ready(&mut self) -> Result<Option<Vec<PathBuf>>> {
        if self.started {
            if !self.handle.sleep(self.interval).await {
                return Ok(None);
            }
        } else {
            self.started = true;
            if self.handle.should_stop() {
                return Ok(None);
            }
        }

        let files: Vec<PathBuf> = find_capture_files(&self.root)
            .into_iter()
            .map(|f| f.path)
            .collect();
        trace!(root = %self.root.display(), files = files.len(), "Poll");
        Ok(Some(files))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[tokio::test]
    async fn test_first_poll_is_immediate() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.kismet"), b"x").unwrap();
        fs::write(dir.path().join("b.txt"), b"x").unwrap();
        let mut source = PollSource::new(dir.path(), Duration::from_secs(3600), WatchHandle::new());

        let started = std::time::Instant::now();
        let batch = source.next_ready().await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(batch, vec![dir.path().join("a.kismet")]);
    }

    #[tokio::test]
    async fn test_later_polls_wait_for_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = PollSource::new(dir.path(), Duration::from_millis(50), WatchHandle::new());
        source.next_ready().await.unwrap();

        fs::write(dir.path().join("new.wiglecsv"), b"x").unwrap();
        let batch = source.next_ready().await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_stopped_source_ends() {
        let dir = tempfile::tempdir().unwrap();
        let handle = WatchHandle::new();
        let mut source = PollSource::new(dir.path(), Duration::from_secs(3600), handle.clone());
        source.next_ready().await.unwrap();

        handle.stop();
        assert!(source.next_ready().await.unwrap().is_none());
    }
}
