//! Watcher-backed event source

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, info};

use synco_core::FileEvent;

use super::watcher::{forward, map_event};
use crate::EventSource;

/// Watches a local directory tree and emits absolute-path events.
///
/// Every directory under the root is watched, including directories created
/// after startup. Dropping the watcher (on `stop`) closes the sender side of
/// the stream; buffered events remain readable until drained.
pub struct LocalSource {
    root: PathBuf,
    buffer: usize,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl LocalSource {
    /// # Errors
    /// Returns an error if the root does not exist
    pub fn new(root: impl Into<PathBuf>, buffer: usize) -> Result<Self> {
        let root = std::path::absolute(root.into()).wrap_err("failed to resolve path")?;
        if !root.exists() {
            return Err(eyre!("source directory not found: {}", root.display()));
        }

        Ok(Self {
            root,
            buffer,
            watcher: Mutex::new(None),
        })
    }
}

#[async_trait]
impl EventSource for LocalSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<FileEvent>> {
        let (tx, rx) = mpsc::channel(self.buffer);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<_>| match res {
            Ok(event) => {
                for file_event in map_event(event) {
                    forward(&tx, file_event);
                }
            }
            Err(err) => error!(%err, "watcher error"),
        })
        .wrap_err("failed to create watcher")?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .wrap_err_with(|| format!("failed to watch {}", self.root.display()))?;

        info!(dir = %self.root.display(), "watcher started");
        *self.watcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(watcher);

        Ok(rx)
    }

    fn stop(&self) {
        if self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
        {
            info!(dir = %self.root.display(), "watcher stopping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use synco_core::EventKind;
    use tempfile::TempDir;

    async fn next_event_for(
        rx: &mut mpsc::Receiver<FileEvent>,
        path: &std::path::Path,
    ) -> Option<FileEvent> {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .ok()??;
            if event.path == path {
                return Some(event);
            }
        }
    }

    #[tokio::test]
    async fn test_missing_root_rejected() {
        assert!(LocalSource::new("/no/such/dir/anywhere", 8).is_err());
    }

    #[tokio::test]
    async fn test_emits_events_for_new_files() {
        let dir = TempDir::new().unwrap();
        let mut source = LocalSource::new(dir.path(), 64).unwrap();
        let mut rx = source.start().await.unwrap();

        let file = dir.path().canonicalize().unwrap().join("hello.txt");
        tokio::fs::write(&file, "hi").await.unwrap();

        let event = next_event_for(&mut rx, &file).await.expect("event observed");
        assert!(matches!(event.kind, EventKind::Create | EventKind::Write));

        source.stop();
    }

    #[tokio::test]
    async fn test_watches_directories_created_after_start() {
        let dir = TempDir::new().unwrap();
        let mut source = LocalSource::new(dir.path(), 64).unwrap();
        let mut rx = source.start().await.unwrap();

        let root = dir.path().canonicalize().unwrap();
        let sub = root.join("sub");
        tokio::fs::create_dir(&sub).await.unwrap();
        // Give the watcher a beat to register the new directory.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let nested = sub.join("inside.txt");
        tokio::fs::write(&nested, "deep").await.unwrap();

        let event = next_event_for(&mut rx, &nested)
            .await
            .expect("event from new directory observed");
        assert!(matches!(event.kind, EventKind::Create | EventKind::Write));

        source.stop();
    }

    #[tokio::test]
    async fn test_stop_closes_stream() {
        let dir = TempDir::new().unwrap();
        let mut source = LocalSource::new(dir.path(), 8).unwrap();
        let mut rx = source.start().await.unwrap();

        source.stop();
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "stream closes after stop");
    }
}
