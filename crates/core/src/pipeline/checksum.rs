//! Content-hash de-duplication

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::debug;

use crate::event::{EventKind, FileEvent};
use crate::protocol::file_checksum;

/// Drops Write/Create events whose file content has not changed since the
/// last observation.
///
/// Remove/Rename events evict the cache entry and pass through unchanged. A
/// file that cannot be read (typically a race with deletion) is dropped
/// silently; the removal event carries the user's intent.
#[derive(Debug, Default)]
pub struct ChecksumFilter {
    cache: HashMap<PathBuf, [u8; 32]>,
}

impl ChecksumFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the filter task over `input`
    pub fn run(
        mut self,
        mut input: mpsc::Receiver<FileEvent>,
        buffer: usize,
    ) -> mpsc::Receiver<FileEvent> {
        let (tx, rx) = mpsc::channel(buffer);

        tokio::spawn(async move {
            while let Some(event) = input.recv().await {
                if matches!(event.kind, EventKind::Remove | EventKind::Rename) {
                    self.cache.remove(&event.path);
                    if tx.send(event).await.is_err() {
                        return;
                    }
                    continue;
                }

                let sum = match file_checksum(&event.path).await {
                    Ok(sum) => sum,
                    Err(err) => {
                        debug!(path = %event.path.display(), %err, "checksum failed, skipping");
                        continue;
                    }
                };

                let changed = self.cache.get(&event.path) != Some(&sum);
                if changed {
                    self.cache.insert(event.path.clone(), sum);
                    if tx.send(event).await.is_err() {
                        return;
                    }
                } else {
                    debug!(path = %event.path.display(), "checksum unchanged, skipping");
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn send(tx: &mpsc::Sender<FileEvent>, kind: EventKind, path: &std::path::Path) {
        tx.send(FileEvent::new(kind, path)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unchanged_writes_collapse_to_one() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("same.txt");
        tokio::fs::write(&file, "constant").await.unwrap();

        let (tx, rx) = mpsc::channel(16);
        let mut out = ChecksumFilter::new().run(rx, 16);

        for _ in 0..5 {
            send(&tx, EventKind::Write, &file).await;
        }
        drop(tx);

        assert!(out.recv().await.is_some());
        assert!(out.recv().await.is_none(), "duplicates must be dropped");
    }

    #[tokio::test]
    async fn test_changed_content_forwards_again() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("grow.txt");
        tokio::fs::write(&file, "v1").await.unwrap();

        let (tx, rx) = mpsc::channel(16);
        let mut out = ChecksumFilter::new().run(rx, 16);

        send(&tx, EventKind::Write, &file).await;
        assert!(out.recv().await.is_some());

        tokio::fs::write(&file, "v2").await.unwrap();
        send(&tx, EventKind::Write, &file).await;
        assert!(out.recv().await.is_some());
        drop(tx);
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_remove_evicts_and_forwards() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("gone.txt");
        tokio::fs::write(&file, "x").await.unwrap();

        let (tx, rx) = mpsc::channel(16);
        let mut out = ChecksumFilter::new().run(rx, 16);

        send(&tx, EventKind::Write, &file).await;
        assert_eq!(out.recv().await.unwrap().kind, EventKind::Write);

        tokio::fs::remove_file(&file).await.unwrap();
        send(&tx, EventKind::Remove, &file).await;
        assert_eq!(out.recv().await.unwrap().kind, EventKind::Remove);

        // Recreated with identical content: the eviction means it forwards.
        tokio::fs::write(&file, "x").await.unwrap();
        send(&tx, EventKind::Create, &file).await;
        assert_eq!(out.recv().await.unwrap().kind, EventKind::Create);
        drop(tx);
    }

    #[tokio::test]
    async fn test_unreadable_file_dropped() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("never-existed.txt");

        let (tx, rx) = mpsc::channel(16);
        let mut out = ChecksumFilter::new().run(rx, 16);

        send(&tx, EventKind::Write, &missing).await;
        drop(tx);
        assert!(out.recv().await.is_none());
    }
}
