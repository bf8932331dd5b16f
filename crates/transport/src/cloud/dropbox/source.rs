//! Long-poll source for Dropbox

use std::path::PathBuf;

use async_trait::async_trait;
use color_eyre::Result;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use synco_core::{EventKind, FileEvent};

use super::client::{DropboxClient, DropboxEntry};
use super::normalize_path;
use crate::cloud::{load_cursor, save_cursor, CLOUD_BUFFER, POLL_RETRY_DELAY};
use crate::EventSource;

/// Watches a Dropbox folder via `list_folder/longpoll`.
///
/// The cursor is persisted per job so a restart resumes where it left off.
/// File changes map to `Write`, deletions to `Remove`; folder-only entries
/// and paths outside the watched root are discarded. Poll errors back off
/// and never terminate the source.
pub struct DropboxSource {
    client: DropboxClient,
    folder_path: String,
    cursor_path: PathBuf,
    stop: watch::Sender<bool>,
}

impl DropboxSource {
    #[must_use]
    pub fn new(
        client: DropboxClient,
        folder_path: &str,
        state_dir: &std::path::Path,
        job_id: i64,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            client,
            folder_path: normalize_path(folder_path),
            cursor_path: state_dir.join(format!("dropbox_cursor_{job_id}")),
            stop,
        }
    }
}

#[async_trait]
impl EventSource for DropboxSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<FileEvent>> {
        let cursor = match load_cursor(&self.cursor_path).await {
            Some(cursor) => {
                info!(folder = %self.folder_path, "dropbox longpoll resumed");
                cursor
            }
            None => {
                let cursor = self.client.get_latest_cursor(&self.folder_path).await?;
                save_cursor(&self.cursor_path, &cursor).await?;
                info!(folder = %self.folder_path, "dropbox longpoll started (new)");
                cursor
            }
        };

        let (tx, rx) = mpsc::channel(CLOUD_BUFFER);
        let mut poller = Poller {
            client: self.client.clone(),
            folder_path: self.folder_path.clone(),
            cursor_path: self.cursor_path.clone(),
            cursor,
            tx,
        };
        let mut stop_rx = self.stop.subscribe();

        tokio::spawn(async move {
            loop {
                let result = tokio::select! {
                    _ = stop_rx.changed() => return,
                    result = poller.client.longpoll(&poller.cursor) => result,
                };

                let poll = match result {
                    Ok(poll) => poll,
                    Err(err) => {
                        warn!(%err, "dropbox longpoll error");
                        tokio::select! {
                            _ = stop_rx.changed() => return,
                            () = tokio::time::sleep(POLL_RETRY_DELAY) => continue,
                        }
                    }
                };

                if let Some(backoff) = poll.backoff {
                    tokio::select! {
                        _ = stop_rx.changed() => return,
                        () = tokio::time::sleep(std::time::Duration::from_secs(backoff)) => {}
                    }
                }

                if !poll.changes {
                    continue;
                }

                if let Err(err) = poller.fetch_changes().await {
                    warn!(%err, "dropbox fetch changes error");
                }
            }
        });

        Ok(rx)
    }

    fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

struct Poller {
    client: DropboxClient,
    folder_path: String,
    cursor_path: PathBuf,
    cursor: String,
    tx: mpsc::Sender<FileEvent>,
}

impl Poller {
    async fn fetch_changes(&mut self) -> Result<()> {
        loop {
            let page = self.client.list_folder_continue(&self.cursor).await?;

            for entry in page.entries {
                self.handle_entry(entry).await;
            }

            self.cursor = page.cursor;
            let _ = save_cursor(&self.cursor_path, &self.cursor).await;

            if !page.has_more {
                return Ok(());
            }
        }
    }

    async fn handle_entry(&self, entry: DropboxEntry) {
        let (kind, path_display) = match entry {
            DropboxEntry::File { path_display } => (EventKind::Write, path_display),
            DropboxEntry::Deleted { path_display } => (EventKind::Remove, path_display),
            DropboxEntry::Folder { .. } => return,
        };

        let Some(display) = path_display else { return };
        let Some(rel) = self.to_rel_path(&display) else {
            return;
        };

        let _ = self.tx.send(FileEvent::new(kind, rel)).await;
    }

    /// Logicalize a change path against the watched root.
    ///
    /// Dropbox paths are case-insensitive, so the prefix check is too; the
    /// returned path keeps the display casing.
    fn to_rel_path(&self, display: &str) -> Option<String> {
        let prefix = self.folder_path.to_lowercase();
        if !display.to_lowercase().starts_with(&prefix) {
            return None;
        }

        let rel = display[self.folder_path.len()..].trim_start_matches('/');
        if rel.is_empty() {
            return None;
        }
        Some(rel.to_string())
    }
}
