//! Change-token polling source for Google Drive

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use synco_core::{EventKind, FileEvent};

use super::client::{DriveChange, DriveClient, FOLDER_MIME};
use crate::cloud::{load_cursor, save_cursor, CLOUD_BUFFER};
use crate::EventSource;

/// Polls the Drive changes feed on a fixed interval and emits logical-path
/// events for files under the watched folder.
///
/// The page token is persisted per job so a restart resumes where it left
/// off. File changes map to `Write`; removals and folder-only changes are
/// discarded (folders only update the directory index).
pub struct GDriveSource {
    client: DriveClient,
    folder_path: String,
    token_path: PathBuf,
    interval: Duration,
    stop: watch::Sender<bool>,
}

impl GDriveSource {
    #[must_use]
    pub fn new(
        client: DriveClient,
        folder_path: impl Into<String>,
        state_dir: &std::path::Path,
        job_id: i64,
        interval: Duration,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            client,
            folder_path: folder_path.into(),
            token_path: state_dir.join(format!("gdrive_pagetoken_{job_id}")),
            interval,
            stop,
        }
    }
}

#[async_trait]
impl EventSource for GDriveSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<FileEvent>> {
        let folder_id = self.client.ensure_folder_path(&self.folder_path).await?;

        // Index of every directory id under the watched root; grows with the
        // tree and is never evicted.
        let mut known_dirs = HashSet::new();
        known_dirs.insert(folder_id.clone());
        if let Err(err) = index_subfolders(&self.client, &folder_id, &mut known_dirs).await {
            warn!(%err, "failed to index subfolders");
        }

        let page_token = match load_cursor(&self.token_path).await {
            Some(token) => {
                info!(folder = %self.folder_path, "gdrive polling resumed");
                token
            }
            None => {
                let token = self.client.start_page_token().await?;
                save_cursor(&self.token_path, &token).await?;
                info!(folder = %self.folder_path, "gdrive polling started (new)");
                token
            }
        };

        let (tx, rx) = mpsc::channel(CLOUD_BUFFER);
        let mut poller = Poller {
            client: self.client.clone(),
            folder_id,
            known_dirs,
            token_path: self.token_path.clone(),
            tx,
        };
        let interval = self.interval;
        let mut stop_rx = self.stop.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut page_token = page_token;

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    _ = ticker.tick() => match poller.fetch_changes(&page_token).await {
                        Ok(new_token) => {
                            if new_token != page_token {
                                page_token = new_token;
                                let _ = save_cursor(&poller.token_path, &page_token).await;
                            }
                        }
                        Err(err) => warn!(%err, "gdrive poll error"),
                    }
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
    client: DriveClient,
    folder_id: String,
    known_dirs: HashSet<String>,
    token_path: PathBuf,
    tx: mpsc::Sender<FileEvent>,
}

impl Poller {
    /// Drain every pending page, returning the next start token
    async fn fetch_changes(&mut self, page_token: &str) -> Result<String> {
        let mut token = page_token.to_string();

        loop {
            let page = self.client.list_changes(&token).await?;

            for change in page.changes {
                self.handle_change(change).await;
            }

            if let Some(next) = page.next_page_token {
                token = next;
                continue;
            }

            return Ok(page.new_start_page_token.unwrap_or(token));
        }
    }

    async fn handle_change(&mut self, change: DriveChange) {
        let Some(file) = change.file else {
            debug!(id = %change.file_id, "gdrive file removed");
            return;
        };
        if change.removed {
            debug!(id = %change.file_id, "gdrive file removed");
            return;
        }

        if file.mime_type == FOLDER_MIME {
            if self.is_under_target(&file.parents) {
                self.known_dirs.insert(change.file_id);
            }
            return;
        }

        if !self.is_under_target(&file.parents) {
            return;
        }

        let rel_path = match self.resolve_rel_path(&file.name, &file.parents).await {
            Ok(path) => path,
            Err(err) => {
                warn!(file = %file.name, %err, "failed to resolve path");
                return;
            }
        };

        let _ = self
            .tx
            .send(FileEvent::new(EventKind::Write, rel_path))
            .await;
    }

    fn is_under_target(&self, parents: &[String]) -> bool {
        parents.iter().any(|id| self.known_dirs.contains(id))
    }

    /// Walk parent links up to the watched root to build the relative path
    async fn resolve_rel_path(&self, name: &str, parents: &[String]) -> Result<String> {
        let mut parts = vec![name.to_string()];
        let mut parent_id = parents.first().cloned();

        while let Some(id) = parent_id {
            if id == self.folder_id {
                break;
            }
            let parent = self.client.get_file(&id).await?;
            parts.insert(0, parent.name);
            parent_id = parent.parents.first().cloned();
        }

        Ok(parts.join("/"))
    }
}

/// Recursively collect folder ids under `root` into `known`
async fn index_subfolders(
    client: &DriveClient,
    root: &str,
    known: &mut HashSet<String>,
) -> Result<()> {
    let mut stack = vec![root.to_string()];

    while let Some(parent) = stack.pop() {
        for id in client.list_subfolders(&parent).await? {
            if known.insert(id.clone()) {
                stack.push(id);
            }
        }
    }

    Ok(())
}
