//! Dropbox uploader and downloader

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use color_eyre::eyre::Context;
use color_eyre::Result;
use tracing::{error, info};

use synco_core::fsutil::{atomic_write, remove_if_exists};
use synco_core::protocol::{from_wire_path, to_wire_path};
use synco_core::{EventKind, FileEvent, SyncResult};

use super::client::DropboxClient;
use super::normalize_path;
use crate::Syncer;

/// Pushes local file events into a Dropbox folder
pub struct DropboxUploader {
    src: PathBuf,
    folder_path: String,
    client: DropboxClient,
}

impl DropboxUploader {
    /// Prepare the remote folder and return the uploader
    ///
    /// # Errors
    /// Returns an error if the source path is invalid or the remote folder
    /// cannot be prepared
    pub async fn new(
        src: impl Into<PathBuf>,
        folder_path: &str,
        client: DropboxClient,
    ) -> Result<Self> {
        let src = std::path::absolute(src.into()).wrap_err("invalid src path")?;
        let folder_path = normalize_path(folder_path);

        client
            .create_folder(&folder_path)
            .await
            .wrap_err("failed to prepare dropbox folder")?;

        info!(src = %src.display(), folder = %folder_path, "dropbox syncer ready");

        Ok(Self {
            src,
            folder_path,
            client,
        })
    }

    fn remote_path(&self, local: &Path) -> String {
        let rel = match local.strip_prefix(&self.src) {
            Ok(rel) => to_wire_path(rel),
            Err(_) => local
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        };
        format!("{}/{rel}", self.folder_path)
    }
}

#[async_trait]
impl Syncer for DropboxUploader {
    async fn handle(&self, event: FileEvent) -> SyncResult {
        let mut result = SyncResult::new(
            event.clone(),
            event.path.to_string_lossy(),
            format!("dropbox:{}", self.folder_path),
        );

        let outcome = match event.kind {
            EventKind::Create | EventKind::Write => match tokio::fs::read(&event.path).await {
                Ok(data) => self.client.upload(&self.remote_path(&event.path), data).await,
                Err(err) => Err(err).wrap_err("failed to open file"),
            },
            EventKind::Remove | EventKind::Rename => {
                self.client.delete(&self.remote_path(&event.path)).await
            }
        };

        if let Err(err) = outcome {
            error!(path = %result.src_path, %err, "dropbox sync failed");
            result = result.with_err(err);
        } else {
            info!(kind = ?event.kind, path = %result.src_path, "dropbox synced");
        }

        result
    }
}

/// Pulls Dropbox change events down into a local directory
pub struct DropboxDownloader {
    folder_path: String,
    dst: PathBuf,
    client: DropboxClient,
}

impl DropboxDownloader {
    /// # Errors
    /// Returns an error if the destination directory cannot be created
    pub fn new(folder_path: &str, dst: impl Into<PathBuf>, client: DropboxClient) -> Result<Self> {
        let dst = std::path::absolute(dst.into()).wrap_err("invalid dst path")?;
        std::fs::create_dir_all(&dst).wrap_err("failed to create dst dir")?;

        Ok(Self {
            folder_path: normalize_path(folder_path),
            dst,
            client,
        })
    }
}

#[async_trait]
impl Syncer for DropboxDownloader {
    async fn handle(&self, event: FileEvent) -> SyncResult {
        let rel = to_wire_path(&event.path);
        let local = self.dst.join(from_wire_path(&rel));
        let remote = format!("{}/{rel}", self.folder_path);

        let mut result = SyncResult::new(
            event.clone(),
            format!("dropbox:{rel}"),
            local.to_string_lossy(),
        );

        let outcome = match event.kind {
            EventKind::Create | EventKind::Write => match self.client.download(&remote).await {
                Ok(data) => atomic_write(&local, &data).await,
                Err(err) => Err(err),
            },
            EventKind::Remove | EventKind::Rename => remove_if_exists(&local).await,
        };

        if let Err(err) = outcome {
            error!(path = %rel, %err, "dropbox download failed");
            result = result.with_err(err);
        } else {
            info!(path = %rel, dst = %result.dst_path, "dropbox downloaded");
        }

        result
    }
}
