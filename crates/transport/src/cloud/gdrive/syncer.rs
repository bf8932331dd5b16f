//! Google Drive uploader and downloader

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use tracing::{error, info};

use synco_core::fsutil::{atomic_write, remove_if_exists};
use synco_core::protocol::{from_wire_path, to_wire_path};
use synco_core::{EventKind, FileEvent, SyncResult};

use super::client::{split_path, DriveClient};
use crate::Syncer;

/// Pushes local file events into a Drive folder.
///
/// Ids of previously-touched paths are cached in memory to avoid repeated
/// lookups.
pub struct GDriveUploader {
    src: PathBuf,
    folder_path: String,
    root_id: String,
    client: DriveClient,
    id_cache: RwLock<HashMap<String, String>>,
}

impl GDriveUploader {
    /// Prepare the remote folder and return the uploader
    ///
    /// # Errors
    /// Returns an error if the source path is invalid or the remote folder
    /// cannot be prepared
    pub async fn new(
        src: impl Into<PathBuf>,
        folder_path: impl Into<String>,
        client: DriveClient,
    ) -> Result<Self> {
        let src = std::path::absolute(src.into()).wrap_err("invalid src path")?;
        let folder_path = folder_path.into();

        let root_id = client
            .ensure_folder_path(&folder_path)
            .await
            .wrap_err("failed to prepare gdrive folder")?;

        info!(src = %src.display(), folder = %folder_path, folder_id = %root_id, "gdrive syncer ready");

        Ok(Self {
            src,
            folder_path,
            root_id,
            client,
            id_cache: RwLock::new(HashMap::new()),
        })
    }

    fn rel_path(&self, local: &Path) -> String {
        match local.strip_prefix(&self.src) {
            Ok(rel) => to_wire_path(rel),
            Err(_) => local
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }

    fn cached_id(&self, key: &str) -> Option<String> {
        self.id_cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn cache_id(&self, key: &str, id: String) {
        self.id_cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), id);
    }

    fn evict_id(&self, key: &str) {
        self.id_cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Find-or-create the folder chain for a relative file path, returning
    /// the direct parent's id
    async fn ensure_parent_folders(&self, rel_path: &str) -> Result<String> {
        let mut parent_id = self.root_id.clone();

        let segments: Vec<&str> = rel_path.split('/').collect();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            parent_id = match self.client.find_folder(segment, &parent_id).await? {
                Some(id) => id,
                None => self.client.create_folder(segment, &parent_id).await?,
            };
        }

        Ok(parent_id)
    }

    /// Resolve the existing folder chain without creating anything
    async fn find_parent_folders(&self, rel_path: &str) -> Result<Option<String>> {
        let mut parent_id = self.root_id.clone();

        let segments: Vec<&str> = rel_path.split('/').collect();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            match self.client.find_folder(segment, &parent_id).await? {
                Some(id) => parent_id = id,
                None => return Ok(None),
            }
        }

        Ok(Some(parent_id))
    }

    async fn upload(&self, local: &Path) -> Result<()> {
        let rel_path = self.rel_path(local);
        let parent_id = self
            .ensure_parent_folders(&rel_path)
            .await
            .wrap_err("failed to create parent folders")?;

        let name = file_name(&rel_path);
        let data = tokio::fs::read(local).await.wrap_err("failed to open file")?;

        let existing = match self.cached_id(&rel_path) {
            Some(id) => Some(id),
            None => self.client.find_file(name, &parent_id).await?,
        };

        let id = match existing {
            Some(id) => {
                self.client.upload_media(&id, data).await?;
                id
            }
            None => {
                let id = self.client.create_file(name, &parent_id).await?;
                self.client.upload_media(&id, data).await?;
                id
            }
        };

        self.cache_id(&rel_path, id);
        Ok(())
    }

    async fn delete(&self, local: &Path) -> Result<()> {
        let rel_path = self.rel_path(local);

        let id = match self.cached_id(&rel_path) {
            Some(id) => Some(id),
            None => match self.find_parent_folders(&rel_path).await? {
                Some(parent_id) => self.client.find_file(file_name(&rel_path), &parent_id).await?,
                // Folder chain is gone: nothing left to delete.
                None => None,
            },
        };

        if let Some(id) = id {
            self.client.delete_file(&id).await?;
        }

        self.evict_id(&rel_path);
        Ok(())
    }
}

#[async_trait]
impl Syncer for GDriveUploader {
    async fn handle(&self, event: FileEvent) -> SyncResult {
        let mut result = SyncResult::new(
            event.clone(),
            event.path.to_string_lossy(),
            format!("gdrive:{}", self.folder_path),
        );

        let outcome = match event.kind {
            EventKind::Create | EventKind::Write => self.upload(&event.path).await,
            EventKind::Remove | EventKind::Rename => self.delete(&event.path).await,
        };

        if let Err(err) = outcome {
            error!(path = %result.src_path, %err, "gdrive sync failed");
            result = result.with_err(err);
        } else {
            info!(kind = ?event.kind, path = %result.src_path, "gdrive synced");
        }

        result
    }
}

/// Pulls Drive change events down into a local directory
pub struct GDriveDownloader {
    folder_id: String,
    dst: PathBuf,
    client: DriveClient,
}

impl GDriveDownloader {
    /// Resolve the remote folder and return the downloader
    ///
    /// # Errors
    /// Returns an error if the destination cannot be created or the remote
    /// folder cannot be resolved
    pub async fn new(
        folder_path: &str,
        dst: impl Into<PathBuf>,
        client: DriveClient,
    ) -> Result<Self> {
        let dst = std::path::absolute(dst.into()).wrap_err("invalid dst path")?;
        std::fs::create_dir_all(&dst).wrap_err("failed to create dst dir")?;

        let folder_id = client
            .ensure_folder_path(folder_path)
            .await
            .wrap_err("failed to find gdrive folder")?;

        Ok(Self {
            folder_id,
            dst,
            client,
        })
    }

    async fn download(&self, rel_path: &str, local: &Path) -> Result<()> {
        let mut parent_id = self.folder_id.clone();
        let segments: Vec<&str> = split_path(rel_path).collect();
        let (name, dirs) = segments
            .split_last()
            .ok_or_else(|| eyre!("empty gdrive path"))?;

        for dir in dirs {
            parent_id = self
                .client
                .find_folder(dir, &parent_id)
                .await?
                .ok_or_else(|| eyre!("folder not found: {dir}"))?;
        }

        let file_id = self
            .client
            .find_file(name, &parent_id)
            .await?
            .ok_or_else(|| eyre!("file not found on gdrive: {rel_path}"))?;

        let data = self.client.download(&file_id).await?;
        atomic_write(local, &data).await
    }
}

#[async_trait]
impl Syncer for GDriveDownloader {
    async fn handle(&self, event: FileEvent) -> SyncResult {
        let rel_path = to_wire_path(&event.path);
        let local = self.dst.join(from_wire_path(&rel_path));

        let mut result = SyncResult::new(
            event.clone(),
            format!("gdrive:{rel_path}"),
            local.to_string_lossy(),
        );

        let outcome = match event.kind {
            EventKind::Create | EventKind::Write => self.download(&rel_path, &local).await,
            EventKind::Remove | EventKind::Rename => remove_if_exists(&local).await,
        };

        if let Err(err) = outcome {
            error!(path = %rel_path, %err, "gdrive download failed");
            result = result.with_err(err);
        } else {
            info!(path = %rel_path, dst = %result.dst_path, "gdrive downloaded");
        }

        result
    }
}

fn file_name(rel_path: &str) -> &str {
    rel_path.rsplit('/').next().unwrap_or(rel_path)
}
