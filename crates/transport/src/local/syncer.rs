//! Directory-to-directory syncer

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use color_eyre::eyre::Context;
use color_eyre::Result;
use tracing::{error, info};
use walkdir::WalkDir;

use synco_core::conflict::Resolver;
use synco_core::fsutil::{atomic_copy, remove_if_exists};
use synco_core::{ConflictStrategy, EventKind, FileEvent, SyncResult};

use crate::Syncer;

/// Copies events from one local directory into another.
///
/// Writes go through the resolver first; a declined conflict produces a
/// result that carries the `ConflictInfo` and performs no I/O.
pub struct LocalSyncer {
    src: PathBuf,
    dst: PathBuf,
    resolver: Resolver,
}

impl LocalSyncer {
    /// # Errors
    /// Returns an error if either path cannot be made absolute or the
    /// destination directory cannot be created
    pub fn new(src: impl Into<PathBuf>, dst: impl Into<PathBuf>, strategy: ConflictStrategy) -> Result<Self> {
        let src = std::path::absolute(src.into()).wrap_err("invalid src path")?;
        let dst = std::path::absolute(dst.into()).wrap_err("invalid dst path")?;

        std::fs::create_dir_all(&dst).wrap_err("failed to create dst dir")?;

        Ok(Self {
            src,
            dst,
            resolver: Resolver::new(strategy),
        })
    }

    /// Mirror the whole source tree once.
    ///
    /// Directories are created eagerly; a `Write` is synthesized for every
    /// regular file and handled through the normal path, resolver included.
    ///
    /// # Errors
    /// Returns an error if the walk itself fails; per-file failures land in
    /// the returned results
    pub async fn full_sync(&self) -> Result<Vec<SyncResult>> {
        let mut results = Vec::new();

        for entry in WalkDir::new(&self.src) {
            let entry = entry.wrap_err("failed to walk src")?;

            if entry.file_type().is_dir() {
                let mirror = self.to_dst(entry.path());
                tokio::fs::create_dir_all(&mirror)
                    .await
                    .wrap_err_with(|| format!("failed to create {}", mirror.display()))?;
                continue;
            }

            if entry.file_type().is_file() {
                let event = FileEvent::new(EventKind::Write, entry.path());
                results.push(self.handle(event).await);
            }
        }

        Ok(results)
    }

    fn to_dst(&self, src_path: &Path) -> PathBuf {
        match src_path.strip_prefix(&self.src) {
            Ok(rel) => self.dst.join(rel),
            // Outside the root: fall back to the file name.
            Err(_) => self.dst.join(src_path.file_name().unwrap_or_default()),
        }
    }

    async fn copy(&self, event: &FileEvent, dst_path: &Path) -> SyncResult {
        let mut result = SyncResult::new(
            event.clone(),
            event.path.to_string_lossy(),
            dst_path.to_string_lossy(),
        );

        if let Some(mut conflict) = self.resolver.detect(&event.path, dst_path) {
            match self.resolver.resolve(&mut conflict, &event.path, dst_path) {
                Ok(true) => {}
                Ok(false) => {
                    result.conflict = Some(conflict);
                    return result;
                }
                Err(err) => return result.with_err(err),
            }
        }

        if let Err(err) = atomic_copy(&event.path, dst_path).await {
            return result.with_err(err);
        }
        result
    }
}

#[async_trait]
impl Syncer for LocalSyncer {
    async fn handle(&self, event: FileEvent) -> SyncResult {
        let dst_path = self.to_dst(&event.path);

        let result = match event.kind {
            EventKind::Create | EventKind::Write => self.copy(&event, &dst_path).await,

            // The watcher reports only the old path of a rename, so both map
            // to a destination delete; the new path arrives as its own event.
            EventKind::Remove | EventKind::Rename => {
                let mut result = SyncResult::new(
                    event.clone(),
                    event.path.to_string_lossy(),
                    dst_path.to_string_lossy(),
                );
                if let Err(err) = remove_if_exists(&dst_path).await {
                    result = result.with_err(err);
                }
                result
            }
        };

        if let Some(err) = &result.err {
            error!(kind = ?result.event.kind, path = %result.src_path, %err, "sync failed");
        } else {
            info!(kind = ?result.event.kind, src = %result.src_path, dst = %result.dst_path, "synced");
        }

        result
    }
}
