//! Push syncer: one fresh connection, one message, one response per event

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;
use color_eyre::eyre::{bail, eyre, Context};
use color_eyre::Result;
use tokio::net::TcpStream;
use tracing::{debug, error, info};

use synco_core::protocol::{
    file_checksum, read_response, to_wire_path, write_message, Message, ResponseCode,
};
use synco_core::vclock::VectorClock;
use synco_core::{EventKind, FileEvent, SyncResult};

use super::DIAL_TIMEOUT;
use crate::Syncer;

/// Pushes events to a peer's receive server over the framed protocol.
///
/// Each event dials a fresh connection. The syncer owns this job's vector
/// clock; it ticks before every `Sync` send and merges the peer's clock from
/// every `Ok` response.
pub struct TcpSyncer {
    src: PathBuf,
    addr: String,
    node_id: String,
    vclock: Arc<VectorClock>,
}

impl TcpSyncer {
    /// # Errors
    /// Returns an error if the source path cannot be made absolute
    pub fn new(
        src: impl Into<PathBuf>,
        addr: impl Into<String>,
        node_id: impl Into<String>,
        vclock: Arc<VectorClock>,
    ) -> Result<Self> {
        Ok(Self {
            src: std::path::absolute(src.into()).wrap_err("invalid src path")?,
            addr: addr.into(),
            node_id: node_id.into(),
            vclock,
        })
    }

    fn rel_wire_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.src) {
            Ok(rel) => to_wire_path(rel),
            Err(_) => path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }

    async fn dial(&self) -> Result<TcpStream> {
        tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| eyre!("failed to connect to {}: dial timeout", self.addr))?
            .wrap_err_with(|| format!("failed to connect to {}", self.addr))
    }

    async fn send_file(&self, path: &Path) -> Result<()> {
        let metadata = tokio::fs::metadata(path)
            .await
            .wrap_err("failed to stat file")?;
        let mod_time_nanos = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        let checksum = file_checksum(path)
            .await
            .wrap_err("failed to compute checksum")?;
        let data = tokio::fs::read(path).await.wrap_err("failed to read file")?;

        self.vclock.tick(&self.node_id);

        let msg = Message::sync(
            self.node_id.clone(),
            self.vclock.snapshot(),
            self.rel_wire_path(path),
            mod_time_nanos,
            checksum,
            Bytes::from(data),
        );

        let mut stream = self.dial().await?;
        write_message(&mut stream, &msg)
            .await
            .wrap_err("failed to send message")?;
        let resp = read_response(&mut stream)
            .await
            .wrap_err("failed to read response")?;

        if resp.code == ResponseCode::Ok {
            self.vclock.merge(&resp.vclock);
        }

        match resp.code {
            ResponseCode::Ok => Ok(()),
            ResponseCode::Skip => {
                debug!(path = %path.display(), "server skipped");
                Ok(())
            }
            ResponseCode::Err => bail!("server error: {}", resp.msg),
        }
    }

    async fn send_delete(&self, path: &Path) -> Result<()> {
        let msg = Message::delete(self.rel_wire_path(path));

        let mut stream = self.dial().await?;
        write_message(&mut stream, &msg)
            .await
            .wrap_err("failed to send delete")?;
        let resp = read_response(&mut stream)
            .await
            .wrap_err("failed to read response")?;

        if resp.code == ResponseCode::Err {
            bail!("server error: {}", resp.msg);
        }
        Ok(())
    }
}

#[async_trait]
impl Syncer for TcpSyncer {
    async fn handle(&self, event: FileEvent) -> SyncResult {
        let mut result = SyncResult::new(
            event.clone(),
            event.path.to_string_lossy(),
            self.addr.clone(),
        );

        let outcome = match event.kind {
            EventKind::Create | EventKind::Write => self.send_file(&event.path).await,
            EventKind::Remove | EventKind::Rename => self.send_delete(&event.path).await,
        };

        if let Err(err) = outcome {
            error!(path = %result.src_path, %err, "remote sync failed");
            result = result.with_err(err);
        } else {
            info!(kind = ?event.kind, path = %result.src_path, "remote synced");
        }

        result
    }
}
