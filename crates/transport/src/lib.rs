//! synco-transport: Event sources and syncers
//!
//! An [`EventSource`] produces a finite stream of file events for a watched
//! endpoint; a [`Syncer`] applies one event to a specific destination kind.
//! Backends: local filesystem, peer TCP (push syncer + receive server),
//! Google Drive, Dropbox.

use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::Result;
use tokio::sync::mpsc;

use synco_core::{FileEvent, SyncResult};

pub mod cloud;
pub mod local;
pub mod tcp;

pub use local::{LocalSource, LocalSyncer};
pub use tcp::{ReceiveServer, TcpSyncer};

/// Produces a stream of file events from a watched endpoint.
///
/// `start` hands out the event receiver; a bounded channel is
/// single-consumer, so the stream is surrendered once, at startup. The
/// stream is finite: `stop` causes it to close after in-flight events have
/// drained.
#[async_trait]
pub trait EventSource: Send {
    /// Begin watching and return the event stream
    async fn start(&mut self) -> Result<mpsc::Receiver<FileEvent>>;

    /// Stop watching; the stream closes after draining
    fn stop(&self);
}

/// Applies a single event to a destination
#[async_trait]
pub trait Syncer: Send + Sync + 'static {
    async fn handle(&self, event: FileEvent) -> SyncResult;
}

/// Drive a syncer over an event stream.
///
/// The result stream closes iff the input closes; exactly one result is
/// produced per input event.
pub fn run_syncer(
    syncer: Arc<dyn Syncer>,
    mut input: mpsc::Receiver<FileEvent>,
    buffer: usize,
) -> mpsc::Receiver<SyncResult> {
    let (tx, rx) = mpsc::channel(buffer);

    tokio::spawn(async move {
        while let Some(event) = input.recv().await {
            let result = syncer.handle(event).await;
            if tx.send(result).await.is_err() {
                return;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use synco_core::EventKind;

    struct EchoSyncer;

    #[async_trait]
    impl Syncer for EchoSyncer {
        async fn handle(&self, event: FileEvent) -> SyncResult {
            let src = event.path.to_string_lossy().to_string();
            SyncResult::new(event, src, "echo")
        }
    }

    #[tokio::test]
    async fn test_one_result_per_event_and_close_cascade() {
        let (tx, rx) = mpsc::channel(8);
        let mut results = run_syncer(Arc::new(EchoSyncer), rx, 8);

        for i in 0..3 {
            tx.send(FileEvent::new(EventKind::Write, format!("/f{i}")))
                .await
                .unwrap();
        }
        drop(tx);

        let mut count = 0;
        while let Some(result) = results.recv().await {
            assert!(result.is_success());
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
