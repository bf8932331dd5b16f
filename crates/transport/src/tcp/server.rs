//! Receive server: accepts pushed sync traffic and applies it atomically

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use color_eyre::eyre::Context;
use color_eyre::Result;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

use synco_core::conflict::{ConflictInfo, Resolver};
use synco_core::fsutil::{atomic_write, remove_if_exists};
use synco_core::protocol::{
    file_checksum, from_wire_path, read_message, validate_checksum, write_response, Message,
    MessageKind, Response,
};
use synco_core::vclock::{compare, Relation, VectorClock};
use synco_core::ConflictStrategy;

/// Listens for pushed messages and persists them into a destination
/// directory.
///
/// One message and one response per connection; every connection gets its
/// own task. The server's clock and resolver are shared across connections.
pub struct ReceiveServer {
    shared: Arc<Shared>,
    addr: String,
    stop: watch::Sender<bool>,
}

struct Shared {
    dst: PathBuf,
    node_id: String,
    vclock: VectorClock,
    resolver: Resolver,
}

impl ReceiveServer {
    /// # Errors
    /// Returns an error if the destination directory cannot be created
    pub fn new(
        dst: impl Into<PathBuf>,
        addr: impl Into<String>,
        node_id: impl Into<String>,
        strategy: ConflictStrategy,
    ) -> Result<Self> {
        let dst = std::path::absolute(dst.into()).wrap_err("invalid dst path")?;
        std::fs::create_dir_all(&dst).wrap_err("failed to create dst dir")?;

        let (stop, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                dst,
                node_id: node_id.into(),
                vclock: VectorClock::new(),
                resolver: Resolver::new(strategy),
            }),
            addr: addr.into(),
            stop,
        })
    }

    /// Bind the listener and spawn the accept loop
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .wrap_err_with(|| format!("failed to listen on {}", self.addr))?;

        info!(addr = %self.addr, dst = %self.shared.dst.display(), "tcp server started");

        let shared = Arc::clone(&self.shared);
        let mut stop_rx = self.stop.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            let shared = Arc::clone(&shared);
                            tokio::spawn(async move {
                                handle_conn(&shared, stream).await;
                            });
                        }
                        Err(err) => {
                            if *stop_rx.borrow() {
                                return;
                            }
                            error!(%err, "accept error");
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop accepting; in-flight connections finish on their own
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

async fn handle_conn(shared: &Shared, mut stream: TcpStream) {
    let msg = match read_message(&mut stream).await {
        Ok(msg) => msg,
        Err(err) => {
            error!(%err, "failed to read message");
            let _ = write_response(&mut stream, &Response::err(err.to_string())).await;
            return;
        }
    };

    let response = match msg.kind {
        MessageKind::Sync => handle_sync(shared, &msg).await,
        MessageKind::Delete => handle_delete(shared, &msg).await,
        MessageKind::Ping => Response::ok(shared.vclock.snapshot()),
    };

    let _ = write_response(&mut stream, &response).await;
}

async fn handle_sync(shared: &Shared, msg: &Message) -> Response {
    let dst_path = shared.dst.join(from_wire_path(&msg.path));

    // Idempotent retransmit: identical content needs no clock reasoning.
    if let Ok(existing) = file_checksum(&dst_path).await {
        if existing == msg.checksum {
            return Response::skip("");
        }
    }

    match compare(&msg.vclock, &shared.vclock.snapshot()) {
        Relation::Before => {
            debug!(path = %msg.path, "skipping outdated message");
            return Response::skip("");
        }
        Relation::Concurrent => {
            if let Ok(metadata) = tokio::fs::metadata(&dst_path).await {
                let src_mod = UNIX_EPOCH + Duration::from_nanos(msg.mod_time_nanos.max(0) as u64);
                let dst_mod = metadata.modified().unwrap_or(UNIX_EPOCH);

                let mut conflict = ConflictInfo::new(
                    msg.path.clone(),
                    src_mod,
                    dst_mod,
                    shared.resolver.strategy(),
                );

                // No local source file to swap from on this side.
                let proceed = shared
                    .resolver
                    .resolve(&mut conflict, std::path::Path::new(""), &dst_path);
                if !matches!(proceed, Ok(true)) {
                    return Response::skip("conflict: resolved as skip");
                }
            }
        }
        Relation::After => {}
    }

    // Order the local clock after the accepted remote event.
    shared.vclock.merge(&msg.vclock);
    shared.vclock.tick(&shared.node_id);

    if validate_checksum(&msg.data, &msg.checksum).is_err() {
        return Response::err("checksum validation failed");
    }

    if let Err(err) = atomic_write(&dst_path, &msg.data).await {
        return Response::err(err.to_string());
    }

    info!(
        path = %dst_path.display(),
        size = msg.data.len(),
        origin = %msg.origin_id,
        "file synced"
    );

    Response::ok(shared.vclock.snapshot())
}

async fn handle_delete(shared: &Shared, msg: &Message) -> Response {
    let dst_path = shared.dst.join(from_wire_path(&msg.path));

    if let Err(err) = remove_if_exists(&dst_path).await {
        return Response::err(err.to_string());
    }

    info!(path = %dst_path.display(), "file deleted");
    Response::ok(shared.vclock.snapshot())
}
