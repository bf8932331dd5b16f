//! Peer-to-peer TCP transport: push syncer and receive server

mod server;
mod syncer;

pub use server::ReceiveServer;
pub use syncer::TcpSyncer;

/// Dial timeout for per-event push connections
pub(crate) const DIAL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
