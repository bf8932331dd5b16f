//! synco-daemon: job manager, delegation, and the HTTP control API

pub mod api;
pub mod manager;
pub mod state;
pub mod store;

pub use api::{router, ApiState};
pub use manager::JobManager;
pub use store::{HistoryStats, HistoryStore, JobStore, MemoryStore};
