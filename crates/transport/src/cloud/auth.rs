//! Access-token seam for cloud backends
//!
//! The OAuth dance that provisions and refreshes tokens lives outside this
//! crate; syncers and pollers only need a bearer token per request.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use color_eyre::eyre::Context;
use color_eyre::Result;
use serde::Deserialize;

/// Supplies a bearer token for vendor REST calls
#[async_trait]
pub trait AccessTokenProvider: Send + Sync + 'static {
    async fn access_token(&self) -> Result<String>;
}

/// Reads an externally provisioned token file on every call, so an external
/// refresher can rotate it without restarting the daemon.
pub struct TokenFile {
    path: PathBuf,
}

#[derive(Deserialize)]
struct StoredToken {
    access_token: String,
}

impl TokenFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The Google Drive token file under the state directory
    #[must_use]
    pub fn gdrive(state_dir: &Path) -> Self {
        Self::new(state_dir.join("gdrive_token.json"))
    }

    /// The Dropbox token file under the state directory
    #[must_use]
    pub fn dropbox(state_dir: &Path) -> Self {
        Self::new(state_dir.join("dropbox_token.json"))
    }
}

#[async_trait]
impl AccessTokenProvider for TokenFile {
    async fn access_token(&self) -> Result<String> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .wrap_err_with(|| format!("failed to read token file {}", self.path.display()))?;
        let token: StoredToken = serde_json::from_str(&raw)
            .wrap_err_with(|| format!("malformed token file {}", self.path.display()))?;
        Ok(token.access_token)
    }
}
