//! Cloud-backed sources and syncers (Google Drive, Dropbox)

pub mod auth;
pub mod dropbox;
pub mod gdrive;

use std::path::Path;
use std::time::Duration;

use color_eyre::eyre::Context;
use color_eyre::Result;

/// Channel capacity for cloud sources; senders block when it fills
pub(crate) const CLOUD_BUFFER: usize = 100;

/// Back-off applied after a polling error before the next attempt
pub(crate) const POLL_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Read a persisted cursor/page-token file, if any
pub(crate) async fn load_cursor(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Persist a cursor/page-token file with owner-only permissions
pub(crate) async fn save_cursor(path: &Path, value: &str) -> Result<()> {
    tokio::fs::write(path, value)
        .await
        .wrap_err_with(|| format!("failed to save cursor to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    Ok(())
}
