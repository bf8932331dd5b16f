//! Per-install node identity
//!
//! A node id is 16 lowercase hex characters (8 random bytes), generated once
//! and persisted at `<state dir>/node-id`. Every job start requires it; peers
//! key their vector-clock entries by it.

use std::path::Path;

use color_eyre::eyre::Context;
use color_eyre::Result;
use rand::RngCore;

const NODE_ID_FILE: &str = "node-id";

/// Load the persisted node id, generating and saving one on first use
///
/// # Errors
/// Returns an error if the id file cannot be read or written
pub fn load_or_create(state_dir: &Path) -> Result<String> {
    let path = state_dir.join(NODE_ID_FILE);

    if let Ok(existing) = std::fs::read_to_string(&path) {
        return Ok(existing.trim().to_string());
    }

    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    let id = hex::encode(bytes);

    std::fs::write(&path, &id)
        .wrap_err_with(|| format!("failed to save node id to {}", path.display()))?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generates_sixteen_hex_chars() {
        let dir = TempDir::new().unwrap();
        let id = load_or_create(dir.path()).unwrap();

        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_stable_across_calls() {
        let dir = TempDir::new().unwrap();
        let first = load_or_create(dir.path()).unwrap();
        let second = load_or_create(dir.path()).unwrap();
        assert_eq!(first, second);
    }
}
