//! Daemon configuration (`~/.synco/config.yaml`)
//!
//! Every key can be overridden by an uppercase `SYNCO_*` environment
//! variable, e.g. `SYNCO_DAEMON_PORT=9100`.

use std::path::PathBuf;

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use serde::{Deserialize, Serialize};

use crate::conflict::ConflictStrategy;

/// Runtime configuration for the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default listen port for ad-hoc receive servers
    pub port: u16,
    /// Control API port
    pub daemon_port: u16,
    /// Capacity of every inter-stage channel
    pub buffer_size: usize,
    /// Segment-wise glob patterns dropped by the ignore filter
    pub ignore_list: Vec<String>,
    /// Path of the external store, relative to the state directory
    pub db_path: String,
    /// Conflict policy applied by local syncers and receive servers
    pub conflict_strategy: ConflictStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 9000,
            daemon_port: 9001,
            buffer_size: 100,
            ignore_list: vec![
                ".git".to_string(),
                ".DS_Store".to_string(),
                "*.tmp".to_string(),
                "*.swp".to_string(),
            ],
            db_path: "synco.db".to_string(),
            conflict_strategy: ConflictStrategy::NewerWins,
        }
    }
}

/// The per-user state directory (`~/.synco`), created on first use
///
/// # Errors
/// Returns an error if the home directory is unknown or the directory cannot
/// be created
pub fn synco_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| eyre!("failed to determine home directory"))?;
    let dir = home.join(".synco");
    std::fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("failed to create state dir {}", dir.display()))?;
    Ok(dir)
}

impl Config {
    /// Load `config.yaml` from the state directory, falling back to defaults
    /// when the file does not exist, then apply `SYNCO_*` env overrides.
    ///
    /// # Errors
    /// Returns an error if an existing file or an env override cannot be
    /// parsed.
    pub fn load() -> Result<Self> {
        let path = synco_dir()?.join("config.yaml");
        Self::load_from(&path)
    }

    /// Load from an explicit path (used by tests)
    ///
    /// # Errors
    /// Returns an error if an existing file or an env override cannot be
    /// parsed.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&contents)
                .wrap_err_with(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("SYNCO_PORT") {
            self.port = v.parse().wrap_err("invalid SYNCO_PORT")?;
        }
        if let Ok(v) = std::env::var("SYNCO_DAEMON_PORT") {
            self.daemon_port = v.parse().wrap_err("invalid SYNCO_DAEMON_PORT")?;
        }
        if let Ok(v) = std::env::var("SYNCO_BUFFER_SIZE") {
            self.buffer_size = v.parse().wrap_err("invalid SYNCO_BUFFER_SIZE")?;
        }
        if let Ok(v) = std::env::var("SYNCO_IGNORE_LIST") {
            self.ignore_list = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("SYNCO_DB_PATH") {
            self.db_path = v;
        }
        if let Ok(v) = std::env::var("SYNCO_CONFLICT_STRATEGY") {
            self.conflict_strategy = serde_yaml::from_str(&v)
                .map_err(|_| eyre!("invalid SYNCO_CONFLICT_STRATEGY: {v}"))?;
        }
        Ok(())
    }
}
