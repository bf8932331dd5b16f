//! Conflict detection and policy-driven resolution
//!
//! A conflict exists when the destination was modified more recently than the
//! source, or when two peers wrote concurrently (clock comparison on the
//! receive path). The resolver decides whether the write proceeds.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Local;
use color_eyre::eyre::Context;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How concurrent or stale writes are decided
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStrategy {
    /// Proceed only when the source is strictly newer
    #[default]
    NewerWins,
    /// Always proceed
    SourceWins,
    /// Rename the destination aside, then proceed
    Backup,
    /// Never proceed
    Skip,
}

/// A detected conflict and how it was handled
#[derive(Debug, Clone)]
pub struct ConflictInfo {
    pub path: String,
    pub src_mod_time: SystemTime,
    pub dst_mod_time: SystemTime,
    pub strategy: ConflictStrategy,
    pub resolved: bool,
    pub backup_path: Option<PathBuf>,
}

impl ConflictInfo {
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        src_mod_time: SystemTime,
        dst_mod_time: SystemTime,
        strategy: ConflictStrategy,
    ) -> Self {
        Self {
            path: path.into(),
            src_mod_time,
            dst_mod_time,
            strategy,
            resolved: false,
            backup_path: None,
        }
    }
}

/// Stateless policy object; shared freely across tasks
#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    strategy: ConflictStrategy,
}

impl Resolver {
    #[must_use]
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    #[must_use]
    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Check mtimes for a conflict.
    ///
    /// Returns a `ConflictInfo` iff both files exist and the destination is
    /// newer than the source. A missing file on either side is not a conflict.
    #[must_use]
    pub fn detect(&self, src: &Path, dst: &Path) -> Option<ConflictInfo> {
        let src_mod = std::fs::metadata(src).and_then(|m| m.modified()).ok()?;
        let dst_mod = std::fs::metadata(dst).and_then(|m| m.modified()).ok()?;

        if dst_mod > src_mod {
            return Some(ConflictInfo::new(
                src.to_string_lossy(),
                src_mod,
                dst_mod,
                self.strategy,
            ));
        }

        None
    }

    /// Apply the configured strategy; `true` means the write may proceed.
    ///
    /// # Errors
    /// Returns an error if the `Backup` rename fails
    pub fn resolve(&self, conflict: &mut ConflictInfo, src: &Path, dst: &Path) -> Result<bool> {
        warn!(
            path = %src.display(),
            strategy = ?self.strategy,
            "conflict detected"
        );

        match self.strategy {
            ConflictStrategy::NewerWins => {
                if conflict.src_mod_time > conflict.dst_mod_time {
                    conflict.resolved = true;
                    info!(path = %conflict.path, "conflict resolved: src wins (newer)");
                    Ok(true)
                } else {
                    conflict.resolved = false;
                    info!(path = %conflict.path, "conflict resolved: dst wins (newer)");
                    Ok(false)
                }
            }

            ConflictStrategy::SourceWins => {
                conflict.resolved = true;
                Ok(true)
            }

            ConflictStrategy::Backup => {
                self.backup(dst, conflict)?;
                conflict.resolved = true;
                Ok(true)
            }

            ConflictStrategy::Skip => {
                info!(path = %src.display(), "conflict skipped");
                conflict.resolved = false;
                Ok(false)
            }
        }
    }

    /// Rename `dst` to `<base>.conflict_<YYYYMMDD_HHMMSS><ext>`
    fn backup(&self, dst: &Path, conflict: &mut ConflictInfo) -> Result<()> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let ext = dst
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let raw = dst.to_string_lossy();
        let base = &raw[..raw.len() - ext.len()];
        let backup_path = PathBuf::from(format!("{base}.conflict_{timestamp}{ext}"));

        std::fs::rename(dst, &backup_path)
            .wrap_err_with(|| format!("failed to backup {}", dst.display()))?;

        info!(
            original = %dst.display(),
            backup = %backup_path.display(),
            "conflict backup created"
        );
        conflict.backup_path = Some(backup_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn conflict_at(src_secs: u64, dst_secs: u64, strategy: ConflictStrategy) -> ConflictInfo {
        let epoch = SystemTime::UNIX_EPOCH;
        ConflictInfo::new(
            "file.txt",
            epoch + Duration::from_secs(src_secs),
            epoch + Duration::from_secs(dst_secs),
            strategy,
        )
    }

    #[test]
    fn test_newer_wins_src_newer() {
        let resolver = Resolver::new(ConflictStrategy::NewerWins);
        let mut conflict = conflict_at(2000, 1000, ConflictStrategy::NewerWins);

        let proceed = resolver
            .resolve(&mut conflict, Path::new("src"), Path::new("dst"))
            .unwrap();
        assert!(proceed);
        assert!(conflict.resolved);
    }

    #[test]
    fn test_newer_wins_dst_newer() {
        let resolver = Resolver::new(ConflictStrategy::NewerWins);
        let mut conflict = conflict_at(1000, 2000, ConflictStrategy::NewerWins);

        let proceed = resolver
            .resolve(&mut conflict, Path::new("src"), Path::new("dst"))
            .unwrap();
        assert!(!proceed);
        assert!(!conflict.resolved);
    }

    #[test]
    fn test_newer_wins_equal_does_not_proceed() {
        let resolver = Resolver::new(ConflictStrategy::NewerWins);
        let mut conflict = conflict_at(1500, 1500, ConflictStrategy::NewerWins);

        let proceed = resolver
            .resolve(&mut conflict, Path::new("src"), Path::new("dst"))
            .unwrap();
        assert!(!proceed);
    }

    #[test]
    fn test_source_wins_always_proceeds() {
        let resolver = Resolver::new(ConflictStrategy::SourceWins);
        let mut conflict = conflict_at(1000, 2000, ConflictStrategy::SourceWins);

        let proceed = resolver
            .resolve(&mut conflict, Path::new("src"), Path::new("dst"))
            .unwrap();
        assert!(proceed);
    }

    #[test]
    fn test_skip_never_proceeds() {
        let resolver = Resolver::new(ConflictStrategy::Skip);
        let mut conflict = conflict_at(2000, 1000, ConflictStrategy::Skip);

        let proceed = resolver
            .resolve(&mut conflict, Path::new("src"), Path::new("dst"))
            .unwrap();
        assert!(!proceed);
    }

    #[test]
    fn test_backup_renames_destination() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("doc.txt");
        fs::write(&dst, "old contents").unwrap();

        let resolver = Resolver::new(ConflictStrategy::Backup);
        let mut conflict = conflict_at(2000, 1000, ConflictStrategy::Backup);

        let proceed = resolver
            .resolve(&mut conflict, Path::new("src"), &dst)
            .unwrap();
        assert!(proceed);
        assert!(!dst.exists());

        let backup = conflict.backup_path.expect("backup path recorded");
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("doc.conflict_"), "name: {name}");
        assert!(name.ends_with(".txt"), "name: {name}");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "old contents");
    }

    #[test]
    fn test_detect_requires_both_files() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        let resolver = Resolver::new(ConflictStrategy::NewerWins);

        fs::write(&src, "x").unwrap();
        assert!(resolver.detect(&src, &dst).is_none());
        assert!(resolver.detect(&dst, &src).is_none());
    }

    #[test]
    fn test_detect_newer_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        fs::write(&src, "a").unwrap();
        fs::write(&dst, "b").unwrap();

        // Push the destination's mtime well past the source's.
        let later = SystemTime::now() + Duration::from_secs(60);
        let file = fs::File::open(&dst).unwrap();
        file.set_modified(later).unwrap();

        let resolver = Resolver::new(ConflictStrategy::NewerWins);
        let conflict = resolver.detect(&src, &dst).expect("conflict detected");
        assert!(conflict.dst_mod_time > conflict.src_mod_time);
    }
}
