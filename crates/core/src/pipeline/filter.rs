//! Segment-wise ignore filter

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::mpsc;
use tracing::warn;

use crate::event::FileEvent;

/// Drop events whose path contains a segment matching any pattern.
///
/// Matching is segment-wise: the path is split on forward slashes and each
/// component is tested on its own, so `.git` ignores the whole tree under
/// any `.git` directory.
pub fn ignore_filter(
    mut input: mpsc::Receiver<FileEvent>,
    patterns: &[String],
    buffer: usize,
) -> mpsc::Receiver<FileEvent> {
    let globs = compile(patterns);
    let (tx, rx) = mpsc::channel(buffer);

    tokio::spawn(async move {
        while let Some(event) = input.recv().await {
            if should_ignore(&event.path, &globs) {
                continue;
            }
            if tx.send(event).await.is_err() {
                return;
            }
        }
    });

    rx
}

fn compile(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(err) => warn!(pattern, %err, "skipping unparsable ignore pattern"),
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

fn should_ignore(path: &Path, globs: &GlobSet) -> bool {
    let normalized = path.to_string_lossy().replace('\\', "/");
    normalized
        .split('/')
        .filter(|segment| !segment.is_empty())
        .any(|segment| globs.is_match(Path::new(segment)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn default_patterns() -> Vec<String> {
        vec![
            ".git".into(),
            ".DS_Store".into(),
            "*.tmp".into(),
            "*.swp".into(),
        ]
    }

    async fn passes(path: &str) -> bool {
        let (tx, rx) = mpsc::channel(4);
        let mut out = ignore_filter(rx, &default_patterns(), 4);
        tx.send(FileEvent::new(EventKind::Write, path)).await.unwrap();
        drop(tx);
        out.recv().await.is_some()
    }

    #[tokio::test]
    async fn test_git_directory_dropped() {
        assert!(!passes("/repo/.git/config").await);
        assert!(!passes("/repo/sub/.git/HEAD").await);
    }

    #[tokio::test]
    async fn test_glob_extension_dropped() {
        assert!(!passes("/work/scratch.tmp").await);
        assert!(!passes("/work/.file.swp").await);
    }

    #[tokio::test]
    async fn test_regular_paths_forwarded() {
        assert!(passes("/repo/src/main.rs").await);
        assert!(passes("/repo/gitlog.txt").await);
    }

    #[tokio::test]
    async fn test_segment_match_not_substring() {
        // ".git" must match a whole segment, not a fragment of one.
        assert!(passes("/repo/.github/workflow.yml").await);
    }

    #[tokio::test]
    async fn test_output_closes_with_input() {
        let (tx, rx) = mpsc::channel(4);
        let mut out = ignore_filter(rx, &default_patterns(), 4);
        drop(tx);
        assert!(out.recv().await.is_none());
    }
}
