//! Atomic filesystem writes
//!
//! Destination files are produced by writing `<dst>.synco.tmp` and renaming
//! it into place, so a reader never observes a partially written file. The
//! temp file is unlinked on every failure path.

use std::path::{Path, PathBuf};

use color_eyre::eyre::Context;
use color_eyre::Result;
use tokio::io::AsyncWriteExt;

/// Suffix of in-flight temp files
pub const TMP_SUFFIX: &str = ".synco.tmp";

fn tmp_path(dst: &Path) -> PathBuf {
    let mut name = dst.as_os_str().to_os_string();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

async fn ensure_parent(dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .wrap_err("failed to create parent dir")?;
    }
    Ok(())
}

/// Atomically replace `dst` with `data`
///
/// # Errors
/// Returns an error if the temp file cannot be written or renamed; the temp
/// file is removed in that case
pub async fn atomic_write(dst: &Path, data: &[u8]) -> Result<()> {
    ensure_parent(dst).await?;
    let tmp = tmp_path(dst);

    let write = async {
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .wrap_err("failed to create temp file")?;
        file.write_all(data).await.wrap_err("failed to write")?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, dst)
            .await
            .wrap_err("failed to rename")
    };

    if let Err(err) = write.await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err);
    }

    Ok(())
}

/// Atomically replace `dst` with the contents of `src`, streaming
///
/// # Errors
/// Returns an error if the source cannot be read or the temp file cannot be
/// written or renamed; the temp file is removed in that case
pub async fn atomic_copy(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent(dst).await?;
    let tmp = tmp_path(dst);

    let copy = async {
        let mut reader = tokio::fs::File::open(src)
            .await
            .wrap_err("failed to open src")?;
        let mut writer = tokio::fs::File::create(&tmp)
            .await
            .wrap_err("failed to create temp file")?;
        tokio::io::copy(&mut reader, &mut writer)
            .await
            .wrap_err("failed to write")?;
        writer.flush().await?;
        drop(writer);

        tokio::fs::rename(&tmp, dst)
            .await
            .wrap_err("failed to rename")
    };

    if let Err(err) = copy.await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err);
    }

    Ok(())
}

/// Remove a file, treating "not found" as success
///
/// # Errors
/// Returns an error for any failure other than the file being absent
pub async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).wrap_err_with(|| format!("failed to remove {}", path.display())),
    }
}
