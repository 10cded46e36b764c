//! Uploads-directory asset store for project PDF files.
//!
//! Projects reference their file by name only; every file lives directly
//! under the configured upload directory as `<project_id>.<ext>`.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use crate::errors::{Result, StoreError};

/// Create the upload directory if it does not exist yet.
pub async fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).await?;
    Ok(())
}

fn asset_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(file_name)
}

/// Persist uploaded file bytes under `file_name`.
pub async fn save(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<()> {
    fs::write(asset_path(dir, file_name), bytes).await?;
    info!("Stored asset {file_name} ({} bytes)", bytes.len());
    Ok(())
}

/// Read the full asset contents, e.g. for an email attachment.
pub async fn read(dir: &Path, file_name: &str) -> Result<Vec<u8>> {
    fs::read(asset_path(dir, file_name))
        .await
        .map_err(|e| StoreError::AssetUnavailable(format!("{file_name}: {e}")))
}

/// Open the asset for streaming to a download response.
pub async fn open(dir: &Path, file_name: &str) -> Result<fs::File> {
    fs::File::open(asset_path(dir, file_name))
        .await
        .map_err(|e| StoreError::AssetUnavailable(format!("{file_name}: {e}")))
}

/// Delete an asset file. A file that is already gone is not an error.
pub async fn remove(dir: &Path, file_name: &str) -> Result<()> {
    match fs::remove_file(asset_path(dir, file_name)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Asset {file_name} was already missing");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
