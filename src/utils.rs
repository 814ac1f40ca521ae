use std::path::Path;

use anyhow::Result;
use log::{error, info};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

/// Asynchronously ensures that a directory exists, creating it if it does not.
/// This function is idempotent.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !fs::try_exists(path).await? {
        if let Err(e) = fs::create_dir_all(path).await {
            error!("Failed to create directory at {:?}: {}", path, e);
            return Err(e.into());
        }
        info!("Created directory at: {:?}", path);
    }
    Ok(())
}

/// Reads a JSON file, returning `None` if it does not exist.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !fs::try_exists(path).await? {
        return Ok(None);
    }
    let json = fs::read_to_string(path).await?;
    Ok(Some(serde_json::from_str(&json)?))
}

/// Writes `value` as pretty JSON, creating the parent directory if needed.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        ensure_directory_exists(dir).await?;
    }
    let json = match serde_json::to_string_pretty(value) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize {:?} to JSON: {}", path, e);
            return Err(e.into());
        }
    };
    fs::write(path, json).await?;
    Ok(())
}
