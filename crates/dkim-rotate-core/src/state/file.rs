// # State Files
//
// Crash-safe reading and writing of the YAML files the rotation tool keeps
// between runs (record ledger, provider sessions) and of the lookup tables.
//
// ## Crash Recovery
//
// - Atomic writes: new content goes to `<file>.tmp`, then is renamed over the file
// - Backup: the previous file is copied to `<file>.backup` before the rename
// - Corruption detection: YAML is validated on load
// - Recovery: a corrupt file is replaced by its backup when the backup parses

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;

/// Path of the temporary file used for atomic writes
pub fn temp_path(path: &Path) -> PathBuf {
    with_suffix(path, ".tmp")
}

/// Path of the backup file kept next to `path`
pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, ".backup")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Load a YAML file
///
/// # Returns
///
/// - `Ok(None)`: the file does not exist
/// - `Ok(Some(T))`: parsed content
/// - `Err(Error::Yaml)`: the file exists but does not parse
/// - `Err(Error)`: the file could not be read
pub async fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, Error> {
    if !path.exists() {
        tracing::debug!("State file does not exist: {}", path.display());
        return Ok(None);
    }

    let content = fs::read_to_string(path).await.map_err(|e| {
        Error::state_store(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let parsed = serde_yaml::from_str(&content)?;
    Ok(Some(parsed))
}

/// Load a YAML file, falling back to its backup when it is corrupt
///
/// Recovery strategy:
/// 1. Try to load the main file
/// 2. On a parse error, try the backup and restore the main file from it
/// 3. If the backup is missing or also corrupt, return the original parse error
pub async fn load_yaml_with_recovery<T: DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, Error> {
    match load_yaml(path).await {
        Ok(loaded) => Ok(loaded),
        Err(Error::Yaml(parse_error)) => {
            tracing::warn!(
                "{} appears corrupted: {}. Attempting recovery from backup.",
                path.display(),
                parse_error
            );

            let backup = backup_path(path);
            match load_yaml(&backup).await {
                Ok(Some(recovered)) => {
                    tracing::info!("Recovered {} from backup", path.display());
                    if let Err(e) = fs::copy(&backup, path).await {
                        tracing::error!(
                            "Failed to restore {} from backup: {}",
                            path.display(),
                            e
                        );
                    }
                    Ok(Some(recovered))
                }
                Ok(None) => {
                    tracing::warn!("No backup file found for {}", path.display());
                    Err(Error::Yaml(parse_error))
                }
                Err(backup_error) => {
                    tracing::error!("Backup also corrupted: {}", backup_error);
                    Err(Error::Yaml(parse_error))
                }
            }
        }
        Err(e) => Err(e),
    }
}

/// Serialize `value` as YAML and write it atomically
pub async fn save_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let yaml = serde_yaml::to_string(value)
        .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))?;
    write_atomic(path, yaml.as_bytes(), None).await
}

/// Write `contents` to `path` atomically
///
/// The previous file, if any, is kept as `<path>.backup`. When `mode` is set
/// the permissions are applied to the new file before it replaces the old one.
pub async fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<(), Error> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let temp = temp_path(path);
    {
        let mut file = fs::File::create(&temp).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to create temp file {}: {}",
                temp.display(),
                e
            ))
        })?;

        file.write_all(contents).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to write to temp file {}: {}",
                temp.display(),
                e
            ))
        })?;

        file.sync_all().await.map_err(|e| {
            Error::state_store(format!(
                "Failed to flush temp file {}: {}",
                temp.display(),
                e
            ))
        })?;
    }

    if let Some(mode) = mode {
        set_mode(&temp, mode).await?;
    }

    if path.exists() {
        let backup = backup_path(path);
        if let Err(e) = fs::copy(path, &backup).await {
            tracing::warn!("Failed to create backup of {}: {}", path.display(), e);
        }
    }

    fs::rename(&temp, path).await.map_err(|e| {
        Error::state_store(format!(
            "Failed to rename {} to {}: {}",
            temp.display(),
            path.display(),
            e
        ))
    })?;

    tracing::trace!("Wrote {}", path.display());
    Ok(())
}

/// Set Unix permission bits on `path`
#[cfg(unix)]
pub async fn set_mode(path: &Path, mode: u32) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| {
            Error::state_store(format!(
                "Failed to set mode {:o} on {}: {}",
                mode,
                path.display(),
                e
            ))
        })
}

/// Set Unix permission bits on `path` (no-op off Unix)
#[cfg(not(unix))]
pub async fn set_mode(_path: &Path, _mode: u32) -> Result<(), Error> {
    Ok(())
}
