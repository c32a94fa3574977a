//! JSON state files owned by this process.
//!
//! Writes go to a sibling temp file which is then renamed over the target, so
//! a crash mid-write leaves either the old or the new contents on disk.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::PersistError;

/// Read a JSON document, returning `None` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(PersistError::Io { path: path.to_path_buf(), source }),
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| PersistError::Json { path: path.to_path_buf(), source })
}

/// Replace the JSON document at `path` with `value`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let io_err = |source| PersistError::Io { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let body = serde_json::to_vec_pretty(value)
        .map_err(|source| PersistError::Json { path: path.to_path_buf(), source })?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}
