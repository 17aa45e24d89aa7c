//! Timestamped persistence of an entity's data blob. Each entity directory
//! carries a `.data` JSON blob and a separate `.time` marker; comparing the
//! marker against a cached one answers "did anything change" without
//! deserializing the blob.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use labtree_core::error::{Error, Result};
use labtree_core::fileio;

use crate::paths;

pub fn now_nanos() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000))
}

/// Write the data blob and a fresh modification marker, returning the
/// marker. A marker never repeats: if "now" would collide with the previous
/// marker (fast filesystem, nanosecond resolution), the write is delayed.
pub fn save<D: Serialize>(dir: &Path, data: &D) -> Result<i64> {
    fileio::save_json(&paths::data_path(dir), &serde_json::to_value(data)?)?;
    let mut marker = now_nanos();
    if let Some(prev) = read_marker(dir)? {
        if marker <= prev {
            std::thread::sleep(Duration::from_millis(1));
            marker = now_nanos().max(prev + 1);
        }
    }
    fileio::save_text(&paths::time_path(dir), &marker.to_string())?;
    Ok(marker)
}

pub fn read_marker(dir: &Path) -> Result<Option<i64>> {
    match fileio::load_text(&paths::time_path(dir))? {
        None => Ok(None),
        Some(text) => text.trim().parse::<i64>().map(Some).map_err(|_| {
            Error::Arguments(format!(
                "corrupt modification marker in `{}`",
                dir.display()
            ))
        }),
    }
}

pub fn load<D: DeserializeOwned>(dir: &Path) -> Result<D> {
    let value = fileio::load_json(&paths::data_path(dir))?.ok_or_else(|| {
        Error::NotExists(format!("no data blob in `{}`", dir.display()))
    })?;
    Ok(serde_json::from_value(value)?)
}

/// Re-read the marker; when it differs from `cached_marker`, reload the blob
/// and return it with the new marker. Otherwise no blob I/O happens.
pub fn load_if_stale<D: DeserializeOwned>(
    dir: &Path,
    cached_marker: Option<i64>,
) -> Result<Option<(D, i64)>> {
    let marker = read_marker(dir)?.ok_or_else(|| {
        Error::NotExists(format!("no modification marker in `{}`", dir.display()))
    })?;
    if cached_marker == Some(marker) {
        return Ok(None);
    }
    Ok(Some((load(dir)?, marker)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Blob {
        value: u32,
    }

    #[test]
    fn markers_are_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let first = save(dir.path(), &Blob { value: 1 }).unwrap();
        let second = save(dir.path(), &Blob { value: 2 }).unwrap();
        assert!(second > first);
    }

    #[test]
    fn load_if_stale_skips_blob_when_marker_matches() {
        let dir = tempfile::tempdir().unwrap();
        let marker = save(dir.path(), &Blob { value: 7 }).unwrap();
        let fresh: Option<(Blob, i64)> = load_if_stale(dir.path(), Some(marker)).unwrap();
        assert!(fresh.is_none());
        let stale: Option<(Blob, i64)> = load_if_stale(dir.path(), Some(marker - 1)).unwrap();
        let (blob, new_marker) = stale.unwrap();
        assert_eq!(blob, Blob { value: 7 });
        assert_eq!(new_marker, marker);
    }

    #[test]
    fn load_without_blob_is_not_exists() {
        let dir = tempfile::tempdir().unwrap();
        let err = load::<Blob>(dir.path()).unwrap_err();
        assert!(matches!(err, Error::NotExists(_)));
    }
}
