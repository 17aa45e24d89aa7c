//! Raw file primitives: text / JSON / bytes with a process-global read cache
//! keyed by modification time, so an unchanged file is never re-read.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime};

use serde_json::Value;
use walkdir::WalkDir;

use crate::confirm;
use crate::error::Result;

#[derive(Clone)]
enum Cached {
    Text(String),
    Json(Value),
    Bytes(Vec<u8>),
}

struct Entry {
    mtime: SystemTime,
    content: Cached,
}

fn cache() -> &'static Mutex<HashMap<PathBuf, Entry>> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, Entry>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}

pub fn mtime(path: &Path) -> Result<SystemTime> {
    Ok(fs::metadata(path)?.modified()?)
}

pub fn make_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

// Fast filesystems can produce a second write with an mtime identical to a
// very recent one, which would defeat mtime-based staleness checks.
fn force_mtime_delta(path: &Path) {
    if let Ok(meta) = fs::metadata(path) {
        if let Ok(modified) = meta.modified() {
            let too_fresh = modified
                .elapsed()
                .map(|e| e < Duration::from_millis(2))
                .unwrap_or(true);
            if too_fresh {
                std::thread::sleep(Duration::from_millis(2));
            }
        }
    }
}

fn prepare_write(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    force_mtime_delta(path);
    Ok(())
}

fn remember(path: &Path, content: Cached) {
    if let Ok(modified) = mtime(path) {
        cache().lock().unwrap().insert(
            path.to_path_buf(),
            Entry {
                mtime: modified,
                content,
            },
        );
    }
}

fn recall(path: &Path) -> Option<Cached> {
    let modified = mtime(path).ok()?;
    let map = cache().lock().unwrap();
    let entry = map.get(path)?;
    if entry.mtime == modified {
        Some(entry.content.clone())
    } else {
        None
    }
}

fn forget(path: &Path) {
    cache().lock().unwrap().remove(path);
}

pub fn save_text(path: &Path, content: &str) -> Result<()> {
    prepare_write(path)?;
    fs::write(path, content)?;
    remember(path, Cached::Text(content.to_string()));
    Ok(())
}

pub fn save_json(path: &Path, value: &Value) -> Result<()> {
    prepare_write(path)?;
    fs::write(path, serde_json::to_vec_pretty(value)?)?;
    remember(path, Cached::Json(value.clone()));
    Ok(())
}

pub fn save_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    prepare_write(path)?;
    fs::write(path, bytes)?;
    remember(path, Cached::Bytes(bytes.to_vec()));
    Ok(())
}

pub fn load_text(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        forget(path);
        return Ok(None);
    }
    if let Some(Cached::Text(text)) = recall(path) {
        return Ok(Some(text));
    }
    let text = fs::read_to_string(path)?;
    remember(path, Cached::Text(text.clone()));
    Ok(Some(text))
}

pub fn load_json(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        forget(path);
        return Ok(None);
    }
    if let Some(Cached::Json(value)) = recall(path) {
        return Ok(Some(value));
    }
    let value: Value = serde_json::from_slice(&fs::read(path)?)?;
    remember(path, Cached::Json(value.clone()));
    Ok(Some(value))
}

pub fn load_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
    if !path.exists() {
        forget(path);
        return Ok(None);
    }
    if let Some(Cached::Bytes(bytes)) = recall(path) {
        return Ok(Some(bytes));
    }
    let bytes = fs::read(path)?;
    remember(path, Cached::Bytes(bytes.clone()));
    Ok(Some(bytes))
}

pub fn delete(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    forget(path);
    Ok(())
}

/// Remove a directory tree. A non-empty directory asks for confirmation
/// unless suppressed; returns whether the removal actually happened.
pub fn delete_dir(path: &Path, need_confirm: bool) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    let non_empty = fs::read_dir(path)?.next().is_some();
    if non_empty
        && !confirm::request(
            need_confirm,
            &format!("Dir `{}` isn't empty - delete anyway?", path.display()),
        )
    {
        return Ok(false);
    }
    for entry in WalkDir::new(path).into_iter().flatten() {
        if entry.file_type().is_file() {
            forget(entry.path());
        }
    }
    fs::remove_dir_all(path)?;
    tracing::debug!(dir = %path.display(), "removed directory tree");
    Ok(true)
}
