//! Free-form per-entity notes, one file per flavor (`note.txt`,
//! `note.json`) in the entity's directory.

use std::path::{Path, PathBuf};

use serde_json::Value;

use labtree_core::confirm;
use labtree_core::error::Result;
use labtree_core::fileio;

use crate::paths;

const TXT_EXT: &str = "txt";
const JSON_EXT: &str = "json";

#[derive(Debug, Clone)]
pub struct Note {
    location_dir: PathBuf,
}

impl Note {
    pub(crate) fn new(location_dir: &Path) -> Self {
        Self {
            location_dir: location_dir.to_path_buf(),
        }
    }

    pub fn txt(&self) -> Result<Option<String>> {
        fileio::load_text(&paths::note_path(&self.location_dir, TXT_EXT))
    }

    pub fn set_txt(&mut self, text: &str) -> Result<()> {
        fileio::save_text(&paths::note_path(&self.location_dir, TXT_EXT), text)
    }

    pub fn json(&self) -> Result<Option<Value>> {
        fileio::load_json(&paths::note_path(&self.location_dir, JSON_EXT))
    }

    pub fn set_json(&mut self, value: &Value) -> Result<()> {
        fileio::save_json(&paths::note_path(&self.location_dir, JSON_EXT), value)
    }

    pub fn paths_list(&self) -> Vec<PathBuf> {
        [TXT_EXT, JSON_EXT]
            .iter()
            .map(|ext| paths::note_path(&self.location_dir, ext))
            .filter(|p| p.exists())
            .collect()
    }

    pub fn has_any(&self) -> bool {
        !self.paths_list().is_empty()
    }

    /// Delete every note file. Returns false when the user declined.
    pub fn clear(&mut self, need_confirm: bool) -> Result<bool> {
        let existing = self.paths_list();
        if existing.is_empty() {
            return Ok(true);
        }
        if !confirm::request(
            need_confirm,
            &format!("Remove all notes of `{}`?", self.location_dir.display()),
        ) {
            return Ok(false);
        }
        for path in existing {
            fileio::delete(&path)?;
        }
        Ok(true)
    }
}
