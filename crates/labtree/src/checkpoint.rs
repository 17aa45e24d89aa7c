//! Durable intermediate state for running pipelines. Checkpoints are opaque
//! user blobs stored under the experiment's `checkpoints/` directory and
//! tracked in a `list.json` manifest of relative (or custom absolute) paths.

use std::fs;
use std::path::{Path, PathBuf};

use labtree_core::confirm;
use labtree_core::error::{Error, Result};
use labtree_core::fileio;

use crate::paths;

/// Handed to checkpoint-aware pipeline callables as their first argument.
#[derive(Debug, Clone)]
pub struct CheckpointsMediator {
    exp_location_dir: PathBuf,
}

impl CheckpointsMediator {
    pub(crate) fn new(exp_location_dir: &Path) -> Self {
        Self {
            exp_location_dir: exp_location_dir.to_path_buf(),
        }
    }

    pub fn exp_location_dir(&self) -> &Path {
        &self.exp_location_dir
    }

    fn listed(&self) -> Result<Vec<String>> {
        let path = paths::checkpoints_list_path(&self.exp_location_dir);
        match fileio::load_json(&path)? {
            None => Ok(Vec::new()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }

    fn save_list(&self, list: &[String]) -> Result<()> {
        let path = paths::checkpoints_list_path(&self.exp_location_dir);
        fileio::save_json(&path, &serde_json::to_value(list)?)
    }

    /// Save a checkpoint blob. `replace` first deletes every previously
    /// listed checkpoint (single-slot semantics); otherwise the new entry is
    /// appended. Returns the recorded path: relative to the experiment
    /// directory when stored inside it, as given otherwise.
    pub fn save_checkpoint(
        &mut self,
        blob: &[u8],
        replace: bool,
        custom_path: Option<&Path>,
    ) -> Result<String> {
        if replace {
            self.delete_listed_checkpoints()?;
        }
        let target = match custom_path {
            Some(path) => path.to_path_buf(),
            None => paths::new_checkpoint_path(&self.exp_location_dir),
        };
        fileio::save_bytes(&target, blob)?;
        let recorded = self.record_path(&target);
        let mut list = self.listed()?;
        list.push(recorded.clone());
        self.save_list(&list)?;
        tracing::debug!(exp = %self.exp_location_dir.display(), path = %recorded, "saved checkpoint");
        Ok(recorded)
    }

    fn record_path(&self, target: &Path) -> String {
        let canonical_dir = fs::canonicalize(&self.exp_location_dir)
            .unwrap_or_else(|_| self.exp_location_dir.clone());
        let canonical_target =
            fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
        match canonical_target.strip_prefix(&canonical_dir) {
            Ok(relative) => relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => target.to_string_lossy().into_owned(),
        }
    }

    /// Paths of all tracked checkpoints in insertion order. With
    /// `check_files_exist`, every entry that no longer resolves to a file is
    /// reported instead of silently hidden.
    pub fn get_checkpoint_paths_list(&self, check_files_exist: bool) -> Result<Vec<String>> {
        let list = self.listed()?;
        if check_files_exist {
            let missing: Vec<&str> = list
                .iter()
                .filter(|p| self.resolve(p).is_none())
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(Error::NotExists(format!(
                    "checkpoints listed but missing on disk: {missing:?}"
                )));
            }
        }
        Ok(list)
    }

    fn resolve(&self, cp_path: &str) -> Option<PathBuf> {
        let under_exp = self.exp_location_dir.join(cp_path);
        if under_exp.exists() {
            return Some(under_exp);
        }
        let as_given = PathBuf::from(cp_path);
        if as_given.exists() {
            return Some(as_given);
        }
        None
    }

    /// Resolve relative-to-experiment-dir first, then as given.
    pub fn load_checkpoint(&self, cp_path: &str) -> Result<Vec<u8>> {
        let path = self.resolve(cp_path).ok_or_else(|| {
            Error::NotExists(format!("can't resolve checkpoint path `{cp_path}`"))
        })?;
        fileio::load_bytes(&path)?
            .ok_or_else(|| Error::NotExists(format!("can't resolve checkpoint path `{cp_path}`")))
    }

    fn delete_listed_checkpoints(&self) -> Result<()> {
        for cp_path in self.listed()? {
            if let Some(path) = self.resolve(&cp_path) {
                fileio::delete(&path)?;
            }
        }
        fileio::delete(&paths::checkpoints_list_path(&self.exp_location_dir))?;
        Ok(())
    }

    /// Remove every tracked checkpoint, the manifest and the `checkpoints/`
    /// directory itself. Returns false when the user declined.
    pub fn delete_checkpoints(&mut self, need_confirm: bool) -> Result<bool> {
        let dir = paths::checkpoints_dir(&self.exp_location_dir);
        if !dir.exists() && self.listed()?.is_empty() {
            return Ok(true);
        }
        if !confirm::request(
            need_confirm,
            &format!(
                "Delete all checkpoints of `{}`?",
                self.exp_location_dir.display()
            ),
        ) {
            return Ok(false);
        }
        self.delete_listed_checkpoints()?;
        fileio::delete_dir(&dir, false)?;
        Ok(true)
    }
}
