//! Shared identity and lazy-reload state embedded in every structured
//! entity (project, group, experiment).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use labtree_core::error::{Error, Result};
use labtree_core::fileio;

use crate::paths;
use crate::pipeline::PipelineState;
use crate::status::{self, StatusKind, StructStatus};
use crate::store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualStatus {
    pub kind: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

/// Persisted entity data. Containers never carry a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityData {
    pub name: String,
    pub descr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_status: Option<ManualStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineState>,
}

impl EntityData {
    fn new(name: &str, descr: &str) -> Self {
        Self {
            name: name.to_string(),
            descr: descr.to_string(),
            manual_status: None,
            pipeline: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct StructCore {
    location_dir: PathBuf,
    num: Option<u32>,
    data: EntityData,
    marker: Option<i64>,
    status: StructStatus,
    updating: bool,
}

impl StructCore {
    pub fn create(location_dir: PathBuf, name: &str, descr: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(Error::Arguments("entity name must not be empty".into()));
        }
        fileio::make_dir(&location_dir)?;
        let data = EntityData::new(name, descr);
        let marker = store::save(&location_dir, &data)?;
        let num = paths::dir_num(&location_dir);
        Ok(Self {
            location_dir,
            num,
            data,
            marker: Some(marker),
            status: StructStatus::auto(StatusKind::Empty, None),
            updating: false,
        })
    }

    pub fn open(location_dir: PathBuf) -> Result<Self> {
        if !paths::data_path(&location_dir).exists() {
            return Err(Error::NotExists(format!(
                "no entity at `{}`",
                location_dir.display()
            )));
        }
        let marker = store::read_marker(&location_dir)?;
        let data: EntityData = store::load(&location_dir)?;
        let num = paths::dir_num(&location_dir);
        Ok(Self {
            location_dir,
            num,
            data,
            marker,
            status: StructStatus::auto(StatusKind::Empty, None),
            updating: false,
        })
    }

    pub fn location_dir(&self) -> &Path {
        &self.location_dir
    }

    pub fn num(&self) -> Option<u32> {
        self.num
    }

    /// The project root carries no number even when its directory name ends
    /// in digits.
    pub fn clear_num(&mut self) {
        self.num = None;
    }

    pub fn data(&self) -> &EntityData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut EntityData {
        &mut self.data
    }

    pub fn status(&self) -> &StructStatus {
        &self.status
    }

    // Reentrancy guard around a full reload pass. Returns false when a
    // reload is already running further up the call stack.
    pub fn begin_update(&mut self) -> bool {
        if self.updating {
            return false;
        }
        self.updating = true;
        true
    }

    pub fn end_update(&mut self) {
        self.updating = false;
    }

    /// Refresh `data` from disk if the modification marker moved; no blob
    /// deserialize otherwise.
    pub fn refresh(&mut self) -> Result<()> {
        if let Some((data, marker)) = store::load_if_stale(&self.location_dir, self.marker)? {
            self.data = data;
            self.marker = Some(marker);
        }
        Ok(())
    }

    pub fn save(&mut self) -> Result<()> {
        let marker = store::save(&self.location_dir, &self.data)?;
        self.marker = Some(marker);
        Ok(())
    }

    /// Recompute the effective status as a pure function of the current
    /// manual override and the concrete entity's automatic rule output.
    pub fn apply_status(&mut self, auto: (StatusKind, Option<String>)) -> Result<()> {
        self.status = match &self.data.manual_status {
            Some(manual) => StructStatus::manual(manual.kind, manual.resolution.clone())?,
            None => {
                let (kind, resolution) = auto;
                StructStatus::auto(kind, resolution)
            }
        };
        Ok(())
    }

    pub fn set_manual_status(&mut self, kind: &str, resolution: Option<&str>) -> Result<()> {
        let kind: StatusKind = kind.parse()?;
        status::check_manual(kind, resolution)?;
        self.data.manual_status = Some(ManualStatus {
            kind,
            resolution: resolution.map(str::to_string),
        });
        self.save()
    }

    pub fn delete_manual_status(&mut self) -> Result<()> {
        if self.data.manual_status.is_none() {
            return Err(Error::NotExists(format!(
                "there's no manual status on `{}`",
                self.location_dir.display()
            )));
        }
        self.data.manual_status = None;
        self.save()
    }

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::Arguments("entity name must not be empty".into()));
        }
        self.data.name = name.to_string();
        self.save()
    }

    pub fn set_descr(&mut self, descr: &str) -> Result<()> {
        self.data.descr = descr.to_string();
        self.save()
    }

    /// Follow a directory rename/move; the number is re-derived from the
    /// new path.
    pub fn relocate(&mut self, new_dir: PathBuf) {
        self.num = paths::dir_num(&new_dir);
        self.location_dir = new_dir;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let exp_dir = dir.path().join("exp1");
        let core = StructCore::create(exp_dir.clone(), "first", "descr").unwrap();
        assert_eq!(core.num(), Some(1));
        let reopened = StructCore::open(exp_dir).unwrap();
        assert_eq!(reopened.data().name, "first");
        assert_eq!(reopened.data().descr, "descr");
    }

    #[test]
    fn open_missing_entity_is_not_exists() {
        let dir = tempfile::tempdir().unwrap();
        let err = StructCore::open(dir.path().join("exp9")).unwrap_err();
        assert!(matches!(err, Error::NotExists(_)));
    }

    #[test]
    fn manual_status_overrides_auto_rule() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = StructCore::create(dir.path().join("exp1"), "e", "d").unwrap();
        core.apply_status((StatusKind::Todo, None)).unwrap();
        assert_eq!(core.status().kind, StatusKind::Todo);
        assert!(!core.status().manual);

        core.set_manual_status("FAIL", Some("bad config")).unwrap();
        core.apply_status((StatusKind::Todo, None)).unwrap();
        assert_eq!(core.status().kind, StatusKind::Fail);
        assert!(core.status().manual);
        assert_eq!(core.status().resolution.as_deref(), Some("bad config"));

        core.delete_manual_status().unwrap();
        core.apply_status((StatusKind::Todo, None)).unwrap();
        assert_eq!(core.status().kind, StatusKind::Todo);
    }

    #[test]
    fn delete_manual_status_without_one_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = StructCore::create(dir.path().join("exp1"), "e", "d").unwrap();
        assert!(matches!(
            core.delete_manual_status().unwrap_err(),
            Error::NotExists(_)
        ));
    }

    #[test]
    fn refresh_skips_unchanged_blob() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = StructCore::create(dir.path().join("exp1"), "e", "d").unwrap();
        // mutate the in-memory copy only; an honest refresh must keep it
        // because the on-disk marker hasn't moved
        core.data_mut().descr = "local only".into();
        core.refresh().unwrap();
        assert_eq!(core.data().descr, "local only");
    }
}
