//! A numbered group of experiments. The group's own status is aggregated
//! bottom-up from its children on every reload.

use std::path::{Path, PathBuf};

use labtree_core::error::{Error, Result};

use crate::container::{aggregate_status, ChildKey, ChildSet, TreeNode};
use crate::exp::Experiment;
use crate::filter::ExpQuery;
use crate::node::StructCore;
use crate::note::Note;
use crate::paths;
use crate::pipeline::TaskRegistry;
use crate::status::{StatusKind, StructStatus};

#[derive(Debug)]
pub struct Group {
    core: StructCore,
    exps: ChildSet<Experiment>,
}

impl TreeNode for Group {
    const DIR_PREFIX: &'static str = paths::GROUP_DIR_PREFIX;
    const KIND: &'static str = "group";

    fn open(location_dir: PathBuf) -> Result<Self> {
        let core = StructCore::open(location_dir)?;
        let mut group = Self {
            core,
            exps: ChildSet::new(),
        };
        group.reload()?;
        Ok(group)
    }

    fn create(location_dir: PathBuf, name: &str, descr: &str) -> Result<Self> {
        let core = StructCore::create(location_dir, name, descr)?;
        let mut group = Self {
            core,
            exps: ChildSet::new(),
        };
        group.reload()?;
        Ok(group)
    }

    fn core(&self) -> &StructCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StructCore {
        &mut self.core
    }

    fn reload(&mut self) -> Result<()> {
        if !self.core.begin_update() {
            return Ok(());
        }
        let result = self.reload_inner();
        self.core.end_update();
        result
    }

    fn destroy_check(&self) -> Result<()> {
        for exp in self.exps.children() {
            exp.destroy_check()?;
        }
        Ok(())
    }
}

impl Group {
    fn reload_inner(&mut self) -> Result<()> {
        self.core.refresh()?;
        let dir = self.core.location_dir().to_path_buf();
        self.exps.sync(&dir)?;
        let kind = aggregate_status(&self.exps.status_kinds());
        self.core.apply_status((kind, None))
    }

    pub fn location_dir(&self) -> &Path {
        self.core.location_dir()
    }

    pub fn num(&self) -> u32 {
        self.core.num().unwrap_or(0)
    }

    /// Entity name, synchronized with disk first.
    pub fn name(&mut self) -> Result<&str> {
        self.reload()?;
        Ok(&self.core.data().name)
    }

    pub fn descr(&mut self) -> Result<&str> {
        self.reload()?;
        Ok(&self.core.data().descr)
    }

    /// Aggregated status, synchronized with disk first.
    pub fn status(&mut self) -> Result<&StructStatus> {
        self.reload()?;
        Ok(self.core.status())
    }

    pub fn update(&mut self) -> Result<()> {
        self.reload()
    }

    pub fn set_manual_status(&mut self, kind: &str, resolution: Option<&str>) -> Result<()> {
        self.core.set_manual_status(kind, resolution)?;
        self.reload()
    }

    pub fn delete_manual_status(&mut self) -> Result<()> {
        self.core.delete_manual_status()?;
        self.reload()
    }

    pub fn note(&self) -> Note {
        Note::new(self.core.location_dir())
    }

    // ----- experiments -----

    pub fn make_exp(&mut self, name: &str, descr: &str, num: Option<u32>) -> Result<u32> {
        let dir = self.core.location_dir().to_path_buf();
        let num = self.exps.make_child(&dir, name, descr, num)?;
        self.reload()?;
        Ok(num)
    }

    pub fn destroy_exp(&mut self, key: impl Into<ChildKey>, need_confirm: bool) -> Result<bool> {
        let dir = self.core.location_dir().to_path_buf();
        let removed = self.exps.delete_child(&dir, &key.into(), need_confirm)?;
        if removed {
            self.reload()?;
        }
        Ok(removed)
    }

    pub fn has_exp(&self, key: impl Into<ChildKey>) -> Result<bool> {
        self.exps.has(&key.into())
    }

    pub fn exp(&self, key: impl Into<ChildKey>) -> Result<&Experiment> {
        self.exps.get(&key.into())
    }

    /// Mutable handle on a child experiment; the group resynchronizes with
    /// disk first, so the handle starts from the current on-disk state.
    pub fn exp_mut(&mut self, key: impl Into<ChildKey>) -> Result<&mut Experiment> {
        self.reload()?;
        self.exps.get_mut(&key.into())
    }

    pub fn exps(&self) -> impl Iterator<Item = &Experiment> {
        self.exps.children()
    }

    pub fn exp_nums(&self) -> Vec<u32> {
        self.exps.nums()
    }

    pub fn exp_names(&self) -> Vec<String> {
        self.exps.names()
    }

    pub fn num_exps(&self) -> usize {
        self.exps.len()
    }

    pub fn change_exp_num(&mut self, key: impl Into<ChildKey>, new_num: u32) -> Result<()> {
        let key = key.into();
        self.exps.get(&key)?.destroy_check()?;
        let dir = self.core.location_dir().to_path_buf();
        self.exps.change_child_num(&dir, &key, new_num)?;
        self.reload()
    }

    pub fn edit(&mut self, name: Option<&str>, descr: Option<&str>) -> Result<()> {
        if let Some(name) = name {
            self.core.set_name(name)?;
        }
        if let Some(descr) = descr {
            self.core.set_descr(descr)?;
        }
        Ok(())
    }

    pub fn edit_exp(
        &mut self,
        key: impl Into<ChildKey>,
        name: Option<&str>,
        descr: Option<&str>,
    ) -> Result<()> {
        self.exps.edit_child(&key.into(), name, descr)
    }

    /// Lowest-numbered experiment ready to be started, if any: TODO first,
    /// then interrupted IN_PROGRESS runs that are idle again.
    pub fn exp_for_start(&self) -> Result<Option<u32>> {
        if let Some(num) = self.exps.child_by_status(&[StatusKind::Todo]) {
            return Ok(Some(num));
        }
        for exp in self.exps.children() {
            if exp.core().status().kind == StatusKind::InProgress && exp.is_ready_for_start()? {
                return Ok(Some(exp.num()));
            }
        }
        Ok(None)
    }

    /// Start one experiment (the given one, or the next ready one), then
    /// optionally keep starting while ready experiments remain. With
    /// nothing to start at all, NothingToDo.
    pub fn start(
        &mut self,
        registry: &TaskRegistry,
        exp_num: Option<u32>,
        autostart_next: bool,
    ) -> Result<()> {
        let first = match exp_num {
            Some(num) => num,
            None => self.exp_for_start()?.ok_or_else(|| {
                Error::NothingToDo(format!(
                    "no experiment in group `{}` is ready to start",
                    self.core.location_dir().display()
                ))
            })?,
        };
        self.exp_mut(first)?.start(registry)?;
        self.reload()?;
        if autostart_next {
            while let Some(num) = self.exp_for_start()? {
                self.exp_mut(num)?.start(registry)?;
                self.reload()?;
            }
        }
        Ok(())
    }

    pub fn filter_exps(&mut self, query: &ExpQuery) -> Result<Vec<u32>> {
        self.reload()?;
        self.filter_exps_cached(query)
    }

    // Filter over the already-synchronized view; callers own the reload.
    pub(crate) fn filter_exps_cached(&self, query: &ExpQuery) -> Result<Vec<u32>> {
        let mut nums = Vec::new();
        for exp in self.exps.children() {
            if query.matches(exp)? {
                nums.push(exp.num());
            }
        }
        Ok(nums)
    }

    // Index surgery for moving an experiment between groups; the caller
    // owns the directory rename.
    pub(crate) fn take_exp(&mut self, key: &ChildKey) -> Result<Experiment> {
        self.exps.get(key)?.destroy_check()?;
        self.exps.remove_entry(key)
    }

    pub(crate) fn insert_exp(&mut self, exp: Experiment) -> Result<()> {
        self.exps.insert_entry(exp)?;
        self.reload()
    }

    pub(crate) fn has_exp_num(&self, num: u32) -> Result<bool> {
        self.exps.has(&ChildKey::Num(num))
    }

    pub(crate) fn highest_exp_num(&self) -> u32 {
        self.exps.highest_num()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RunSpec;
    use serde_json::{json, Value};

    fn make_group(dir: &Path) -> Group {
        Group::create(dir.join("group1"), "baseline", "baseline runs").unwrap()
    }

    #[test]
    fn empty_group_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut group = make_group(dir.path());
        assert_eq!(group.status().unwrap().kind, StatusKind::Empty);
        assert_eq!(group.num_exps(), 0);
    }

    #[test]
    fn make_exp_assigns_sequential_nums() {
        let dir = tempfile::tempdir().unwrap();
        let mut group = make_group(dir.path());
        assert_eq!(group.make_exp("first", "", None).unwrap(), 1);
        assert_eq!(group.make_exp("second", "", None).unwrap(), 2);
        assert_eq!(group.make_exp("fifth", "", Some(5)).unwrap(), 5);
        assert_eq!(group.make_exp("sixth", "", None).unwrap(), 6);
        assert_eq!(group.exp_nums(), vec![1, 2, 5, 6]);
        assert_eq!(group.exp("second").unwrap().num(), 2);
    }

    #[test]
    fn duplicate_exp_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut group = make_group(dir.path());
        group.make_exp("twin", "", None).unwrap();
        assert!(matches!(
            group.make_exp("twin", "", None).unwrap_err(),
            Error::AlreadyExists(_)
        ));
    }

    #[test]
    fn terminal_and_empty_mix_aggregates_to_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut group = make_group(dir.path());
        group.make_exp("e1", "", None).unwrap();
        group.make_exp("e2", "", None).unwrap();
        group
            .exp_mut(1)
            .unwrap()
            .fail("bad config")
            .unwrap();
        group.update().unwrap();
        // FAIL + EMPTY has no dedicated rule and falls to IN_PROGRESS
        assert_eq!(group.status().unwrap().kind, StatusKind::InProgress);
    }

    #[test]
    fn change_exp_num_moves_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut group = make_group(dir.path());
        group.make_exp("e1", "", None).unwrap();
        group.change_exp_num(1, 7).unwrap();
        assert_eq!(group.exp_nums(), vec![7]);
        assert!(group.location_dir().join("exp7").exists());
        assert!(!group.location_dir().join("exp1").exists());
        assert_eq!(group.exp("e1").unwrap().num(), 7);
    }

    #[test]
    fn change_exp_num_collision_keeps_indices() {
        let dir = tempfile::tempdir().unwrap();
        let mut group = make_group(dir.path());
        group.make_exp("e1", "", None).unwrap();
        group.make_exp("e2", "", None).unwrap();
        assert!(matches!(
            group.change_exp_num(1, 2).unwrap_err(),
            Error::AlreadyExists(_)
        ));
        assert_eq!(group.exp_nums(), vec![1, 2]);
        assert_eq!(group.exp("e1").unwrap().num(), 1);
    }

    #[test]
    fn start_without_ready_exp_is_nothing_to_do() {
        let dir = tempfile::tempdir().unwrap();
        let mut group = make_group(dir.path());
        group.make_exp("e1", "", None).unwrap();
        let registry = TaskRegistry::new();
        assert!(matches!(
            group.start(&registry, None, false).unwrap_err(),
            Error::NothingToDo(_)
        ));
    }

    #[test]
    fn autostart_runs_every_ready_exp() {
        let dir = tempfile::tempdir().unwrap();
        let mut group = make_group(dir.path());
        let mut registry = TaskRegistry::new();
        registry
            .register("echo", |_m, params| Ok(params.clone()))
            .unwrap();
        for name in ["e1", "e2", "e3"] {
            let num = group.make_exp(name, "", None).unwrap();
            group
                .exp_mut(num)
                .unwrap()
                .make_pipeline(
                    RunSpec {
                        task: "echo".into(),
                        params: json!(name),
                    },
                    true,
                )
                .unwrap();
        }
        group.start(&registry, None, true).unwrap();
        assert_eq!(group.status().unwrap().kind, StatusKind::Done);
        for num in group.exp_nums() {
            assert_eq!(
                group.exp_mut(num).unwrap().status().unwrap().kind,
                StatusKind::Done
            );
        }
        assert_eq!(
            group.exp_mut(2).unwrap().result().unwrap(),
            Some(Value::from("e2"))
        );
    }

    #[test]
    fn destroy_exp_updates_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let mut group = make_group(dir.path());
        group.make_exp("e1", "", None).unwrap();
        assert!(group.destroy_exp(1, false).unwrap());
        assert_eq!(group.num_exps(), 0);
        assert_eq!(group.status().unwrap().kind, StatusKind::Empty);
        assert!(matches!(
            group.exp(1).unwrap_err(),
            Error::NotExists(_)
        ));
    }

    #[test]
    fn reopen_restores_children_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let location = {
            let mut group = make_group(dir.path());
            group.make_exp("e1", "", None).unwrap();
            group.exp_mut(1).unwrap().success("all good").unwrap();
            group.location_dir().to_path_buf()
        };
        let mut group = Group::open(location).unwrap();
        assert_eq!(group.exp_nums(), vec![1]);
        assert_eq!(group.status().unwrap().kind, StatusKind::Success);
    }
}
