//! The project root: owns the groups, addresses experiments across groups
//! (including `"<group>.<exp>"` dot-num strings) and aggregates the overall
//! status.

use std::fs;
use std::path::{Path, PathBuf};

use labtree_core::error::{Error, Result};

use crate::container::{aggregate_status, ChildKey, ChildSet, TreeNode};
use crate::exp::Experiment;
use crate::filter::ExpQuery;
use crate::group::Group;
use crate::node::StructCore;
use crate::note::Note;
use crate::paths;
use crate::pipeline::TaskRegistry;
use crate::status::StructStatus;

/// `"1.2"` -> group 1, experiment 2.
pub fn parse_dot_num(dot_num: &str) -> Result<(u32, u32)> {
    let malformed = || {
        Error::Arguments(format!(
            "`{dot_num}` is not a `<group>.<exp>` pair of positive numbers"
        ))
    };
    let (group, exp) = dot_num.split_once('.').ok_or_else(malformed)?;
    let parse = |s: &str| -> Result<u32> {
        if s.is_empty() || s.starts_with('0') || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        s.parse().map_err(|_| malformed())
    };
    Ok((parse(group)?, parse(exp)?))
}

#[derive(Debug)]
pub struct Project {
    core: StructCore,
    groups: ChildSet<Group>,
}

impl Project {
    /// Create a project in `location_dir`; the directory must not already
    /// hold one.
    pub fn create(location_dir: impl Into<PathBuf>, name: &str, descr: &str) -> Result<Self> {
        let location_dir = location_dir.into();
        if paths::data_path(&location_dir).exists() {
            return Err(Error::AlreadyExists(format!(
                "`{}` already holds a project",
                location_dir.display()
            )));
        }
        if location_dir.is_dir() && fs::read_dir(&location_dir)?.next().is_some() {
            return Err(Error::Arguments(format!(
                "`{}` exists and is not empty",
                location_dir.display()
            )));
        }
        let mut core = StructCore::create(location_dir, name, descr)?;
        core.clear_num();
        let mut proj = Self {
            core,
            groups: ChildSet::new(),
        };
        proj.reload()?;
        tracing::info!(dir = %proj.core.location_dir().display(), name, "created project");
        Ok(proj)
    }

    pub fn open(location_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut core = StructCore::open(location_dir.into())?;
        core.clear_num();
        let mut proj = Self {
            core,
            groups: ChildSet::new(),
        };
        proj.reload()?;
        Ok(proj)
    }

    fn reload(&mut self) -> Result<()> {
        if !self.core.begin_update() {
            return Ok(());
        }
        let result = self.reload_inner();
        self.core.end_update();
        result
    }

    fn reload_inner(&mut self) -> Result<()> {
        self.core.refresh()?;
        let dir = self.core.location_dir().to_path_buf();
        self.groups.sync(&dir)?;
        let kind = aggregate_status(&self.groups.status_kinds());
        self.core.apply_status((kind, None))
    }

    pub fn location_dir(&self) -> &Path {
        self.core.location_dir()
    }

    /// Project name, synchronized with disk first.
    pub fn name(&mut self) -> Result<&str> {
        self.reload()?;
        Ok(&self.core.data().name)
    }

    pub fn descr(&mut self) -> Result<&str> {
        self.reload()?;
        Ok(&self.core.data().descr)
    }

    /// Aggregated status over all groups, synchronized with disk first.
    pub fn status(&mut self) -> Result<&StructStatus> {
        self.reload()?;
        Ok(self.core.status())
    }

    pub fn update(&mut self) -> Result<()> {
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

    // ----- groups -----

    pub fn make_group(&mut self, name: &str, descr: &str, num: Option<u32>) -> Result<u32> {
        let dir = self.core.location_dir().to_path_buf();
        let num = self.groups.make_child(&dir, name, descr, num)?;
        self.reload()?;
        Ok(num)
    }

    pub fn destroy_group(&mut self, key: impl Into<ChildKey>, need_confirm: bool) -> Result<bool> {
        let dir = self.core.location_dir().to_path_buf();
        let removed = self.groups.delete_child(&dir, &key.into(), need_confirm)?;
        if removed {
            self.reload()?;
        }
        Ok(removed)
    }

    pub fn has_group(&self, key: impl Into<ChildKey>) -> Result<bool> {
        self.groups.has(&key.into())
    }

    pub fn group(&self, key: impl Into<ChildKey>) -> Result<&Group> {
        self.groups.get(&key.into())
    }

    /// Mutable handle on a group; the project resynchronizes with disk
    /// first, so the handle starts from the current on-disk state.
    pub fn group_mut(&mut self, key: impl Into<ChildKey>) -> Result<&mut Group> {
        self.reload()?;
        self.groups.get_mut(&key.into())
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.children()
    }

    pub fn group_nums(&self) -> Vec<u32> {
        self.groups.nums()
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.names()
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn change_group_num(&mut self, key: impl Into<ChildKey>, new_num: u32) -> Result<()> {
        let key = key.into();
        self.groups.get(&key)?.destroy_check()?;
        let dir = self.core.location_dir().to_path_buf();
        self.groups.change_child_num(&dir, &key, new_num)?;
        self.reload()
    }

    pub fn edit_group(
        &mut self,
        key: impl Into<ChildKey>,
        name: Option<&str>,
        descr: Option<&str>,
    ) -> Result<()> {
        self.groups.edit_child(&key.into(), name, descr)
    }

    // ----- experiments across groups -----

    pub fn make_exp(
        &mut self,
        group: impl Into<ChildKey>,
        name: &str,
        descr: &str,
        num: Option<u32>,
    ) -> Result<u32> {
        let num = self.group_mut(group)?.make_exp(name, descr, num)?;
        self.reload()?;
        Ok(num)
    }

    pub fn destroy_exp(
        &mut self,
        group: impl Into<ChildKey>,
        exp: impl Into<ChildKey>,
        need_confirm: bool,
    ) -> Result<bool> {
        let removed = self.group_mut(group)?.destroy_exp(exp, need_confirm)?;
        if removed {
            self.reload()?;
        }
        Ok(removed)
    }

    pub fn exp(
        &self,
        group: impl Into<ChildKey>,
        exp: impl Into<ChildKey>,
    ) -> Result<&Experiment> {
        self.group(group)?.exp(exp)
    }

    pub fn exp_mut(
        &mut self,
        group: impl Into<ChildKey>,
        exp: impl Into<ChildKey>,
    ) -> Result<&mut Experiment> {
        self.group_mut(group)?.exp_mut(exp)
    }

    pub fn exp_by_dot_num(&self, dot_num: &str) -> Result<&Experiment> {
        let (group, exp) = parse_dot_num(dot_num)?;
        self.exp(group, exp)
    }

    pub fn exp_by_dot_num_mut(&mut self, dot_num: &str) -> Result<&mut Experiment> {
        let (group, exp) = parse_dot_num(dot_num)?;
        self.exp_mut(group, exp)
    }

    /// Start one experiment addressed as `"<group>.<exp>"`.
    pub fn start(&mut self, registry: &TaskRegistry, dot_num: &str) -> Result<()> {
        let (group, exp) = parse_dot_num(dot_num)?;
        self.group_mut(group)?.start(registry, Some(exp), false)?;
        self.reload()
    }

    /// Start the next ready experiment, scanning groups in num order.
    /// With `autostart_next`, keep going while anything is ready.
    pub fn start_next(&mut self, registry: &TaskRegistry, autostart_next: bool) -> Result<()> {
        self.reload()?;
        let mut started_any = false;
        loop {
            let mut target = None;
            for group in self.groups.children() {
                if let Some(exp_num) = group.exp_for_start()? {
                    target = Some((group.num(), exp_num));
                    break;
                }
            }
            let Some((group_num, exp_num)) = target else {
                if started_any {
                    return Ok(());
                }
                return Err(Error::NothingToDo(format!(
                    "no experiment in project `{}` is ready to start",
                    self.core.location_dir().display()
                )));
            };
            self.group_mut(group_num)?
                .start(registry, Some(exp_num), false)?;
            self.reload()?;
            started_any = true;
            if !autostart_next {
                return Ok(());
            }
        }
    }

    /// Move an experiment to another group, keeping its num when free,
    /// taking the next free one otherwise.
    pub fn move_exp(
        &mut self,
        from_group: impl Into<ChildKey>,
        exp: impl Into<ChildKey>,
        to_group: impl Into<ChildKey>,
        new_num: Option<u32>,
    ) -> Result<u32> {
        let src_num = self.groups.resolve(&from_group.into())?;
        let dst_num = self.groups.resolve(&to_group.into())?;
        if src_num == dst_num {
            return Err(Error::Arguments(
                "the target group is the experiment's current group; \
                 use change_exp_num instead"
                    .to_string(),
            ));
        }
        let exp_key = exp.into();
        let (exp_name, old_dir) = {
            let exp = self.group(src_num)?.exp(exp_key.clone())?;
            (
                exp.core().data().name.clone(),
                exp.location_dir().to_path_buf(),
            )
        };
        let target_num = {
            let dst = self.group(dst_num)?;
            if dst.exp_names().iter().any(|n| n == &exp_name) {
                return Err(Error::AlreadyExists(format!(
                    "group {dst_num} already has an experiment named `{exp_name}`"
                )));
            }
            match new_num {
                Some(num) => {
                    if dst.has_exp_num(num)? {
                        return Err(Error::AlreadyExists(format!(
                            "group {dst_num} already has an experiment {num}"
                        )));
                    }
                    num
                }
                None => dst.highest_exp_num() + 1,
            }
        };
        let new_dir = paths::child_dir(
            self.group(dst_num)?.location_dir(),
            paths::EXP_DIR_PREFIX,
            target_num,
        );
        let mut exp = self
            .groups
            .get_mut(&ChildKey::Num(src_num))?
            .take_exp(&exp_key)?;
        if let Err(rename_err) = fs::rename(&old_dir, &new_dir) {
            // put the detached experiment back before surfacing the failure
            if let Ok(src) = self.groups.get_mut(&ChildKey::Num(src_num)) {
                let _ = src.insert_exp(exp);
            }
            return Err(rename_err.into());
        }
        exp.core_mut().relocate(new_dir);
        self.groups
            .get_mut(&ChildKey::Num(dst_num))?
            .insert_exp(exp)?;
        self.groups.get_mut(&ChildKey::Num(src_num))?.update()?;
        self.reload()?;
        tracing::info!(
            from = src_num,
            to = dst_num,
            num = target_num,
            name = %exp_name,
            "moved experiment"
        );
        Ok(target_num)
    }

    /// Dot-num form of [`Self::move_exp`]: `"1.2"` to `"3.1"` moves group
    /// 1's experiment 2 to slot 1 of group 3.
    pub fn move_exp_by_dot_num(&mut self, dot_num: &str, new_dot_num: &str) -> Result<u32> {
        let (from_group, exp) = parse_dot_num(dot_num)?;
        let (to_group, new_num) = parse_dot_num(new_dot_num)?;
        self.move_exp(from_group, exp, to_group, Some(new_num))
    }

    /// Matching experiments across all groups, as `(group, exp)` num pairs,
    /// over a freshly synchronized view.
    pub fn filter_exps(&mut self, query: &ExpQuery) -> Result<Vec<(u32, u32)>> {
        self.reload()?;
        let mut pairs = Vec::new();
        for group in self.groups.children() {
            for exp_num in group.filter_exps_cached(query)? {
                pairs.push((group.num(), exp_num));
            }
        }
        Ok(pairs)
    }
}
