//! Keyed child collections and bottom-up status aggregation shared by the
//! two container kinds (project over groups, group over experiments).

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use labtree_core::confirm;
use labtree_core::error::{Error, Result};
use labtree_core::fileio;

use crate::node::StructCore;
use crate::paths;
use crate::status::StatusKind;

/// Children are addressed either by their positive number or by their
/// sibling-unique name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildKey {
    Num(u32),
    Name(String),
}

impl From<u32> for ChildKey {
    fn from(num: u32) -> Self {
        ChildKey::Num(num)
    }
}

impl From<&str> for ChildKey {
    fn from(name: &str) -> Self {
        ChildKey::Name(name.to_string())
    }
}

impl From<String> for ChildKey {
    fn from(name: String) -> Self {
        ChildKey::Name(name)
    }
}

impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildKey::Num(num) => write!(f, "{num}"),
            ChildKey::Name(name) => write!(f, "`{name}`"),
        }
    }
}

/// A child entity managed by a [`ChildSet`].
pub(crate) trait TreeNode: Sized {
    const DIR_PREFIX: &'static str;
    const KIND: &'static str;

    fn open(location_dir: PathBuf) -> Result<Self>;
    fn create(location_dir: PathBuf, name: &str, descr: &str) -> Result<Self>;
    fn core(&self) -> &StructCore;
    fn core_mut(&mut self) -> &mut StructCore;
    fn reload(&mut self) -> Result<()>;

    /// Refuse destruction while the entity (or a descendant) is live.
    fn destroy_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Container automatic status: an ordered, short-circuiting rule over the
/// children's (already updated) statuses; first match wins. An empty child
/// set satisfies the "all" rules vacuously, so a container without children
/// reports EMPTY.
pub fn aggregate_status(kinds: &[StatusKind]) -> StatusKind {
    use crate::status::StatusKind as S;
    let any = |kind: S| kinds.iter().any(|&k| k == kind);
    let all_in = |set: &[S]| kinds.iter().all(|k| set.contains(k));
    if any(S::Error) {
        S::Error
    } else if any(S::InProgress) {
        S::InProgress
    } else if all_in(&[S::Empty]) {
        S::Empty
    } else if all_in(&[S::Todo]) {
        S::Todo
    } else if all_in(&[S::Done]) {
        S::Done
    } else if all_in(&[S::Success]) {
        S::Success
    } else if all_in(&[S::Fail]) {
        S::Fail
    } else if all_in(&[S::Empty, S::Todo]) {
        S::Todo
    } else if all_in(&[S::Done, S::Success, S::Fail]) {
        S::Done
    } else {
        // mixed terminal/non-terminal without an explicit rule
        S::InProgress
    }
}

#[derive(Debug)]
pub(crate) struct ChildSet<T> {
    by_num: BTreeMap<u32, T>,
    name_to_num: BTreeMap<String, u32>,
}

impl<T: TreeNode> ChildSet<T> {
    pub fn new() -> Self {
        Self {
            by_num: BTreeMap::new(),
            name_to_num: BTreeMap::new(),
        }
    }

    /// Resynchronize with the on-disk child directories: instantiate new
    /// ones, drop vanished ones, reload survivors, rebuild the name index.
    pub fn sync(&mut self, dir: &Path) -> Result<()> {
        let nums = paths::children_nums(dir, T::DIR_PREFIX)?;
        for &num in &nums {
            if !self.by_num.contains_key(&num) {
                let child = T::open(paths::child_dir(dir, T::DIR_PREFIX, num))?;
                self.by_num.insert(num, child);
            }
        }
        let known: Vec<u32> = self.by_num.keys().copied().collect();
        for num in known {
            if !nums.contains(&num) {
                self.by_num.remove(&num);
            }
        }
        for child in self.by_num.values_mut() {
            child.reload()?;
        }
        self.name_to_num.clear();
        for (num, child) in &self.by_num {
            self.name_to_num
                .insert(child.core().data().name.clone(), *num);
        }
        Ok(())
    }

    fn check_key(key: &ChildKey) -> Result<()> {
        match key {
            ChildKey::Num(num) if *num < 1 => Err(Error::Arguments(format!(
                "a child number should be >= 1, but `{num}` was given"
            ))),
            ChildKey::Name(name) if name.trim().is_empty() => Err(Error::Arguments(
                "a child name must not be empty".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn resolve(&self, key: &ChildKey) -> Result<u32> {
        Self::check_key(key)?;
        let found = match key {
            ChildKey::Num(num) => self.by_num.contains_key(num).then_some(*num),
            ChildKey::Name(name) => self.name_to_num.get(name).copied(),
        };
        found.ok_or_else(|| {
            Error::NotExists(format!("there's no {} with num or name {key}", T::KIND))
        })
    }

    pub fn has(&self, key: &ChildKey) -> Result<bool> {
        Self::check_key(key)?;
        Ok(match key {
            ChildKey::Num(num) => self.by_num.contains_key(num),
            ChildKey::Name(name) => self.name_to_num.contains_key(name),
        })
    }

    pub fn get(&self, key: &ChildKey) -> Result<&T> {
        let num = self.resolve(key)?;
        self.by_num
            .get(&num)
            .ok_or_else(|| Error::NotExists(format!("there's no {} {num}", T::KIND)))
    }

    pub fn get_mut(&mut self, key: &ChildKey) -> Result<&mut T> {
        let num = self.resolve(key)?;
        self.by_num
            .get_mut(&num)
            .ok_or_else(|| Error::NotExists(format!("there's no {} {num}", T::KIND)))
    }

    pub fn highest_num(&self) -> u32 {
        self.by_num.keys().max().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.by_num.len()
    }

    pub fn nums(&self) -> Vec<u32> {
        self.by_num.keys().copied().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.by_num
            .values()
            .map(|c| c.core().data().name.clone())
            .collect()
    }

    pub fn children(&self) -> impl Iterator<Item = &T> {
        self.by_num.values()
    }

    pub fn status_kinds(&self) -> Vec<StatusKind> {
        self.by_num
            .values()
            .map(|c| c.core().status().kind)
            .collect()
    }

    /// First child (by number order) whose status is in `kinds`.
    pub fn child_by_status(&self, kinds: &[StatusKind]) -> Option<u32> {
        for &kind in kinds {
            for (num, child) in &self.by_num {
                if child.core().status().kind == kind {
                    return Some(*num);
                }
            }
        }
        None
    }

    /// Create a new child on disk and register it in both indices. The
    /// number defaults to `highest + 1`.
    pub fn make_child(
        &mut self,
        dir: &Path,
        name: &str,
        descr: &str,
        num: Option<u32>,
    ) -> Result<u32> {
        if name.trim().is_empty() {
            return Err(Error::Arguments("a child name must not be empty".into()));
        }
        if let Some(num) = num {
            if num < 1 {
                return Err(Error::Arguments(format!(
                    "num={num} should be None or an integer >= 1"
                )));
            }
        }
        if self.name_to_num.contains_key(name) {
            return Err(Error::AlreadyExists(format!(
                "a {} with the name `{name}` already exists",
                T::KIND
            )));
        }
        if let Some(num) = num {
            if self.by_num.contains_key(&num) {
                return Err(Error::AlreadyExists(format!(
                    "a {} with the num `{num}` already exists",
                    T::KIND
                )));
            }
        }
        let num = num.unwrap_or_else(|| self.highest_num() + 1);
        let child = T::create(paths::child_dir(dir, T::DIR_PREFIX, num), name, descr)?;
        self.name_to_num.insert(name.to_string(), num);
        self.by_num.insert(num, child);
        tracing::info!(kind = T::KIND, num, name, "created child");
        Ok(num)
    }

    /// Destroy a child and its directory tree. Returns false when the user
    /// declined the confirmation.
    pub fn delete_child(&mut self, dir: &Path, key: &ChildKey, need_confirm: bool) -> Result<bool> {
        let num = self.resolve(key)?;
        let child = self
            .by_num
            .get(&num)
            .ok_or_else(|| Error::NotExists(format!("there's no {} {num}", T::KIND)))?;
        child.destroy_check()?;
        let name = child.core().data().name.clone();
        let child_dir = paths::child_dir(dir, T::DIR_PREFIX, num);
        if !confirm::request(
            need_confirm,
            &format!(
                "Remove {} {num} `{name}` and its `{}` dir with all its content?",
                T::KIND,
                child_dir.display()
            ),
        ) {
            return Ok(false);
        }
        fileio::delete_dir(&child_dir, false)?;
        self.by_num.remove(&num);
        self.name_to_num.remove(&name);
        tracing::info!(kind = T::KIND, num, name, "destroyed child");
        Ok(true)
    }

    /// Rename the child's directory to the new number; the child re-derives
    /// its own number from the new path.
    pub fn change_child_num(&mut self, dir: &Path, key: &ChildKey, new_num: u32) -> Result<()> {
        if new_num < 1 {
            return Err(Error::Arguments(format!(
                "num={new_num} should be an integer >= 1"
            )));
        }
        let num = self.resolve(key)?;
        if self.by_num.contains_key(&new_num) {
            return Err(Error::AlreadyExists(format!(
                "a {} with the num `{new_num}` already exists",
                T::KIND
            )));
        }
        let old_dir = paths::child_dir(dir, T::DIR_PREFIX, num);
        let new_dir = paths::child_dir(dir, T::DIR_PREFIX, new_num);
        fs::rename(&old_dir, &new_dir)?;
        let mut child = self
            .by_num
            .remove(&num)
            .ok_or_else(|| Error::NotExists(format!("there's no {} {num}", T::KIND)))?;
        child.core_mut().relocate(new_dir);
        let name = child.core().data().name.clone();
        self.name_to_num.insert(name, new_num);
        self.by_num.insert(new_num, child);
        Ok(())
    }

    /// Rename and/or re-describe a child, enforcing sibling name
    /// uniqueness.
    pub fn edit_child(
        &mut self,
        key: &ChildKey,
        name: Option<&str>,
        descr: Option<&str>,
    ) -> Result<()> {
        let num = self.resolve(key)?;
        if let Some(new_name) = name {
            if let Some(&holder) = self.name_to_num.get(new_name) {
                if holder != num {
                    return Err(Error::AlreadyExists(format!(
                        "another {} with the name `{new_name}` already exists",
                        T::KIND
                    )));
                }
            }
        }
        let child = self
            .by_num
            .get_mut(&num)
            .ok_or_else(|| Error::NotExists(format!("there's no {} {num}", T::KIND)))?;
        if let Some(new_name) = name {
            let old_name = child.core().data().name.clone();
            if old_name != new_name {
                child.core_mut().set_name(new_name)?;
                self.name_to_num.remove(&old_name);
                self.name_to_num.insert(new_name.to_string(), num);
            }
        }
        if let Some(new_descr) = descr {
            if child.core().data().descr != new_descr {
                child.core_mut().set_descr(new_descr)?;
            }
        }
        Ok(())
    }

    /// Detach a child from the indices without touching the disk (used when
    /// moving an experiment between groups).
    pub fn remove_entry(&mut self, key: &ChildKey) -> Result<T> {
        let num = self.resolve(key)?;
        let child = self
            .by_num
            .remove(&num)
            .ok_or_else(|| Error::NotExists(format!("there's no {} {num}", T::KIND)))?;
        self.name_to_num.remove(&child.core().data().name);
        Ok(child)
    }

    /// Register an already-relocated child (disk state must be in place).
    pub fn insert_entry(&mut self, child: T) -> Result<()> {
        let num = child.core().num().ok_or_else(|| {
            Error::Arguments(format!("a {} must carry a number", T::KIND))
        })?;
        let name = child.core().data().name.clone();
        if self.by_num.contains_key(&num) {
            return Err(Error::AlreadyExists(format!(
                "a {} with the num `{num}` already exists",
                T::KIND
            )));
        }
        if self.name_to_num.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "a {} with the name `{name}` already exists",
                T::KIND
            )));
        }
        self.name_to_num.insert(name, num);
        self.by_num.insert(num, child);
        Ok(())
    }
}
