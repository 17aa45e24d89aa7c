//! On-disk layout of a structured-entity directory. Directory names encode
//! identity: a group lives in `group<N>`, an experiment in `exp<N>` nested
//! inside its owning group's directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use labtree_core::error::Result;

pub const DATA_FILE: &str = ".data";
pub const TIME_FILE: &str = ".time";
pub const RUN_FILE: &str = ".run";
pub const RUN_TIME_FILE: &str = ".run_time";
pub const MANUAL_RESULT_FILE: &str = ".manual_result";
pub const PIPELINE_RESULT_FILE: &str = ".pipeline_result";
pub const CHECKPOINTS_DIR: &str = "checkpoints";
pub const CHECKPOINTS_LIST_FILE: &str = "list.json";

pub const GROUP_DIR_PREFIX: &str = "group";
pub const EXP_DIR_PREFIX: &str = "exp";

pub fn data_path(dir: &Path) -> PathBuf {
    dir.join(DATA_FILE)
}

pub fn time_path(dir: &Path) -> PathBuf {
    dir.join(TIME_FILE)
}

pub fn run_path(dir: &Path) -> PathBuf {
    dir.join(RUN_FILE)
}

pub fn run_time_path(dir: &Path) -> PathBuf {
    dir.join(RUN_TIME_FILE)
}

pub fn manual_result_path(dir: &Path) -> PathBuf {
    dir.join(MANUAL_RESULT_FILE)
}

pub fn pipeline_result_path(dir: &Path) -> PathBuf {
    dir.join(PIPELINE_RESULT_FILE)
}

pub fn checkpoints_dir(dir: &Path) -> PathBuf {
    dir.join(CHECKPOINTS_DIR)
}

pub fn checkpoints_list_path(dir: &Path) -> PathBuf {
    checkpoints_dir(dir).join(CHECKPOINTS_LIST_FILE)
}

/// Fresh timestamped checkpoint file name, unique at nanosecond resolution.
pub fn new_checkpoint_path(dir: &Path) -> PathBuf {
    let now = Utc::now();
    let name = format!(
        "{}--{:09}.cp",
        now.format("%Y-%m-%d__%H_%M_%S"),
        now.timestamp_subsec_nanos()
    );
    checkpoints_dir(dir).join(name)
}

pub fn note_path(dir: &Path, extension: &str) -> PathBuf {
    dir.join(format!("note.{extension}"))
}

fn parse_child_num(name: &str, prefix: &str) -> Option<u32> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    digits.parse().ok()
}

/// Entity number encoded as the trailing digits of its directory name.
pub fn dir_num(dir: &Path) -> Option<u32> {
    let name = dir.file_name()?.to_str()?;
    let tail_len = name
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if tail_len == 0 {
        return None;
    }
    let digits = &name[name.len() - tail_len..];
    if digits.starts_with('0') {
        return None;
    }
    digits.parse().ok()
}

pub fn child_dir(parent_dir: &Path, prefix: &str, num: u32) -> PathBuf {
    parent_dir.join(format!("{prefix}{num}"))
}

/// Numbers of all `prefix<N>` child directories on disk, sorted ascending.
pub fn children_nums(parent_dir: &Path, prefix: &str) -> Result<Vec<u32>> {
    let mut nums = Vec::new();
    for entry in fs::read_dir(parent_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if let Some(num) = parse_child_num(name, prefix) {
                nums.push(num);
            }
        }
    }
    nums.sort_unstable();
    Ok(nums)
}
