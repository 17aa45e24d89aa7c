//! Workflow status values. The workflow is a fixed partial order:
//! `EMPTY -> TODO -> IN_PROGRESS -> {DONE | ERROR} -> {SUCCESS | FAIL}`,
//! where DONE/ERROR share a rung and SUCCESS/FAIL share the terminal rung.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use labtree_core::error::{Error, Result};

/// Resolution sentinel carried by every automatically derived status that
/// has no specific resolution of its own.
pub const AUTO_RESOLUTION: &str = "-= auto status =-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    Empty,
    Todo,
    InProgress,
    Done,
    Error,
    Success,
    Fail,
}

/// The workflow rungs, in order.
pub const WORKFLOW: &[&[StatusKind]] = &[
    &[StatusKind::Empty],
    &[StatusKind::Todo],
    &[StatusKind::InProgress],
    &[StatusKind::Done, StatusKind::Error],
    &[StatusKind::Success, StatusKind::Fail],
];

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Empty => "EMPTY",
            StatusKind::Todo => "TODO",
            StatusKind::InProgress => "IN_PROGRESS",
            StatusKind::Done => "DONE",
            StatusKind::Error => "ERROR",
            StatusKind::Success => "SUCCESS",
            StatusKind::Fail => "FAIL",
        }
    }

    /// The following rung of the workflow, or `None` from the terminal rung.
    /// Defined for the automatic path only; a manual override can jump rungs.
    pub fn next(&self) -> Option<&'static [StatusKind]> {
        let idx = WORKFLOW.iter().position(|rung| rung.contains(self))?;
        WORKFLOW.get(idx + 1).copied()
    }

    pub fn requires_resolution(&self) -> bool {
        matches!(self, StatusKind::Success | StatusKind::Fail)
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "EMPTY" => Ok(StatusKind::Empty),
            "TODO" => Ok(StatusKind::Todo),
            "IN_PROGRESS" => Ok(StatusKind::InProgress),
            "DONE" => Ok(StatusKind::Done),
            "ERROR" => Ok(StatusKind::Error),
            "SUCCESS" => Ok(StatusKind::Success),
            "FAIL" => Ok(StatusKind::Fail),
            other => Err(Error::Arguments(format!(
                "the workflow has no status `{other}`; expected one of \
                 EMPTY, TODO, IN_PROGRESS, DONE, ERROR, SUCCESS, FAIL"
            ))),
        }
    }
}

/// SUCCESS and FAIL must carry a resolution explaining the verdict.
pub fn check_manual(kind: StatusKind, resolution: Option<&str>) -> Result<()> {
    if kind.requires_resolution() && resolution.is_none() {
        return Err(Error::Arguments(format!(
            "manual status `{kind}` requires a resolution"
        )));
    }
    Ok(())
}

/// Immutable status value of a structure node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructStatus {
    pub kind: StatusKind,
    pub resolution: Option<String>,
    pub manual: bool,
}

impl StructStatus {
    pub fn manual(kind: StatusKind, resolution: Option<String>) -> Result<Self> {
        check_manual(kind, resolution.as_deref())?;
        Ok(Self {
            kind,
            resolution,
            manual: true,
        })
    }

    /// Automatically derived status; the resolution falls back to the
    /// [`AUTO_RESOLUTION`] sentinel when the auto rule supplies none.
    pub fn auto(kind: StatusKind, resolution: Option<String>) -> Self {
        Self {
            kind,
            resolution: Some(resolution.unwrap_or_else(|| AUTO_RESOLUTION.to_string())),
            manual: false,
        }
    }

    pub fn next(&self) -> Option<&'static [StatusKind]> {
        self.kind.next()
    }
}

impl fmt::Display for StructStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.manual {
            write!(f, "{} *", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_unknown_kind() {
        let err = "ALMOST_DONE".parse::<StatusKind>().unwrap_err();
        assert!(matches!(err, Error::Arguments(_)));
    }

    #[test]
    fn success_and_fail_require_resolution() {
        assert!(StructStatus::manual(StatusKind::Success, None).is_err());
        assert!(StructStatus::manual(StatusKind::Fail, None).is_err());
        assert!(StructStatus::manual(StatusKind::Fail, Some("bad config".into())).is_ok());
        assert!(StructStatus::manual(StatusKind::Done, None).is_ok());
    }

    #[test]
    fn next_walks_the_workflow() {
        assert_eq!(
            StatusKind::Empty.next(),
            Some(&[StatusKind::Todo][..])
        );
        assert_eq!(
            StatusKind::InProgress.next(),
            Some(&[StatusKind::Done, StatusKind::Error][..])
        );
        assert_eq!(
            StatusKind::Done.next(),
            Some(&[StatusKind::Success, StatusKind::Fail][..])
        );
        assert_eq!(StatusKind::Success.next(), None);
        assert_eq!(StatusKind::Fail.next(), None);
    }

    #[test]
    fn auto_status_carries_sentinel_resolution() {
        let status = StructStatus::auto(StatusKind::Todo, None);
        assert_eq!(status.resolution.as_deref(), Some(AUTO_RESOLUTION));
        assert!(!status.manual);
    }

    #[test]
    fn display_marks_manual_statuses() {
        let auto = StructStatus::auto(StatusKind::Done, None);
        assert_eq!(auto.to_string(), "DONE");
        let manual = StructStatus::manual(StatusKind::Fail, Some("nope".into())).unwrap();
        assert_eq!(manual.to_string(), "FAIL *");
    }
}
