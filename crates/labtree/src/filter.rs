//! Declarative experiment queries: a builder of predicates combined with
//! AND or OR semantics.

use labtree_core::error::Result;

use crate::container::TreeNode;
use crate::exp::Experiment;
use crate::status::StatusKind;

/// How the configured predicates combine. An empty query matches every
/// experiment under AND (vacuously) and none under OR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Default)]
pub struct ExpQuery {
    statuses: Vec<StatusKind>,
    manual: Option<bool>,
    active: Option<bool>,
    has_pipeline: Option<bool>,
    has_result: Option<bool>,
    mode: Mode,
}

impl ExpQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Match experiments whose status is any of the given kinds.
    pub fn status_in(mut self, kinds: &[StatusKind]) -> Self {
        self.statuses = kinds.to_vec();
        self
    }

    pub fn manual(mut self, manual: bool) -> Self {
        self.manual = Some(manual);
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn has_pipeline(mut self, has: bool) -> Self {
        self.has_pipeline = Some(has);
        self
    }

    pub fn has_result(mut self, has: bool) -> Self {
        self.has_result = Some(has);
        self
    }

    pub(crate) fn matches(&self, exp: &Experiment) -> Result<bool> {
        let mut verdicts = Vec::new();
        if !self.statuses.is_empty() {
            verdicts.push(self.statuses.contains(&exp.core().status().kind));
        }
        if let Some(manual) = self.manual {
            verdicts.push(exp.is_manual() == manual);
        }
        if let Some(active) = self.active {
            verdicts.push(exp.is_active()? == active);
        }
        if let Some(has_pipeline) = self.has_pipeline {
            verdicts.push(exp.has_pipeline() == has_pipeline);
        }
        if let Some(has_result) = self.has_result {
            verdicts.push(exp.has_result()? == has_result);
        }
        Ok(match self.mode {
            Mode::And => verdicts.iter().all(|&v| v),
            Mode::Or => verdicts.iter().any(|&v| v),
        })
    }
}
