//! A single experiment: the leaf entity owning the pipeline lifecycle,
//! results, checkpoints and notes.

use std::path::{Path, PathBuf};

use serde_json::Value;

use labtree_core::confirm;
use labtree_core::error::{error_message, error_stack, Error, Result};
use labtree_core::fileio;

use crate::checkpoint::CheckpointsMediator;
use crate::config;
use crate::container::TreeNode;
use crate::node::StructCore;
use crate::note::Note;
use crate::paths;
use crate::pipeline::{self, PipelineState, RunSpec, TaskRegistry};
use crate::status::{StatusKind, StructStatus};
use crate::store;

/// Runtime verdict of the liveness heuristic. ACTIVE means some process is
/// believed to be executing the pipeline right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpState {
    Active,
    Idle,
}

impl std::fmt::Display for ExpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ExpState::Active => "ACTIVE",
            ExpState::Idle => "IDLE",
        })
    }
}

#[derive(Debug)]
pub struct Experiment {
    core: StructCore,
    // Held only when the run-spec wasn't persisted; lost with the process.
    run_spec: Option<RunSpec>,
}

impl TreeNode for Experiment {
    const DIR_PREFIX: &'static str = paths::EXP_DIR_PREFIX;
    const KIND: &'static str = "experiment";

    fn open(location_dir: PathBuf) -> Result<Self> {
        let core = StructCore::open(location_dir)?;
        let mut exp = Self {
            core,
            run_spec: None,
        };
        exp.reload()?;
        Ok(exp)
    }

    fn create(location_dir: PathBuf, name: &str, descr: &str) -> Result<Self> {
        let core = StructCore::create(location_dir, name, descr)?;
        let mut exp = Self {
            core,
            run_spec: None,
        };
        exp.reload()?;
        Ok(exp)
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
        if self.is_active()? {
            return Err(Error::IllegalOperation(format!(
                "experiment `{}` has an active pipeline",
                self.core.location_dir().display()
            )));
        }
        Ok(())
    }
}

impl Experiment {
    fn reload_inner(&mut self) -> Result<()> {
        self.core.refresh()?;
        let auto = Self::auto_status(self.core.data().pipeline.as_ref());
        self.core.apply_status(auto)
    }

    /// The automatic workflow rule for a leaf: derived from the pipeline
    /// lifecycle flags alone.
    fn auto_status(pipeline: Option<&PipelineState>) -> (StatusKind, Option<String>) {
        match pipeline {
            None => (StatusKind::Empty, None),
            Some(state) => {
                if let Some(error) = &state.error {
                    (StatusKind::Error, Some(error.clone()))
                } else if state.finished {
                    (StatusKind::Done, None)
                } else if state.started {
                    (StatusKind::InProgress, None)
                } else {
                    (StatusKind::Todo, None)
                }
            }
        }
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

    /// Effective status, synchronized with disk first.
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

    pub fn is_manual(&self) -> bool {
        self.core.data().manual_status.is_some()
    }

    /// Shortcut for the terminal SUCCESS verdict.
    pub fn success(&mut self, resolution: &str) -> Result<()> {
        self.set_manual_status(StatusKind::Success.as_str(), Some(resolution))
    }

    /// Shortcut for the terminal FAIL verdict.
    pub fn fail(&mut self, resolution: &str) -> Result<()> {
        self.set_manual_status(StatusKind::Fail.as_str(), Some(resolution))
    }

    // ----- pipeline -----

    pub fn has_pipeline(&self) -> bool {
        self.core.data().pipeline.is_some()
    }

    /// Attach a pipeline. With `save` the run-spec goes to disk and a later
    /// process can restart the experiment; otherwise it lives in this
    /// process only.
    pub fn make_pipeline(&mut self, run_spec: RunSpec, save: bool) -> Result<()> {
        if self.core.data().pipeline.is_some() {
            return Err(Error::AlreadyExists(format!(
                "experiment `{}` already has a pipeline",
                self.core.location_dir().display()
            )));
        }
        if save {
            pipeline::save_run_spec(self.core.location_dir(), &run_spec)?;
            self.run_spec = None;
        } else {
            self.run_spec = Some(run_spec);
        }
        self.core.data_mut().pipeline = Some(PipelineState::default());
        self.core.save()?;
        self.reload()
    }

    /// Remove the pipeline. With `keep_data` only the run-spec and
    /// heartbeat go; the lifecycle state, result and checkpoints stay.
    /// Otherwise everything the pipeline produced is destroyed and the
    /// experiment reverts to EMPTY. Returns false when the user declined.
    pub fn destroy_pipeline(&mut self, need_confirm: bool, keep_data: bool) -> Result<bool> {
        if self.core.data().pipeline.is_none() {
            return Err(Error::NotExists(format!(
                "experiment `{}` has no pipeline",
                self.core.location_dir().display()
            )));
        }
        self.destroy_check()?;
        if !confirm::request(
            need_confirm,
            &format!(
                "Destroy the pipeline of experiment `{}` with its result?",
                self.core.location_dir().display()
            ),
        ) {
            return Ok(false);
        }
        let dir = self.core.location_dir().to_path_buf();
        pipeline::delete_run_spec(&dir)?;
        pipeline::delete_heartbeat(&dir)?;
        self.run_spec = None;
        if !keep_data {
            fileio::delete(&paths::pipeline_result_path(&dir))?;
            CheckpointsMediator::new(&dir).delete_checkpoints(false)?;
            self.core.data_mut().pipeline = None;
            self.core.save()?;
        }
        self.reload()?;
        Ok(true)
    }

    /// Clear a recorded failure so the pipeline may be started again. The
    /// lifecycle rolls back to attached-not-started (TODO).
    pub fn clear_error(&mut self) -> Result<()> {
        let has_error = self
            .core
            .data()
            .pipeline
            .as_ref()
            .is_some_and(|p| p.error.is_some());
        if !has_error {
            return Err(Error::NotExists(format!(
                "experiment `{}` has no recorded pipeline error",
                self.core.location_dir().display()
            )));
        }
        self.with_pipeline_state(|state| {
            state.started = false;
            state.error = None;
            state.error_stack = None;
        })?;
        self.reload()
    }

    fn recover_run_spec(&self) -> Result<Option<RunSpec>> {
        if let Some(spec) = &self.run_spec {
            return Ok(Some(spec.clone()));
        }
        pipeline::load_run_spec(self.core.location_dir())
    }

    fn check_startable(&self, state: &PipelineState) -> Result<()> {
        let dir = self.core.location_dir();
        if state.error.is_some() {
            return Err(Error::IllegalOperation(format!(
                "pipeline of `{}` finished with an error; clear it first",
                dir.display()
            )));
        }
        if state.finished {
            return Err(Error::IllegalOperation(format!(
                "pipeline of `{}` already finished",
                dir.display()
            )));
        }
        if state.started && self.is_active()? {
            return Err(Error::IllegalOperation(format!(
                "pipeline of `{}` is already running",
                dir.display()
            )));
        }
        // started but idle: an interrupted run, restart is allowed
        Ok(())
    }

    /// Run the attached pipeline to completion in the calling thread. A
    /// heartbeat thread keeps the liveness marker fresh for observers in
    /// other processes. A failing task is recorded on the experiment and
    /// the original error is returned to the caller.
    pub fn start(&mut self, registry: &TaskRegistry) -> Result<()> {
        self.reload()?;
        let state = self
            .core
            .data()
            .pipeline
            .clone()
            .ok_or_else(|| {
                Error::IllegalOperation(format!(
                    "experiment `{}` has no pipeline to start",
                    self.core.location_dir().display()
                ))
            })?;
        self.check_startable(&state)?;
        let spec = self.recover_run_spec()?.ok_or_else(|| {
            Error::IllegalOperation(format!(
                "pipeline of `{}` has no recoverable run-spec; it was made \
                 with save=false in another process",
                self.core.location_dir().display()
            ))
        })?;
        let task = registry.resolve(&spec.task)?;

        let dir = self.core.location_dir().to_path_buf();
        self.mark_started()?;
        let mut pulse = pipeline::Pulse::start(&dir);
        let mut mediator = CheckpointsMediator::new(&dir);
        tracing::info!(exp = %dir.display(), task = %spec.task, "pipeline started");
        let outcome = task(&mut mediator, &spec.params);
        pulse.cancel();
        match outcome {
            Ok(result) => {
                fileio::save_json(&paths::pipeline_result_path(&dir), &result)?;
                self.mark_finished()?;
                pipeline::delete_run_spec(&dir)?;
                pipeline::delete_heartbeat(&dir)?;
                self.run_spec = None;
                tracing::info!(exp = %dir.display(), task = %spec.task, "pipeline finished");
                self.reload()
            }
            Err(err) => {
                // bookkeeping failures must not displace the task's own error
                if let Err(record_err) = self.mark_error(&err) {
                    tracing::warn!(exp = %dir.display(), error = %record_err, "could not persist pipeline error");
                }
                if let Err(marker_err) = pipeline::delete_heartbeat(&dir) {
                    tracing::warn!(exp = %dir.display(), error = %marker_err, "could not drop heartbeat marker");
                }
                tracing::error!(exp = %dir.display(), task = %spec.task, error = %err, "pipeline failed");
                if let Err(reload_err) = self.reload() {
                    tracing::warn!(exp = %dir.display(), error = %reload_err, "reload after failed run");
                }
                Err(Error::Pipeline(err))
            }
        }
    }

    fn with_pipeline_state<F>(&mut self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut PipelineState),
    {
        let state = self.core.data_mut().pipeline.as_mut().ok_or_else(|| {
            Error::IllegalOperation("the pipeline vanished mid-flight".to_string())
        })?;
        mutate(state);
        self.core.save()
    }

    fn mark_started(&mut self) -> Result<()> {
        self.with_pipeline_state(|state| {
            state.started = true;
            state.error = None;
            state.error_stack = None;
        })
    }

    fn mark_finished(&mut self) -> Result<()> {
        self.with_pipeline_state(|state| state.finished = true)
    }

    fn mark_error(&mut self, err: &anyhow::Error) -> Result<()> {
        let message = error_message(err);
        let stack = error_stack(err);
        self.with_pipeline_state(|state| {
            state.error = Some(message);
            state.error_stack = Some(stack);
        })
    }

    pub fn error(&self) -> Option<&str> {
        self.core
            .data()
            .pipeline
            .as_ref()
            .and_then(|p| p.error.as_deref())
    }

    pub fn error_stack(&self) -> Option<&str> {
        self.core
            .data()
            .pipeline
            .as_ref()
            .and_then(|p| p.error_stack.as_deref())
    }

    // ----- liveness -----

    /// ACTIVE iff a pipeline is mid-flight and its last heartbeat is younger
    /// than the timer interval plus the platform buffer.
    pub fn state(&self) -> Result<ExpState> {
        let mid_flight = self
            .core
            .data()
            .pipeline
            .as_ref()
            .map(|p| p.started && !p.finished && p.error.is_none())
            .unwrap_or(false);
        // a manual override supersedes the run's lifecycle
        if !mid_flight || self.is_manual() {
            return Ok(ExpState::Idle);
        }
        let Some(beat) = pipeline::last_heartbeat_nanos(self.core.location_dir())? else {
            return Ok(ExpState::Idle);
        };
        let age_nanos = store::now_nanos().saturating_sub(beat);
        let threshold = config::active_threshold().as_nanos() as i64;
        if age_nanos < threshold {
            Ok(ExpState::Active)
        } else {
            Ok(ExpState::Idle)
        }
    }

    pub fn is_active(&self) -> Result<bool> {
        Ok(self.state()? == ExpState::Active)
    }

    /// TODO status, or an interrupted IN_PROGRESS run that is idle again.
    pub fn is_ready_for_start(&self) -> Result<bool> {
        if self.is_manual() {
            return Ok(false);
        }
        match self.core.status().kind {
            StatusKind::Todo => Ok(true),
            StatusKind::InProgress => Ok(!self.is_active()?),
            _ => Ok(false),
        }
    }

    // ----- results -----

    /// The experiment's result; a manual result takes precedence over the
    /// pipeline's.
    pub fn result(&self) -> Result<Option<Value>> {
        if let Some(manual) = self.manual_result()? {
            return Ok(Some(manual));
        }
        self.pipeline_result()
    }

    pub fn manual_result(&self) -> Result<Option<Value>> {
        fileio::load_json(&paths::manual_result_path(self.core.location_dir()))
    }

    pub fn pipeline_result(&self) -> Result<Option<Value>> {
        fileio::load_json(&paths::pipeline_result_path(self.core.location_dir()))
    }

    pub fn has_result(&self) -> Result<bool> {
        Ok(self.result()?.is_some())
    }

    pub fn set_manual_result(&mut self, result: &Value) -> Result<()> {
        let path = paths::manual_result_path(self.core.location_dir());
        if fileio::exists(&path) {
            return Err(Error::AlreadyExists(format!(
                "experiment `{}` already has a manual result",
                self.core.location_dir().display()
            )));
        }
        fileio::save_json(&path, result)
    }

    pub fn delete_manual_result(&mut self, need_confirm: bool) -> Result<bool> {
        let path = paths::manual_result_path(self.core.location_dir());
        if !fileio::exists(&path) {
            return Err(Error::NotExists(format!(
                "experiment `{}` has no manual result",
                self.core.location_dir().display()
            )));
        }
        if !confirm::request(
            need_confirm,
            &format!(
                "Delete the manual result of experiment `{}`?",
                self.core.location_dir().display()
            ),
        ) {
            return Ok(false);
        }
        fileio::delete(&path)?;
        Ok(true)
    }

    pub fn delete_pipeline_result(&mut self, need_confirm: bool) -> Result<bool> {
        let path = paths::pipeline_result_path(self.core.location_dir());
        if !fileio::exists(&path) {
            return Err(Error::NotExists(format!(
                "experiment `{}` has no pipeline result",
                self.core.location_dir().display()
            )));
        }
        if !confirm::request(
            need_confirm,
            &format!(
                "Delete the pipeline result of experiment `{}`?",
                self.core.location_dir().display()
            ),
        ) {
            return Ok(false);
        }
        fileio::delete(&path)?;
        Ok(true)
    }

    // ----- attachments -----

    pub fn checkpoints_mediator(&self) -> CheckpointsMediator {
        CheckpointsMediator::new(self.core.location_dir())
    }

    pub fn delete_checkpoints(&mut self, need_confirm: bool) -> Result<bool> {
        self.checkpoints_mediator().delete_checkpoints(need_confirm)
    }

    pub fn note(&self) -> Note {
        Note::new(self.core.location_dir())
    }
}
