//! Pipeline runtime: named task registry, persisted run-specs, lifecycle
//! state and the heartbeat thread backing the liveness heuristic.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use labtree_core::error::{Error, Result};
use labtree_core::fileio;

use crate::checkpoint::CheckpointsMediator;
use crate::config;
use crate::paths;
use crate::store;

/// Lifecycle flags persisted inside the experiment's data blob. After a
/// completed `start()` exactly one of `finished` / `error` holds, never
/// both. The result itself lives in a separate `.pipeline_result` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineState {
    pub started: bool,
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
}

/// Serializable run-spec: a registered task name plus its parameters.
/// Closures are never persisted; a restart recovers the callable by looking
/// the name up in the registry again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub task: String,
    pub params: Value,
}

pub type TaskFn =
    Box<dyn Fn(&mut CheckpointsMediator, &Value) -> anyhow::Result<Value> + Send + Sync>;

/// Named, process-local registry of pipeline callables.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, TaskFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, task: F) -> Result<()>
    where
        F: Fn(&mut CheckpointsMediator, &Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        if name.trim().is_empty() {
            return Err(Error::Arguments("task name must not be empty".into()));
        }
        if self.tasks.contains_key(name) {
            return Err(Error::AlreadyExists(format!(
                "task `{name}` is already registered"
            )));
        }
        self.tasks.insert(name.to_string(), Box::new(task));
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub(crate) fn resolve(&self, name: &str) -> Result<&TaskFn> {
        self.tasks.get(name).ok_or_else(|| {
            Error::NotExists(format!("no task `{name}` in the registry"))
        })
    }
}

pub(crate) fn save_run_spec(dir: &Path, spec: &RunSpec) -> Result<()> {
    fileio::save_json(&paths::run_path(dir), &serde_json::to_value(spec)?)
}

pub(crate) fn load_run_spec(dir: &Path) -> Result<Option<RunSpec>> {
    match fileio::load_json(&paths::run_path(dir))? {
        None => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

pub(crate) fn delete_run_spec(dir: &Path) -> Result<()> {
    fileio::delete(&paths::run_path(dir))
}

pub(crate) fn last_heartbeat_nanos(dir: &Path) -> Result<Option<i64>> {
    match fileio::load_text(&paths::run_time_path(dir))? {
        None => Ok(None),
        Some(text) => Ok(text.trim().parse().ok()),
    }
}

pub(crate) fn delete_heartbeat(dir: &Path) -> Result<()> {
    fileio::delete(&paths::run_time_path(dir))
}

/// Repeating heartbeat: a background thread rewriting the `.run_time`
/// marker with "now" every timer interval while a pipeline runs. It never
/// touches the in-memory tree; the marker file is the only channel.
pub(crate) struct Pulse {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Pulse {
    pub fn start(location_dir: &Path) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let path = paths::run_time_path(location_dir);
        let dir = location_dir.display().to_string();
        let handle = thread::spawn(move || {
            tracing::debug!(exp = %dir, "heartbeat started");
            while !flag.load(Ordering::SeqCst) {
                if let Err(err) = fileio::save_text(&path, &store::now_nanos().to_string()) {
                    tracing::warn!(exp = %dir, %err, "heartbeat write failed");
                }
                // sleep in short steps so cancellation never waits out a
                // full interval
                let mut slept = Duration::ZERO;
                while slept < config::TIMER_INTERVAL && !flag.load(Ordering::SeqCst) {
                    let step = Duration::from_millis(100);
                    thread::sleep(step);
                    slept += step;
                }
            }
            tracing::debug!(exp = %dir, "heartbeat stopped");
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn cancel(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Pulse {
    fn drop(&mut self) {
        self.cancel();
    }
}
