//! Filesystem-backed experiment tracking: a project of numbered groups of
//! numbered experiments, each a plain directory any file browser can read.
//!
//! Every entity carries a workflow status (`EMPTY -> TODO -> IN_PROGRESS ->
//! {DONE | ERROR} -> {SUCCESS | FAIL}`); leaf statuses derive from the
//! pipeline lifecycle, container statuses aggregate bottom-up, and a manual
//! override wins everywhere. Several processes can work on the same project
//! at once: state round-trips through the directory tree and a
//! modification-marker protocol keeps in-memory views fresh without
//! re-reading unchanged blobs.
//!
//! ```no_run
//! use labtree::{Project, RunSpec, TaskRegistry};
//! use serde_json::json;
//!
//! # fn main() -> labtree::Result<()> {
//! let mut registry = TaskRegistry::new();
//! registry.register("train", |checkpoints, params| {
//!     let loss = params["lr"].as_f64().unwrap_or(0.1) * 0.5;
//!     checkpoints.save_checkpoint(b"weights", true, None)?;
//!     Ok(json!({ "loss": loss }))
//! })?;
//!
//! let mut proj = Project::create("./research", "research", "try things")?;
//! proj.make_group("baseline", "no tricks", None)?;
//! proj.make_exp(1, "low lr", "", None)?;
//! proj.exp_mut(1, 1)?.make_pipeline(
//!     RunSpec { task: "train".into(), params: json!({ "lr": 0.01 }) },
//!     true,
//! )?;
//! proj.start_next(&registry, false)?;
//! println!("{}", proj.exp_by_dot_num_mut("1.1")?.status()?);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
mod container;
pub mod exp;
pub mod filter;
pub mod group;
mod node;
pub mod note;
pub mod paths;
pub mod pipeline;
mod platform;
pub mod proj;
pub mod status;
mod store;

pub use labtree_core::confirm;
pub use labtree_core::error::{Error, Result};

pub use checkpoint::CheckpointsMediator;
pub use container::{aggregate_status, ChildKey};
pub use exp::{ExpState, Experiment};
pub use filter::{ExpQuery, Mode};
pub use group::Group;
pub use note::Note;
pub use pipeline::{PipelineState, RunSpec, TaskRegistry};
pub use proj::{parse_dot_num, Project};
pub use status::{StatusKind, StructStatus, AUTO_RESOLUTION};
