//! Leaf crate shared by the labtree workspace: the error taxonomy, raw file
//! primitives with an mtime-keyed read cache, and the interactive
//! confirmation collaborator.

pub mod confirm;
pub mod error;
pub mod fileio;

pub use error::{Error, Result};
