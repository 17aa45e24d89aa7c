use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Library-wide error taxonomy. Validation errors are raised immediately and
/// never swallowed; a failing user callable surfaces as `Pipeline` *after*
/// its message and stack have been persisted to the experiment state.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad arguments: {0}")]
    Arguments(String),

    #[error("not found: {0}")]
    NotExists(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    #[error("nothing to do: {0}")]
    NothingToDo(String),

    #[error("pipeline failed: {0:#}")]
    Pipeline(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// One-line rendering of a user callable's failure, chain included.
pub fn error_message(err: &anyhow::Error) -> String {
    format!("{err:#}")
}

/// Multi-line rendering with the full cause chain (and backtrace when the
/// process captures one), persisted alongside the message for inspection.
pub fn error_stack(err: &anyhow::Error) -> String {
    format!("{err:?}")
}
