//! Error taxonomy (spec §7): `UsageError`, `StoreError`, `ResourceError`
//! and `WorkerError` map onto the variants below. `ReconcileSignal` is not
//! an error — it's a state transition — and has no variant here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TasqueError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("store error: {0}")]
    StoreIo(std::io::Error),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("os error: {0}")]
    Os(#[from] nix::Error),
}

pub type Result<T> = std::result::Result<T, TasqueError>;

impl From<std::io::Error> for TasqueError {
    fn from(e: std::io::Error) -> Self {
        TasqueError::StoreIo(e)
    }
}

impl TasqueError {
    /// Exit code a CLI invocation should use per spec §6: 1 on any
    /// refusal to proceed, 0 otherwise (0 is never constructed here).
    pub fn exit_code(&self) -> i32 {
        1
    }
}
