//! Error types for the state reconciler.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for reconcile operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Fatal reconcile failures. Any of these aborts the deployment before
/// the stack is started.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("cannot write {path}: {source}")]
    PathUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot inspect {path}: {source}")]
    Inspect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template path {0} must be relative and stay inside the root")]
    InvalidPath(PathBuf),

    #[error("deployment root {0} exists but is not a directory")]
    RootNotDirectory(PathBuf),
}
