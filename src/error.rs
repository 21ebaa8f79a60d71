use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the controllers and the WEPP pipeline.
///
/// A catalog miss is deliberately absent: catalog lookups return `Option` and
/// callers fall back to the in-memory controller state.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} has not been initialized in {wd}")]
    NotInitialized { kind: &'static str, wd: PathBuf },

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("provider `{provider}` failed: {message}")]
    Provider { provider: String, message: String },

    #[error("{label} exited with status {status:?} (run file {run_file})")]
    Simulator {
        label: String,
        run_file: PathBuf,
        status: Option<i32>,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} is locked by another writer")]
    LockHeld(PathBuf),

    #[error("run {0} is read-only")]
    ReadOnlyRun(PathBuf),

    #[error("watershed delineation failed: {0}")]
    WatershedBuildFailed(String),

    #[error("snapshot {0} does not match the in-memory controller after dump")]
    SnapshotMismatch(PathBuf),

    #[error("snapshot {path} holds `{found}`, expected `{expected}`")]
    SnapshotClass {
        path: PathBuf,
        expected: &'static str,
        found: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0} worker panicked")]
    WorkerPanicked(String),

    #[error("I/O error on {path}: {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl Error {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Error::PreconditionFailed(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }
}

/// Attaches the offending path to an I/O error.
pub trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::PathIo {
            path: path.into(),
            source,
        })
    }
}
