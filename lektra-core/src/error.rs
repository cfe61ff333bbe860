use std::path::PathBuf;

/// Failures surfaced to the host, either as `Err` from a synchronous call or
/// inside a [`crate::ModelEvent`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("failed to open {path:?}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },
    #[error("{path:?} requires a password")]
    PasswordRequired { path: PathBuf },
    #[error("the password for {path:?} was rejected")]
    PasswordRejected { path: PathBuf },
    #[error("failed to render page {page}: {reason}")]
    RenderFailed { page: usize, reason: String },
    #[error("failed to cache page {page}: {reason}")]
    CacheBuildFailed { page: usize, reason: String },
    #[error("edit on page {page} failed: {reason}")]
    EditFailed { page: usize, reason: String },
    #[error("failed to save {path:?}: {reason}")]
    SaveFailed { path: PathBuf, reason: String },
    #[error("page {page} is out of range (page count {page_count})")]
    PageOutOfRange { page: usize, page_count: usize },
    #[error("no document is open")]
    NoDocument,
    #[error("operation not allowed while {0}")]
    InvalidState(&'static str),
    #[error("{0}")]
    Persist(String),
}

impl EngineError {
    pub fn open_failed(path: impl Into<PathBuf>, err: &anyhow::Error) -> Self {
        EngineError::OpenFailed {
            path: path.into(),
            reason: format!("{err:#}"),
        }
    }

    pub fn edit_failed(page: usize, err: &anyhow::Error) -> Self {
        EngineError::EditFailed {
            page,
            reason: format!("{err:#}"),
        }
    }

    pub fn save_failed(path: impl Into<PathBuf>, err: &anyhow::Error) -> Self {
        EngineError::SaveFailed {
            path: path.into(),
            reason: format!("{err:#}"),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
