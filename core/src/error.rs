use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("build {0} references no objects")]
    EmptyBuild(String),

    #[error("regenerate rejected: {0}")]
    RegenerateRejected(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("attempt timed out: {0}")]
    Timeout(String),

    #[error("failed to read object {key}: {message}")]
    SourceRead { key: String, message: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zip error: {0}")]
    Zip(String),
}

impl CoreError {
    /// Faults are errors raised while doing the work itself (fetch, append,
    /// finalize). Everything else is a caller or state error and is returned
    /// as-is instead of being recorded against the build.
    pub fn is_fault(&self) -> bool {
        !matches!(
            self,
            CoreError::InvalidInput(_)
                | CoreError::NotFound(_)
                | CoreError::EmptyBuild(_)
                | CoreError::RegenerateRejected(_)
                | CoreError::InvalidTransition(_)
        )
    }

    /// Whether a dispatcher may usefully retry the same unit of work.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Timeout(_)
                | CoreError::SourceRead { .. }
                | CoreError::Io(_)
                | CoreError::Zip(_)
                | CoreError::Infrastructure(_)
        )
    }
}

impl From<zip::result::ZipError> for CoreError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => CoreError::Io(io),
            other => CoreError::Zip(other.to_string()),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
