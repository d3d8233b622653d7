use thiserror::Error;

/// Failures surfaced to the caller as a rejected request
///
/// Everything that is an expected result of running arbitrary code (compile errors,
/// crashes, timeouts, runaway output) is an [`ExecutionOutcome`](super::ExecutionOutcome)
/// instead and never shows up here.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed request, rejected before any resource is touched
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// The toolchain for the declared language is not installed on this host
    #[error("Language '{0}' is not available on this host")]
    ToolchainUnavailable(String),

    /// Workspace or process plumbing failed; the detail is for logs only
    #[error("Infrastructure fault: {0}")]
    Infrastructure(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Infrastructure(err.to_string())
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Infrastructure(format!("execution task failed: {err}"))
    }
}

impl EngineError {
    /// Machine readable reason reported to the caller
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "ERR_INVALID_ARGUMENT",
            Self::ToolchainUnavailable(_) => "ERR_UNSUPPORTED_LANGUAGE",
            Self::Infrastructure(_) => "ERR_INTERNAL",
        }
    }

    /// Numeric code reported to the caller
    pub fn code(&self) -> u32 {
        match self {
            Self::Invalid(_) => 1,
            Self::ToolchainUnavailable(_) => 4,
            Self::Infrastructure(_) => 6,
        }
    }

    /// Message safe to send to the caller, never containing host paths or command lines
    pub fn public_message(&self) -> String {
        match self {
            Self::Infrastructure(_) => "Error executing code".to_string(),
            other => other.to_string(),
        }
    }
}
