use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    #[error("{kind}: {message}")]
    Validation { kind: String, message: String },

    #[error("Timed out after {timeout:?} waiting for {operation}")]
    AutomationTimeout { operation: String, timeout: Duration },

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("{kind} failed: {source}")]
    Action {
        kind: String,
        #[source]
        source: Box<SnapshotError>,
    },

    #[error("Best-effort step failed: {0}")]
    BestEffort(String),

    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Browser instance unavailable")]
    BrowserUnavailable,

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Page error: {0}")]
    Page(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Task panicked: {0}")]
    TaskPanicked(String),
}

impl SnapshotError {
    pub fn validation(kind: impl Into<String>, message: impl Into<String>) -> Self {
        SnapshotError::Validation {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        SnapshotError::AutomationTimeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Attributes `source` to the action kind that raised it
    pub fn action(kind: impl Into<String>, source: SnapshotError) -> Self {
        SnapshotError::Action {
            kind: kind.into(),
            source: Box::new(source),
        }
    }

    /// The underlying error, with any action attribution stripped
    pub fn root_cause(&self) -> &SnapshotError {
        match self {
            SnapshotError::Action { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.root_cause(),
            SnapshotError::Validation { .. }
                | SnapshotError::Configuration(_)
                | SnapshotError::InvalidUrl(_)
                | SnapshotError::TaskPanicked(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), SnapshotError::AutomationTimeout { .. })
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.root_cause() {
            SnapshotError::BestEffort(_) => ErrorSeverity::Low,
            SnapshotError::ElementNotFound(_) => ErrorSeverity::Low,
            SnapshotError::Validation { .. } => ErrorSeverity::Medium,
            SnapshotError::Configuration(_) => ErrorSeverity::High,
            SnapshotError::BrowserLaunchFailed(_) => ErrorSeverity::High,
            SnapshotError::TaskPanicked(_) => ErrorSeverity::High,
            _ => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

impl From<std::io::Error> for SnapshotError {
    fn from(err: std::io::Error) -> Self {
        SnapshotError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(err: serde_json::Error) -> Self {
        SnapshotError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for SnapshotError {
    fn from(err: image::ImageError) -> Self {
        SnapshotError::Capture(err.to_string())
    }
}

impl From<url::ParseError> for SnapshotError {
    fn from(err: url::ParseError) -> Self {
        SnapshotError::InvalidUrl(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for SnapshotError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        SnapshotError::Page(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SnapshotError {
    fn from(err: tokio::task::JoinError) -> Self {
        SnapshotError::TaskPanicked(err.to_string())
    }
}
