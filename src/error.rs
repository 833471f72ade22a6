use thiserror::Error;

/// Result type alias for reporter operations
pub type Result<T> = std::result::Result<T, ReporterError>;

/// Errors raised by the reporter itself.
///
/// Test and step failures coming from the execution engine are not errors;
/// they are recorded as `FAILED` statuses on the report.
#[derive(Debug, Error)]
pub enum ReporterError {
    /// Configuration is missing or inconsistent. Fatal at startup.
    #[error("ReportPortal config is invalid: {0}")]
    Config(String),

    /// The shared launch could not be created or attached. Fatal at startup.
    #[error("Can't start ReportPortal launch: {0}")]
    Launch(String),

    /// An event arrived that needs an active launch before one exists
    #[error("No active launch for event '{0}'")]
    NoActiveLaunch(&'static str),

    /// The remote service answered with a non-success status
    #[error("ReportPortal returned {status} for {operation}: {body}")]
    Remote {
        operation: String,
        status: u16,
        body: String,
    },

    /// An item was referenced before its create call resolved an id
    #[error("Item '{0}' has no remote id")]
    Unresolved(String),

    /// Capture collaborator failed
    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ReporterError {
    /// Whether the process must stop reporting altogether
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReporterError::Config(_) | ReporterError::Launch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ReporterError::Config("token".into()).is_fatal());
        assert!(ReporterError::Launch("refused".into()).is_fatal());
        assert!(!ReporterError::Unresolved("step".into()).is_fatal());
        assert!(!ReporterError::Capture("no display".into()).is_fatal());
    }

    #[test]
    fn test_remote_message() {
        let err = ReporterError::Remote {
            operation: "start item".into(),
            status: 404,
            body: "launch not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "ReportPortal returned 404 for start item: launch not found"
        );
    }
}
