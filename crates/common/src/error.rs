//! Error types for Flowline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowlineError {
    /// A backend failed its health check or refused the connection.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// No healthy backend exposes a flow covering the resolved intent.
    #[error("No backend has a flow matching intent '{intent}'")]
    NoMatchingFlow { intent: String },

    /// The registry holds no backends at all.
    #[error("No backends available")]
    NoBackendsAvailable,

    /// The selected backend reported a structured execution failure.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// An override or config entry named a backend the registry does not know.
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowlineError {
    /// Stable discriminant name used in user-visible failure payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::NoMatchingFlow { .. } => "no_matching_flow",
            Self::NoBackendsAvailable => "no_backends_available",
            Self::Execution(_) => "execution_failure",
            Self::UnknownBackend(_) => "unknown_backend",
            Self::Config(_) => "configuration_error",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(
            FlowlineError::NoMatchingFlow {
                intent: "automation".into()
            }
            .kind(),
            "no_matching_flow"
        );
        assert_eq!(FlowlineError::NoBackendsAvailable.kind(), "no_backends_available");
        assert_eq!(
            FlowlineError::Execution("boom".into()).kind(),
            "execution_failure"
        );
        assert_eq!(
            FlowlineError::UnknownBackend("zapier".into()).kind(),
            "unknown_backend"
        );
    }

    #[test]
    fn display_includes_context() {
        let err = FlowlineError::NoMatchingFlow {
            intent: "data_analysis".into(),
        };
        assert!(err.to_string().contains("data_analysis"));
    }
}
