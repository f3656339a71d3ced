//! Result and error types for Esperar.

use thiserror::Error;

use crate::report::Artifact;

/// Result type for Esperar operations
pub type EsperarResult<T> = Result<T, EsperarError>;

/// Errors that can occur in Esperar
#[derive(Debug, Error)]
pub enum EsperarError {
    /// No command is registered under the requested name
    #[error("Unknown operation: {name}")]
    UnknownOperation {
        /// Requested operation name
        name: String,
    },

    /// Structurally malformed call (bad selector syntax, wrong arity)
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// The locator (or one of its ancestors) has no match
    #[error("Element not found {{{locator}}}")]
    NotFound {
        /// Description of the locator that failed to match
        locator: String,
    },

    /// The locator matched, but fewer elements than its index requires
    #[error("Element not found {{{locator}}}: index {index} out of range ({count} matches)")]
    IndexOutOfRange {
        /// Description of the locator
        locator: String,
        /// Requested ordinal
        index: usize,
        /// Number of matches observed
        count: usize,
    },

    /// A previously resolved handle no longer refers to a live element
    #[error("Stale element reference: {handle}")]
    StaleElement {
        /// Handle id
        handle: String,
    },

    /// A remote-side script failed to evaluate
    #[error("Remote evaluation failed: {message}")]
    RemoteEvaluation {
        /// Error message
        message: String,
    },

    /// A condition rejected the observed element state
    #[error("Element should {condition} {{{locator}}}, actual: {actual}")]
    PredicateNotSatisfied {
        /// Description of the locator
        locator: String,
        /// Condition name
        condition: String,
        /// Observed value
        actual: String,
    },

    /// Any other remote session failure
    #[error("Session error: {message}")]
    Session {
        /// Error message
        message: String,
    },

    /// The session does not support the requested capability
    #[error("Unsupported: {feature}")]
    Unsupported {
        /// Capability name
        feature: String,
    },

    /// The deadline passed while the last failure was retryable
    #[error("Timed out after {timeout_ms}ms ({attempts} attempt(s)) running '{operation}' on {{{locator}}}: {cause}")]
    Timeout {
        /// Operation name
        operation: String,
        /// Description of the subject locator
        locator: String,
        /// Timeout in milliseconds
        timeout_ms: u64,
        /// Number of attempts made
        attempts: usize,
        /// Last observed failure
        cause: Box<EsperarError>,
        /// Diagnostic artifacts captured at the boundary
        artifacts: Vec<Artifact>,
    },

    /// A non-retryable failure that terminated a dispatch
    #[error("'{operation}' failed on {{{locator}}}: {cause}")]
    Fatal {
        /// Operation name
        operation: String,
        /// Description of the subject locator
        locator: String,
        /// Underlying failure
        cause: Box<EsperarError>,
        /// Diagnostic artifacts captured at the boundary
        artifacts: Vec<Artifact>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl EsperarError {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Whether this error has already passed through a dispatcher boundary
    #[must_use]
    pub const fn is_decorated(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Fatal { .. })
    }

    /// Whether this error means the element could not be resolved right now
    #[must_use]
    pub const fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::IndexOutOfRange { .. } | Self::StaleElement { .. }
        )
    }

    /// The innermost error, unwrapping `Timeout` and `Fatal`
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Timeout { cause, .. } | Self::Fatal { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Artifacts attached at the dispatcher boundary (empty if undecorated)
    #[must_use]
    pub fn artifacts(&self) -> &[Artifact] {
        match self {
            Self::Timeout { artifacts, .. } | Self::Fatal { artifacts, .. } => artifacts,
            _ => &[],
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn not_found() -> EsperarError {
        EsperarError::NotFound {
            locator: "#missing".into(),
        }
    }

    #[test]
    fn test_display_not_found() {
        assert_eq!(not_found().to_string(), "Element not found {#missing}");
    }

    #[test]
    fn test_display_predicate() {
        let err = EsperarError::PredicateNotSatisfied {
            locator: "h1".into(),
            condition: "have text 'hello'".into(),
            actual: "goodbye".into(),
        };
        assert_eq!(
            err.to_string(),
            "Element should have text 'hello' {h1}, actual: goodbye"
        );
    }

    #[test]
    fn test_root_cause_unwraps_nested() {
        let err = EsperarError::Timeout {
            operation: "click".into(),
            locator: "#a".into(),
            timeout_ms: 10,
            attempts: 2,
            cause: Box::new(EsperarError::Fatal {
                operation: "inner".into(),
                locator: "#a".into(),
                cause: Box::new(not_found()),
                artifacts: Vec::new(),
            }),
            artifacts: Vec::new(),
        };
        assert!(matches!(err.root_cause(), EsperarError::NotFound { .. }));
        assert!(err.is_decorated());
        assert!(!err.root_cause().is_decorated());
    }

    #[test]
    fn test_resolution_failures() {
        assert!(not_found().is_resolution_failure());
        assert!(EsperarError::StaleElement { handle: "1".into() }.is_resolution_failure());
        assert!(!EsperarError::invalid_argument("x").is_resolution_failure());
    }

    #[test]
    fn test_artifacts_empty_when_undecorated() {
        assert!(not_found().artifacts().is_empty());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: EsperarError = json_err.into();
        assert!(matches!(err, EsperarError::Json(_)));
    }
}
