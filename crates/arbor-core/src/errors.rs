//! Unified error system for Arbor
//!
//! A single error type covers every failure the composition hierarchy can
//! report. Structural and lifecycle errors are returned synchronously from the
//! operation that caused them; cleanup failures are collected into an
//! [`AggregateError`] and reported once all cleanup has run.

use crate::definition::Cardinality;
use std::fmt;

/// Boxed error raised by user code (parts, hooks, listeners)
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for all Arbor operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArborError {
    /// Activation preconditions were violated
    #[error("Invalid activation state for '{argument}': {reason}")]
    InvalidActivationState {
        /// Name of the offending argument (`child`, `parent`, `module`)
        argument: String,
        /// What was wrong with it
        reason: String,
    },

    /// The controller has no node (never activated, or already deactivated)
    #[error("Controller {controller} is not activated")]
    NotActivated {
        /// Display form of the controller identity
        controller: String,
    },

    /// A single-cardinality import matched the wrong number of exports
    #[error("Cardinality mismatch for '{contract}': expected {expected}, found {found}")]
    CardinalityMismatch {
        /// Contract that was queried
        contract: String,
        /// Requested cardinality
        expected: Cardinality,
        /// Number of exports found
        found: usize,
    },

    /// An `ExactlyOne` import found nothing
    #[error("No export found for '{contract}'")]
    ExportNotFound {
        /// Contract that was queried
        contract: String,
    },

    /// A composition protocol contract was broken by the caller or engine
    #[error("Protocol violation: {message}")]
    ProtocolViolation {
        /// What was violated
        message: String,
    },

    /// One or more failures collected during disposal
    #[error(transparent)]
    Disposal(#[from] AggregateError),

    /// A lifecycle hook failed
    #[error("Lifecycle hook '{hook}' failed: {message}")]
    Lifecycle {
        /// Hook name (`on_activated`, `on_deactivated`, `initialize`)
        hook: String,
        /// Failure message
        message: String,
    },

    /// An event listener failed
    #[error("Listener for '{contract}' failed: {message}")]
    ListenerFailed {
        /// Event contract
        contract: String,
        /// Failure message
        message: String,
    },

    /// Coordination-thread submission failed
    #[error("Dispatch error: {message}")]
    Dispatch {
        /// Failure message
        message: String,
    },

    /// Code ran off the coordination thread where it was required
    #[error("Thread affinity violated: {message}")]
    ThreadAffinity {
        /// Failure message
        message: String,
    },

    /// A part or engine operation failed
    #[error("Composition error: {message}")]
    Composition {
        /// Failure message
        message: String,
    },

    /// Configuration was invalid or could not be loaded
    #[error("Config error: {message}")]
    Config {
        /// Failure message
        message: String,
    },
}

impl ArborError {
    /// Create an invalid activation state error
    pub fn invalid_activation(argument: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidActivationState {
            argument: argument.into(),
            reason: reason.into(),
        }
    }

    /// Create a not activated error
    pub fn not_activated(controller: impl fmt::Display) -> Self {
        Self::NotActivated {
            controller: controller.to_string(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Create a lifecycle hook error from a user failure
    pub fn lifecycle(hook: impl Into<String>, source: impl fmt::Display) -> Self {
        Self::Lifecycle {
            hook: hook.into(),
            message: source.to_string(),
        }
    }

    /// Create a listener failure error
    pub fn listener_failed(contract: impl Into<String>, source: impl fmt::Display) -> Self {
        Self::ListenerFailed {
            contract: contract.into(),
            message: source.to_string(),
        }
    }

    /// Create a dispatch error
    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch {
            message: message.into(),
        }
    }

    /// Create a thread affinity error
    pub fn thread_affinity(message: impl Into<String>) -> Self {
        Self::ThreadAffinity {
            message: message.into(),
        }
    }

    /// Create a composition error
    pub fn composition(message: impl Into<String>) -> Self {
        Self::Composition {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this is an invalid activation state error
    pub fn is_invalid_activation(&self) -> bool {
        matches!(self, Self::InvalidActivationState { .. })
    }
}

/// Standard Result type for Arbor operations
pub type Result<T> = std::result::Result<T, ArborError>;

/// Failures collected from best-effort cleanup
///
/// Cleanup never stops on the first failure; every failure is recorded here
/// and the aggregate is raised once, after all cleanup has completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateError {
    failures: Vec<ArborError>,
}

impl AggregateError {
    /// Create an empty aggregate
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure
    pub fn push(&mut self, failure: ArborError) {
        self.failures.push(failure);
    }

    /// Record the error of a result, if any
    pub fn collect<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.push(err);
                None
            }
        }
    }

    /// Merge another aggregate's failures into this one
    pub fn extend(&mut self, other: AggregateError) {
        self.failures.extend(other.failures);
    }

    /// Recorded failures
    pub fn failures(&self) -> &[ArborError] {
        &self.failures
    }

    /// Number of recorded failures
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Whether nothing failed
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// `Ok(())` when empty, otherwise the aggregate as an error
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ArborError::Disposal(self))
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure(s) during disposal", self.failures.len())?;
        for (index, failure) in self.failures.iter().enumerate() {
            let sep = if index == 0 { ": " } else { "; " };
            write!(f, "{sep}{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

impl From<std::io::Error> for ArborError {
    fn from(err: std::io::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::de::Error> for ArborError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(format!("Invalid TOML: {err}"))
    }
}
