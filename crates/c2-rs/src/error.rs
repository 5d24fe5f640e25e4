//! Error taxonomy shared by the tensor, operator, net and plan layers.
//!
//! Every fallible runtime routine returns [`C2Result`]. Errors raised deep inside an operator are
//! wrapped with the operator, net and step names as they propagate so a failing plan identifies
//! exactly where it stopped. [`C2Error::kind`] recovers the root category through those wrappers.

use thiserror::Error;

use crate::context::{Device, DeviceType};

/// Root category of a runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad registration, malformed definition or missing required field. Fatal at load time.
    Configuration,
    /// No factory matched the requested `(type, device, engine)`.
    OperatorNotFound,
    /// Input shapes violate an operator contract.
    ShapeMismatch,
    /// Element type is not the one requested or not supported by an operator.
    TypeMismatch,
    /// Allocation failed. Never retried.
    ResourceExhausted,
    /// Device runtime or generic execution failure.
    Execution,
}

#[derive(Debug, Error)]
pub enum C2Error {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error(
        "no operator registered for type '{op_type}' on device {device:?}{}",
        engine.as_deref().map(|e| format!(" (engine '{e}')")).unwrap_or_default()
    )]
    OperatorNotFound {
        op_type: String,
        device: DeviceType,
        engine: Option<String>,
    },

    #[error("shape mismatch: {message}")]
    ShapeMismatch { message: String },

    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("resource exhausted on {device}: failed to allocate {bytes} bytes ({reason})")]
    ResourceExhausted {
        device: Device,
        bytes: usize,
        reason: String,
    },

    #[error("execution failure: {message}")]
    Execution { message: String },

    #[error("operator '{operator}' failed: {source}")]
    Operator {
        operator: String,
        #[source]
        source: Box<C2Error>,
    },

    #[error("net '{net}' failed: {source}")]
    Net {
        net: String,
        #[source]
        source: Box<C2Error>,
    },

    #[error("execution step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<C2Error>,
    },
}

/// Convenience alias for results returned by runtime routines.
pub type C2Result<T> = Result<T, C2Error>;

impl C2Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        C2Error::Configuration {
            message: message.into(),
        }
    }

    pub fn shape_mismatch(message: impl Into<String>) -> Self {
        C2Error::ShapeMismatch {
            message: message.into(),
        }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        C2Error::TypeMismatch {
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        C2Error::Execution {
            message: message.into(),
        }
    }

    pub fn resource_exhausted(device: Device, bytes: usize, reason: impl Into<String>) -> Self {
        C2Error::ResourceExhausted {
            device,
            bytes,
            reason: reason.into(),
        }
    }

    pub fn operator_not_found(
        op_type: impl Into<String>,
        device: DeviceType,
        engine: Option<String>,
    ) -> Self {
        C2Error::OperatorNotFound {
            op_type: op_type.into(),
            device,
            engine,
        }
    }

    /// Attaches the failing operator's name.
    pub fn in_operator(self, operator: impl Into<String>) -> Self {
        C2Error::Operator {
            operator: operator.into(),
            source: Box::new(self),
        }
    }

    pub fn in_net(self, net: impl Into<String>) -> Self {
        C2Error::Net {
            net: net.into(),
            source: Box::new(self),
        }
    }

    pub fn in_step(self, step: impl Into<String>) -> Self {
        C2Error::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// Returns the root category, looking through operator/net/step context wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            C2Error::Configuration { .. } => ErrorKind::Configuration,
            C2Error::OperatorNotFound { .. } => ErrorKind::OperatorNotFound,
            C2Error::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            C2Error::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            C2Error::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            C2Error::Execution { .. } => ErrorKind::Execution,
            C2Error::Operator { .. } | C2Error::Net { .. } | C2Error::Step { .. } => {
                unreachable!("root() never returns a context wrapper")
            }
        }
    }

    /// Innermost error beneath any context wrappers.
    pub fn root(&self) -> &C2Error {
        let mut current = self;
        loop {
            match current {
                C2Error::Operator { source, .. }
                | C2Error::Net { source, .. }
                | C2Error::Step { source, .. } => current = source,
                other => return other,
            }
        }
    }

    /// Name of the innermost operator the error passed through, if any.
    pub fn failing_operator(&self) -> Option<&str> {
        let mut current = self;
        let mut found = None;
        loop {
            match current {
                C2Error::Operator { operator, source } => {
                    found = Some(operator.as_str());
                    current = source;
                }
                C2Error::Net { source, .. } | C2Error::Step { source, .. } => current = source,
                _ => return found,
            }
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for C2Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        C2Error::execution(format!("lock poisoned: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_looks_through_context_wrappers() {
        let err = C2Error::shape_mismatch("X must be 2-D")
            .in_operator("fc1")
            .in_net("train")
            .in_step("epoch");
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
        assert_eq!(err.failing_operator(), Some("fc1"));
        let text = err.to_string();
        assert!(text.contains("epoch"));
        assert!(text.contains("train"));
    }

    #[test]
    fn operator_not_found_mentions_engine() {
        let err = C2Error::operator_not_found("Conv", DeviceType::Hip, Some("MIOPEN".into()));
        assert_eq!(err.kind(), ErrorKind::OperatorNotFound);
        assert!(err.to_string().contains("MIOPEN"));
    }
}
