//! Error types for the SOAP endpoint.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised anywhere in the dispatch pipeline.
///
/// Everything that occurs between envelope read and response write is
/// converted into a SOAP fault by the fault transformer; errors outside that
/// window surface as plain HTTP responses.
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("no operation matches action '{0}'")]
    NoOperation(String),

    #[error("argument binding failed: {0}")]
    Binding(String),

    #[error("rejected by filter: {0}")]
    FilterRejection(String),

    #[error("operation failed: {message}")]
    Invocation {
        message: String,
        /// The user error the invocation adapter wrapped, if any.
        #[source]
        source: Option<Box<EndpointError>>,
    },

    #[error("response write failed: {0}")]
    ResponseWrite(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EndpointError {
    /// Classify this error into the fault taxonomy.
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::MalformedEnvelope(_) => FaultKind::MalformedEnvelope,
            Self::NoOperation(_) => FaultKind::NoOperation,
            Self::Binding(_) => FaultKind::BindingError,
            Self::FilterRejection(_) => FaultKind::FilterRejection,
            Self::Invocation { .. } => FaultKind::InvocationError,
            Self::ResponseWrite(_) => FaultKind::ResponseWriteError,
            Self::InvalidArgument(_) => FaultKind::BindingError,
            Self::Internal(_) | Self::Io(_) => FaultKind::InternalError,
        }
    }

    /// Wrap a user error the way the invocation adapter does, preserving one
    /// unwrappable layer for the fault transformer.
    pub fn invocation(message: impl Into<String>, source: EndpointError) -> Self {
        Self::Invocation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// A user error with no wrapped inner layer.
    pub fn user(message: impl Into<String>) -> Self {
        Self::Invocation {
            message: message.into(),
            source: None,
        }
    }
}

/// Fault taxonomy. Each kind resolves to a SOAP fault with a stable
/// machine-readable code carried in the fault detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// XML error, size/depth breach, or SOAP version mismatch
    MalformedEnvelope,
    /// No operation matched the incoming action
    NoOperation,
    /// Argument deserialization failed
    BindingError,
    /// A request or response filter rejected the message
    FilterRejection,
    /// User code returned an error
    InvocationError,
    /// Serializing or sending the response failed
    ResponseWriteError,
    /// Anything else
    InternalError,
}

impl FaultKind {
    /// Stable string code for this fault kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope => "MALFORMED_ENVELOPE",
            Self::NoOperation => "NO_OPERATION",
            Self::BindingError => "BINDING_ERROR",
            Self::FilterRejection => "FILTER_REJECTION",
            Self::InvocationError => "INVOCATION_ERROR",
            Self::ResponseWriteError => "RESPONSE_WRITE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether the fault is attributable to the caller. Drives the
    /// version-specific fault code (Client/Sender vs Server/Receiver).
    pub fn is_sender_fault(&self) -> bool {
        matches!(
            self,
            Self::MalformedEnvelope | Self::NoOperation | Self::BindingError | Self::FilterRejection
        )
    }
}
