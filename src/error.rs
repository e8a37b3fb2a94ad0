//! Error taxonomy shared by the type graph, query pipeline, deserializer and client.
//!
//! Every failure crosses module boundaries as a [`MappingError`] variant so callers
//! can branch on the kind instead of parsing messages. Errors are fail-fast: nothing
//! in this crate retries.

use std::fmt;

use thiserror::Error;

use crate::types::HttpMethod;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MappingError>;

/// Structured errors raised by the mapping core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MappingError {
    /// A type reachable from a query or payload has no mapping.
    #[error("unknown type '{name}'")]
    UnknownType {
        /// Native type or type name that failed to resolve.
        name: String,
    },
    /// Illegal query shape, rejected before any request is sent.
    #[error("not supported: {0}")]
    NotSupported(String),
    /// A filter, ordering or selection expression could not be compiled.
    #[error("filter compilation failed: {message}")]
    FilterCompilation {
        /// Human-readable description of the offending member or token.
        message: String,
    },
    /// JSON token shape does not match the serialization mode of the expected type.
    #[error("serialization format error: {0}")]
    SerializationFormat(String),
    /// Required property absent from a payload and no default is available.
    #[error("missing required property '{property}' on type '{type_name}' at '{path}'")]
    MissingProperty {
        /// Structured type being constructed.
        type_name: String,
        /// Property that was required.
        property: String,
        /// Expand path of the node being materialized.
        path: String,
    },
    /// Property-level write or item operation blocked by access control.
    #[error("access denied: {method} of property '{property}' on type '{type_name}'")]
    AccessDenied {
        /// Owning type of the property.
        type_name: String,
        /// Property being written.
        property: String,
        /// Operation that was attempted.
        method: HttpMethod,
    },
    /// `first`-style projection applied to an empty sequence.
    #[error("sequence contains no matching element")]
    EmptyResult,
    /// Malformed query-string parameter or an evaluation fault.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// Non-success response from a transport collaborator.
    #[error("transport returned status {status}: {message}")]
    Transport {
        /// Status code reported by the transport.
        status: u16,
        /// Body or reason supplied with the response.
        message: String,
    },
    /// Configuration or schema file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MappingError {
    /// Builds an [`MappingError::UnknownType`] for the supplied name.
    pub fn unknown_type(name: impl fmt::Display) -> Self {
        MappingError::UnknownType {
            name: name.to_string(),
        }
    }

    /// Builds an [`MappingError::NotSupported`] error.
    pub fn not_supported(reason: impl Into<String>) -> Self {
        MappingError::NotSupported(reason.into())
    }

    /// Builds an [`MappingError::FilterCompilation`] error.
    pub fn filter(message: impl Into<String>) -> Self {
        MappingError::FilterCompilation {
            message: message.into(),
        }
    }

    /// Builds an [`MappingError::SerializationFormat`] error.
    pub fn format(message: impl Into<String>) -> Self {
        MappingError::SerializationFormat(message.into())
    }

    /// Builds an [`MappingError::InvalidQuery`] error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        MappingError::InvalidQuery(message.into())
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            MappingError::UnknownType { .. } => "UnknownType",
            MappingError::NotSupported(_) => "NotSupported",
            MappingError::FilterCompilation { .. } => "FilterCompilation",
            MappingError::SerializationFormat(_) => "SerializationFormat",
            MappingError::MissingProperty { .. } => "MissingProperty",
            MappingError::AccessDenied { .. } => "AccessDenied",
            MappingError::EmptyResult => "EmptyResult",
            MappingError::InvalidQuery(_) => "InvalidQuery",
            MappingError::Transport { .. } => "Transport",
            MappingError::Config(_) => "Config",
        }
    }

    /// Suggested HTTP status class for hosts that surface this error.
    ///
    /// The mapping policy belongs to the host; this is only the default used by the
    /// CLI and tests.
    pub fn status_hint(&self) -> u16 {
        match self {
            MappingError::UnknownType { .. } | MappingError::EmptyResult => 404,
            MappingError::AccessDenied { .. } => 403,
            MappingError::Transport { status, .. } => *status,
            MappingError::Config(_) => 500,
            _ => 400,
        }
    }

    /// Reconstructs an error from the `code`/`message` pair written by [`ErrorBody`].
    pub fn from_code(code: &str, message: &str, status: u16) -> Self {
        match code {
            "EmptyResult" => MappingError::EmptyResult,
            "NotSupported" => MappingError::NotSupported(message.to_owned()),
            "FilterCompilation" => MappingError::filter(message),
            "InvalidQuery" => MappingError::InvalidQuery(message.to_owned()),
            "UnknownType" => MappingError::unknown_type(message),
            _ => MappingError::Transport {
                status,
                message: message.to_owned(),
            },
        }
    }
}

/// Wire representation of an error response body.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorBody {
    /// Value of [`MappingError::code`].
    pub code: String,
    /// Display form of the error.
    pub message: String,
}

impl From<&MappingError> for ErrorBody {
    fn from(err: &MappingError) -> Self {
        let message = match err {
            MappingError::NotSupported(m) | MappingError::InvalidQuery(m) => m.clone(),
            MappingError::FilterCompilation { message } => message.clone(),
            MappingError::UnknownType { name } => name.clone(),
            other => other.to_string(),
        };
        ErrorBody {
            code: err.code().to_owned(),
            message,
        }
    }
}

/// Convenience wrapper that formats errors with their codes.
pub struct ErrorWithCode<'a>(pub &'a MappingError);

impl fmt::Display for ErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_round_trips_kind() {
        let err = MappingError::not_supported("only one Skip allowed");
        let body = ErrorBody::from(&err);
        assert_eq!(body.code, "NotSupported");
        assert_eq!(MappingError::from_code(&body.code, &body.message, 400), err);
    }

    #[test]
    fn unknown_codes_become_transport_errors() {
        let err = MappingError::from_code("Weird", "boom", 502);
        assert_eq!(
            err,
            MappingError::Transport {
                status: 502,
                message: "boom".into()
            }
        );
        assert_eq!(ErrorWithCode(&MappingError::EmptyResult).to_string(), "[EmptyResult] sequence contains no matching element");
    }
}
