//! Unified error handling for the edge router
//!
//! Every failure a handler can surface is a [`RouterError`]. The router turns
//! these into `500` envelopes through [`RouterError::to_fields`], so each
//! variant carries its diagnostic detail as named fields rather than only a
//! formatted string.

use std::fmt;

use serde_json::{Map, Value as JsonValue};

use crate::backend::Endpoint;

/// Unified error types for the router
#[derive(Debug)]
pub enum RouterError {
    /// Cache, origin or task pool call failed
    UpstreamUnavailable {
        upstream: String,
        endpoint: Option<Endpoint>,
        status: Option<u16>,
        detail: String,
    },

    /// A backing listener has no current endpoint
    EndpointUnresolved { listener: String },

    /// Anything else that went wrong inside a handler
    HandlerInternal(String),

    /// Configuration errors, only raised at startup
    Configuration(String),
}

impl RouterError {
    pub fn upstream(upstream: impl Into<String>, detail: impl fmt::Display) -> Self {
        RouterError::UpstreamUnavailable {
            upstream: upstream.into(),
            endpoint: None,
            status: None,
            detail: detail.to_string(),
        }
    }

    /// Attaches the endpoint that was being talked to when the failure happened.
    pub fn at(mut self, at: &Endpoint) -> Self {
        if let RouterError::UpstreamUnavailable { endpoint, .. } = &mut self {
            *endpoint = Some(at.clone());
        }
        self
    }

    pub fn name(&self) -> &'static str {
        match self {
            RouterError::UpstreamUnavailable { .. } => "UpstreamUnavailable",
            RouterError::EndpointUnresolved { .. } => "EndpointUnresolved",
            RouterError::HandlerInternal(_) => "HandlerInternalError",
            RouterError::Configuration(_) => "ConfigurationError",
        }
    }

    /// Serializes the failure to a generic key/value mapping.
    ///
    /// The mapping always has `name` and `message`; every other field of the
    /// variant is included as-is. Redaction is applied by the caller through
    /// [`ErrorExposure`].
    pub fn to_fields(&self) -> Map<String, JsonValue> {
        let mut fields = Map::new();
        fields.insert("name".into(), self.name().into());
        fields.insert("message".into(), self.to_string().into());

        match self {
            RouterError::UpstreamUnavailable {
                upstream,
                endpoint,
                status,
                detail,
            } => {
                fields.insert("upstream".into(), upstream.as_str().into());
                if let Some(endpoint) = endpoint {
                    fields.insert("hostname".into(), endpoint.hostname.as_str().into());
                    fields.insert("port".into(), endpoint.port.into());
                }
                if let Some(status) = status {
                    fields.insert("status".into(), (*status).into());
                }
                fields.insert("detail".into(), detail.as_str().into());
            }
            RouterError::EndpointUnresolved { listener } => {
                fields.insert("listener".into(), listener.as_str().into());
            }
            RouterError::HandlerInternal(_) | RouterError::Configuration(_) => {}
        }

        fields
    }
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::UpstreamUnavailable {
                upstream,
                status: Some(status),
                ..
            } => write!(f, "Upstream '{upstream}' responded with status {status}"),
            RouterError::UpstreamUnavailable {
                upstream, detail, ..
            } => write!(f, "Upstream '{upstream}' unavailable: {detail}"),
            RouterError::EndpointUnresolved { listener } => {
                write!(f, "No endpoint registered for listener '{listener}'")
            }
            RouterError::HandlerInternal(msg) => write!(f, "Internal error: {msg}"),
            RouterError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for RouterError {}

impl From<std::io::Error> for RouterError {
    fn from(err: std::io::Error) -> Self {
        RouterError::HandlerInternal(err.to_string())
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::HandlerInternal(format!("JSON serialization failed: {err}"))
    }
}

impl From<RouterError> for Box<pingora_error::Error> {
    fn from(err: RouterError) -> Self {
        use pingora_error::ErrorType;

        let etype = match &err {
            RouterError::Configuration(_) => ErrorType::FileReadError,
            RouterError::UpstreamUnavailable { .. } | RouterError::EndpointUnresolved { .. } => {
                ErrorType::ConnectNoRoute
            }
            RouterError::HandlerInternal(_) => ErrorType::InternalError,
        };
        pingora_error::Error::explain(etype, err.to_string())
    }
}

/// Result type alias for router operations
pub type RouterResult<T> = std::result::Result<T, RouterError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> RouterResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> RouterResult<T> {
        self.map_err(|e| RouterError::HandlerInternal(format!("{context}: {e}")))
    }
}

/// How much of a failure is exposed in a `500` body.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ErrorExposure {
    /// Every field of the failure, verbatim.
    #[default]
    Full,
    /// Only the listed fields; `message` is always kept.
    AllowList(Vec<String>),
}

impl ErrorExposure {
    pub fn apply(&self, mut fields: Map<String, JsonValue>) -> Map<String, JsonValue> {
        if let ErrorExposure::AllowList(allowed) = self {
            fields.retain(|key, _| key == "message" || allowed.iter().any(|a| a == key));
        }
        fields
    }
}
