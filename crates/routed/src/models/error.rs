use crate::cache::CacheError;
use crate::validation::ValidationErrors;
use serde_json::json;

/// Framework-level error currency carried through the middleware pipeline.
///
/// Recoverable conditions are typed variants handled by the recovery
/// middleware; each variant maps to a well-defined HTTP status. Transport
/// failures are special-cased: a broken pipe never produces a user-visible
/// body, the request is silently aborted instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// One or more field rules failed; renders 422 with an error bag.
    #[error("validation failed")]
    Validation(ValidationErrors),

    /// Framework-signalled failure with an explicit status code.
    #[error("{message}")]
    Status {
        /// HTTP status to render.
        status: u16,
        /// Human-readable message included in the response body.
        message: String,
    },

    /// No route matched the request.
    #[error("not found")]
    NotFound,

    /// The path matched but the method is not registered.
    #[error("method not allowed")]
    MethodNotAllowed {
        /// Verbs that are registered for the matched path.
        allowed: Vec<String>,
    },

    /// The request exceeded the pipeline deadline; rendered as 504.
    #[error("request timed out")]
    Timeout,

    /// Raised at engine build or driver resolve time; never masked.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Cache subsystem failure surfaced through the pipeline.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Socket-level failure while talking to the peer.
    #[error("transport failure: {message}")]
    Transport {
        /// Description of the underlying I/O failure.
        message: String,
        /// True for broken-pipe/connection-reset style disconnects.
        disconnect: bool,
    },

    /// Programmer or environment error without a more specific kind.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Shorthand for a [`EngineError::Status`] value.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Builds a transport error from an I/O error, classifying disconnects.
    pub fn transport(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        let disconnect = matches!(
            err.kind(),
            ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::UnexpectedEof
        );
        Self::Transport {
            message: err.to_string(),
            disconnect,
        }
    }

    /// The HTTP status this error renders with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 422,
            Self::Status { status, .. } => *status,
            Self::NotFound => 404,
            Self::MethodNotAllowed { .. } => 405,
            Self::Timeout => 504,
            Self::Configuration(_) => 500,
            Self::Cache(CacheError::LockTimeout { .. }) => 503,
            Self::Cache(_) => 500,
            Self::Transport { .. } => 502,
            Self::Internal(_) => 500,
        }
    }

    /// True when the peer has gone away and no body should be rendered.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Transport { disconnect: true, .. })
    }

    /// Default JSON body for this error kind, used by the recovery
    /// middleware when no handler has written a response.
    pub fn default_body(&self) -> serde_json::Value {
        match self {
            Self::Validation(errors) => json!({ "errors": errors.as_map() }),
            Self::Status { message, .. } => json!({ "error": message }),
            Self::NotFound => json!({ "error": "Not Found" }),
            Self::MethodNotAllowed { .. } => json!({ "error": "Method Not Allowed" }),
            Self::Timeout => json!({ "error": "Gateway Timeout" }),
            _ => json!({ "error": "Internal Server Error" }),
        }
    }
}

/// A single entry on the per-request error list.
///
/// Middlewares and handlers may record non-fatal problems here without
/// short-circuiting the pipeline; the list is inspectable downstream.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    /// Short machine-friendly kind, e.g. `"cast"` or `"session"`.
    pub kind: String,
    /// Human-readable description.
    pub message: String,
}

impl ErrorEntry {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}
