use thiserror::Error;

/// Result type for switcher operations
pub type Result<T> = std::result::Result<T, SwitcherError>;

/// Coarse classification of a [`SwitcherError`]
///
/// Callers that only need to decide between "retry", "fix the request" and
/// "give up" should match on this rather than on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection, DNS, timeout or socket failure
    Transport,
    /// The device answered but reported a failure in-band
    VendorRejected,
    /// The login exchange failed
    LoginFailed,
    /// Detection could not classify the device
    UnknownDevice,
    /// The resolved model does not offer this capability
    Unsupported,
    /// A caller-supplied identifier or value is out of range
    InvalidParameter,
    /// The caller's deadline would pass before a rate-limit token is available
    RateLimitDeadlineExceeded,
    /// The device answered with a payload we could not make sense of
    Decode,
}

/// Errors that can occur when talking to a switcher
#[derive(Error, Debug)]
pub enum SwitcherError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// No reply arrived within the read deadline
    #[error("Timed out waiting for a reply after {0:?}")]
    Timeout(std::time::Duration),

    /// The caller's deadline expired during a step
    #[error("Deadline exceeded during {step}")]
    DeadlineExceeded { step: &'static str },

    /// The device returned a non-success HTTP status
    #[error("Device returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Device-reported failure sentinel
    #[error("Device rejected the request: {detail}")]
    VendorRejected { detail: String },

    /// Authentication step failed
    #[error("Login failed: {detail}")]
    LoginFailed { detail: String },

    /// Detection could not classify the device
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Capability not offered by the resolved model
    #[error("{operation} is not supported by {model}")]
    Unsupported {
        operation: &'static str,
        model: &'static str,
    },

    /// Caller-supplied identifier or value out of range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The caller's deadline elapsed while waiting for a rate-limit token
    #[error("Rate limit wait of {wait:?} would exceed the deadline")]
    RateLimitDeadlineExceeded { wait: std::time::Duration },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or unexpected response payload
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// An error annotated with the step that produced it
    #[error("{step}: {source}")]
    Context {
        step: String,
        #[source]
        source: Box<SwitcherError>,
    },
}

impl SwitcherError {
    /// Attach the name of the failing step to this error
    pub fn during(self, step: impl Into<String>) -> Self {
        SwitcherError::Context {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// Classify this error into the crate's error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwitcherError::Http(e) if e.is_decode() => ErrorKind::Decode,
            SwitcherError::Http(_)
            | SwitcherError::WebSocket(_)
            | SwitcherError::ConnectionClosed
            | SwitcherError::Timeout(_)
            | SwitcherError::DeadlineExceeded { .. } => ErrorKind::Transport,
            SwitcherError::HttpStatus { .. } | SwitcherError::VendorRejected { .. } => {
                ErrorKind::VendorRejected
            }
            SwitcherError::LoginFailed { .. } => ErrorKind::LoginFailed,
            SwitcherError::UnknownDevice(_) => ErrorKind::UnknownDevice,
            SwitcherError::Unsupported { .. } => ErrorKind::Unsupported,
            SwitcherError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            SwitcherError::RateLimitDeadlineExceeded { .. } => {
                ErrorKind::RateLimitDeadlineExceeded
            }
            SwitcherError::Json(_) | SwitcherError::InvalidResponse(_) => ErrorKind::Decode,
            SwitcherError::Context { source, .. } => source.kind(),
        }
    }

    /// Strip any step annotations and return the innermost error
    pub fn root(&self) -> &SwitcherError {
        match self {
            SwitcherError::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind_of_source() {
        let err = SwitcherError::VendorRejected {
            detail: "ER".to_string(),
        }
        .during("set input")
        .during("façade");

        assert_eq!(err.kind(), ErrorKind::VendorRejected);
        assert!(matches!(err.root(), SwitcherError::VendorRejected { .. }));
        assert_eq!(
            err.to_string(),
            "façade: set input: Device rejected the request: ER"
        );
    }

    #[test]
    fn timeouts_are_transport_errors() {
        assert_eq!(
            SwitcherError::DeadlineExceeded { step: "read" }.kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            SwitcherError::Timeout(std::time::Duration::from_secs(5)).kind(),
            ErrorKind::Transport
        );
    }
}
