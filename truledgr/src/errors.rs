use reqwest::StatusCode;
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error as ThisError;

/// The transport-level reason a request never produced an HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// Host name could not be resolved
    Dns,
    /// TLS handshake or certificate failure
    Tls,
    /// Request exceeded its timeout
    Timeout,
    /// TCP connection refused or reset
    Connect,
    Other,
}

impl TransportFailure {
    /// Classify a reqwest error by walking its source chain.
    ///
    /// reqwest does not expose DNS or TLS failures as distinct kinds, so the lower layers'
    /// messages are inspected instead.
    pub fn classify(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }

        let mut chain = String::new();
        let mut source: Option<&(dyn StdError + 'static)> = error.source();
        while let Some(cause) = source {
            chain.push_str(&cause.to_string().to_lowercase());
            chain.push(' ');
            source = cause.source();
        }

        if chain.contains("dns error") || chain.contains("failed to lookup address") || chain.contains("name or service not known") {
            Self::Dns
        } else if chain.contains("certificate") || chain.contains("tls") || chain.contains("handshake") {
            Self::Tls
        } else if chain.contains("timed out") {
            Self::Timeout
        } else if error.is_connect() {
            Self::Connect
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportFailure::Dns => "DNS",
            TransportFailure::Tls => "TLS",
            TransportFailure::Timeout => "Timeout",
            TransportFailure::Connect => "Connection",
            TransportFailure::Other => "Transport",
        };
        f.write_str(label)
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// Input rejected locally, before any network call
    #[error("{message}")]
    Validation { message: String },

    /// Bad credentials, or the session token was rejected with a 401
    #[error("Not authenticated")]
    Auth { message: Option<String> },

    /// The request never produced an HTTP response
    #[error("{kind} error: {message}")]
    Network { kind: TransportFailure, message: String },

    /// Any non-2xx, non-401 response
    #[error("HTTP {status}: {message}")]
    Server { status: StatusCode, message: String },

    /// Reading or writing the persisted client state failed
    #[error("Failed to access client state at {}: {message}", path.display())]
    Storage { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation { message: message.into() }
    }

    /// True when the server rejected the request's credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Auth { .. })
    }

    /// HTTP status associated with the error, when a response was received
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Error::Auth { .. } => Some(StatusCode::UNAUTHORIZED),
            Error::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation { message } => message.clone(),
            Error::Auth { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Network { kind: TransportFailure::Timeout, .. } => "The TruLedgr API did not respond in time".to_string(),
            Error::Network { .. } => "Unable to reach the TruLedgr API".to_string(),
            Error::Server { status, message } => format!("Server error ({}): {message}", status.as_u16()),
            Error::Storage { .. } => "Failed to save local client state".to_string(),
            Error::Config { message } => message.clone(),
            Error::Other(_) => "Unexpected error".to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return Error::Other(anyhow::anyhow!("Failed to decode response body: {error}"));
        }
        Error::Network {
            kind: TransportFailure::classify(&error),
            message: error.to_string(),
        }
    }
}

/// Type alias for client operation results
pub type Result<T> = std::result::Result<T, Error>;
