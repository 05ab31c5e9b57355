//! Error types for the Adapty SDK

use thiserror::Error;

/// Error classes reported by the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptyErrorCode {
    /// Profile creation attempted while a profile already exists
    AlreadyAuthenticated,
    /// Operation needs a profile or installation that does not exist yet
    MissingRequiredParams,
    /// Connectivity failure
    Network,
    /// Request exceeded its deadline
    Timeout,
    /// Backend failed to process the request (5xx)
    ServerError,
    /// Backend rejected the request on business grounds (4xx)
    ServerRejected,
    /// Response body could not be understood
    InvalidResponse,
    /// Local cache read or write failed
    Storage,
    /// Value could not be encoded or decoded
    Serialization,
    /// Platform store reported a failed purchase
    PurchaseFailed,
    /// User cancelled the purchase sheet
    PurchaseCancelled,
    /// Client was configured with unusable options
    InvalidConfiguration,
    /// Identity was reset by a logout while the request was in flight
    IdentityReset,
}

impl std::fmt::Display for AdaptyErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AlreadyAuthenticated => "already_authenticated",
            Self::MissingRequiredParams => "missing_required_params",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::ServerRejected => "server_rejected",
            Self::InvalidResponse => "invalid_response",
            Self::Storage => "storage",
            Self::Serialization => "serialization",
            Self::PurchaseFailed => "purchase_failed",
            Self::PurchaseCancelled => "purchase_cancelled",
            Self::InvalidConfiguration => "invalid_configuration",
            Self::IdentityReset => "identity_reset",
        };
        f.write_str(s)
    }
}

/// SDK error: a code, a human-readable message and the HTTP status when the
/// error came from the backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct AdaptyError {
    pub code: AdaptyErrorCode,
    pub message: String,
    pub status: Option<u16>,
}

impl AdaptyError {
    pub fn new(code: AdaptyErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(code: AdaptyErrorCode, message: impl Into<String>, status: u16) -> Self {
        Self {
            code,
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn already_authenticated() -> Self {
        Self::new(
            AdaptyErrorCode::AlreadyAuthenticated,
            "A profile already exists for this device",
        )
    }

    pub fn missing_required_params() -> Self {
        Self::new(
            AdaptyErrorCode::MissingRequiredParams,
            "Profile or installation is not available yet",
        )
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AdaptyErrorCode::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(AdaptyErrorCode::Timeout, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(AdaptyErrorCode::InvalidResponse, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(AdaptyErrorCode::Storage, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(AdaptyErrorCode::Serialization, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AdaptyErrorCode::InvalidConfiguration, message)
    }

    pub fn identity_reset() -> Self {
        Self::new(
            AdaptyErrorCode::IdentityReset,
            "Identity was reset while the request was in flight",
        )
    }

    /// Whether the failure may succeed when retried later.
    ///
    /// Transient failures leave purchase transactions unfinalized; everything
    /// else is terminal for the attempt that produced it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code,
            AdaptyErrorCode::Network
                | AdaptyErrorCode::Timeout
                | AdaptyErrorCode::ServerError
                | AdaptyErrorCode::InvalidResponse
        )
    }
}

impl From<serde_json::Error> for AdaptyError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl From<reqwest::Error> for AdaptyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(e.to_string())
        } else if e.is_decode() {
            Self::invalid_response(e.to_string())
        } else {
            Self::network(e.to_string())
        }
    }
}

/// Map an HTTP status code from the backend to an error code.
pub fn map_status_to_error_code(status: u16) -> AdaptyErrorCode {
    match status {
        408 => AdaptyErrorCode::Timeout,
        429 => AdaptyErrorCode::ServerError,
        500..=599 => AdaptyErrorCode::ServerError,
        _ => AdaptyErrorCode::ServerRejected,
    }
}

pub type Result<T> = std::result::Result<T, AdaptyError>;
