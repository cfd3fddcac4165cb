//! Unified error handling for the trail-miles library.
//!
//! Every fallible operation in the crate returns [`TrailMilesError`]. Marker
//! loading recovers from `Transport`/`Parse` failures for the default trail;
//! everything else is surfaced to the caller.

use std::fmt;

/// Error codes reported by a location provider, matching the platform
/// geolocation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorCode {
    PermissionDenied = 1,
    PositionUnavailable = 2,
    Timeout = 3,
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorCode::PermissionDenied => write!(f, "permission denied"),
            ProviderErrorCode::PositionUnavailable => write!(f, "position unavailable"),
            ProviderErrorCode::Timeout => write!(f, "timeout"),
        }
    }
}

/// Unified error type for trail-miles operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TrailMilesError {
    /// The platform lacks a required capability (e.g. no location support)
    Capability { message: String },
    /// Fetching reference data failed
    Transport {
        message: String,
        status_code: Option<u16>,
    },
    /// Reference data or an imported document is malformed
    Parse { message: String },
    /// Reading or writing durable storage failed
    Persistence { message: String },
    /// The location provider reported an error
    Provider {
        code: ProviderErrorCode,
        message: String,
    },
    /// Invalid configuration
    Config { message: String },
    /// Generic internal error
    Internal { message: String },
}

impl TrailMilesError {
    pub fn capability(message: impl Into<String>) -> Self {
        Self::Capability {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn provider(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self::Provider {
            code,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True for failures that marker loading may recover from with the
    /// built-in fallback set.
    pub fn is_recoverable_by_fallback(&self) -> bool {
        matches!(
            self,
            TrailMilesError::Transport { .. } | TrailMilesError::Parse { .. }
        )
    }
}

impl fmt::Display for TrailMilesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrailMilesError::Capability { message } => {
                write!(f, "Capability error: {}", message)
            }
            TrailMilesError::Transport {
                message,
                status_code,
            } => {
                if let Some(code) = status_code {
                    write!(f, "Transport error ({}): {}", code, message)
                } else {
                    write!(f, "Transport error: {}", message)
                }
            }
            TrailMilesError::Parse { message } => write!(f, "Parse error: {}", message),
            TrailMilesError::Persistence { message } => {
                write!(f, "Persistence error: {}", message)
            }
            TrailMilesError::Provider { code, message } => {
                write!(f, "Location provider error ({}): {}", code, message)
            }
            TrailMilesError::Config { message } => {
                write!(f, "Configuration error: {}", message)
            }
            TrailMilesError::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for TrailMilesError {}

impl From<serde_json::Error> for TrailMilesError {
    fn from(err: serde_json::Error) -> Self {
        TrailMilesError::parse(err.to_string())
    }
}

impl From<gpx::errors::GpxError> for TrailMilesError {
    fn from(err: gpx::errors::GpxError) -> Self {
        TrailMilesError::parse(format!("invalid GPX: {}", err))
    }
}

impl From<std::io::Error> for TrailMilesError {
    fn from(err: std::io::Error) -> Self {
        TrailMilesError::transport(err.to_string())
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for TrailMilesError {
    fn from(err: rusqlite::Error) -> Self {
        TrailMilesError::persistence(err.to_string())
    }
}

#[cfg(feature = "persistence")]
impl From<rmp_serde::encode::Error> for TrailMilesError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        TrailMilesError::persistence(format!("encode failed: {}", err))
    }
}

#[cfg(feature = "persistence")]
impl From<rmp_serde::decode::Error> for TrailMilesError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        TrailMilesError::persistence(format!("decode failed: {}", err))
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TrailMilesError {
    fn from(err: reqwest::Error) -> Self {
        TrailMilesError::Transport {
            status_code: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Result type alias for trail-miles operations.
pub type Result<T> = std::result::Result<T, TrailMilesError>;

/// Extension trait for converting Option to TrailMilesError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a capability error.
    fn ok_or_capability(self, message: &str) -> Result<T>;

    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_capability(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrailMilesError::capability(message))
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrailMilesError::Internal {
            message: message.to_string(),
        })
    }
}
