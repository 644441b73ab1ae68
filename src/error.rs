//! Custom error types for the client.
//!
//! This module defines one error enum per layer of the acquisition pipeline,
//! built with `thiserror` so that each layer can be handled (or discarded)
//! independently and converted upward with the `?` operator.
//!
//! ## Error Hierarchy
//!
//! - **`ConnError`**: transport-layer failures (connect, status, envelope,
//!   stream EOF). Always recoverable: the acquisition loop reconnects.
//! - **`DecodeError`**: payload-layer failures. Recoverable by discarding the
//!   single payload and fetching the next one.
//! - **`ClientError`**: application-level errors surfaced to callers. Only
//!   `Construction` and the configuration variants are fatal, and only at
//!   construction time. `NoData` is the "nothing published yet" result of the
//!   `latest_*` accessors.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ClientError>;

// =============================================================================
// Transport Errors
// =============================================================================

/// Failure talking to the device over HTTP.
#[derive(Error, Debug)]
pub enum ConnError {
    /// The device could not be reached (connect refused, DNS, reset).
    #[error("device unreachable at {url}: {message}")]
    Unreachable {
        /// URL that was requested
        url: String,
        /// Underlying failure description
        message: String,
    },

    /// The device answered with a status other than 200.
    #[error("received non-200 status code {0}")]
    BadStatus(u16),

    /// The device answered 200 but the body is not a usable payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A streaming response body ended.
    #[error("measurement stream closed by device")]
    Disconnected,
}

impl ConnError {
    /// Build an `Unreachable` error from a reqwest failure.
    pub(crate) fn unreachable(url: &str, err: &reqwest::Error) -> Self {
        ConnError::Unreachable {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Decode Errors
// =============================================================================

/// Failure decoding a point-tuple payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload has no bracket pair to strip (too short, or a device
    /// sentinel such as `exit`).
    #[error("payload is empty or carries no tuple list")]
    Empty,

    /// A tuple could not be read.
    #[error("malformed tuple #{tuple}: {reason}")]
    Malformed {
        /// Zero-based index of the offending tuple
        tuple: usize,
        /// What was wrong with it
        reason: String,
    },
}

impl DecodeError {
    pub(crate) fn malformed(tuple: usize, reason: impl Into<String>) -> Self {
        DecodeError::Malformed {
            tuple,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Application Errors
// =============================================================================

/// Primary error type surfaced by [`crate::client::LidarClient`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// The admission probe failed; no background worker was started.
    #[error("failed to connect to device {endpoint}: {source}")]
    Construction {
        /// `host:port` of the device
        endpoint: String,
        /// Probe failure
        #[source]
        source: ConnError,
    },

    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration values parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// No measurement has been published yet, or the client is closed.
    #[error("no measurement available")]
    NoData,

    /// Shutdown completed but releasing the connection failed.
    #[error("shutdown failed: {0}")]
    Shutdown(String),
}

impl From<figment::Error> for ClientError {
    fn from(value: figment::Error) -> Self {
        ClientError::Config(Box::new(value))
    }
}

impl ClientError {
    /// True for the "no data yet" result of the `latest_*` accessors.
    pub fn is_no_data(&self) -> bool {
        matches!(self, ClientError::NoData)
    }
}
