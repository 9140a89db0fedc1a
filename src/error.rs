//! Error types for the rest2res service.
//!
//! Two layers of errors exist:
//!
//! - [`Error`] covers everything that can go wrong while building the
//!   service: configuration, URL-template scanning, and path/pattern
//!   compilation. These are fatal at startup.
//! - [`ResError`] is the bus-level error attached to a cached response and
//!   returned to requesters: `system.notFound` for missing resources and
//!   origin 404s, `system.internalError` for everything else. A `ResError`
//!   on a cached response is sticky until the next refresh cycle evicts the
//!   URL.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type for rest2res operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading configuration or compiling the resource
/// schema, and failures reported by the bus transport.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Configuration file or endpoint configuration rejected at startup.
    #[error("invalid config: {0}")]
    Config(String),

    /// URL template failed to scan.
    #[error("invalid url template: {0}")]
    UrlTemplate(String),

    /// Path/pattern compilation or handler registration failed.
    #[error("invalid registration: {0}")]
    Registration(String),

    /// Origin response did not match the endpoint's schema.
    #[error("{0}")]
    Shape(String),

    /// I/O error reading or writing the configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client construction error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Failure reported by the bus transport.
    #[error("bus error: {0}")]
    Bus(String),
}

/// An error answered over the bus, carrying a RES error code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResError {
    pub code: String,
    pub message: String,
}

impl ResError {
    pub const NOT_FOUND: &'static str = "system.notFound";
    pub const INTERNAL_ERROR: &'static str = "system.internalError";

    /// The resource (or its origin document) does not exist.
    pub fn not_found() -> Self {
        ResError {
            code: Self::NOT_FOUND.to_string(),
            message: "Not found".to_string(),
        }
    }

    /// Origin transport failure, unexpected status, body decode failure,
    /// or a schema mismatch while decomposing the response.
    pub fn internal(message: impl Into<String>) -> Self {
        ResError {
            code: Self::INTERNAL_ERROR.to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code == Self::NOT_FOUND
    }
}

impl fmt::Display for ResError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for ResError {}
