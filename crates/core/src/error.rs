use std::time::Duration;

use serde::Serialize;

use crate::types::{ResourceId, ResourceType};

// ---------------------------------------------------------------------------
// Outbound failures
// ---------------------------------------------------------------------------

/// Whether a failed remote call is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retrying cannot help (not found, validation, forbidden, ...).
    Permanent,
    /// Rate limiting, server errors and timeouts.
    Transient,
}

/// Typed failure returned by a remote resource call.
///
/// `Clone` so that one settled in-flight read can hand the same failure to
/// every caller waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("{} {id} not found", .resource_type.label())]
    NotFound {
        resource_type: ResourceType,
        id: ResourceId,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Mutation refused locally because the deployment is read-only.
    #[error("Read-only mode: {0}")]
    ReadOnly(String),

    /// The remote answered but the body could not be interpreted.
    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Rate limited by remote API")]
    RateLimited {
        /// Server-suggested wait before the next attempt, if any.
        retry_after: Option<Duration>,
    },

    #[error("Remote server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// A local deadline expired before the remote answered.
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The remote itself gave up on the request (HTTP 408).
    #[error("Remote API timed out: {0}")]
    RemoteTimeout(String),

    /// Network-level failure (DNS, TLS, connection reset).
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ApiError {
    /// Retry classification used by the bulk executor.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. }
            | Self::Server { .. }
            | Self::Timeout(_)
            | Self::RemoteTimeout(_)
            | Self::Transport(_) => ErrorKind::Transient,
            Self::NotFound { .. }
            | Self::Validation(_)
            | Self::Unauthorized(_)
            | Self::Forbidden(_)
            | Self::Conflict(_)
            | Self::ReadOnly(_)
            | Self::Decode(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Map a non-2xx HTTP status onto the taxonomy.
    ///
    /// `resource_type`/`id` name the addressed resource so a 404 can be
    /// reported precisely.
    pub fn from_status(
        status: u16,
        body: String,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> Self {
        match status {
            401 => Self::Unauthorized(body),
            403 => Self::Forbidden(body),
            404 | 410 => Self::NotFound { resource_type, id },
            408 => Self::RemoteTimeout(if body.trim().is_empty() {
                "request timeout".to_string()
            } else {
                body
            }),
            409 => Self::Conflict(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::Server {
                status,
                message: body,
            },
            _ => Self::Validation(format!("HTTP {status}: {body}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal / caller defects
// ---------------------------------------------------------------------------

/// Errors that abort an operation outright.
///
/// These are caller or deployment defects, as opposed to per-resource
/// failures which are reported as values.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Read-only mode: {0}")]
    ReadOnly(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
