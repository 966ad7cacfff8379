//! Unified error type for gatehouse.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`].

use serde::Serialize;
use std::fmt;

/// Structured payload attached to an access denial so clients can render a
/// specific upgrade prompt instead of a generic error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRequired {
    /// Units (pages, or segments for video) visible without entitlement.
    pub available_units: u32,
    /// Total units in the asset.
    pub total_units: u32,
    /// Preview length for video, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_seconds: Option<u32>,
    /// Full duration for video, in seconds, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

impl UpgradeRequired {
    /// Upgrade payload for a paginated document.
    pub fn units(available_units: u32, total_units: u32) -> Self {
        Self {
            available_units,
            total_units,
            preview_seconds: None,
            duration_seconds: None,
        }
    }
}

/// Unified error type covering all failure modes in gatehouse.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity is missing or inactive.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "resource", "unit").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The access policy rejected the request; an upgrade would allow it.
    #[error("Upgrade required: {} of {} units available", .0.available_units, .0.total_units)]
    AccessDenied(UpgradeRequired),

    /// The caller is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The caller lacks permission for the requested action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An upload is not a valid document or video.
    #[error("Malformed source: {0}")]
    MalformedSource(String),

    /// Every conversion method was exhausted.
    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    /// A native binary is missing; callers fall through to the next method.
    #[error("Tool unavailable: {tool}")]
    UpstreamToolUnavailable {
        /// Name of the missing tool.
        tool: String,
    },

    /// The asset exists but its on-disk artifacts are incomplete.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// A database operation failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::AccessDenied(_) => 403,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::Validation(_) => 400,
            Error::MalformedSource(_) => 422,
            Error::ConversionFailed(_) => 502,
            Error::UpstreamToolUnavailable { .. } => 503,
            Error::NotReady(_) => 409,
            Error::Database { .. } => 500,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::AccessDenied(_) => "upgrade_required",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::Validation(_) => "validation_error",
            Error::MalformedSource(_) => "malformed_source",
            Error::ConversionFailed(_) => "conversion_failed",
            Error::UpstreamToolUnavailable { .. } => "tool_unavailable",
            Error::NotReady(_) => "resource_not_ready",
            Error::Database { .. } => "database_error",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::UpstreamToolUnavailable`].
    pub fn tool_unavailable(tool: impl Into<String>) -> Self {
        Error::UpstreamToolUnavailable { tool: tool.into() }
    }

    /// Convenience constructor for [`Error::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Convenience constructor for [`Error::Internal`].
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
