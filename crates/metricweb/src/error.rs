// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy shared by the registry, the enumerator and the fetch engine.

use crate::source::archive::FormatError;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Session identifier handed out to web clients.
pub type SessionId = i32;

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The backend refused to bind the requested source (bad host, archive or local spec).
    #[error("bind failed: {0}")]
    BindFailure(String),

    /// An archive path resolved outside the permitted archive root.
    #[error("path {path} escapes archive root {root}")]
    PathEscape { path: PathBuf, root: PathBuf },

    /// No free session id was found within the retry budget.
    #[error("session id allocation failed after {attempts} attempts")]
    AllocationExhausted { attempts: u32 },

    /// Session id already registered.
    #[error("session {0} already bound")]
    AlreadyBound(SessionId),

    /// Unknown session, metric, instance or instance domain.
    #[error("unknown {kind}: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Credentials must be supplied; `realm` lets the client retry with them.
    #[error("authentication required for realm {realm}")]
    AuthRequired { realm: String },

    /// Supplied credentials did not match.
    #[error("authentication failed")]
    AuthFailed,

    /// A fetch target could not be mapped to a metric/instance pair.
    #[error("unresolved target {target}: {reason}")]
    Unresolved { target: String, reason: String },

    /// The metric exists but cannot be fetched as a numeric series.
    #[error("metric {metric} has ineligible type {metric_type}")]
    TypeIneligible { metric: String, metric_type: String },

    /// A backend call failed mid-batch.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Unparseable or inverted time window.
    #[error("invalid time window: {0}")]
    InvalidWindow(String),

    /// A fetch batch with no targets.
    #[error("empty target list")]
    EmptyBatch,

    /// Malformed source specification or request parameter.
    #[error("invalid specification: {0}")]
    InvalidSpec(String),

    /// Context creation is switched off for this deployment.
    #[error("new contexts are disabled")]
    ContextsDisabled,

    /// Local-mode contexts were requested but are not permitted.
    #[error("local contexts are disabled")]
    LocalDisabled,

    /// The backend does not implement the requested operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive format error: {0}")]
    Format(#[from] FormatError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Shorthand for an `Unresolved` error.
    pub fn unresolved(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unresolved {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// HTTP status an external request handler should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::AuthRequired { .. } => 401,
            Self::AuthFailed | Self::ContextsDisabled | Self::LocalDisabled => 403,
            Self::NotFound { .. } => 404,
            Self::AlreadyBound(_) => 409,
            Self::PathEscape { .. }
            | Self::InvalidWindow(_)
            | Self::EmptyBatch
            | Self::InvalidSpec(_)
            | Self::Unresolved { .. }
            | Self::TypeIneligible { .. } => 400,
            Self::Unsupported(_) => 501,
            Self::BindFailure(_) | Self::BackendUnavailable(_) => 502,
            Self::AllocationExhausted { .. } => 503,
            Self::Io(_) | Self::Format(_) | Self::Json(_) => 500,
        }
    }
}
