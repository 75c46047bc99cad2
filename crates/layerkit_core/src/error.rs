//! Error taxonomy shared by the context, repository and service layers.
//!
//! # Responsibility
//! - Classify every failure into a small, stable set of kinds.
//! - Provide the HTTP status mapping used by web adapters.
//!
//! # Invariants
//! - Each layer error exposes `kind()`; wrapping an error never changes it.
//! - `NoActiveSession` and `Acquisition` are never retried by this crate.

use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Stable classification of a failure, independent of the storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Lookup target is absent.
    NotFound,
    /// Uniqueness or concurrent-write violation.
    Conflict,
    /// Malformed pagination, filter or key input.
    InvalidArgument,
    /// Domain rule rejected by a service hook.
    Validation,
    /// Pool exhausted or backend unreachable when starting a session.
    Acquisition,
    /// Data access attempted outside a request boundary.
    NoActiveSession,
    /// Any other storage failure.
    Storage,
}

impl ErrorKind {
    /// Status code a web layer should answer with.
    pub fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::InvalidArgument => 400,
            Self::Validation => 422,
            Self::Acquisition => 503,
            Self::NoActiveSession | Self::Storage => 500,
        }
    }

    /// Short machine-readable label, also used as the `error_kind` log field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InvalidArgument => "invalid_argument",
            Self::Validation => "validation",
            Self::Acquisition => "acquisition",
            Self::NoActiveSession => "no_active_session",
            Self::Storage => "storage",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
