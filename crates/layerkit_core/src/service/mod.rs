//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate one repository per service into use-case level APIs.
//! - Run mutation hooks around repository writes.
//! - Normalize failures into `ServiceError` while keeping their `ErrorKind`.

pub mod base;
pub mod todo_service;

use crate::context::SessionError;
use crate::error::ErrorKind;
use crate::model::entity::{Entity, EntityId};
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use base::Service;
pub use todo_service::{TodoRules, TodoService, MAX_TITLE_CHARS};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service error for use-case operations.
#[derive(Debug)]
pub enum ServiceError {
    /// Target resource does not exist (or is soft-deleted).
    NotFound {
        resource: &'static str,
        id: EntityId,
    },
    /// Input rejected by a domain rule.
    Validation(String),
    /// Persistence-layer failure.
    Repo(RepoError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Repo(err) => err.kind(),
        }
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { resource, id } => write!(f, "{resource} not found: {id}"),
            Self::Validation(message) => write!(f, "validation failed: {message}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<SessionError> for ServiceError {
    fn from(value: SessionError) -> Self {
        Self::Repo(RepoError::Session(value))
    }
}

/// Mutation hooks run by [`Service`] around repository writes.
///
/// `before_*` hooks may adjust the input or reject it with
/// `ServiceError::Validation`; a rejection aborts the write. `after_*` hooks
/// run inside the same request, so an error there rolls the request back.
pub trait ServiceHooks<E: Entity> {
    fn before_create(&self, _draft: &mut E::Draft) -> ServiceResult<()> {
        Ok(())
    }

    fn after_create(&self, _entity: &E) -> ServiceResult<()> {
        Ok(())
    }

    fn before_update(&self, _id: EntityId, _patch: &mut E::Patch) -> ServiceResult<()> {
        Ok(())
    }

    fn after_update(&self, _entity: &E) -> ServiceResult<()> {
        Ok(())
    }

    fn before_delete(&self, _id: EntityId, _hard: bool) -> ServiceResult<()> {
        Ok(())
    }

    fn after_delete(&self, _id: EntityId, _hard: bool) -> ServiceResult<()> {
        Ok(())
    }

    fn before_restore(&self, _id: EntityId) -> ServiceResult<()> {
        Ok(())
    }

    fn after_restore(&self, _entity: &E) -> ServiceResult<()> {
        Ok(())
    }

    /// Defaults to the create rules, since the draft may become a new row.
    fn before_upsert(&self, draft: &mut E::Draft) -> ServiceResult<()> {
        self.before_create(draft)
    }

    /// Runs once with the stored row, whether it was inserted or overwritten.
    fn after_upsert(&self, _entity: &E) -> ServiceResult<()> {
        Ok(())
    }
}

/// Hooks that accept every mutation unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<E: Entity> ServiceHooks<E> for NoHooks {}
