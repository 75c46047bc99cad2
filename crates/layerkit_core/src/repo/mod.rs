//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the generic CRUD + query contract over any `Entity`.
//! - Isolate SQL details from service/business orchestration.
//! - Translate storage failures into the crate error taxonomy.
//!
//! # Invariants
//! - Every operation reads the active session from `context`; none accepts a
//!   connection parameter, and all fail with `NoActiveSession` outside a
//!   request boundary.
//! - Raw backend errors never escape uncategorized: uniqueness violations and
//!   writes that lost a race to another request (`SQLITE_BUSY*`) surface as
//!   `Conflict`, everything else keeps `ErrorKind::Storage`.
//! - Bulk operations are all-or-nothing.

pub mod sqlite;

use crate::context::SessionError;
use crate::db::DbError;
use crate::error::ErrorKind;
use crate::model::entity::{Entity, EntityId};
use crate::model::filter::Filter;
use crate::model::page::{CursorPage, PageResult};
use rusqlite::ffi;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    NotFound { entity: &'static str, id: EntityId },
    Conflict(String),
    InvalidArgument(String),
    Session(SessionError),
    Db(DbError),
    InvalidData(String),
}

impl RepoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Session(err) => err.kind(),
            Self::Db(_) | Self::InvalidData(_) => ErrorKind::Storage,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Conflict(message) => write!(f, "conflict: {message}"),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::Session(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Session(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SessionError> for RepoError {
    fn from(value: SessionError) -> Self {
        Self::Session(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => err.into(),
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        if is_write_conflict(&value) {
            return Self::Conflict(value.to_string());
        }
        Self::Db(DbError::Sqlite(value))
    }
}

/// Unique/primary-key violations, plus busy errors (`SQLITE_BUSY_SNAPSHOT`
/// included) raised when another request committed first.
fn is_write_conflict(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::DatabaseBusy
                || failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Generic CRUD + query contract over one entity type.
///
/// Implementations obtain their connection from the ambient request session.
pub trait Repository<E: Entity> {
    /// Lazy, finite, non-restartable sequence returned by `get_all`.
    type Stream: Iterator<Item = RepoResult<E>>;

    /// Looks up one entity; soft-deleted rows only when `include_deleted`.
    fn find_by_id(&self, id: EntityId, include_deleted: bool) -> RepoResult<Option<E>>;

    /// Looks up one active entity, failing with `NotFound` when absent.
    fn get_by_id(&self, id: EntityId) -> RepoResult<E> {
        self.find_by_id(id, false)?.ok_or(RepoError::NotFound {
            entity: E::TABLE,
            id,
        })
    }

    /// Looks up several entities in insertion order; missing ids are skipped.
    fn get_many(&self, ids: &[EntityId], include_deleted: bool) -> RepoResult<Vec<E>>;

    /// Streams every match of `filter`, fetching in batches on demand.
    ///
    /// The stream is bound to the current request and yields
    /// `NoActiveSession` errors if consumed after it ends.
    fn get_all(&self, filter: &Filter) -> RepoResult<Self::Stream>;

    /// Offset page with an exact total (one extra `COUNT` query).
    ///
    /// Fails with `InvalidArgument` when `page == 0` or `page_size == 0`.
    fn get_paginated(
        &self,
        page: u32,
        page_size: u32,
        filter: &Filter,
    ) -> RepoResult<PageResult<E>>;

    /// Keyset page ordered by id, continuing after `cursor`.
    fn get_by_cursor(
        &self,
        cursor: Option<&str>,
        limit: u32,
        filter: &Filter,
    ) -> RepoResult<CursorPage<E>>;

    /// Inserts a new entity, assigning id and timestamps.
    fn create(&self, draft: &E::Draft) -> RepoResult<E>;

    /// Applies `patch` to an active entity. An empty patch is a read.
    fn update(&self, id: EntityId, patch: &E::Patch) -> RepoResult<E>;

    /// Soft-deletes (or removes when `hard`); `false` when nothing matched.
    fn delete(&self, id: EntityId, hard: bool) -> RepoResult<bool>;

    /// Clears the tombstone. `NotFound` when the row is gone or never existed.
    fn restore(&self, id: EntityId) -> RepoResult<E>;

    fn bulk_create(&self, drafts: &[E::Draft]) -> RepoResult<Vec<E>>;

    /// Applies one patch to every active id; returns affected rows.
    fn bulk_update(&self, ids: &[EntityId], patch: &E::Patch) -> RepoResult<usize>;

    fn bulk_delete(&self, ids: &[EntityId], hard: bool) -> RepoResult<usize>;

    /// Returns the first match of `filter`, or creates `draft`.
    ///
    /// The filter's equality conditions overwrite the draft's columns on
    /// insert, so the created row matches `filter`. Conditions on bookkeeping
    /// columns are rejected with `InvalidArgument`.
    ///
    /// The lookup and insert are separate statements. Two requests racing on
    /// the same key can both miss the lookup; the loser gets `Conflict` when
    /// the storage enforces uniqueness, and callers decide whether to retry.
    fn get_or_create(&self, filter: &Filter, draft: &E::Draft) -> RepoResult<(E, bool)>;

    /// Inserts `draft`, or overwrites the non-key columns of the row whose
    /// `key_columns` match. Requires a unique index over `key_columns`.
    fn upsert(&self, key_columns: &[&str], draft: &E::Draft) -> RepoResult<E>;

    fn exists(&self, filter: &Filter) -> RepoResult<bool>;

    fn count(&self, filter: &Filter) -> RepoResult<u64>;
}
