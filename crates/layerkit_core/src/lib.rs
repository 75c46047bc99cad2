//! Layered data-access core: request-scoped sessions, generic repositories
//! and services over SQLite.
//!
//! A request boundary calls [`context::begin`] (or [`context::scope`]); code
//! below it reaches the active session implicitly through the repository
//! layer and never handles connections itself.

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod seed;
pub mod service;

pub use config::{AppConfig, AppEnv, ConfigError, DatabaseConfig, FeatureToggles, LoggingConfig};
pub use context::{begin, scope, with_current, Outcome, RequestScope, Session, SessionError};
pub use db::{open_pool, open_pool_in_memory, DbError, DbPool};
pub use error::ErrorKind;
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::{Entity, EntityId, FieldValue, RecordMeta};
pub use model::filter::{Filter, SortOrder};
pub use model::page::{CursorPage, PageResult};
pub use model::todo::{Todo, TodoDraft, TodoPatch};
pub use repo::sqlite::SqliteRepository;
pub use repo::{RepoError, RepoResult, Repository};
pub use service::{NoHooks, Service, ServiceError, ServiceHooks, ServiceResult, TodoService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
