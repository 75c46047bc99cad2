//! SQLite connection pooling and schema migration entry points.
//!
//! # Responsibility
//! - Build the shared connection pool that request sessions draw from.
//! - Apply schema migrations in deterministic order before the pool is used.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Every pooled connection has `foreign_keys=ON` and a busy timeout.
//! - In-memory databases are pinned to exactly one pooled connection.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub mod migrations;
mod pool;

pub use pool::{open_pool, open_pool_in_memory, DbPool, PooledConn};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    Pool(r2d2::Error),
    InvalidUrl(String),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Pool(err) => write!(f, "connection pool error: {err}"),
            Self::InvalidUrl(url) => write!(f, "unsupported database url `{url}`"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Pool(err) => Some(err),
            Self::InvalidUrl(_) | Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<r2d2::Error> for DbError {
    fn from(value: r2d2::Error) -> Self {
        Self::Pool(value)
    }
}

/// Where the backing database lives, parsed from a configured URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Private in-memory database, lost when the pool is dropped.
    Memory,
    /// On-disk database file.
    File(PathBuf),
}

impl DatabaseLocation {
    /// Parses `:memory:`, `sqlite::memory:`, `sqlite://<path>` or a bare path.
    pub fn parse(url: &str) -> DbResult<Self> {
        let trimmed = url.trim();
        match trimmed {
            "" => Err(DbError::InvalidUrl(url.to_string())),
            ":memory:" | "sqlite::memory:" | "sqlite://:memory:" => Ok(Self::Memory),
            other => {
                let path = other
                    .strip_prefix("sqlite://")
                    .or_else(|| other.strip_prefix("sqlite:"))
                    .unwrap_or(other);
                if path.is_empty() || path.contains("://") {
                    return Err(DbError::InvalidUrl(url.to_string()));
                }
                Ok(Self::File(PathBuf::from(path)))
            }
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File(_) => "file",
        }
    }
}
