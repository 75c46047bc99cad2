//! Pooled connection factory for SQLite.
//!
//! # Responsibility
//! - Build the `r2d2` pool shared by every request session.
//! - Configure connection pragmas required by core behavior.
//! - Trigger schema migrations before returning a usable pool.
//!
//! # Invariants
//! - Returned pools have migrations fully applied.
//! - Memory pools hold a single connection that is never recycled, so the
//!   database outlives individual requests.

use super::migrations::apply_migrations;
use super::{DatabaseLocation, DbResult};
use crate::config::DatabaseConfig;
use log::{error, info};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::time::{Duration, Instant};

/// Shared, thread-safe pool of SQLite connections.
pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

/// Connection checked out of a [`DbPool`]; returned to the pool on drop.
pub type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// Opens a connection pool for the configured database and applies all
/// pending migrations.
///
/// # Side effects
/// - Creates the database file when it does not exist yet.
/// - Emits `pool_open` logging events with duration and status.
pub fn open_pool(config: &DatabaseConfig) -> DbResult<DbPool> {
    let started_at = Instant::now();
    let location = DatabaseLocation::parse(&config.url)?;
    let mode = location.mode();
    info!(
        "event=pool_open module=db status=start mode={mode} pool_size={}",
        effective_pool_size(&location, config)
    );

    match build_pool(&location, config) {
        Ok(pool) => {
            info!(
                "event=pool_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(pool)
        }
        Err(err) => {
            error!(
                "event=pool_open module=db status=error mode={mode} duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

/// Opens an in-memory pool with default timeouts.
pub fn open_pool_in_memory() -> DbResult<DbPool> {
    open_pool(&DatabaseConfig {
        url: ":memory:".to_string(),
        ..DatabaseConfig::default()
    })
}

fn effective_pool_size(location: &DatabaseLocation, config: &DatabaseConfig) -> u32 {
    match location {
        DatabaseLocation::Memory => 1,
        DatabaseLocation::File(_) => config.pool_size.max(1),
    }
}

fn build_pool(location: &DatabaseLocation, config: &DatabaseConfig) -> DbResult<DbPool> {
    let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
    let use_wal = matches!(location, DatabaseLocation::File(_));
    let manager = match location {
        DatabaseLocation::Memory => SqliteConnectionManager::memory(),
        DatabaseLocation::File(path) => SqliteConnectionManager::file(path),
    }
    .with_init(move |conn| configure_connection(conn, busy_timeout, use_wal));

    let mut builder = r2d2::Pool::builder()
        .max_size(effective_pool_size(location, config))
        .connection_timeout(Duration::from_millis(config.connection_timeout_ms));
    if let DatabaseLocation::Memory = location {
        builder = builder
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None);
    }

    let pool = builder.build(manager)?;
    {
        let mut conn = pool.get()?;
        apply_migrations(&mut conn)?;
    }
    Ok(pool)
}

fn configure_connection(
    conn: &mut Connection,
    busy_timeout: Duration,
    use_wal: bool,
) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(busy_timeout)?;
    if use_wal {
        conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))?;
    }
    Ok(())
}
