use layerkit_core::db::migrations::latest_version;
use layerkit_core::db::{open_pool, open_pool_in_memory, DbError};
use layerkit_core::DatabaseConfig;
use rusqlite::Connection;

#[test]
fn open_pool_in_memory_applies_all_migrations() {
    let pool = open_pool_in_memory().unwrap();
    let conn = pool.get().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "todos");
    assert_index_exists(&conn, "idx_todos_completed");
}

#[test]
fn in_memory_pool_keeps_data_between_checkouts() {
    let pool = open_pool_in_memory().unwrap();
    {
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO todos (id, created_at, updated_at, title) VALUES ('a', 1, 1, 'kept');",
            [],
        )
        .unwrap();
    }

    let conn = pool.get().unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM todos;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(&dir.path().join("layerkit.db"));

    let first = open_pool(&config).unwrap();
    assert_eq!(schema_version(&first.get().unwrap()), latest_version());
    drop(first);

    let second = open_pool(&config).unwrap();
    let conn = second.get().unwrap();
    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "todos");
}

#[test]
fn file_pools_use_wal_journal() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open_pool(&file_config(&dir.path().join("wal.db"))).unwrap();

    let mode: String = pool
        .get()
        .unwrap()
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_pool(&file_config(&path)).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unsupported_url_scheme_is_rejected() {
    let config = DatabaseConfig {
        url: "postgres://localhost/app".to_string(),
        ..DatabaseConfig::default()
    };
    assert!(matches!(open_pool(&config), Err(DbError::InvalidUrl(_))));
}

fn file_config(path: &std::path::Path) -> DatabaseConfig {
    DatabaseConfig {
        url: format!("sqlite://{}", path.display()),
        pool_size: 2,
        ..DatabaseConfig::default()
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    assert_schema_object(conn, "table", table_name);
}

fn assert_index_exists(conn: &Connection, index_name: &str) {
    assert_schema_object(conn, "index", index_name);
}

fn assert_schema_object(conn: &Connection, kind: &str, name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = ?1 AND name = ?2
            );",
            [kind, name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "{kind} {name} does not exist");
}
