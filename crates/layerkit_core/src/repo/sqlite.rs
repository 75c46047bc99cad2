//! SQLite implementation of the generic repository.
//!
//! # Responsibility
//! - Build SQL for any `Entity` from its table and column metadata.
//! - Run every statement on the ambient request session.
//!
//! # Invariants
//! - Table and column names are validated as plain identifiers before they
//!   reach SQL text; values are always bound as parameters.
//! - Default ordering is insertion order (`rowid`).
//! - Soft delete and restore touch only `is_deleted`/`deleted_at`.

use crate::context::{self, Session, SessionError, SessionId};
use crate::model::entity::{
    Columns, Entity, EntityId, FieldValue, RecordMeta, CREATED_AT_COLUMN, DELETED_AT_COLUMN,
    ID_COLUMN, IS_DELETED_COLUMN, UPDATED_AT_COLUMN,
};
use crate::model::filter::{Filter, SortOrder};
use crate::model::page::{decode_cursor, encode_cursor, CursorPage, PageResult};
use crate::repo::{RepoError, RepoResult, Repository};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, Row, ToSql};
use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

const DEFAULT_STREAM_BATCH_SIZE: u32 = 256;
const STREAM_ROWID_ALIAS: &str = "layerkit_stream_rowid";
const STREAM_KEY_ALIAS: &str = "layerkit_stream_key";
/// Ids bound per `IN (...)` statement in bulk operations.
const BULK_CHUNK_SIZE: usize = 500;

/// Row decoding for entities stored in SQLite.
pub trait SqliteRow: Entity {
    /// Builds the entity from its domain columns; bookkeeping is pre-parsed.
    fn from_row(meta: RecordMeta, row: &Row<'_>) -> rusqlite::Result<Self>;
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Bool(value) => ToSqlOutput::Owned(Value::Integer(i64::from(*value))),
            Self::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            Self::Real(value) => ToSqlOutput::Owned(Value::Real(*value)),
            Self::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
        })
    }
}

/// Generic SQLite-backed repository for one entity type.
pub struct SqliteRepository<E> {
    column_list: String,
    select_sql: String,
    batch_size: u32,
    _entity: PhantomData<fn() -> E>,
}

impl<E: SqliteRow> SqliteRepository<E> {
    /// Validates the entity's table metadata and prepares SQL fragments.
    pub fn try_new() -> RepoResult<Self> {
        check_identifier(E::TABLE)?;
        for column in E::COLUMNS {
            check_identifier(column)?;
            if E::bookkeeping_columns().contains(column) {
                return Err(RepoError::InvalidArgument(format!(
                    "`{}` declares reserved column `{column}`",
                    E::TABLE
                )));
            }
        }

        let columns = E::bookkeeping_columns()
            .iter()
            .chain(E::COLUMNS.iter())
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        Ok(Self {
            select_sql: format!("SELECT {columns} FROM {}", E::TABLE),
            column_list: columns,
            batch_size: DEFAULT_STREAM_BATCH_SIZE,
            _entity: PhantomData,
        })
    }

    /// Sets how many rows `get_all` streams fetch per round trip.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn observe<T>(&self, op: &'static str, run: impl FnOnce() -> RepoResult<T>) -> RepoResult<T> {
        let started_at = Instant::now();
        let result = run();
        let duration_ms = started_at.elapsed().as_millis();
        match &result {
            Ok(_) => debug!(
                "event=repo_{op} module=repo status=ok table={} duration_ms={duration_ms}",
                E::TABLE
            ),
            Err(err @ RepoError::NotFound { .. }) => debug!(
                "event=repo_{op} module=repo status=miss table={} duration_ms={duration_ms} error={err}",
                E::TABLE
            ),
            Err(err) => warn!(
                "event=repo_{op} module=repo status=error table={} duration_ms={duration_ms} error_kind={} error={err}",
                E::TABLE,
                err.kind()
            ),
        }
        result
    }

    fn filter_sql(&self, filter: &Filter) -> RepoResult<FilterSql> {
        for column in filter.referenced_columns() {
            if !E::is_known_column(column) {
                return Err(RepoError::InvalidArgument(format!(
                    "unknown column `{column}` for `{}`",
                    E::TABLE
                )));
            }
        }

        let mut where_sql = String::from(" WHERE 1 = 1");
        let mut binds = Vec::new();
        if E::SOFT_DELETE && !filter.includes_deleted() {
            where_sql.push_str(" AND is_deleted = 0");
        }
        for (column, value) in filter.conditions() {
            if matches!(value, FieldValue::Null) {
                where_sql.push_str(&format!(" AND {column} IS NULL"));
            } else {
                where_sql.push_str(&format!(" AND {column} = ?"));
                binds.push(value.clone());
            }
        }

        let order_sql = match filter.ordering() {
            Some((column, order)) => format!(" ORDER BY {column} {}, rowid ASC", order.as_sql()),
            None => " ORDER BY rowid ASC".to_string(),
        };

        Ok(FilterSql {
            where_sql,
            order_sql,
            binds,
        })
    }

    fn fetch_one(
        &self,
        conn: &Connection,
        id: EntityId,
        include_deleted: bool,
    ) -> RepoResult<Option<E>> {
        let mut sql = format!("{} WHERE id = ?1", self.select_sql);
        if E::SOFT_DELETE && !include_deleted {
            sql.push_str(" AND is_deleted = 0");
        }
        let mut items = query_entities::<E>(conn, &sql, &[FieldValue::from(id)])?;
        Ok(items.pop())
    }

    fn insert(&self, conn: &Connection, draft: &E::Draft) -> RepoResult<E> {
        self.insert_columns(conn, draft.columns())
    }

    fn insert_columns(
        &self,
        conn: &Connection,
        columns: Vec<(&'static str, FieldValue)>,
    ) -> RepoResult<E> {
        check_domain_columns::<E>(&columns)?;

        let id = Uuid::new_v4();
        let (names, values) = insert_values::<E>(id, now_epoch_ms(), columns);
        let placeholders = vec!["?"; names.len()].join(", ");
        conn.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({placeholders})",
                E::TABLE,
                names.join(", ")
            ),
            params_from_iter(values.iter()),
        )?;

        self.fetch_one(conn, id, true)?
            .ok_or_else(|| missing_after_write::<E>("create", id))
    }

    fn count_matching(&self, conn: &Connection, parts: &FilterSql) -> RepoResult<u64> {
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}{}", E::TABLE, parts.where_sql),
            params_from_iter(parts.binds.iter()),
            |row| row.get(0),
        )?;
        Ok(u64::try_from(total).unwrap_or_default())
    }
}

impl<E: SqliteRow> Repository<E> for SqliteRepository<E> {
    type Stream = EntityStream<E>;

    fn find_by_id(&self, id: EntityId, include_deleted: bool) -> RepoResult<Option<E>> {
        self.observe("find_by_id", || {
            on_session(|session| self.fetch_one(session.connection(), id, include_deleted))
        })
    }

    fn get_many(&self, ids: &[EntityId], include_deleted: bool) -> RepoResult<Vec<E>> {
        self.observe("get_many", || {
            on_session(|session| {
                let mut items = Vec::with_capacity(ids.len());
                for chunk in ids.chunks(BULK_CHUNK_SIZE) {
                    let mut sql = format!(
                        "{} WHERE id IN ({})",
                        self.select_sql,
                        placeholders(chunk.len())
                    );
                    if E::SOFT_DELETE && !include_deleted {
                        sql.push_str(" AND is_deleted = 0");
                    }
                    sql.push_str(" ORDER BY rowid ASC");
                    items.extend(query_entities::<E>(
                        session.connection(),
                        &sql,
                        &id_values(chunk),
                    )?);
                }
                Ok(items)
            })
        })
    }

    fn get_all(&self, filter: &Filter) -> RepoResult<EntityStream<E>> {
        self.observe("get_all", || {
            let parts = self.filter_sql(filter)?;
            let session_id = context::with_current(Session::id)?;
            let order = filter
                .ordering()
                .map(|(column, order)| (column.to_string(), order));
            let key_sql = match &order {
                Some((column, _)) => format!(", {column} AS {STREAM_KEY_ALIAS}"),
                None => String::new(),
            };
            Ok(EntityStream {
                session_id,
                base_sql: format!(
                    "SELECT {}, rowid AS {STREAM_ROWID_ALIAS}{key_sql} FROM {}{}",
                    self.column_list,
                    E::TABLE,
                    parts.where_sql
                ),
                order_sql: parts.order_sql,
                binds: parts.binds,
                order,
                batch_size: self.batch_size,
                last: None,
                buffer: VecDeque::new(),
                exhausted: false,
                _entity: PhantomData,
            })
        })
    }

    fn get_paginated(
        &self,
        page: u32,
        page_size: u32,
        filter: &Filter,
    ) -> RepoResult<PageResult<E>> {
        self.observe("get_paginated", || {
            if page == 0 {
                return Err(RepoError::InvalidArgument("page must be >= 1".to_string()));
            }
            if page_size == 0 {
                return Err(RepoError::InvalidArgument(
                    "page_size must be >= 1".to_string(),
                ));
            }
            let offset = i64::from(page - 1) * i64::from(page_size);
            let parts = self.filter_sql(filter)?;

            on_session(|session| {
                let conn = session.connection();
                let total = self.count_matching(conn, &parts)?;
                let mut binds = parts.binds.clone();
                binds.push(FieldValue::from(page_size));
                binds.push(FieldValue::Integer(offset));
                let items = query_entities::<E>(
                    conn,
                    &format!(
                        "{}{}{} LIMIT ? OFFSET ?",
                        self.select_sql, parts.where_sql, parts.order_sql
                    ),
                    &binds,
                )?;
                Ok(PageResult::new(items, total, page, page_size))
            })
        })
    }

    fn get_by_cursor(
        &self,
        cursor: Option<&str>,
        limit: u32,
        filter: &Filter,
    ) -> RepoResult<CursorPage<E>> {
        self.observe("get_by_cursor", || {
            if limit == 0 {
                return Err(RepoError::InvalidArgument("limit must be >= 1".to_string()));
            }
            if filter.ordering().is_some() {
                return Err(RepoError::InvalidArgument(
                    "cursor pagination is always ordered by id".to_string(),
                ));
            }
            let after = match cursor {
                Some(token) => {
                    let position = decode_cursor(token)
                        .and_then(|text| Uuid::parse_str(&text).ok())
                        .ok_or_else(|| {
                            RepoError::InvalidArgument(format!("malformed cursor `{token}`"))
                        })?;
                    Some(position)
                }
                None => None,
            };

            let mut parts = self.filter_sql(filter)?;
            if let Some(position) = after {
                parts.where_sql.push_str(" AND id > ?");
                parts.binds.push(FieldValue::from(position));
            }
            parts.binds.push(FieldValue::Integer(i64::from(limit) + 1));
            let sql = format!(
                "{}{} ORDER BY id ASC LIMIT ?",
                self.select_sql, parts.where_sql
            );

            let mut items =
                on_session(|session| query_entities::<E>(session.connection(), &sql, &parts.binds))?;
            let has_next = items.len() > limit as usize;
            items.truncate(limit as usize);
            let next_cursor = if has_next {
                items.last().map(|item| encode_cursor(&item.id().to_string()))
            } else {
                None
            };
            let prev_cursor = after.map(|position| encode_cursor(&position.to_string()));

            Ok(CursorPage {
                items,
                next_cursor,
                has_prev: prev_cursor.is_some(),
                prev_cursor,
                has_next,
            })
        })
    }

    fn create(&self, draft: &E::Draft) -> RepoResult<E> {
        self.observe("create", || {
            on_session(|session| self.insert(session.connection(), draft))
        })
    }

    fn update(&self, id: EntityId, patch: &E::Patch) -> RepoResult<E> {
        self.observe("update", || {
            let columns = patch.columns();
            check_domain_columns::<E>(&columns)?;

            on_session(|session| {
                let conn = session.connection();
                if !columns.is_empty() {
                    let (assignments, mut binds) = assignments(columns);
                    binds.push(FieldValue::Integer(now_epoch_ms()));
                    binds.push(FieldValue::from(id));
                    let mut sql = format!(
                        "UPDATE {} SET {assignments}, updated_at = ? WHERE id = ?",
                        E::TABLE
                    );
                    if E::SOFT_DELETE {
                        sql.push_str(" AND is_deleted = 0");
                    }
                    if conn.execute(&sql, params_from_iter(binds.iter()))? == 0 {
                        return Err(RepoError::NotFound {
                            entity: E::TABLE,
                            id,
                        });
                    }
                }
                self.fetch_one(conn, id, false)?.ok_or(RepoError::NotFound {
                    entity: E::TABLE,
                    id,
                })
            })
        })
    }

    fn delete(&self, id: EntityId, hard: bool) -> RepoResult<bool> {
        self.observe("delete", || {
            on_session(|session| {
                let changed = if hard || !E::SOFT_DELETE {
                    session.connection().execute(
                        &format!("DELETE FROM {} WHERE id = ?1", E::TABLE),
                        [id.to_string()],
                    )?
                } else {
                    session.connection().execute(
                        &format!(
                            "UPDATE {} SET is_deleted = 1, deleted_at = ?1
                             WHERE id = ?2 AND is_deleted = 0",
                            E::TABLE
                        ),
                        params_from_iter([FieldValue::Integer(now_epoch_ms()), id.into()].iter()),
                    )?
                };
                Ok(changed > 0)
            })
        })
    }

    fn restore(&self, id: EntityId) -> RepoResult<E> {
        self.observe("restore", || {
            if !E::SOFT_DELETE {
                return Err(RepoError::InvalidArgument(format!(
                    "`{}` does not support soft delete",
                    E::TABLE
                )));
            }
            on_session(|session| {
                let conn = session.connection();
                conn.execute(
                    &format!(
                        "UPDATE {} SET is_deleted = 0, deleted_at = NULL
                         WHERE id = ?1 AND is_deleted = 1",
                        E::TABLE
                    ),
                    [id.to_string()],
                )?;
                self.fetch_one(conn, id, true)?.ok_or(RepoError::NotFound {
                    entity: E::TABLE,
                    id,
                })
            })
        })
    }

    fn bulk_create(&self, drafts: &[E::Draft]) -> RepoResult<Vec<E>> {
        self.observe("bulk_create", || {
            on_session(|session| {
                session.atomic(|conn| {
                    drafts
                        .iter()
                        .map(|draft| self.insert(conn, draft))
                        .collect::<RepoResult<Vec<_>>>()
                })
            })
        })
    }

    fn bulk_update(&self, ids: &[EntityId], patch: &E::Patch) -> RepoResult<usize> {
        self.observe("bulk_update", || {
            let columns = patch.columns();
            if columns.is_empty() {
                return Err(RepoError::InvalidArgument(
                    "bulk update needs at least one column".to_string(),
                ));
            }
            check_domain_columns::<E>(&columns)?;
            let (assignments, values) = assignments(columns);
            let now = now_epoch_ms();

            on_session(|session| {
                session.atomic(|conn| {
                    let mut changed = 0;
                    for chunk in ids.chunks(BULK_CHUNK_SIZE) {
                        let mut sql = format!(
                            "UPDATE {} SET {assignments}, updated_at = ? WHERE id IN ({})",
                            E::TABLE,
                            placeholders(chunk.len())
                        );
                        if E::SOFT_DELETE {
                            sql.push_str(" AND is_deleted = 0");
                        }
                        let mut binds = values.clone();
                        binds.push(FieldValue::Integer(now));
                        binds.extend(id_values(chunk));
                        changed += conn.execute(&sql, params_from_iter(binds.iter()))?;
                    }
                    Ok(changed)
                })
            })
        })
    }

    fn bulk_delete(&self, ids: &[EntityId], hard: bool) -> RepoResult<usize> {
        self.observe("bulk_delete", || {
            let now = now_epoch_ms();
            on_session(|session| {
                session.atomic(|conn| {
                    let mut changed = 0;
                    for chunk in ids.chunks(BULK_CHUNK_SIZE) {
                        let mut binds = Vec::with_capacity(chunk.len() + 1);
                        let sql = if hard || !E::SOFT_DELETE {
                            format!(
                                "DELETE FROM {} WHERE id IN ({})",
                                E::TABLE,
                                placeholders(chunk.len())
                            )
                        } else {
                            binds.push(FieldValue::Integer(now));
                            format!(
                                "UPDATE {} SET is_deleted = 1, deleted_at = ?
                                 WHERE id IN ({}) AND is_deleted = 0",
                                E::TABLE,
                                placeholders(chunk.len())
                            )
                        };
                        binds.extend(id_values(chunk));
                        changed += conn.execute(&sql, params_from_iter(binds.iter()))?;
                    }
                    Ok(changed)
                })
            })
        })
    }

    fn get_or_create(&self, filter: &Filter, draft: &E::Draft) -> RepoResult<(E, bool)> {
        self.observe("get_or_create", || {
            let parts = self.filter_sql(filter)?;
            let columns = overlay_filter::<E>(draft.columns(), filter)?;
            on_session(|session| {
                let conn = session.connection();
                let mut existing = query_entities::<E>(
                    conn,
                    &format!(
                        "{}{}{} LIMIT 1",
                        self.select_sql, parts.where_sql, parts.order_sql
                    ),
                    &parts.binds,
                )?;
                if let Some(entity) = existing.pop() {
                    return Ok((entity, false));
                }
                let created = self.insert_columns(conn, columns)?;
                Ok((created, true))
            })
        })
    }

    fn upsert(&self, key_columns: &[&str], draft: &E::Draft) -> RepoResult<E> {
        self.observe("upsert", || {
            if key_columns.is_empty() {
                return Err(RepoError::InvalidArgument(
                    "upsert needs at least one key column".to_string(),
                ));
            }
            let columns = draft.columns();
            check_domain_columns::<E>(&columns)?;

            let mut key_values = Vec::with_capacity(key_columns.len());
            for key in key_columns {
                let value = columns
                    .iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, value)| value.clone())
                    .ok_or_else(|| {
                        RepoError::InvalidArgument(format!(
                            "upsert key `{key}` is not written by the draft"
                        ))
                    })?;
                key_values.push(value);
            }

            let mut updates = columns
                .iter()
                .map(|(name, _)| *name)
                .filter(|name| !key_columns.contains(name))
                .map(|name| format!("{name} = excluded.{name}"))
                .collect::<Vec<_>>();
            updates.push(format!("{UPDATED_AT_COLUMN} = excluded.{UPDATED_AT_COLUMN}"));

            let (names, values) = insert_values::<E>(Uuid::new_v4(), now_epoch_ms(), columns);
            let insert_sql = format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
                E::TABLE,
                names.join(", "),
                placeholders(names.len()),
                key_columns.join(", "),
                updates.join(", ")
            );
            let lookup_sql = format!(
                "{} WHERE {} LIMIT 1",
                self.select_sql,
                key_columns
                    .iter()
                    .map(|key| format!("{key} IS ?"))
                    .collect::<Vec<_>>()
                    .join(" AND ")
            );

            on_session(|session| {
                let conn = session.connection();
                conn.execute(&insert_sql, params_from_iter(values.iter()))?;
                let mut rows = query_entities::<E>(conn, &lookup_sql, &key_values)?;
                rows.pop().ok_or_else(|| {
                    RepoError::InvalidData(format!(
                        "upserted `{}` row missing on read-back",
                        E::TABLE
                    ))
                })
            })
        })
    }

    fn exists(&self, filter: &Filter) -> RepoResult<bool> {
        self.observe("exists", || {
            let parts = self.filter_sql(filter)?;
            on_session(|session| {
                let found: bool = session.connection().query_row(
                    &format!(
                        "SELECT EXISTS(SELECT 1 FROM {}{})",
                        E::TABLE,
                        parts.where_sql
                    ),
                    params_from_iter(parts.binds.iter()),
                    |row| row.get(0),
                )?;
                Ok(found)
            })
        })
    }

    fn count(&self, filter: &Filter) -> RepoResult<u64> {
        self.observe("count", || {
            let parts = self.filter_sql(filter)?;
            on_session(|session| self.count_matching(session.connection(), &parts))
        })
    }
}

/// Batched, forward-only stream over one query's results.
///
/// Bound to the request session that created it; reading from it after that
/// request ended yields one `NoActiveSession`-kind error and then stops.
///
/// Each batch resumes after the last yielded row (keyset continuation on the
/// sort key and `rowid`), so rows updated or deleted while iterating never
/// shift later batches.
pub struct EntityStream<E> {
    session_id: SessionId,
    base_sql: String,
    order_sql: String,
    binds: Vec<FieldValue>,
    order: Option<(String, SortOrder)>,
    batch_size: u32,
    last: Option<StreamPosition>,
    buffer: VecDeque<E>,
    exhausted: bool,
    _entity: PhantomData<fn() -> E>,
}

struct StreamPosition {
    key: FieldValue,
    rowid: i64,
}

impl<E: SqliteRow> EntityStream<E> {
    fn fill(&mut self) -> RepoResult<()> {
        let mut binds = self.binds.clone();
        let after = match &self.last {
            Some(position) => continuation_sql(self.order.as_ref(), position, &mut binds),
            None => String::new(),
        };
        binds.push(FieldValue::from(self.batch_size));
        let sql = format!("{}{after}{} LIMIT ?", self.base_sql, self.order_sql);
        let expected = self.session_id;
        let ordered = self.order.is_some();

        let (batch, last) = on_session(|session| {
            if session.id() != expected {
                return Err(SessionError::StaleSession { expected }.into());
            }
            let mut stmt = session.connection().prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(binds.iter()))?;
            let mut batch = Vec::new();
            let mut last = None;
            while let Some(row) = rows.next()? {
                batch.push(parse_entity_row::<E>(row)?);
                let key = if ordered {
                    stream_key(row.get::<_, Value>(STREAM_KEY_ALIAS)?)?
                } else {
                    FieldValue::Null
                };
                last = Some(StreamPosition {
                    key,
                    rowid: row.get(STREAM_ROWID_ALIAS)?,
                });
            }
            Ok((batch, last))
        })?;

        if batch.len() < self.batch_size as usize {
            self.exhausted = true;
        }
        if last.is_some() {
            self.last = last;
        }
        self.buffer.extend(batch);
        Ok(())
    }
}

/// Condition selecting rows that sort after `position`.
///
/// Ties on the sort key fall back to `rowid ASC`. NULL keys sort first
/// ascending and last descending.
fn continuation_sql(
    order: Option<&(String, SortOrder)>,
    position: &StreamPosition,
    binds: &mut Vec<FieldValue>,
) -> String {
    let rowid = FieldValue::Integer(position.rowid);
    let Some((column, order)) = order else {
        binds.push(rowid);
        return " AND rowid > ?".to_string();
    };
    match (&position.key, order) {
        (FieldValue::Null, SortOrder::Asc) => {
            binds.push(rowid);
            format!(" AND ({column} IS NOT NULL OR ({column} IS NULL AND rowid > ?))")
        }
        (FieldValue::Null, SortOrder::Desc) => {
            binds.push(rowid);
            format!(" AND ({column} IS NULL AND rowid > ?)")
        }
        (key, SortOrder::Asc) => {
            binds.extend([key.clone(), key.clone(), rowid]);
            format!(" AND ({column} > ? OR ({column} = ? AND rowid > ?))")
        }
        (key, SortOrder::Desc) => {
            binds.extend([key.clone(), key.clone(), rowid]);
            format!(" AND ({column} < ? OR ({column} = ? AND rowid > ?) OR {column} IS NULL)")
        }
    }
}

fn stream_key(value: Value) -> RepoResult<FieldValue> {
    match value {
        Value::Null => Ok(FieldValue::Null),
        Value::Integer(value) => Ok(FieldValue::Integer(value)),
        Value::Real(value) => Ok(FieldValue::Real(value)),
        Value::Text(value) => Ok(FieldValue::Text(value)),
        Value::Blob(_) => Err(RepoError::InvalidData(
            "blob columns cannot order a stream".to_string(),
        )),
    }
}

impl<E: SqliteRow> Iterator for EntityStream<E> {
    type Item = RepoResult<E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fill() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl<E: SqliteRow> FusedIterator for EntityStream<E> {}

struct FilterSql {
    where_sql: String,
    order_sql: String,
    binds: Vec<FieldValue>,
}

fn on_session<T>(work: impl FnOnce(&Session) -> RepoResult<T>) -> RepoResult<T> {
    context::with_current(work)?
}

fn query_entities<E: SqliteRow>(
    conn: &Connection,
    sql: &str,
    binds: &[FieldValue],
) -> RepoResult<Vec<E>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(binds.iter()))?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(parse_entity_row::<E>(row)?);
    }
    Ok(items)
}

fn parse_entity_row<E: SqliteRow>(row: &Row<'_>) -> RepoResult<E> {
    let id_text: String = row.get(ID_COLUMN)?;
    let id = Uuid::parse_str(&id_text).map_err(|_| {
        RepoError::InvalidData(format!("invalid uuid value `{id_text}` in {}.id", E::TABLE))
    })?;

    let (is_deleted, deleted_at) = if E::SOFT_DELETE {
        let is_deleted = match row.get::<_, i64>(IS_DELETED_COLUMN)? {
            0 => false,
            1 => true,
            other => {
                return Err(RepoError::InvalidData(format!(
                    "invalid is_deleted value `{other}` in {}.is_deleted",
                    E::TABLE
                )));
            }
        };
        (is_deleted, row.get::<_, Option<i64>>(DELETED_AT_COLUMN)?)
    } else {
        (false, None)
    };

    let meta = RecordMeta {
        id,
        created_at: row.get(CREATED_AT_COLUMN)?,
        updated_at: row.get(UPDATED_AT_COLUMN)?,
        is_deleted,
        deleted_at,
    };
    Ok(E::from_row(meta, row)?)
}

fn check_identifier(name: &str) -> RepoResult<()> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(RepoError::InvalidArgument(format!(
            "`{name}` is not a valid SQL identifier"
        )))
    }
}

fn check_domain_columns<E: Entity>(columns: &[(&'static str, FieldValue)]) -> RepoResult<()> {
    match columns
        .iter()
        .find(|(name, _)| !E::COLUMNS.contains(name))
    {
        Some((name, _)) => Err(RepoError::InvalidArgument(format!(
            "`{name}` is not a writable column of `{}`",
            E::TABLE
        ))),
        None => Ok(()),
    }
}

/// Draft columns with the filter's equality conditions written over them, so a
/// created row matches the filter it was looked up by.
fn overlay_filter<E: Entity>(
    mut columns: Vec<(&'static str, FieldValue)>,
    filter: &Filter,
) -> RepoResult<Vec<(&'static str, FieldValue)>> {
    for (name, value) in filter.conditions() {
        let Some(column) = E::COLUMNS
            .iter()
            .copied()
            .find(|column| *column == name.as_str())
        else {
            return Err(RepoError::InvalidArgument(format!(
                "get_or_create cannot write filter column `{name}` of `{}`",
                E::TABLE
            )));
        };
        match columns.iter_mut().find(|(existing, _)| *existing == column) {
            Some((_, existing)) => *existing = value.clone(),
            None => columns.push((column, value.clone())),
        }
    }
    Ok(columns)
}

fn insert_values<E: Entity>(
    id: EntityId,
    now: i64,
    columns: Vec<(&'static str, FieldValue)>,
) -> (Vec<&'static str>, Vec<FieldValue>) {
    let mut names = vec![ID_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN];
    let mut values = vec![
        FieldValue::from(id),
        FieldValue::Integer(now),
        FieldValue::Integer(now),
    ];
    if E::SOFT_DELETE {
        names.push(IS_DELETED_COLUMN);
        values.push(FieldValue::Bool(false));
    }
    for (name, value) in columns {
        names.push(name);
        values.push(value);
    }
    (names, values)
}

fn assignments(columns: Vec<(&'static str, FieldValue)>) -> (String, Vec<FieldValue>) {
    let mut sql = Vec::with_capacity(columns.len());
    let mut values = Vec::with_capacity(columns.len());
    for (name, value) in columns {
        sql.push(format!("{name} = ?"));
        values.push(value);
    }
    (sql.join(", "), values)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn id_values(ids: &[EntityId]) -> Vec<FieldValue> {
    ids.iter().copied().map(FieldValue::from).collect()
}

fn missing_after_write<E: Entity>(op: &str, id: EntityId) -> RepoError {
    RepoError::InvalidData(format!("{op} of {}/{id} not visible on read-back", E::TABLE))
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
