//! Entity contract used by the generic repository and service layers.
//!
//! # Responsibility
//! - Define identity, timestamps and soft-delete bookkeeping (`RecordMeta`).
//! - Describe an entity's table and domain columns without binding to a
//!   particular storage engine.
//!
//! # Invariants
//! - `RecordMeta::deleted_at` is `Some` iff `is_deleted` is `true`.
//! - `Entity::COLUMNS` never lists bookkeeping columns.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier assigned by the repository on create.
pub type EntityId = Uuid;

/// Bookkeeping columns managed by the repository, never by callers.
pub const ID_COLUMN: &str = "id";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";
pub const IS_DELETED_COLUMN: &str = "is_deleted";
pub const DELETED_AT_COLUMN: &str = "deleted_at";

/// Identity, timestamps and tombstone state carried by every entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: EntityId,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds. Bumped by updates, not by delete/restore.
    pub updated_at: i64,
    pub is_deleted: bool,
    /// Unix epoch milliseconds of the soft delete, when tombstoned.
    pub deleted_at: Option<i64>,
}

impl RecordMeta {
    /// Returns whether the record should be considered visible.
    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }
}

/// Storage-neutral column value used by drafts, patches and filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<EntityId> for FieldValue {
    fn from(value: EntityId) -> Self {
        Self::Text(value.to_string())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Column/value pairs written by a draft or patch.
pub trait Columns {
    /// Columns to write, in a stable order. Patches return only set fields.
    fn columns(&self) -> Vec<(&'static str, FieldValue)>;

    fn is_empty(&self) -> bool {
        self.columns().is_empty()
    }
}

/// A persistent record type handled by the generic layers.
///
/// Implementors describe where they live and which domain columns they own;
/// the repository adds the bookkeeping columns.
pub trait Entity: Sized {
    /// Table (or collection) name. Must be a plain identifier.
    const TABLE: &'static str;
    /// Domain columns, excluding bookkeeping columns.
    const COLUMNS: &'static [&'static str];
    /// Whether `delete(id, hard = false)` tombstones instead of removing.
    const SOFT_DELETE: bool = true;

    /// Full set of caller-provided values for a new record.
    type Draft: Columns;
    /// Partial update; unset fields are left untouched.
    type Patch: Columns;

    fn meta(&self) -> &RecordMeta;

    fn id(&self) -> EntityId {
        self.meta().id
    }

    /// Bookkeeping columns present in this entity's table.
    fn bookkeeping_columns() -> &'static [&'static str] {
        if Self::SOFT_DELETE {
            &[
                ID_COLUMN,
                CREATED_AT_COLUMN,
                UPDATED_AT_COLUMN,
                IS_DELETED_COLUMN,
                DELETED_AT_COLUMN,
            ]
        } else {
            &[ID_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN]
        }
    }

    /// Whether `column` is a bookkeeping or domain column of this entity.
    fn is_known_column(column: &str) -> bool {
        Self::bookkeeping_columns().contains(&column) || Self::COLUMNS.contains(&column)
    }
}
