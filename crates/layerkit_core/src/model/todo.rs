//! Todo example entity.
//!
//! # Invariants
//! - `title` is unique across all rows, including soft-deleted ones.
//! - Title length rules live in the service layer, not here.

use crate::model::entity::{Columns, Entity, FieldValue, RecordMeta};
use crate::repo::sqlite::SqliteRow;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

pub const TITLE_COLUMN: &str = "title";
pub const DESCRIPTION_COLUMN: &str = "description";
pub const COMPLETED_COLUMN: &str = "completed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
}

/// Values for a new todo.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TodoDraft {
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
}

impl TodoDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Partial todo update; `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TodoPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
}

impl Columns for TodoDraft {
    fn columns(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            (TITLE_COLUMN, self.title.clone().into()),
            (DESCRIPTION_COLUMN, self.description.clone().into()),
            (COMPLETED_COLUMN, self.completed.into()),
        ]
    }
}

impl Columns for TodoPatch {
    fn columns(&self) -> Vec<(&'static str, FieldValue)> {
        let mut columns = Vec::new();
        if let Some(title) = &self.title {
            columns.push((TITLE_COLUMN, title.clone().into()));
        }
        if let Some(description) = &self.description {
            columns.push((DESCRIPTION_COLUMN, description.clone().into()));
        }
        if let Some(completed) = self.completed {
            columns.push((COMPLETED_COLUMN, completed.into()));
        }
        columns
    }
}

impl Entity for Todo {
    const TABLE: &'static str = "todos";
    const COLUMNS: &'static [&'static str] = &[TITLE_COLUMN, DESCRIPTION_COLUMN, COMPLETED_COLUMN];

    type Draft = TodoDraft;
    type Patch = TodoPatch;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }
}

impl SqliteRow for Todo {
    fn from_row(meta: RecordMeta, row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            meta,
            title: row.get(TITLE_COLUMN)?,
            description: row.get(DESCRIPTION_COLUMN)?,
            completed: row.get(COMPLETED_COLUMN)?,
        })
    }
}
