//! Query filter shared by read operations.
//!
//! Conditions are equality-only and combined with `AND`. Column names are
//! checked against the entity by the repository, not here.

use crate::model::entity::FieldValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Equality filter with soft-delete visibility and optional ordering.
///
/// The default filter matches every active (not soft-deleted) record in
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, FieldValue)>,
    include_deleted: bool,
    order_by: Option<(String, SortOrder)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `column = value`. A `FieldValue::Null` value matches `IS NULL`.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    /// Makes soft-deleted records visible.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn with_deleted(mut self, include_deleted: bool) -> Self {
        self.include_deleted = include_deleted;
        self
    }

    /// Orders by `column`; ties fall back to insertion order.
    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((column.into(), order));
        self
    }

    pub fn conditions(&self) -> &[(String, FieldValue)] {
        &self.conditions
    }

    pub fn includes_deleted(&self) -> bool {
        self.include_deleted
    }

    pub fn ordering(&self) -> Option<(&str, SortOrder)> {
        self.order_by
            .as_ref()
            .map(|(column, order)| (column.as_str(), *order))
    }

    /// Columns referenced by conditions and ordering, for validation.
    pub fn referenced_columns(&self) -> impl Iterator<Item = &str> {
        self.conditions
            .iter()
            .map(|(column, _)| column.as_str())
            .chain(self.order_by.iter().map(|(column, _)| column.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::{Filter, SortOrder};
    use crate::model::entity::FieldValue;

    #[test]
    fn builder_collects_conditions_and_ordering() {
        let filter = Filter::new()
            .eq("completed", true)
            .eq("description", None::<String>)
            .order_by("title", SortOrder::Desc);

        assert_eq!(filter.conditions().len(), 2);
        assert_eq!(filter.conditions()[1].1, FieldValue::Null);
        assert_eq!(filter.ordering(), Some(("title", SortOrder::Desc)));
        assert!(!filter.includes_deleted());

        let columns: Vec<&str> = filter.referenced_columns().collect();
        assert_eq!(columns, vec!["completed", "description", "title"]);
    }
}
