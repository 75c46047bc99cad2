//! Todo use-case service.
//!
//! # Responsibility
//! - Enforce todo title rules before any write reaches storage.
//! - Offer status-filtered listing on top of the generic operations.
//!
//! # Invariants
//! - Stored titles are trimmed and 1..=`MAX_TITLE_CHARS` characters long.

use crate::model::entity::EntityId;
use crate::model::filter::Filter;
use crate::model::page::PageResult;
use crate::model::todo::{Todo, TodoDraft, TodoPatch, COMPLETED_COLUMN};
use crate::repo::sqlite::SqliteRepository;
use crate::repo::{RepoResult, Repository};
use crate::service::{Service, ServiceError, ServiceHooks, ServiceResult};

pub const MAX_TITLE_CHARS: usize = 255;

/// Todo service over any todo repository; SQLite by default.
pub type TodoService<R = SqliteRepository<Todo>> = Service<Todo, R, TodoRules>;

/// Title validation and normalization hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct TodoRules;

impl ServiceHooks<Todo> for TodoRules {
    fn before_create(&self, draft: &mut TodoDraft) -> ServiceResult<()> {
        draft.title = normalize_title(&draft.title)?;
        Ok(())
    }

    fn before_update(&self, _id: EntityId, patch: &mut TodoPatch) -> ServiceResult<()> {
        if let Some(title) = patch.title.as_deref() {
            patch.title = Some(normalize_title(title)?);
        }
        Ok(())
    }
}

/// Trims `raw` and checks its length.
pub fn normalize_title(raw: &str) -> ServiceResult<String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ServiceError::Validation("title must not be empty".to_string()));
    }
    let chars = title.chars().count();
    if chars > MAX_TITLE_CHARS {
        return Err(ServiceError::Validation(format!(
            "title is {chars} characters; at most {MAX_TITLE_CHARS} allowed"
        )));
    }
    Ok(title.to_string())
}

impl TodoService {
    /// Todo service backed by the generic SQLite repository.
    pub fn sqlite() -> RepoResult<Self> {
        Ok(Service::with_hooks(SqliteRepository::try_new()?, TodoRules).with_resource("todo"))
    }
}

impl<R: Repository<Todo>> Service<Todo, R, TodoRules> {
    pub fn create_todo(
        &self,
        title: impl Into<String>,
        description: Option<String>,
    ) -> ServiceResult<Todo> {
        self.create(TodoDraft {
            title: title.into(),
            description,
            completed: false,
        })
    }

    /// Applies the set fields of `patch`; `None` fields stay untouched.
    pub fn update_todo(&self, id: EntityId, patch: TodoPatch) -> ServiceResult<Todo> {
        self.update(id, patch)
    }

    /// Marks a todo done or not done.
    pub fn set_completed(&self, id: EntityId, completed: bool) -> ServiceResult<Todo> {
        self.update(
            id,
            TodoPatch {
                completed: Some(completed),
                ..TodoPatch::default()
            },
        )
    }

    /// Lists active todos in creation order, optionally by status.
    pub fn list_todos(&self, completed: Option<bool>) -> ServiceResult<Vec<Todo>> {
        self.list(&status_filter(completed))
    }

    pub fn paginate_todos(
        &self,
        page: u32,
        page_size: u32,
        completed: Option<bool>,
    ) -> ServiceResult<PageResult<Todo>> {
        self.paginate(page, page_size, &status_filter(completed))
    }
}

fn status_filter(completed: Option<bool>) -> Filter {
    match completed {
        Some(completed) => Filter::new().eq(COMPLETED_COLUMN, completed),
        None => Filter::new(),
    }
}
