//! Sample data for development databases.
//!
//! Both functions run on the caller's request session; wrap them in
//! `context::scope` to commit.

use crate::model::filter::Filter;
use crate::model::todo::{Todo, TodoDraft, TITLE_COLUMN};
use crate::repo::Repository;
use crate::service::{ServiceResult, TodoService};
use log::info;

/// `(title, description)` pairs written by [`seed_todos`].
pub const SAMPLE_TODOS: &[(&str, &str)] = &[
    ("Learn the layered architecture", "Read the module docs"),
    ("Set up the project", "Initialize repository and deps"),
    ("Design the database schema", "Create ERD and models"),
    ("Implement authentication", "Add token-based auth"),
    ("Write API endpoints", "Create CRUD operations"),
    ("Add validation", "Reject bad input at the service layer"),
    ("Write unit tests", "Cover business logic with tests"),
    ("Write integration tests", "Test API endpoints"),
    ("Set up CI/CD", "Configure the build pipeline"),
    ("Deploy to production", "Deploy to cloud provider"),
];

/// Creates up to `count` sample todos; titles that already exist are kept.
///
/// Returns how many todos were newly created.
pub fn seed_todos<R: Repository<Todo>>(
    service: &TodoService<R>,
    count: usize,
) -> ServiceResult<usize> {
    let mut created = 0;
    for (title, description) in SAMPLE_TODOS.iter().take(count) {
        let (_, is_new) = service.get_or_create(
            &Filter::new().eq(TITLE_COLUMN, *title).include_deleted(),
            TodoDraft::new(*title).with_description(*description),
        )?;
        if is_new {
            created += 1;
        }
    }
    info!("event=seed_todos module=seed status=ok requested={count} created={created}");
    Ok(created)
}

/// Hard-deletes every todo, soft-deleted ones included.
pub fn clear_todos<R: Repository<Todo>>(service: &TodoService<R>) -> ServiceResult<usize> {
    let ids = service
        .list(&Filter::new().include_deleted())?
        .iter()
        .map(|todo| todo.meta.id)
        .collect::<Vec<_>>();
    let removed = service.bulk_delete(&ids, true)?;
    info!("event=clear_todos module=seed status=ok removed={removed}");
    Ok(removed)
}
