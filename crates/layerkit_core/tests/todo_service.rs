use layerkit_core::context::scope;
use layerkit_core::seed::{clear_todos, seed_todos, SAMPLE_TODOS};
use layerkit_core::service::{ServiceHooks, ServiceResult};
use layerkit_core::{
    open_pool_in_memory, DbPool, EntityId, ErrorKind, Filter, Service, ServiceError,
    SqliteRepository, Todo, TodoDraft, TodoPatch, TodoService,
};
use std::cell::RefCell;
use uuid::Uuid;

fn with_service<T>(
    pool: &DbPool,
    handler: impl FnOnce(&TodoService) -> ServiceResult<T>,
) -> ServiceResult<T> {
    let service = TodoService::sqlite()?;
    scope(pool, |_| handler(&service))
}

#[test]
fn create_todo_trims_title() {
    let pool = open_pool_in_memory().unwrap();

    let todo = with_service(&pool, |service| {
        service.create_todo("  buy milk  ", Some("2 liters".to_string()))
    })
    .unwrap();

    assert_eq!(todo.title, "buy milk");
    assert_eq!(todo.description.as_deref(), Some("2 liters"));
}

#[test]
fn blank_or_oversized_titles_are_rejected() {
    let pool = open_pool_in_memory().unwrap();

    let err = with_service(&pool, |service| service.create_todo("   ", None)).unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
    assert_eq!(err.kind().http_status(), 422);

    let long = "x".repeat(256);
    let err = with_service(&pool, |service| service.create_todo(long, None)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let count = with_service(&pool, |service| service.count(&Filter::new())).unwrap();
    assert_eq!(count, 0);
}

#[test]
fn update_validates_only_set_title() {
    let pool = open_pool_in_memory().unwrap();

    let result = with_service(&pool, |service| {
        let todo = service.create_todo("first", None)?;
        let done = service.set_completed(todo.meta.id, true)?;
        assert!(done.completed);
        assert_eq!(done.title, "first");

        service.update_todo(
            todo.meta.id,
            TodoPatch {
                title: Some(String::new()),
                ..TodoPatch::default()
            },
        )
    });

    assert!(matches!(result, Err(ServiceError::Validation(_))));
}

#[test]
fn missing_todo_is_not_found_with_resource_name() {
    let pool = open_pool_in_memory().unwrap();
    let missing = Uuid::new_v4();

    let err = with_service(&pool, |service| service.get(missing)).unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { resource: "todo", id } if id == missing));
    assert_eq!(err.to_string(), format!("todo not found: {missing}"));

    let err = with_service(&pool, |service| service.delete(missing, false)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = with_service(&pool, |service| {
        service.set_completed(missing, true).map(|_| ())
    })
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn list_and_paginate_by_status() {
    let pool = open_pool_in_memory().unwrap();

    with_service(&pool, |service| {
        for n in 0..5 {
            let todo = service.create_todo(format!("task {n}"), None)?;
            if n % 2 == 0 {
                service.set_completed(todo.meta.id, true)?;
            }
        }
        Ok(())
    })
    .unwrap();

    let (done, open, all) = with_service(&pool, |service| {
        Ok((
            service.list_todos(Some(true))?,
            service.list_todos(Some(false))?,
            service.list_todos(None)?,
        ))
    })
    .unwrap();
    assert_eq!(done.len(), 3);
    assert_eq!(open.len(), 2);
    assert_eq!(all.len(), 5);
    assert_eq!(all[0].title, "task 0");

    let page = with_service(&pool, |service| service.paginate_todos(2, 2, Some(true))).unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.total, 3);
    assert!(!page.has_next);
    assert!(page.has_prev);
}

#[test]
fn delete_then_restore_through_service() {
    let pool = open_pool_in_memory().unwrap();

    let (created, restored) = with_service(&pool, |service| {
        let created = service.create_todo("undo me", None)?;
        service.delete(created.meta.id, false)?;
        assert_eq!(
            service.get(created.meta.id).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        let restored = service.restore(created.meta.id)?;
        Ok((created, restored))
    })
    .unwrap();

    assert_eq!(restored, created);
}

#[test]
fn seeder_is_idempotent_and_clear_removes_everything() {
    let pool = open_pool_in_memory().unwrap();

    let created = with_service(&pool, |service| seed_todos(service, 4)).unwrap();
    assert_eq!(created, 4);

    let created = with_service(&pool, |service| seed_todos(service, 100)).unwrap();
    assert_eq!(created, SAMPLE_TODOS.len() - 4);

    let removed = with_service(&pool, |service| {
        let first = service.list_todos(None)?[0].meta.id;
        service.delete(first, false)?;
        clear_todos(service)
    })
    .unwrap();
    assert_eq!(removed, SAMPLE_TODOS.len());

    let remaining = with_service(&pool, |service| {
        service.count(&Filter::new().include_deleted())
    })
    .unwrap();
    assert_eq!(remaining, 0);
}

#[derive(Default)]
struct AuditHooks {
    events: RefCell<Vec<String>>,
}

impl ServiceHooks<Todo> for AuditHooks {
    fn before_create(&self, draft: &mut TodoDraft) -> ServiceResult<()> {
        if draft.title.starts_with('!') {
            return Err(ServiceError::Validation("reserved prefix".to_string()));
        }
        self.events.borrow_mut().push(format!("before_create {}", draft.title));
        Ok(())
    }

    fn after_create(&self, entity: &Todo) -> ServiceResult<()> {
        self.events.borrow_mut().push(format!("after_create {}", entity.title));
        Ok(())
    }

    fn before_delete(&self, _id: EntityId, hard: bool) -> ServiceResult<()> {
        self.events.borrow_mut().push(format!("before_delete hard={hard}"));
        Ok(())
    }

    fn after_delete(&self, _id: EntityId, hard: bool) -> ServiceResult<()> {
        self.events.borrow_mut().push(format!("after_delete hard={hard}"));
        Ok(())
    }

    fn after_update(&self, entity: &Todo) -> ServiceResult<()> {
        self.events.borrow_mut().push(format!(
            "after_update {} completed={}",
            entity.title, entity.completed
        ));
        Ok(())
    }

    fn before_restore(&self, _id: EntityId) -> ServiceResult<()> {
        self.events.borrow_mut().push("before_restore".to_string());
        Ok(())
    }

    fn after_restore(&self, entity: &Todo) -> ServiceResult<()> {
        self.events.borrow_mut().push(format!("after_restore {}", entity.title));
        Ok(())
    }

    fn after_upsert(&self, entity: &Todo) -> ServiceResult<()> {
        self.events.borrow_mut().push(format!(
            "after_upsert {} {}",
            entity.title,
            entity.description.as_deref().unwrap_or("-")
        ));
        Ok(())
    }
}

fn audited_service() -> Service<Todo, SqliteRepository<Todo>, AuditHooks> {
    Service::with_hooks(
        SqliteRepository::<Todo>::try_new().unwrap(),
        AuditHooks::default(),
    )
}

#[test]
fn hooks_wrap_mutations_and_can_reject_them() {
    let pool = open_pool_in_memory().unwrap();
    let service: Service<Todo, _, _> = Service::with_hooks(
        SqliteRepository::<Todo>::try_new().unwrap(),
        AuditHooks::default(),
    );

    let result: ServiceResult<()> = scope(&pool, |_| {
        let todo = service.create(TodoDraft::new("audited"))?;
        service.delete(todo.meta.id, true)?;
        Ok(())
    });
    result.unwrap();

    let rejected = scope(&pool, |_| service.create(TodoDraft::new("!nope"))).unwrap_err();
    assert!(matches!(rejected, ServiceError::Validation(_)));

    assert_eq!(
        service.hooks().events.borrow().as_slice(),
        [
            "before_create audited",
            "after_create audited",
            "before_delete hard=true",
            "after_delete hard=true",
        ]
    );
}

#[test]
fn bulk_create_runs_hooks_per_draft_and_stays_atomic() {
    let pool = open_pool_in_memory().unwrap();
    let service: Service<Todo, _, _> = Service::with_hooks(
        SqliteRepository::<Todo>::try_new().unwrap(),
        AuditHooks::default(),
    );

    let err = scope(&pool, |_| {
        service.bulk_create(vec![TodoDraft::new("ok"), TodoDraft::new("!bad")])
    })
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let count: ServiceResult<u64> = scope(&pool, |_| service.count(&Filter::new()));
    assert_eq!(count.unwrap(), 0);
}

#[test]
fn restore_runs_its_hooks() {
    let pool = open_pool_in_memory().unwrap();
    let service = audited_service();

    let result: ServiceResult<Todo> = scope(&pool, |_| {
        let todo = service.create(TodoDraft::new("bring back"))?;
        service.delete(todo.meta.id, false)?;
        service.restore(todo.meta.id)
    });
    assert!(result.unwrap().meta.is_active());

    assert_eq!(
        service.hooks().events.borrow().as_slice(),
        [
            "before_create bring back",
            "after_create bring back",
            "before_delete hard=false",
            "after_delete hard=false",
            "before_restore",
            "after_restore bring back",
        ]
    );
}

#[test]
fn upsert_runs_create_rules_then_after_hook() {
    let pool = open_pool_in_memory().unwrap();
    let service = audited_service();

    let result: ServiceResult<()> = scope(&pool, |_| {
        service.upsert(&["title"], TodoDraft::new("keyed").with_description("v1"))?;
        service.upsert(&["title"], TodoDraft::new("keyed").with_description("v2"))?;
        Ok(())
    });
    result.unwrap();

    let rejected = scope(&pool, |_| service.upsert(&["title"], TodoDraft::new("!keyed")))
        .unwrap_err();
    assert_eq!(rejected.kind(), ErrorKind::Validation);

    assert_eq!(
        service.hooks().events.borrow().as_slice(),
        [
            "before_create keyed",
            "after_upsert keyed v1",
            "before_create keyed",
            "after_upsert keyed v2",
        ]
    );
}

#[test]
fn bulk_update_runs_after_hook_per_affected_row() {
    let pool = open_pool_in_memory().unwrap();
    let service = audited_service();

    let affected = scope(&pool, |_| -> ServiceResult<usize> {
        let kept = service.create(TodoDraft::new("kept"))?;
        let gone = service.create(TodoDraft::new("gone"))?;
        service.delete(gone.meta.id, false)?;
        service.hooks().events.borrow_mut().clear();

        service.bulk_update(
            &[kept.meta.id, gone.meta.id],
            TodoPatch {
                completed: Some(true),
                ..TodoPatch::default()
            },
        )
    })
    .unwrap();

    assert_eq!(affected, 1);
    assert_eq!(
        service.hooks().events.borrow().as_slice(),
        ["after_update kept completed=true"]
    );
}
