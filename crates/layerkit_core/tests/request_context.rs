use layerkit_core::context::{self, begin, current_session_id, is_active, scope, Outcome};
use layerkit_core::{
    open_pool, open_pool_in_memory, DatabaseConfig, ErrorKind, Filter, RepoError, RepoResult,
    Repository, SqliteRepository, Todo, TodoDraft,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn todo_repo() -> SqliteRepository<Todo> {
    SqliteRepository::try_new().unwrap()
}

fn titles(pool: &layerkit_core::DbPool) -> Vec<String> {
    let repo = todo_repo();
    scope(pool, |_| -> RepoResult<Vec<String>> {
        repo.get_all(&Filter::new())?
            .map(|todo| todo.map(|todo| todo.title))
            .collect()
    })
    .unwrap()
}

#[test]
fn repository_fails_outside_request_boundary() {
    let repo = todo_repo();

    let err = repo.create(&TodoDraft::new("orphan")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoActiveSession);

    let err = repo.count(&Filter::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoActiveSession);
}

#[test]
fn successful_request_commits() {
    let pool = open_pool_in_memory().unwrap();
    let repo = todo_repo();

    let created = scope(&pool, |_| repo.create(&TodoDraft::new("kept"))).unwrap();

    assert!(!is_active());
    assert_eq!(titles(&pool), vec![created.title]);
}

#[test]
fn failed_request_rolls_back() {
    let pool = open_pool_in_memory().unwrap();
    let repo = todo_repo();

    let result: RepoResult<()> = scope(&pool, |_| {
        repo.create(&TodoDraft::new("discarded"))?;
        Err(RepoError::InvalidArgument("handler failed".to_string()))
    });

    assert!(matches!(result, Err(RepoError::InvalidArgument(_))));
    assert!(!is_active());
    assert!(titles(&pool).is_empty());
}

#[test]
fn explicit_failure_outcome_rolls_back() {
    let pool = open_pool_in_memory().unwrap();
    let repo = todo_repo();

    let request = begin(&pool).unwrap();
    repo.create(&TodoDraft::new("discarded")).unwrap();
    request.end(Outcome::Failure).unwrap();

    assert!(titles(&pool).is_empty());
}

#[test]
fn panicking_handler_rolls_back_and_clears_slot() {
    let pool = open_pool_in_memory().unwrap();
    let repo = todo_repo();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        scope(&pool, |_| -> RepoResult<()> {
            repo.create(&TodoDraft::new("never committed"))?;
            panic!("handler blew up");
        })
    }));

    assert!(outcome.is_err());
    assert!(!is_active());
    assert!(titles(&pool).is_empty());
}

#[test]
fn session_is_visible_only_inside_the_boundary() {
    let pool = open_pool_in_memory().unwrap();
    assert_eq!(current_session_id(), None);

    let seen = scope(&pool, |request| -> RepoResult<bool> {
        let inner = context::with_current(|session| session.id())?;
        Ok(inner == request.session_id())
    })
    .unwrap();

    assert!(seen);
    assert_eq!(current_session_id(), None);
}

#[test]
fn concurrent_requests_see_only_their_own_session() {
    const WORKERS: usize = 4;
    let dir = tempfile::tempdir().unwrap();
    let pool = open_pool(&DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("concurrent.db").display()),
        pool_size: WORKERS as u32,
        ..DatabaseConfig::default()
    })
    .unwrap();
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles = (0..WORKERS)
        .map(|worker| {
            let pool = pool.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let repo = todo_repo();
                scope(&pool, |request| -> RepoResult<()> {
                    barrier.wait();
                    let own = repo.create(&TodoDraft::new(format!("worker {worker}")))?;
                    thread::sleep(Duration::from_millis(25));

                    let current = context::with_current(|session| session.id())?;
                    assert_eq!(current, request.session_id());
                    assert_eq!(repo.get_by_id(own.meta.id)?.title, own.title);
                    Ok(())
                })
                .unwrap();
                assert!(!is_active());
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(titles(&pool).len(), WORKERS);
}

#[test]
fn exhausted_pool_reports_acquisition_failure() {
    let pool = open_pool(&DatabaseConfig {
        url: ":memory:".to_string(),
        connection_timeout_ms: 100,
        ..DatabaseConfig::default()
    })
    .unwrap();

    let held = begin(&pool).unwrap();
    let err = thread::scope(|s| {
        s.spawn(|| begin(&pool).map(|_| ()).unwrap_err())
            .join()
            .unwrap()
    });
    held.end(Outcome::Success).unwrap();

    assert_eq!(err.kind(), ErrorKind::Acquisition);
    assert_eq!(err.kind().http_status(), 503);
}

#[test]
fn stream_cannot_outlive_its_request() {
    let pool = open_pool_in_memory().unwrap();
    let repo = todo_repo();

    let request = begin(&pool).unwrap();
    repo.create(&TodoDraft::new("one")).unwrap();
    let mut stream = repo.get_all(&Filter::new()).unwrap();
    request.end(Outcome::Success).unwrap();

    let later = begin(&pool).unwrap();
    let err = stream.next().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoActiveSession);
    assert!(stream.next().is_none());
    later.end(Outcome::Success).unwrap();
}

#[test]
fn write_after_stale_read_is_a_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open_pool(&DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("stale.db").display()),
        pool_size: 2,
        busy_timeout_ms: 200,
        ..DatabaseConfig::default()
    })
    .unwrap();
    let repo = todo_repo();

    let request = begin(&pool).unwrap();
    assert_eq!(repo.count(&Filter::new()).unwrap(), 0);

    thread::scope(|s| {
        s.spawn(|| scope(&pool, |_| repo.create(&TodoDraft::new("other request"))).unwrap())
            .join()
            .unwrap()
    });

    let err = repo.create(&TodoDraft::new("stale writer")).unwrap_err();
    request.end(Outcome::Failure).unwrap();

    assert!(matches!(err, RepoError::Conflict(_)));
    assert_eq!(err.kind().http_status(), 409);
    assert_eq!(titles(&pool), vec!["other request".to_string()]);
}
