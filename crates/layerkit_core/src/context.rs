//! Ambient, request-scoped session context.
//!
//! # Responsibility
//! - Acquire a pooled connection per request and open its transaction.
//! - Expose the active session to downstream code without threading a handle
//!   through every call.
//! - Commit or roll back, release the connection and clear the slot when the
//!   request ends, on every exit path.
//!
//! # Invariants
//! - The slot is thread-local: one request per thread, and no thread can
//!   observe another thread's session.
//! - At most one session is installed per thread at a time.
//! - A `RequestScope` dropped without `end()` rolls back and clears the slot.
//!   When the slot is borrowed at that moment, the rollback runs as soon as
//!   the outermost `with_current` call releases it.
//! - A session never outlives its request; its connection goes back to the
//!   pool with no open transaction.

use crate::db::{DbPool, PooledConn};
use crate::error::ErrorKind;
use log::{debug, error, warn};
use rusqlite::Connection;
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::time::Instant;
use uuid::Uuid;

/// Identifier of one request session, unique per `begin()`.
pub type SessionId = Uuid;

thread_local! {
    static ACTIVE_SESSION: RefCell<Option<Session>> = const { RefCell::new(None) };
    /// Session abandoned while the slot was borrowed; rolled back on release.
    static PENDING_ROLLBACK: Cell<Option<SessionId>> = const { Cell::new(None) };
}

#[derive(Debug)]
pub enum SessionError {
    /// No free pooled connection within the timeout, or backend unreachable.
    Acquisition(r2d2::Error),
    /// Data access outside a request boundary.
    NoActiveSession,
    /// The caller holds state from a request that has already ended.
    StaleSession { expected: SessionId },
    /// `begin()` called while this thread already has a request in flight.
    AlreadyActive(SessionId),
    /// `end()` called while the session is borrowed by `with_current`.
    SlotBusy,
    /// Transaction control statement failed.
    Transaction(rusqlite::Error),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Acquisition(_) => ErrorKind::Acquisition,
            Self::NoActiveSession | Self::StaleSession { .. } => ErrorKind::NoActiveSession,
            Self::AlreadyActive(_) | Self::SlotBusy | Self::Transaction(_) => ErrorKind::Storage,
        }
    }
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acquisition(err) => write!(f, "failed to acquire database session: {err}"),
            Self::NoActiveSession => {
                write!(f, "no active database session; call inside a request scope")
            }
            Self::StaleSession { expected } => {
                write!(f, "session {expected} has ended; results cannot be read any more")
            }
            Self::AlreadyActive(id) => {
                write!(f, "session {id} is already active on this thread")
            }
            Self::SlotBusy => write!(f, "session slot is borrowed; cannot end the request here"),
            Self::Transaction(err) => write!(f, "transaction control failed: {err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Acquisition(err) => Some(err),
            Self::Transaction(err) => Some(err),
            _ => None,
        }
    }
}

/// How a request finished; decides commit versus rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            Self::Success
        } else {
            Self::Failure
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Success => "commit",
            Self::Failure => "rollback",
        }
    }
}

/// One request's connection and open transaction.
///
/// Only reachable through [`with_current`] while its request is active.
pub struct Session {
    id: SessionId,
    conn: PooledConn,
    savepoint_depth: Cell<u32>,
    started_at: Instant,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Runs `work` inside a savepoint: all of its writes persist together or
    /// none do. The enclosing request transaction is unaffected on failure.
    pub fn atomic<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<rusqlite::Error>,
    {
        let depth = self.savepoint_depth.get() + 1;
        let name = format!("layerkit_sp_{depth}");
        self.conn.execute_batch(&format!("SAVEPOINT {name};"))?;
        self.savepoint_depth.set(depth);

        let result = work(&self.conn);
        self.savepoint_depth.set(depth - 1);

        match result {
            Ok(value) => {
                self.conn.execute_batch(&format!("RELEASE SAVEPOINT {name};"))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.conn.execute_batch(&format!(
                    "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name};"
                )) {
                    warn!(
                        "event=savepoint_rollback module=context status=error session_id={} error={}",
                        self.id, rollback_err
                    );
                }
                Err(err)
            }
        }
    }

    fn finish(&self, outcome: Outcome) -> Result<(), SessionError> {
        let statement = match outcome {
            Outcome::Success => "COMMIT;",
            Outcome::Failure => "ROLLBACK;",
        };
        match self.conn.execute_batch(statement) {
            Ok(()) => Ok(()),
            Err(err) => {
                if !self.conn.is_autocommit() {
                    if let Err(rollback_err) = self.conn.execute_batch("ROLLBACK;") {
                        warn!(
                            "event=session_rollback module=context status=error session_id={} error={}",
                            self.id, rollback_err
                        );
                    }
                }
                Err(SessionError::Transaction(err))
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Never hand a connection back to the pool mid-transaction.
        if !self.conn.is_autocommit() {
            if let Err(err) = self.conn.execute_batch("ROLLBACK;") {
                error!(
                    "event=session_drop module=context status=error session_id={} error={}",
                    self.id, err
                );
            }
        }
    }
}

/// Guard for one in-flight request on the current thread.
///
/// Not `Send`: the session lives in this thread's slot and must be ended here.
#[must_use = "dropping the scope immediately rolls the request back"]
#[derive(Debug)]
pub struct RequestScope {
    session_id: SessionId,
    ended: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl RequestScope {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Commits on `Success`, rolls back on `Failure`; always releases the
    /// connection and clears the slot, even when commit fails.
    ///
    /// Called while the slot is borrowed (inside `with_current`), this fails
    /// with `SlotBusy` and the request is rolled back once the slot is free.
    pub fn end(mut self, outcome: Outcome) -> Result<(), SessionError> {
        let result = finish_active(self.session_id, outcome);
        if !matches!(result, Err(SessionError::SlotBusy)) {
            self.ended = true;
        }
        result
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        warn!(
            "event=session_abandoned module=context status=error session_id={}",
            self.session_id
        );
        match finish_active(self.session_id, Outcome::Failure) {
            Ok(()) => {}
            Err(SessionError::SlotBusy) => defer_rollback(self.session_id),
            Err(err) => error!(
                "event=session_end module=context status=error session_id={} error={}",
                self.session_id, err
            ),
        }
    }
}

/// Acquires a session from `pool`, opens its transaction and installs it in
/// the current thread's slot.
///
/// # Errors
/// - `Acquisition` when no connection is available within the pool timeout.
/// - `AlreadyActive` when this thread already has a request in flight.
/// - `Transaction` when `BEGIN` fails.
pub fn begin(pool: &DbPool) -> Result<RequestScope, SessionError> {
    settle_pending_rollback();
    if let Some(active) = current_session_id() {
        return Err(SessionError::AlreadyActive(active));
    }

    let started_at = Instant::now();
    let conn = pool.get().map_err(|err| {
        warn!(
            "event=session_begin module=context status=error error_kind=acquisition duration_ms={} error={}",
            started_at.elapsed().as_millis(),
            err
        );
        SessionError::Acquisition(err)
    })?;
    conn.execute_batch("BEGIN;")
        .map_err(SessionError::Transaction)?;

    let session = Session {
        id: Uuid::new_v4(),
        conn,
        savepoint_depth: Cell::new(0),
        started_at,
    };
    let session_id = session.id;

    ACTIVE_SESSION.with(|slot| {
        let mut slot = slot.try_borrow_mut().map_err(|_| SessionError::SlotBusy)?;
        if let Some(active) = slot.as_ref() {
            return Err(SessionError::AlreadyActive(active.id));
        }
        *slot = Some(session);
        Ok(())
    })?;

    debug!(
        "event=session_begin module=context status=ok session_id={session_id} wait_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(RequestScope {
        session_id,
        ended: false,
        _thread_bound: PhantomData,
    })
}

/// Runs `work` against the session installed for the calling thread.
///
/// # Errors
/// - `NoActiveSession` outside a request boundary. This is a contract
///   violation by the caller, not a transient condition.
pub fn with_current<T, F>(work: F) -> Result<T, SessionError>
where
    F: FnOnce(&Session) -> T,
{
    let result = ACTIVE_SESSION.with(|slot| {
        let slot = slot.try_borrow().map_err(|_| SessionError::SlotBusy)?;
        slot.as_ref()
            .map(work)
            .ok_or(SessionError::NoActiveSession)
    });
    settle_pending_rollback();
    result
}

/// Returns whether the calling thread is inside a request boundary.
pub fn is_active() -> bool {
    current_session_id().is_some()
}

/// Id of the calling thread's session, if any.
pub fn current_session_id() -> Option<SessionId> {
    ACTIVE_SESSION.with(|slot| {
        slot.try_borrow()
            .ok()
            .and_then(|slot| slot.as_ref().map(Session::id))
    })
}

/// Request boundary: begins a session, runs `handler`, then commits when it
/// returns `Ok` and rolls back otherwise.
///
/// `handler` receives the scope as proof that a session is active. A panic
/// inside `handler` rolls back through the scope's `Drop`.
pub fn scope<T, E, F>(pool: &DbPool, handler: F) -> Result<T, E>
where
    F: FnOnce(&RequestScope) -> Result<T, E>,
    E: From<SessionError>,
{
    let request = begin(pool)?;
    let result = handler(&request);
    let outcome = Outcome::of(&result);
    match (request.end(outcome), result) {
        (Ok(()), result) => result,
        (Err(err), Ok(_)) => Err(err.into()),
        (Err(err), Err(handler_err)) => {
            warn!("event=session_end module=context status=error phase=after_failure error={err}");
            Err(handler_err)
        }
    }
}

fn finish_active(expected: SessionId, outcome: Outcome) -> Result<(), SessionError> {
    let session = ACTIVE_SESSION.with(|slot| {
        let mut slot = slot.try_borrow_mut().map_err(|_| SessionError::SlotBusy)?;
        match slot.as_ref() {
            Some(session) if session.id == expected => {
                slot.take().ok_or(SessionError::StaleSession { expected })
            }
            Some(_) | None => Err(SessionError::StaleSession { expected }),
        }
    })?;

    let result = session.finish(outcome);
    let duration_ms = session.started_at.elapsed().as_millis();
    match &result {
        Ok(()) => debug!(
            "event=session_end module=context status=ok session_id={expected} action={} duration_ms={duration_ms}",
            outcome.label()
        ),
        Err(err) => error!(
            "event=session_end module=context status=error session_id={expected} action={} duration_ms={duration_ms} error={err}",
            outcome.label()
        ),
    }
    drop(session);
    result
}

fn defer_rollback(session_id: SessionId) {
    debug!("event=session_end module=context status=deferred session_id={session_id}");
    PENDING_ROLLBACK.with(|pending| pending.set(Some(session_id)));
}

fn settle_pending_rollback() {
    let Some(session_id) = PENDING_ROLLBACK.with(Cell::take) else {
        return;
    };
    match finish_active(session_id, Outcome::Failure) {
        Ok(()) => {}
        // Still inside an outer `with_current`; retry when that one returns.
        Err(SessionError::SlotBusy) => {
            PENDING_ROLLBACK.with(|pending| pending.set(Some(session_id)))
        }
        Err(err) => error!(
            "event=session_end module=context status=error session_id={session_id} error={err}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{begin, current_session_id, is_active, scope, with_current, Outcome, SessionError};
    use crate::model::filter::Filter;
    use crate::model::todo::{Todo, TodoDraft};
    use crate::repo::sqlite::SqliteRepository;
    use crate::repo::Repository;
    use crate::db::open_pool_in_memory;

    #[test]
    fn with_current_fails_outside_request() {
        assert!(!is_active());
        let err = with_current(|session| session.id()).unwrap_err();
        assert!(matches!(err, SessionError::NoActiveSession));
    }

    #[test]
    fn begin_installs_and_end_clears_slot() {
        let pool = open_pool_in_memory().unwrap();
        let request = begin(&pool).unwrap();
        assert_eq!(current_session_id(), Some(request.session_id()));
        assert_eq!(with_current(|s| s.id()).unwrap(), request.session_id());

        request.end(Outcome::Success).unwrap();
        assert!(!is_active());
    }

    #[test]
    fn nested_begin_is_rejected() {
        let pool = open_pool_in_memory().unwrap();
        let request = begin(&pool).unwrap();
        let err = begin(&pool).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyActive(id) if id == request.session_id()));
        request.end(Outcome::Failure).unwrap();
    }

    #[test]
    fn dropped_scope_clears_slot() {
        let pool = open_pool_in_memory().unwrap();
        {
            let _request = begin(&pool).unwrap();
            assert!(is_active());
        }
        assert!(!is_active());
        // The single in-memory connection went back to the pool.
        begin(&pool).unwrap().end(Outcome::Success).unwrap();
    }

    #[test]
    fn atomic_rolls_back_only_the_savepoint() {
        let pool = open_pool_in_memory().unwrap();
        let rows: i64 = scope(&pool, |_| -> Result<i64, SessionError> {
            with_current(|session| {
                let conn = session.connection();
                conn.execute_batch("CREATE TABLE marks (n INTEGER NOT NULL);")
                    .map_err(SessionError::Transaction)?;
                conn.execute("INSERT INTO marks (n) VALUES (1);", [])
                    .map_err(SessionError::Transaction)?;

                let failed: Result<(), rusqlite::Error> = session.atomic(|conn| {
                    conn.execute("INSERT INTO marks (n) VALUES (2);", [])?;
                    conn.execute("INSERT INTO marks (n) VALUES (NULL);", [])?;
                    Ok(())
                });
                assert!(failed.is_err());

                conn.query_row("SELECT COUNT(*) FROM marks;", [], |row| row.get(0))
                    .map_err(SessionError::Transaction)
            })?
        })
        .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn end_inside_with_current_defers_rollback_until_slot_is_free() {
        let pool = open_pool_in_memory().unwrap();
        let repo = SqliteRepository::<Todo>::try_new().unwrap();
        let request = begin(&pool).unwrap();
        repo.create(&TodoDraft::new("never committed")).unwrap();

        let err = with_current(move |_| request.end(Outcome::Success))
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, SessionError::SlotBusy));
        assert!(!is_active());
        let later = begin(&pool).unwrap();
        assert_eq!(repo.count(&Filter::new()).unwrap(), 0);
        later.end(Outcome::Success).unwrap();
    }
}
