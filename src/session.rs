//! Nested transaction sessions
//!
//! A [`Session`] wraps one SQLite connection and the transaction state layered
//! on top of it. Sessions form a tree that shares the connection:
//!
//! ```text
//! root ──begin()──> transaction (BEGIN IMMEDIATE)
//!                      └──begin()──> savepoint sp1
//!                                       └──begin()──> savepoint sp2
//! ```
//!
//! Calling `begin` on a session whose connection already has an open
//! transaction yields a savepoint scope instead of a second `BEGIN`, so domain
//! operations compose without knowing whether the caller opened a transaction.
//!
//! ## Resolution
//!
//! - `commit` on a transaction scope issues `COMMIT` and then runs the queued
//!   after-commit hooks. On a savepoint it issues `RELEASE SAVEPOINT`.
//! - `rollback` on a transaction scope issues `ROLLBACK`. On a savepoint it
//!   rolls back to and releases the savepoint, discarding only the work and
//!   hooks registered since it was taken.
//! - A scope resolves once. Further commit/rollback calls are no-ops.
//! - Dropping the last handle of an unresolved scope rolls it back.
//!
//! ## Locking
//!
//! `BEGIN IMMEDIATE` takes the database write lock up front and holds it until
//! the transaction resolves, so every read inside a transaction is serialized
//! against all other writers. The `*_for_update` store reads rely on this.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::{Connection, ErrorCode, OptionalExtension, Params, Row};
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{ErrorKind, GraphError, Result};

type Hook = Box<dyn FnOnce() + Send + 'static>;

/// VM instructions between cancellation checks of a running statement
const PROGRESS_OPS: i32 = 1000;

const LOCK_POLL_MIN: Duration = Duration::from_millis(1);
const LOCK_POLL_MAX: Duration = Duration::from_millis(25);

/// Connection plus the bookkeeping shared by every scope in a session tree
struct TxState {
    conn: Connection,
    /// Names of the savepoints currently open, innermost last
    savepoints: Vec<String>,
    next_savepoint: u64,
    after_commit: Vec<Hook>,
    /// Longest wait for another connection's write lock
    lock_timeout: Duration,
}

impl TxState {
    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn savepoint_position(&self, name: &str) -> Option<usize> {
        self.savepoints.iter().rposition(|sp| sp == name)
    }

    /// Forget everything tied to the outer transaction
    fn reset(&mut self) -> Vec<Hook> {
        self.savepoints.clear();
        std::mem::take(&mut self.after_commit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScopeKind {
    Root,
    Transaction,
    Savepoint { name: String, hooks_mark: usize },
}

struct Scope {
    state: Arc<Mutex<TxState>>,
    kind: ScopeKind,
    depth: usize,
    resolved: Mutex<bool>,
    ctx: Context,
}

/// Handle to a transaction scope over a shared connection
#[derive(Clone)]
pub struct Session {
    scope: Arc<Scope>,
}

impl Session {
    /// Wrap a connection in a root scope with no transaction open.
    ///
    /// The connection's `busy_timeout` becomes the write lock wait, and a
    /// running statement is interrupted once `ctx` is cancelled or expires.
    pub fn new(conn: Connection, ctx: Context) -> Self {
        let lock_timeout = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get::<_, i64>(0))
            .map(|ms| Duration::from_millis(ms.max(0) as u64))
            .unwrap_or_default();

        let token = ctx.token().clone();
        let deadline = ctx.deadline();
        conn.progress_handler(
            PROGRESS_OPS,
            Some(move || {
                token.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d)
            }),
        );

        let state = TxState {
            conn,
            savepoints: Vec::new(),
            next_savepoint: 0,
            after_commit: Vec::new(),
            lock_timeout,
        };
        Self {
            scope: Arc::new(Scope {
                state: Arc::new(Mutex::new(state)),
                kind: ScopeKind::Root,
                depth: 0,
                resolved: Mutex::new(false),
                ctx: ctx.detached(),
            }),
        }
    }

    pub fn context(&self) -> &Context {
        &self.scope.ctx
    }

    /// Nesting level: 0 for a root, 1 for a transaction, 2+ for savepoints
    pub fn depth(&self) -> usize {
        self.scope.depth
    }

    pub fn is_root(&self) -> bool {
        self.scope.kind == ScopeKind::Root
    }

    pub fn is_savepoint(&self) -> bool {
        matches!(self.scope.kind, ScopeKind::Savepoint { .. })
    }

    pub fn is_resolved(&self) -> bool {
        self.scope.resolved.lock().map(|r| *r).unwrap_or(true)
    }

    /// Whether the shared connection currently has an open transaction
    pub fn in_transaction(&self) -> Result<bool> {
        Ok(self.scope.lock_state()?.in_transaction())
    }

    /// Open a transaction, or a savepoint if one is already open
    pub fn begin(&self) -> Result<Session> {
        self.scope.ctx.check()?;
        let mut state = self.scope.lock_state()?;

        let kind = if state.in_transaction() {
            state.next_savepoint += 1;
            let name = format!("sp{}", state.next_savepoint);
            state
                .conn
                .execute_batch(&format!("SAVEPOINT {}", name))
                .map_err(|e| {
                    interpret(&self.scope.ctx, GraphError::database(format!("savepoint {}", name), e))
                })?;
            state.savepoints.push(name.clone());
            debug!(savepoint = %name, depth = self.scope.depth + 1, "Savepoint opened");
            ScopeKind::Savepoint {
                name,
                hooks_mark: state.after_commit.len(),
            }
        } else {
            acquire_write_lock(&state.conn, &self.scope.ctx, state.lock_timeout)?;
            debug!("Transaction opened");
            ScopeKind::Transaction
        };
        drop(state);

        let depth = match kind {
            ScopeKind::Transaction => 1,
            _ => self.scope.depth + 1,
        };

        Ok(Session {
            scope: Arc::new(Scope {
                state: Arc::clone(&self.scope.state),
                kind,
                depth,
                resolved: Mutex::new(false),
                ctx: self.scope.ctx.clone(),
            }),
        })
    }

    pub fn commit(&self) -> Result<()> {
        self.scope.commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.scope.rollback()
    }

    /// Run `f` inside a new scope: commit on `Ok`, roll back on `Err`
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T>,
    {
        let tx = self.begin()?;
        match f(&tx) {
            Ok(value) => {
                if let Err(e) = tx.commit() {
                    if let Err(rb) = tx.rollback() {
                        warn!(error = %rb, "Rollback after failed commit also failed");
                    }
                    return Err(e);
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    warn!(error = %rb, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Queue `hook` until the outermost transaction commits.
    /// Runs immediately when no transaction is open.
    pub fn after_commit<F>(&self, hook: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.scope.lock_state()?;
        if state.in_transaction() {
            state.after_commit.push(Box::new(hook));
            return Ok(());
        }
        drop(state);
        hook();
        Ok(())
    }

    /// Borrow the shared connection. Must not be nested inside another
    /// `with_conn` on the same session tree.
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.scope.ctx.check()?;
        let state = self.scope.lock_state()?;
        f(&state.conn).map_err(|e| interpret(&self.scope.ctx, e))
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(sql, params)
                .map_err(|e| GraphError::database("execute statement", e))
        })
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(sql)
                .map_err(|e| GraphError::database("execute batch", e))
        })
    }

    /// Single-row query; `None` when nothing matches
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_conn(|conn| {
            conn.query_row(sql, params, f)
                .optional()
                .map_err(|e| GraphError::database("query row", e))
        })
    }

    pub fn query<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| GraphError::database("prepare query", e))?;
            let rows = stmt
                .query_map(params, f)
                .map_err(|e| GraphError::database("run query", e))?;
            let items = rows
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| GraphError::database("read rows", e))?;
            Ok(items)
        })
    }

    pub fn last_insert_rowid(&self) -> Result<i64> {
        Ok(self.scope.lock_state()?.conn.last_insert_rowid())
    }
}

impl Scope {
    fn lock_state(&self) -> Result<MutexGuard<'_, TxState>> {
        self.state
            .lock()
            .map_err(|e| GraphError::Internal(format!("Session lock poisoned: {}", e)))
    }

    fn lock_resolved(&self) -> Result<MutexGuard<'_, bool>> {
        self.resolved
            .lock()
            .map_err(|e| GraphError::Internal(format!("Session lock poisoned: {}", e)))
    }

    fn commit(&self) -> Result<()> {
        let mut resolved = self.lock_resolved()?;
        if *resolved {
            return Ok(());
        }

        match &self.kind {
            ScopeKind::Root => Ok(()),
            ScopeKind::Transaction => {
                self.ctx.check()?;
                let mut state = self.lock_state()?;
                if !state.in_transaction() {
                    return Err(GraphError::Internal(
                        "commit on a transaction that is no longer open".into(),
                    ));
                }
                state
                    .conn
                    .execute_batch("COMMIT")
                    .map_err(|e| interpret(&self.ctx, GraphError::database("commit transaction", e)))?;
                let hooks = state.reset();
                drop(state);
                *resolved = true;
                drop(resolved);

                debug!(hooks = hooks.len(), "Transaction committed");
                for hook in hooks {
                    hook();
                }
                Ok(())
            }
            ScopeKind::Savepoint { name, .. } => {
                self.ctx.check()?;
                let mut state = self.lock_state()?;
                let pos = state.savepoint_position(name).ok_or_else(|| {
                    GraphError::Internal(format!("savepoint {} is no longer active", name))
                })?;
                state
                    .conn
                    .execute_batch(&format!("RELEASE SAVEPOINT {}", name))
                    .map_err(|e| {
                        interpret(
                            &self.ctx,
                            GraphError::database(format!("release savepoint {}", name), e),
                        )
                    })?;
                state.savepoints.truncate(pos);
                *resolved = true;
                debug!(savepoint = %name, "Savepoint released");
                Ok(())
            }
        }
    }

    fn rollback(&self) -> Result<()> {
        let mut resolved = self.lock_resolved()?;
        if *resolved {
            return Ok(());
        }

        match &self.kind {
            ScopeKind::Root => Ok(()),
            ScopeKind::Transaction => {
                let mut state = self.lock_state()?;
                if state.in_transaction() {
                    state
                        .conn
                        .execute_batch("ROLLBACK")
                        .map_err(|e| GraphError::database("rollback transaction", e))?;
                }
                let discarded = state.reset();
                *resolved = true;
                debug!(hooks_discarded = discarded.len(), "Transaction rolled back");
                Ok(())
            }
            ScopeKind::Savepoint { name, hooks_mark } => {
                let mut state = self.lock_state()?;
                if let Some(pos) = state.savepoint_position(name) {
                    if !state.in_transaction() {
                        // An interrupted write already rolled back the whole transaction
                        state.savepoints.truncate(pos);
                        state.after_commit.truncate(*hooks_mark);
                        *resolved = true;
                        return Ok(());
                    }
                    state
                        .conn
                        .execute_batch(&format!(
                            "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"
                        ))
                        .map_err(|e| {
                            GraphError::database(format!("rollback savepoint {}", name), e)
                        })?;
                    state.savepoints.truncate(pos);
                    state.after_commit.truncate(*hooks_mark);
                    debug!(savepoint = %name, "Savepoint rolled back");
                }
                *resolved = true;
                Ok(())
            }
        }
    }
}

/// `BEGIN IMMEDIATE`, polling while another connection holds the write lock.
///
/// SQLite's own busy handler sleeps without looking at `ctx`, so the wait is
/// done here between attempts.
fn acquire_write_lock(conn: &Connection, ctx: &Context, timeout: Duration) -> Result<()> {
    conn.busy_timeout(Duration::ZERO)
        .map_err(|e| GraphError::database("disable busy timeout", e))?;
    let outcome = poll_begin_immediate(conn, ctx, timeout);
    conn.busy_timeout(timeout)
        .map_err(|e| GraphError::database("restore busy timeout", e))?;
    outcome
}

fn poll_begin_immediate(conn: &Connection, ctx: &Context, timeout: Duration) -> Result<()> {
    let started = Instant::now();
    let mut delay = LOCK_POLL_MIN;
    loop {
        ctx.check()?;
        match conn.execute_batch("BEGIN IMMEDIATE") {
            Ok(()) => return Ok(()),
            Err(e) if is_busy(&e) => {
                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(GraphError::database(
                        format!("begin transaction: write lock not acquired within {:?}", timeout),
                        e,
                    ));
                }
                let mut pause = delay.min(timeout - waited);
                if let Some(deadline) = ctx.deadline() {
                    pause = pause.min(deadline.saturating_duration_since(Instant::now()));
                }
                thread::sleep(pause);
                delay = (delay * 2).min(LOCK_POLL_MAX);
            }
            Err(e) => return Err(interpret(ctx, GraphError::database("begin transaction", e))),
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

/// Report a cancelled or expired context in place of the driver error it caused
fn interpret(ctx: &Context, err: GraphError) -> GraphError {
    match err.kind() {
        ErrorKind::Canceled | ErrorKind::Internal => match ctx.check() {
            Err(ctx_err) => ctx_err,
            Ok(()) => err,
        },
        _ => err,
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.kind == ScopeKind::Root {
            return;
        }
        let unresolved = self.resolved.lock().map(|r| !*r).unwrap_or(false);
        if unresolved {
            debug!(kind = ?self.kind, "Rolling back unresolved scope on drop");
            if let Err(e) = self.rollback() {
                warn!(error = %e, "Best-effort rollback on drop failed");
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("kind", &self.scope.kind)
            .field("depth", &self.scope.depth)
            .finish()
    }
}
