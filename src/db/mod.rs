//! SQLite database module for the social graph
//!
//! ## Architecture
//!
//! - [`Database`] owns the database path and connection settings. Every
//!   [`Session`] gets its own connection, so concurrent requests are only
//!   serialized by SQLite's write lock.
//! - [`store`] defines the per-table capability traits; the table modules
//!   implement them for [`SqliteStore`].
//!
//! ## Tables
//!
//! - `users` - registered subjects
//! - `friendships` - directed friendship edges, always stored in pairs
//! - `friend_request_logs` - friend request handshake log
//! - `chat_groups`, `group_members` - groups and their membership
//! - `group_invitation_logs`, `group_request_logs` - group handshake logs
//! - `private_records`, `group_records` - delivered messages

pub mod schema;
pub mod models;
pub mod store;
pub mod users;
pub mod friendships;
pub mod friend_requests;
pub mod groups;
pub mod group_members;
pub mod group_invitations;
pub mod group_requests;
pub mod records;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::context::Context;
use crate::error::{GraphError, Result};
use crate::session::Session;

pub use store::{RelationshipStore, SqliteStore};

/// Default time a connection waits on the write lock before giving up
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// SQLite database for the social graph
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open_with_timeout(
            &config.database_path,
            Duration::from_millis(config.busy_timeout_ms),
        )
    }

    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        info!("Opening SQLite database at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    GraphError::Internal(format!("Failed to create {:?}: {}", parent, e))
                })?;
            }
        }

        let db = Self {
            path: path.to_path_buf(),
            busy_timeout,
        };

        let conn = db.connect()?;
        // WAL lets readers proceed while a writer holds the lock
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| GraphError::database("set journal mode", e))?;
        schema::init_schema(&conn)?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Open a new connection with foreign keys and the busy timeout applied
    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .map_err(|e| GraphError::database("open connection", e))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| GraphError::database("set busy timeout", e))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| GraphError::database("enable foreign keys", e))?;
        Ok(conn)
    }

    /// The session attached to `ctx`, or a fresh root session on a new connection
    pub fn new_session(&self, ctx: &Context) -> Result<Session> {
        if let Some(session) = ctx.session() {
            return Ok(session.clone());
        }
        ctx.check()?;
        debug!(path = ?self.path, "Opening session");
        Ok(Session::new(self.connect()?, ctx.detached()))
    }

    /// Get database statistics
    pub fn stats(&self, ctx: &Context) -> Result<DbStats> {
        let session = self.new_session(ctx)?;
        session.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64> {
                let n: i64 = conn
                    .query_row(sql, [], |row| row.get(0))
                    .map_err(|e| GraphError::database("count rows", e))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                user_count: count("SELECT COUNT(*) FROM users")?,
                friendship_count: count("SELECT COUNT(*) FROM friendships")? / 2,
                friend_request_count: count("SELECT COUNT(*) FROM friend_request_logs")?,
                pending_friend_request_count: count(
                    "SELECT COUNT(*) FROM friend_request_logs WHERE status = 'pending'",
                )?,
                group_count: count("SELECT COUNT(*) FROM chat_groups")?,
                group_member_count: count("SELECT COUNT(*) FROM group_members")?,
                group_invitation_count: count("SELECT COUNT(*) FROM group_invitation_logs")?,
                group_request_count: count("SELECT COUNT(*) FROM group_request_logs")?,
                private_record_count: count("SELECT COUNT(*) FROM private_records")?,
                group_record_count: count("SELECT COUNT(*) FROM group_records")?,
                broadcast_record_count: count("SELECT COUNT(*) FROM broadcast_records")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DbStats {
    pub user_count: u64,
    /// Friend pairs, not directed edges
    pub friendship_count: u64,
    pub friend_request_count: u64,
    pub pending_friend_request_count: u64,
    pub group_count: u64,
    pub group_member_count: u64,
    pub group_invitation_count: u64,
    pub group_request_count: u64,
    pub private_record_count: u64,
    pub group_record_count: u64,
    pub broadcast_record_count: u64,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// A database in a temp dir; keep the `TempDir` alive for the test's duration
    pub fn setup_test_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("graph.db")).unwrap();
        (dir, db)
    }

    pub fn seed_user(session: &Session, subject: &str) {
        session
            .execute(
                "INSERT INTO users (subject, nickname, created_at) VALUES (?1, ?1, ?2)",
                rusqlite::params![subject, super::models::current_timestamp()],
            )
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("graph.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), path.as_path());
    }

    #[test]
    fn test_new_session_reuses_context_session() {
        let (_dir, db) = setup_test_db();
        let ctx = Context::new();
        let root = db.new_session(&ctx).unwrap();
        let tx = root.begin().unwrap();

        let joined = db.new_session(&ctx.with_session(tx.clone())).unwrap();
        assert_eq!(joined.depth(), 1);
        assert!(joined.in_transaction().unwrap());
        tx.commit().unwrap();
    }

    #[test]
    fn test_new_session_respects_cancellation() {
        let (_dir, db) = setup_test_db();
        let ctx = Context::new();
        ctx.cancel();
        let err = db.new_session(&ctx).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Canceled);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let (_dir, db) = setup_test_db();
        let session = db.new_session(&Context::new()).unwrap();
        let err = session
            .execute(
                "INSERT INTO friendships (user_subject, friend_subject, created_at) VALUES ('x', 'y', 'now')",
                [],
            )
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn test_stats_counts() {
        let (_dir, db) = setup_test_db();
        let ctx = Context::new();
        let session = db.new_session(&ctx).unwrap();
        seed_user(&session, "alice");
        seed_user(&session, "bob");

        let stats = db.stats(&ctx).unwrap();
        assert_eq!(stats.user_count, 2);
        assert_eq!(stats.friendship_count, 0);
        assert_eq!(stats.group_count, 0);
    }
}
