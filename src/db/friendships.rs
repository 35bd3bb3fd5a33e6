//! Friendship edges
//!
//! Rows are directed. The friend service always writes and deletes both
//! directions in one transaction.

use rusqlite::{params, OptionalExtension};

use super::models::{current_timestamp, Friendship, FRIENDSHIP_COLUMNS};
use super::store::{require_write_lock, FriendshipStore, SqliteStore};
use crate::error::{GraphError, Result};
use crate::session::Session;

impl FriendshipStore for SqliteStore {
    fn insert_friendship(&self, s: &Session, user: &str, friend: &str) -> Result<Friendship> {
        let edge = Friendship {
            user_subject: user.to_string(),
            friend_subject: friend.to_string(),
            created_at: current_timestamp(),
        };
        s.with_conn(|conn| {
            conn.execute(
                "INSERT INTO friendships (user_subject, friend_subject, created_at) VALUES (?1, ?2, ?3)",
                params![edge.user_subject, edge.friend_subject, edge.created_at],
            )
            .map_err(|e| GraphError::database(format!("insert friendship {} -> {}", user, friend), e))
        })?;
        Ok(edge)
    }

    fn get_friendship(&self, s: &Session, user: &str, friend: &str) -> Result<Option<Friendship>> {
        s.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM friendships WHERE user_subject = ?1 AND friend_subject = ?2",
                FRIENDSHIP_COLUMNS
            );
            conn.query_row(&sql, [user, friend], Friendship::from_row)
                .optional()
                .map_err(|e| GraphError::database(format!("get friendship {} -> {}", user, friend), e))
        })
    }

    fn get_friendship_for_update(
        &self,
        s: &Session,
        user: &str,
        friend: &str,
    ) -> Result<Option<Friendship>> {
        require_write_lock(s, "get_friendship_for_update")?;
        self.get_friendship(s, user, friend)
    }

    fn list_friendships(&self, s: &Session, user: &str) -> Result<Vec<Friendship>> {
        s.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM friendships WHERE user_subject = ?1 ORDER BY created_at, friend_subject",
                FRIENDSHIP_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| GraphError::database("prepare list friendships", e))?;
            let rows = stmt
                .query_map([user], Friendship::from_row)
                .map_err(|e| GraphError::database(format!("list friendships of {}", user), e))?;
            let edges = rows
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| GraphError::database(format!("read friendships of {}", user), e))?;
            Ok(edges)
        })
    }

    fn delete_friendship(&self, s: &Session, user: &str, friend: &str) -> Result<usize> {
        s.with_conn(|conn| {
            conn.execute(
                "DELETE FROM friendships WHERE user_subject = ?1 AND friend_subject = ?2",
                [user, friend],
            )
            .map_err(|e| GraphError::database(format!("delete friendship {} -> {}", user, friend), e))
        })
    }
}
