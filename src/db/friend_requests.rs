//! Friend request logs

use rusqlite::{params, OptionalExtension};

use super::models::{
    current_timestamp, FriendRequestLog, LogStatus, NewFriendRequest, FRIEND_REQUEST_COLUMNS,
};
use super::store::{ensure_transitioned, require_write_lock, FriendRequestStore, SqliteStore};
use crate::error::{GraphError, Result};
use crate::session::Session;

// ============================================================================
// Query helpers
// ============================================================================

fn select_one(
    s: &Session,
    filter: &str,
    params: impl rusqlite::Params,
    what: &str,
) -> Result<Option<FriendRequestLog>> {
    s.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM friend_request_logs WHERE {} ORDER BY id DESC LIMIT 1",
            FRIEND_REQUEST_COLUMNS, filter
        );
        conn.query_row(&sql, params, FriendRequestLog::from_row)
            .optional()
            .map_err(|e| GraphError::database(what.to_string(), e))
    })
}

fn select_many(s: &Session, filter: &str, subject: &str, what: &str) -> Result<Vec<FriendRequestLog>> {
    s.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM friend_request_logs WHERE {} ORDER BY id",
            FRIEND_REQUEST_COLUMNS, filter
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| GraphError::database(what.to_string(), e))?;
        let rows = stmt
            .query_map([subject], FriendRequestLog::from_row)
            .map_err(|e| GraphError::database(what.to_string(), e))?;
        let logs = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| GraphError::database(what.to_string(), e))?;
        Ok(logs)
    })
}

// ============================================================================
// Store implementation
// ============================================================================

impl FriendRequestStore for SqliteStore {
    fn insert_friend_request(
        &self,
        s: &Session,
        new: &NewFriendRequest<'_>,
    ) -> Result<FriendRequestLog> {
        let now = current_timestamp();
        let id = s.with_conn(|conn| {
            conn.execute(
                "INSERT INTO friend_request_logs (sender, receiver, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![new.sender, new.receiver, new.status, now],
            )
            .map_err(|e| {
                GraphError::database(
                    format!("insert friend request {} -> {}", new.sender, new.receiver),
                    e,
                )
            })?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(FriendRequestLog {
            id,
            sender: new.sender.to_string(),
            receiver: new.receiver.to_string(),
            status: new.status,
            created_at: now,
            updated_at: now,
        })
    }

    fn get_friend_request(&self, s: &Session, id: i64) -> Result<Option<FriendRequestLog>> {
        select_one(s, "id = ?1", [id], &format!("get friend request {}", id))
    }

    fn get_friend_request_for_update(
        &self,
        s: &Session,
        id: i64,
    ) -> Result<Option<FriendRequestLog>> {
        require_write_lock(s, "get_friend_request_for_update")?;
        self.get_friend_request(s, id)
    }

    fn find_pending_friend_request(
        &self,
        s: &Session,
        sender: &str,
        receiver: &str,
    ) -> Result<Option<FriendRequestLog>> {
        select_one(
            s,
            "sender = ?1 AND receiver = ?2 AND status = 'pending'",
            [sender, receiver],
            &format!("find pending friend request {} -> {}", sender, receiver),
        )
    }

    fn find_pending_friend_request_for_update(
        &self,
        s: &Session,
        sender: &str,
        receiver: &str,
    ) -> Result<Option<FriendRequestLog>> {
        require_write_lock(s, "find_pending_friend_request_for_update")?;
        self.find_pending_friend_request(s, sender, receiver)
    }

    fn update_friend_request_status(
        &self,
        s: &Session,
        id: i64,
        status: LogStatus,
    ) -> Result<FriendRequestLog> {
        let updated = s.with_conn(|conn| {
            conn.execute(
                "UPDATE friend_request_logs SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'pending'",
                params![status, current_timestamp(), id],
            )
            .map_err(|e| GraphError::database(format!("update friend request {}", id), e))
        })?;
        ensure_transitioned(updated, "friend request", id)?;

        self.get_friend_request(s, id)?
            .ok_or_else(|| GraphError::NotFound(format!("friend request {}", id)))
    }

    fn friend_requests_from(&self, s: &Session, sender: &str) -> Result<Vec<FriendRequestLog>> {
        select_many(s, "sender = ?1", sender, "list friend requests from sender")
    }

    fn friend_requests_to(&self, s: &Session, receiver: &str) -> Result<Vec<FriendRequestLog>> {
        select_many(s, "receiver = ?1", receiver, "list friend requests to receiver")
    }

    fn delete_friend_request(&self, s: &Session, id: i64) -> Result<usize> {
        s.with_conn(|conn| {
            conn.execute("DELETE FROM friend_request_logs WHERE id = ?1", [id])
                .map_err(|e| GraphError::database(format!("delete friend request {}", id), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::db::test_support::{seed_user, setup_test_db};
    use crate::error::ErrorKind;

    fn pending<'a>(sender: &'a str, receiver: &'a str) -> NewFriendRequest<'a> {
        NewFriendRequest {
            sender,
            receiver,
            status: LogStatus::Pending,
        }
    }

    #[test]
    fn test_insert_and_find_pending() {
        let (_dir, db) = setup_test_db();
        let s = db.new_session(&Context::new()).unwrap();
        seed_user(&s, "alice");
        seed_user(&s, "bob");
        let store = SqliteStore::new();

        let log = store.insert_friend_request(&s, &pending("alice", "bob")).unwrap();
        assert_eq!(log.status, LogStatus::Pending);

        let found = store
            .find_pending_friend_request(&s, "alice", "bob")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, log.id);
        assert!(store
            .find_pending_friend_request(&s, "bob", "alice")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_status_update_only_from_pending() {
        let (_dir, db) = setup_test_db();
        let s = db.new_session(&Context::new()).unwrap();
        seed_user(&s, "alice");
        seed_user(&s, "bob");
        let store = SqliteStore::new();

        let log = store.insert_friend_request(&s, &pending("alice", "bob")).unwrap();
        let refused = store
            .update_friend_request_status(&s, log.id, LogStatus::Refused)
            .unwrap();
        assert_eq!(refused.status, LogStatus::Refused);

        let err = store
            .update_friend_request_status(&s, log.id, LogStatus::Agreed)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let still = store.get_friend_request(&s, log.id).unwrap().unwrap();
        assert_eq!(still.status, LogStatus::Refused);
    }

    #[test]
    fn test_lists_by_direction() {
        let (_dir, db) = setup_test_db();
        let s = db.new_session(&Context::new()).unwrap();
        for u in ["alice", "bob", "carol"] {
            seed_user(&s, u);
        }
        let store = SqliteStore::new();
        store.insert_friend_request(&s, &pending("alice", "bob")).unwrap();
        store.insert_friend_request(&s, &pending("alice", "carol")).unwrap();
        store.insert_friend_request(&s, &pending("carol", "bob")).unwrap();

        assert_eq!(store.friend_requests_from(&s, "alice").unwrap().len(), 2);
        assert_eq!(store.friend_requests_to(&s, "bob").unwrap().len(), 2);
        assert!(store.friend_requests_to(&s, "alice").unwrap().is_empty());
    }

    #[test]
    fn test_locking_read_inside_transaction() {
        let (_dir, db) = setup_test_db();
        let root = db.new_session(&Context::new()).unwrap();
        seed_user(&root, "alice");
        seed_user(&root, "bob");
        let store = SqliteStore::new();
        let log = store.insert_friend_request(&root, &pending("alice", "bob")).unwrap();

        assert!(store.get_friend_request_for_update(&root, log.id).is_err());

        root.with_transaction(|tx| {
            let locked = store.get_friend_request_for_update(tx, log.id)?;
            assert_eq!(locked.map(|l| l.id), Some(log.id));
            Ok(())
        })
        .unwrap();
    }
}
