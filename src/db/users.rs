//! User rows

use rusqlite::{params, OptionalExtension};

use super::models::{current_timestamp, User, USER_COLUMNS};
use super::store::{require_write_lock, SqliteStore, UserStore};
use crate::error::{GraphError, Result};
use crate::session::Session;

impl UserStore for SqliteStore {
    fn insert_user(&self, s: &Session, subject: &str, nickname: &str) -> Result<User> {
        let user = User {
            subject: subject.to_string(),
            nickname: nickname.to_string(),
            created_at: current_timestamp(),
        };
        s.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (subject, nickname, created_at) VALUES (?1, ?2, ?3)",
                params![user.subject, user.nickname, user.created_at],
            )
            .map_err(|e| GraphError::database(format!("insert user {}", subject), e))
        })?;
        Ok(user)
    }

    fn get_user(&self, s: &Session, subject: &str) -> Result<Option<User>> {
        s.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users WHERE subject = ?1", USER_COLUMNS);
            conn.query_row(&sql, [subject], User::from_row)
                .optional()
                .map_err(|e| GraphError::database(format!("get user {}", subject), e))
        })
    }

    fn get_user_for_update(&self, s: &Session, subject: &str) -> Result<Option<User>> {
        require_write_lock(s, "get_user_for_update")?;
        self.get_user(s, subject)
    }

    fn delete_user(&self, s: &Session, subject: &str) -> Result<usize> {
        s.with_conn(|conn| {
            conn.execute("DELETE FROM users WHERE subject = ?1", [subject])
                .map_err(|e| GraphError::database(format!("delete user {}", subject), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::db::test_support::setup_test_db;
    use crate::error::ErrorKind;

    #[test]
    fn test_insert_and_get_user() {
        let (_dir, db) = setup_test_db();
        let s = db.new_session(&Context::new()).unwrap();
        let store = SqliteStore::new();

        let user = store.insert_user(&s, "alice", "Alice").unwrap();
        let fetched = store.get_user(&s, "alice").unwrap().unwrap();
        assert_eq!(fetched, user);
        assert!(store.get_user(&s, "nobody").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_subject_already_exists() {
        let (_dir, db) = setup_test_db();
        let s = db.new_session(&Context::new()).unwrap();
        let store = SqliteStore::new();

        store.insert_user(&s, "alice", "Alice").unwrap();
        let err = store.insert_user(&s, "alice", "Other").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_for_update_outside_transaction_fails() {
        let (_dir, db) = setup_test_db();
        let s = db.new_session(&Context::new()).unwrap();
        let err = SqliteStore::new().get_user_for_update(&s, "alice").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_delete_user() {
        let (_dir, db) = setup_test_db();
        let s = db.new_session(&Context::new()).unwrap();
        let store = SqliteStore::new();

        store.insert_user(&s, "alice", "Alice").unwrap();
        assert_eq!(store.delete_user(&s, "alice").unwrap(), 1);
        assert_eq!(store.delete_user(&s, "alice").unwrap(), 0);
    }
}
