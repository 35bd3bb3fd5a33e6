//! User service - registration and removal of graph subjects

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::context::Context;
use crate::db::models::User;
use crate::db::store::UserStore;
use crate::db::{Database, RelationshipStore};
use crate::error::{GraphError, Result};

use super::emit_after_commit;
use super::events::{EventBus, GraphEvent};

pub struct UserService {
    db: Arc<Database>,
    store: Arc<dyn RelationshipStore>,
    events: Arc<EventBus>,
}

impl UserService {
    pub fn new(db: Arc<Database>, store: Arc<dyn RelationshipStore>, events: Arc<EventBus>) -> Self {
        Self { db, store, events }
    }

    /// Register a user under a freshly generated subject
    pub fn register_user(&self, ctx: &Context, nickname: &str) -> Result<User> {
        let subject = Uuid::new_v4().to_string();
        self.register_user_with_subject(ctx, &subject, nickname)
    }

    /// Register a user under a subject issued by an external identity provider
    pub fn register_user_with_subject(
        &self,
        ctx: &Context,
        subject: &str,
        nickname: &str,
    ) -> Result<User> {
        if subject.trim().is_empty() {
            return Err(GraphError::InvalidArgument("subject must not be empty".into()));
        }
        if nickname.trim().is_empty() {
            return Err(GraphError::InvalidArgument("nickname must not be empty".into()));
        }

        let session = self.db.new_session(ctx)?;
        let user = session.with_transaction(|tx| {
            let user = self.store.insert_user(tx, subject, nickname)?;
            emit_after_commit(
                tx,
                &self.events,
                GraphEvent::UserRegistered {
                    subject: user.subject.clone(),
                },
            )?;
            Ok(user)
        })?;

        info!(subject = %user.subject, nickname = %user.nickname, "User registered");
        Ok(user)
    }

    pub fn get_user(&self, ctx: &Context, subject: &str) -> Result<User> {
        let session = self.db.new_session(ctx)?;
        self.store
            .get_user(&session, subject)?
            .ok_or_else(|| GraphError::NotFound(format!("user {}", subject)))
    }

    /// Delete a user; friendships, logs, memberships and records cascade
    pub fn delete_user(&self, ctx: &Context, subject: &str) -> Result<()> {
        let session = self.db.new_session(ctx)?;
        session.with_transaction(|tx| {
            if self.store.delete_user(tx, subject)? == 0 {
                return Err(GraphError::NotFound(format!("user {}", subject)));
            }
            emit_after_commit(
                tx,
                &self.events,
                GraphEvent::UserDeleted {
                    subject: subject.to_string(),
                },
            )
        })?;

        info!(subject = %subject, "User deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_db;
    use crate::db::SqliteStore;
    use crate::error::ErrorKind;

    fn service() -> (tempfile::TempDir, UserService) {
        let (dir, db) = setup_test_db();
        let svc = UserService::new(
            Arc::new(db),
            Arc::new(SqliteStore::new()),
            Arc::new(EventBus::new()),
        );
        (dir, svc)
    }

    #[test]
    fn test_register_generates_uuid_subject() {
        let (_dir, svc) = service();
        let ctx = Context::new();
        let user = svc.register_user(&ctx, "Alice").unwrap();

        assert!(Uuid::parse_str(&user.subject).is_ok());
        assert_eq!(svc.get_user(&ctx, &user.subject).unwrap(), user);
    }

    #[test]
    fn test_register_validation() {
        let (_dir, svc) = service();
        let ctx = Context::new();
        let err = svc.register_user(&ctx, "  ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        svc.register_user_with_subject(&ctx, "alice", "Alice").unwrap();
        let err = svc
            .register_user_with_subject(&ctx, "alice", "Alice again")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_delete_user() {
        let (_dir, svc) = service();
        let ctx = Context::new();
        svc.register_user_with_subject(&ctx, "alice", "Alice").unwrap();

        svc.delete_user(&ctx, "alice").unwrap();
        assert_eq!(svc.get_user(&ctx, "alice").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(svc.delete_user(&ctx, "alice").unwrap_err().kind(), ErrorKind::NotFound);
    }
}
