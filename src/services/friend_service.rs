//! Friend service - the friend request reconciliation engine
//!
//! Two users may send each other requests independently. Whichever request
//! arrives second finds the first one pending, agrees it and forms the
//! friendship in the same transaction, so the pair always converges to exactly
//! one friendship.

use std::sync::Arc;

use tracing::info;

use crate::config::EmptyListPolicy;
use crate::context::Context;
use crate::db::models::{FriendRequestLog, Friendship, LogStatus, NewFriendRequest};
use crate::db::store::{FriendRequestStore, FriendshipStore, UserStore};
use crate::db::{Database, RelationshipStore};
use crate::error::{GraphError, Result};
use crate::session::Session;

use super::events::{EventBus, GraphEvent};
use super::{emit_after_commit, non_empty};

pub struct FriendService {
    db: Arc<Database>,
    store: Arc<dyn RelationshipStore>,
    events: Arc<EventBus>,
    policy: EmptyListPolicy,
}

impl FriendService {
    pub fn new(
        db: Arc<Database>,
        store: Arc<dyn RelationshipStore>,
        events: Arc<EventBus>,
        policy: EmptyListPolicy,
    ) -> Self {
        Self {
            db,
            store,
            events,
            policy,
        }
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Send a friend request. If the receiver already has a pending request to
    /// the sender, both are agreed and the friendship is formed immediately.
    pub fn create_friend_request(
        &self,
        ctx: &Context,
        sender: &str,
        receiver: &str,
    ) -> Result<FriendRequestLog> {
        if sender == receiver {
            return Err(GraphError::InvalidArgument(
                "cannot send a friend request to yourself".into(),
            ));
        }

        let session = self.db.new_session(ctx)?;
        let log = session.with_transaction(|tx| {
            if self.store.get_user(tx, receiver)?.is_none() {
                return Err(GraphError::NotFound(format!("user {}", receiver)));
            }
            if self.store.get_friendship(tx, sender, receiver)?.is_some() {
                return Err(GraphError::AlreadyExists(format!(
                    "{} is already a friend of {}",
                    receiver, sender
                )));
            }
            if self
                .store
                .find_pending_friend_request(tx, sender, receiver)?
                .is_some()
            {
                return Err(GraphError::AlreadyExists(format!(
                    "pending friend request from {} to {} already exists",
                    sender, receiver
                )));
            }

            let reverse = self
                .store
                .find_pending_friend_request_for_update(tx, receiver, sender)?;

            let status = match &reverse {
                Some(reverse) => {
                    let agreed =
                        self.store
                            .update_friend_request_status(tx, reverse.id, LogStatus::Agreed)?;
                    self.emit(tx, GraphEvent::FriendRequestAgreed {
                        id: agreed.id,
                        sender: agreed.sender.clone(),
                        receiver: agreed.receiver.clone(),
                    })?;
                    self.make_friends(tx, sender, receiver)?;
                    LogStatus::Agreed
                }
                None => LogStatus::Pending,
            };

            let log = self.store.insert_friend_request(
                tx,
                &NewFriendRequest {
                    sender,
                    receiver,
                    status,
                },
            )?;
            self.emit(tx, GraphEvent::FriendRequestCreated {
                id: log.id,
                sender: log.sender.clone(),
                receiver: log.receiver.clone(),
            })?;
            Ok(log)
        })?;

        info!(
            id = log.id,
            sender = %sender,
            receiver = %receiver,
            status = %log.status,
            "Friend request created"
        );
        Ok(log)
    }

    /// Agree a pending request. Only its receiver may agree it.
    pub fn agree_friend_request(
        &self,
        ctx: &Context,
        id: i64,
        approver: &str,
    ) -> Result<FriendRequestLog> {
        let session = self.db.new_session(ctx)?;
        let log = session.with_transaction(|tx| {
            let pending = self.lock_pending(tx, id, approver)?;
            let agreed = self
                .store
                .update_friend_request_status(tx, pending.id, LogStatus::Agreed)?;
            self.make_friends(tx, &agreed.sender, &agreed.receiver)?;
            self.emit(tx, GraphEvent::FriendRequestAgreed {
                id: agreed.id,
                sender: agreed.sender.clone(),
                receiver: agreed.receiver.clone(),
            })?;
            Ok(agreed)
        })?;

        info!(id, approver = %approver, "Friend request agreed");
        Ok(log)
    }

    /// Refuse a pending request. Only its receiver may refuse it.
    pub fn refuse_friend_request(
        &self,
        ctx: &Context,
        id: i64,
        approver: &str,
    ) -> Result<FriendRequestLog> {
        let session = self.db.new_session(ctx)?;
        let log = session.with_transaction(|tx| {
            let pending = self.lock_pending(tx, id, approver)?;
            let refused = self
                .store
                .update_friend_request_status(tx, pending.id, LogStatus::Refused)?;
            self.emit(tx, GraphEvent::FriendRequestRefused {
                id: refused.id,
                sender: refused.sender.clone(),
                receiver: refused.receiver.clone(),
            })?;
            Ok(refused)
        })?;

        info!(id, approver = %approver, "Friend request refused");
        Ok(log)
    }

    /// Remove the friendship in both directions
    pub fn remove_friend(&self, ctx: &Context, a: &str, b: &str) -> Result<()> {
        let session = self.db.new_session(ctx)?;
        session.with_transaction(|tx| {
            let removed = self.store.delete_friendship(tx, a, b)?
                + self.store.delete_friendship(tx, b, a)?;
            if removed == 0 {
                return Err(GraphError::NotFound(format!(
                    "{} and {} are not friends",
                    a, b
                )));
            }
            self.emit(tx, GraphEvent::FriendshipRemoved {
                a: a.to_string(),
                b: b.to_string(),
            })
        })?;

        info!(a = %a, b = %b, "Friendship removed");
        Ok(())
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get_friend_request(&self, ctx: &Context, id: i64) -> Result<FriendRequestLog> {
        let session = self.db.new_session(ctx)?;
        self.store
            .get_friend_request(&session, id)?
            .ok_or_else(|| GraphError::NotFound(format!("friend request {}", id)))
    }

    pub fn friend_requests_from(&self, ctx: &Context, subject: &str) -> Result<Vec<FriendRequestLog>> {
        let session = self.db.new_session(ctx)?;
        let logs = self.store.friend_requests_from(&session, subject)?;
        non_empty(logs, self.policy, || {
            format!("no friend requests from {}", subject)
        })
    }

    pub fn friend_requests_to(&self, ctx: &Context, subject: &str) -> Result<Vec<FriendRequestLog>> {
        let session = self.db.new_session(ctx)?;
        let logs = self.store.friend_requests_to(&session, subject)?;
        non_empty(logs, self.policy, || format!("no friend requests to {}", subject))
    }

    pub fn is_friend(&self, ctx: &Context, a: &str, b: &str) -> Result<bool> {
        let session = self.db.new_session(ctx)?;
        Ok(self.store.get_friendship(&session, a, b)?.is_some())
    }

    pub fn list_friends(&self, ctx: &Context, subject: &str) -> Result<Vec<Friendship>> {
        let session = self.db.new_session(ctx)?;
        let friends = self.store.list_friendships(&session, subject)?;
        non_empty(friends, self.policy, || format!("{} has no friends", subject))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Lock a request, requiring it to be pending and addressed to `approver`
    fn lock_pending(&self, tx: &Session, id: i64, approver: &str) -> Result<FriendRequestLog> {
        let log = self
            .store
            .get_friend_request_for_update(tx, id)?
            .ok_or_else(|| GraphError::NotFound(format!("friend request {}", id)))?;
        if !log.status.is_pending() {
            return Err(GraphError::InvalidArgument(format!(
                "friend request {} was already {}",
                id, log.status
            )));
        }
        if log.receiver != approver {
            return Err(GraphError::PermissionDenied(format!(
                "{} cannot resolve friend request {} addressed to {}",
                approver, id, log.receiver
            )));
        }
        Ok(log)
    }

    /// Insert both friendship edges
    fn make_friends(&self, tx: &Session, a: &str, b: &str) -> Result<()> {
        self.store.insert_friendship(tx, a, b)?;
        self.store.insert_friendship(tx, b, a)?;
        self.emit(tx, GraphEvent::FriendshipFormed {
            a: a.to_string(),
            b: b.to_string(),
        })
    }

    fn emit(&self, tx: &Session, event: GraphEvent) -> Result<()> {
        emit_after_commit(tx, &self.events, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_user, setup_test_db};
    use crate::db::SqliteStore;
    use crate::error::ErrorKind;

    fn service(policy: EmptyListPolicy) -> (tempfile::TempDir, FriendService) {
        let (dir, db) = setup_test_db();
        let session = db.new_session(&Context::new()).unwrap();
        for u in ["alice", "bob", "carol"] {
            seed_user(&session, u);
        }
        let svc = FriendService::new(
            Arc::new(db),
            Arc::new(SqliteStore::new()),
            Arc::new(EventBus::new()),
            policy,
        );
        (dir, svc)
    }

    #[test]
    fn test_self_request_rejected() {
        let (_dir, svc) = service(EmptyListPolicy::Empty);
        let ctx = Context::new();
        let err = svc.create_friend_request(&ctx, "alice", "alice").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(svc.friend_requests_from(&ctx, "alice").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_receiver_not_found() {
        let (_dir, svc) = service(EmptyListPolicy::NotFound);
        let err = svc
            .create_friend_request(&Context::new(), "alice", "ghost")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_opposite_requests_converge() {
        let (_dir, svc) = service(EmptyListPolicy::NotFound);
        let ctx = Context::new();

        let first = svc.create_friend_request(&ctx, "alice", "bob").unwrap();
        assert_eq!(first.status, LogStatus::Pending);
        assert!(!svc.is_friend(&ctx, "alice", "bob").unwrap());

        let second = svc.create_friend_request(&ctx, "bob", "alice").unwrap();
        assert_eq!(second.status, LogStatus::Agreed);
        assert_eq!(
            svc.get_friend_request(&ctx, first.id).unwrap().status,
            LogStatus::Agreed
        );
        assert!(svc.is_friend(&ctx, "alice", "bob").unwrap());
        assert!(svc.is_friend(&ctx, "bob", "alice").unwrap());

        let err = svc.create_friend_request(&ctx, "alice", "bob").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_duplicate_pending_rejected() {
        let (_dir, svc) = service(EmptyListPolicy::NotFound);
        let ctx = Context::new();
        svc.create_friend_request(&ctx, "alice", "bob").unwrap();
        let err = svc.create_friend_request(&ctx, "alice", "bob").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(svc.friend_requests_from(&ctx, "alice").unwrap().len(), 1);
    }

    #[test]
    fn test_agree_checks_order() {
        let (_dir, svc) = service(EmptyListPolicy::NotFound);
        let ctx = Context::new();

        let missing = svc.agree_friend_request(&ctx, 999, "bob").unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let log = svc.create_friend_request(&ctx, "alice", "bob").unwrap();
        let wrong = svc.agree_friend_request(&ctx, log.id, "carol").unwrap_err();
        assert_eq!(wrong.kind(), ErrorKind::PermissionDenied);

        let agreed = svc.agree_friend_request(&ctx, log.id, "bob").unwrap();
        assert_eq!(agreed.status, LogStatus::Agreed);

        let again = svc.agree_friend_request(&ctx, log.id, "bob").unwrap_err();
        assert_eq!(again.kind(), ErrorKind::InvalidArgument);
        assert_eq!(svc.list_friends(&ctx, "alice").unwrap().len(), 1);
    }

    #[test]
    fn test_refuse_leaves_no_edge() {
        let (_dir, svc) = service(EmptyListPolicy::Empty);
        let ctx = Context::new();
        let log = svc.create_friend_request(&ctx, "alice", "bob").unwrap();

        let refused = svc.refuse_friend_request(&ctx, log.id, "bob").unwrap();
        assert_eq!(refused.status, LogStatus::Refused);
        assert!(!svc.is_friend(&ctx, "alice", "bob").unwrap());
        assert!(svc.list_friends(&ctx, "bob").unwrap().is_empty());

        let err = svc.agree_friend_request(&ctx, log.id, "bob").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_remove_friend_both_directions() {
        let (_dir, svc) = service(EmptyListPolicy::NotFound);
        let ctx = Context::new();
        let log = svc.create_friend_request(&ctx, "alice", "bob").unwrap();
        svc.agree_friend_request(&ctx, log.id, "bob").unwrap();

        svc.remove_friend(&ctx, "bob", "alice").unwrap();
        assert!(!svc.is_friend(&ctx, "alice", "bob").unwrap());
        assert!(!svc.is_friend(&ctx, "bob", "alice").unwrap());

        let err = svc.remove_friend(&ctx, "alice", "bob").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_empty_lists_follow_policy() {
        let (_dir, svc) = service(EmptyListPolicy::NotFound);
        let ctx = Context::new();
        assert_eq!(
            svc.friend_requests_to(&ctx, "carol").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            svc.list_friends(&ctx, "carol").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_joins_caller_transaction() {
        let (_dir, svc) = service(EmptyListPolicy::NotFound);
        let ctx = Context::new();
        let root = svc.db.new_session(&ctx).unwrap();
        let tx = root.begin().unwrap();
        let joined = ctx.with_session(tx.clone());

        svc.create_friend_request(&joined, "alice", "bob").unwrap();
        svc.create_friend_request(&joined, "bob", "alice").unwrap();
        tx.rollback().unwrap();

        assert!(!svc.is_friend(&ctx, "alice", "bob").unwrap());
        assert_eq!(
            svc.friend_requests_from(&ctx, "alice").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
