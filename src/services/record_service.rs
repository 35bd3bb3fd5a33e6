//! Record service - message persistence gated by the social graph
//!
//! A private message is stored only between mutual friends, a group message
//! only from a member. Anything else looks like a missing relationship.
//! Broadcasts reach every user and only need a registered sender.

use std::sync::Arc;

use tracing::info;

use crate::config::EmptyListPolicy;
use crate::context::Context;
use crate::db::models::{BroadcastRecord, GroupRecord, PrivateRecord};
use crate::db::store::{FriendshipStore, GroupMemberStore, RecordStore, UserStore};
use crate::db::{Database, RelationshipStore};
use crate::error::{GraphError, Result};

use super::events::{EventBus, GraphEvent};
use super::{emit_after_commit, non_empty};

pub struct RecordService {
    db: Arc<Database>,
    store: Arc<dyn RelationshipStore>,
    events: Arc<EventBus>,
    policy: EmptyListPolicy,
}

impl RecordService {
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

    pub fn send_private(
        &self,
        ctx: &Context,
        sender: &str,
        receiver: &str,
        content: &str,
    ) -> Result<PrivateRecord> {
        validate_content(content)?;

        let session = self.db.new_session(ctx)?;
        let record = session.with_transaction(|tx| {
            if self.store.get_user(tx, receiver)?.is_none() {
                return Err(GraphError::NotFound(format!("user {}", receiver)));
            }
            let mutual = self.store.get_friendship(tx, sender, receiver)?.is_some()
                && self.store.get_friendship(tx, receiver, sender)?.is_some();
            if !mutual {
                return Err(GraphError::NotFound(format!(
                    "{} and {} are not friends",
                    sender, receiver
                )));
            }

            let record = self
                .store
                .insert_private_record(tx, sender, receiver, content)?;
            emit_after_commit(
                tx,
                &self.events,
                GraphEvent::PrivateMessageStored {
                    id: record.id,
                    sender: record.sender.clone(),
                    receiver: record.receiver.clone(),
                },
            )?;
            Ok(record)
        })?;

        info!(id = record.id, sender = %sender, receiver = %receiver, "Private message stored");
        Ok(record)
    }

    pub fn send_group(
        &self,
        ctx: &Context,
        sender: &str,
        group_id: i64,
        content: &str,
    ) -> Result<GroupRecord> {
        validate_content(content)?;

        let session = self.db.new_session(ctx)?;
        let record = session.with_transaction(|tx| {
            if self.store.get_member(tx, group_id, sender)?.is_none() {
                return Err(GraphError::NotFound(format!(
                    "{} is not a member of group {}",
                    sender, group_id
                )));
            }

            let record = self.store.insert_group_record(tx, group_id, sender, content)?;
            emit_after_commit(
                tx,
                &self.events,
                GraphEvent::GroupMessageStored {
                    id: record.id,
                    group_id,
                    sender: record.sender.clone(),
                },
            )?;
            Ok(record)
        })?;

        info!(id = record.id, group_id, sender = %sender, "Group message stored");
        Ok(record)
    }

    pub fn send_broadcast(
        &self,
        ctx: &Context,
        sender: &str,
        content: &str,
    ) -> Result<BroadcastRecord> {
        validate_content(content)?;

        let session = self.db.new_session(ctx)?;
        let record = session.with_transaction(|tx| {
            if self.store.get_user(tx, sender)?.is_none() {
                return Err(GraphError::NotFound(format!("user {}", sender)));
            }

            let record = self.store.insert_broadcast_record(tx, sender, content)?;
            emit_after_commit(
                tx,
                &self.events,
                GraphEvent::BroadcastMessageStored {
                    id: record.id,
                    sender: record.sender.clone(),
                },
            )?;
            Ok(record)
        })?;

        info!(id = record.id, sender = %sender, "Broadcast stored");
        Ok(record)
    }

    /// Broadcasts oldest first, optionally only those of one sender
    pub fn broadcast_records(
        &self,
        ctx: &Context,
        sender: Option<&str>,
    ) -> Result<Vec<BroadcastRecord>> {
        let session = self.db.new_session(ctx)?;
        let records = self.store.list_broadcast_records(&session, sender)?;
        non_empty(records, self.policy, || match sender {
            Some(sender) => format!("no broadcasts from {}", sender),
            None => "no broadcasts".to_string(),
        })
    }

    /// Conversation between `a` and `b` in both directions, oldest first
    pub fn private_records(&self, ctx: &Context, a: &str, b: &str) -> Result<Vec<PrivateRecord>> {
        let session = self.db.new_session(ctx)?;
        let records = self.store.private_records_between(&session, a, b)?;
        non_empty(records, self.policy, || {
            format!("no messages between {} and {}", a, b)
        })
    }

    pub fn group_records(&self, ctx: &Context, group_id: i64) -> Result<Vec<GroupRecord>> {
        let session = self.db.new_session(ctx)?;
        let records = self.store.group_records(&session, group_id)?;
        non_empty(records, self.policy, || {
            format!("no messages in group {}", group_id)
        })
    }
}

fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(GraphError::InvalidArgument("message content must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_user, setup_test_db};
    use crate::db::SqliteStore;
    use crate::error::ErrorKind;

    fn service() -> (tempfile::TempDir, RecordService) {
        let (dir, db) = setup_test_db();
        let s = db.new_session(&Context::new()).unwrap();
        for u in ["alice", "bob", "carol"] {
            seed_user(&s, u);
        }
        let store = SqliteStore::new();
        store.insert_friendship(&s, "alice", "bob").unwrap();
        store.insert_friendship(&s, "bob", "alice").unwrap();
        // carol follows alice one way only
        store.insert_friendship(&s, "carol", "alice").unwrap();

        let svc = RecordService::new(
            Arc::new(db),
            Arc::new(store),
            Arc::new(EventBus::new()),
            EmptyListPolicy::NotFound,
        );
        (dir, svc)
    }

    #[test]
    fn test_private_message_requires_mutual_friendship() {
        let (_dir, svc) = service();
        let ctx = Context::new();

        svc.send_private(&ctx, "alice", "bob", "hello").unwrap();
        svc.send_private(&ctx, "bob", "alice", "hi back").unwrap();
        assert_eq!(svc.private_records(&ctx, "alice", "bob").unwrap().len(), 2);

        let err = svc.send_private(&ctx, "carol", "alice", "psst").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = svc.send_private(&ctx, "alice", "ghost", "boo").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            svc.private_records(&ctx, "alice", "carol").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_empty_content_rejected() {
        let (_dir, svc) = service();
        let err = svc
            .send_private(&Context::new(), "alice", "bob", "   ")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_group_message_requires_membership() {
        let (_dir, svc) = service();
        let ctx = Context::new();
        let err = svc.send_group(&ctx, "alice", 1, "anyone?").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(svc.group_records(&ctx, 1).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_broadcast_needs_registered_sender() {
        let (_dir, svc) = service();
        let ctx = Context::new();
        let mut rx = svc.events.subscribe();

        let record = svc.send_broadcast(&ctx, "carol", "server restart at 5").unwrap();
        svc.send_broadcast(&ctx, "alice", "thanks").unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            GraphEvent::BroadcastMessageStored {
                id: record.id,
                sender: "carol".into(),
            }
        );

        let err = svc.send_broadcast(&ctx, "ghost", "boo").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = svc.send_broadcast(&ctx, "alice", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        assert_eq!(svc.broadcast_records(&ctx, None).unwrap().len(), 2);
        let from_carol = svc.broadcast_records(&ctx, Some("carol")).unwrap();
        assert_eq!(from_carol.len(), 1);
        assert_eq!(from_carol[0].content, "server restart at 5");
        assert_eq!(
            svc.broadcast_records(&ctx, Some("bob")).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
