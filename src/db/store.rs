//! Relationship store capability traits
//!
//! Each table gets a small trait; [`RelationshipStore`] bundles them so the
//! services can hold one `Arc<dyn RelationshipStore>`. Every method runs on the
//! caller's [`Session`], so a service decides the transaction boundaries.
//!
//! `*_for_update` reads lock the row for the rest of the transaction. On SQLite
//! the lock is the database write lock taken by `BEGIN IMMEDIATE`, so these
//! variants refuse to run outside a transaction.

use crate::db::models::*;
use crate::error::{GraphError, Result};
use crate::session::Session;

pub trait UserStore {
    fn insert_user(&self, s: &Session, subject: &str, nickname: &str) -> Result<User>;
    fn get_user(&self, s: &Session, subject: &str) -> Result<Option<User>>;
    fn get_user_for_update(&self, s: &Session, subject: &str) -> Result<Option<User>>;
    fn delete_user(&self, s: &Session, subject: &str) -> Result<usize>;
}

pub trait FriendshipStore {
    /// Insert one direction of a friendship
    fn insert_friendship(&self, s: &Session, user: &str, friend: &str) -> Result<Friendship>;
    fn get_friendship(&self, s: &Session, user: &str, friend: &str) -> Result<Option<Friendship>>;
    fn get_friendship_for_update(
        &self,
        s: &Session,
        user: &str,
        friend: &str,
    ) -> Result<Option<Friendship>>;
    fn list_friendships(&self, s: &Session, user: &str) -> Result<Vec<Friendship>>;
    fn delete_friendship(&self, s: &Session, user: &str, friend: &str) -> Result<usize>;
}

pub trait FriendRequestStore {
    fn insert_friend_request(&self, s: &Session, new: &NewFriendRequest<'_>)
        -> Result<FriendRequestLog>;
    fn get_friend_request(&self, s: &Session, id: i64) -> Result<Option<FriendRequestLog>>;
    fn get_friend_request_for_update(&self, s: &Session, id: i64)
        -> Result<Option<FriendRequestLog>>;
    fn find_pending_friend_request(
        &self,
        s: &Session,
        sender: &str,
        receiver: &str,
    ) -> Result<Option<FriendRequestLog>>;
    fn find_pending_friend_request_for_update(
        &self,
        s: &Session,
        sender: &str,
        receiver: &str,
    ) -> Result<Option<FriendRequestLog>>;
    /// Move a pending log to `status`. Fails with `InvalidArgument` if the log
    /// is not pending.
    fn update_friend_request_status(
        &self,
        s: &Session,
        id: i64,
        status: LogStatus,
    ) -> Result<FriendRequestLog>;
    fn friend_requests_from(&self, s: &Session, sender: &str) -> Result<Vec<FriendRequestLog>>;
    fn friend_requests_to(&self, s: &Session, receiver: &str) -> Result<Vec<FriendRequestLog>>;
    fn delete_friend_request(&self, s: &Session, id: i64) -> Result<usize>;
}

pub trait GroupStore {
    fn insert_group(&self, s: &Session, new: &NewGroup<'_>) -> Result<Group>;
    fn get_group(&self, s: &Session, id: i64) -> Result<Option<Group>>;
    fn get_group_for_update(&self, s: &Session, id: i64) -> Result<Option<Group>>;
    fn list_groups_created_by(&self, s: &Session, subject: &str) -> Result<Vec<Group>>;
    fn update_group_visibility(&self, s: &Session, id: i64, is_public: bool) -> Result<usize>;
    fn delete_group(&self, s: &Session, id: i64) -> Result<usize>;
}

pub trait GroupMemberStore {
    fn insert_member(
        &self,
        s: &Session,
        group_id: i64,
        subject: &str,
        is_admin: bool,
    ) -> Result<GroupMember>;
    fn get_member(&self, s: &Session, group_id: i64, subject: &str) -> Result<Option<GroupMember>>;
    fn get_member_for_update(
        &self,
        s: &Session,
        group_id: i64,
        subject: &str,
    ) -> Result<Option<GroupMember>>;
    fn list_members(&self, s: &Session, group_id: i64) -> Result<Vec<GroupMember>>;
    fn list_admins(&self, s: &Session, group_id: i64) -> Result<Vec<GroupMember>>;
    /// Groups the subject belongs to, in join order
    fn groups_of_member(&self, s: &Session, subject: &str) -> Result<Vec<Group>>;
    fn set_admin(&self, s: &Session, group_id: i64, subject: &str, is_admin: bool) -> Result<usize>;
    fn delete_member(&self, s: &Session, group_id: i64, subject: &str) -> Result<usize>;
}

pub trait GroupInvitationStore {
    fn insert_group_invitation(
        &self,
        s: &Session,
        new: &NewGroupInvitation<'_>,
    ) -> Result<GroupInvitationLog>;
    fn get_group_invitation(&self, s: &Session, id: i64) -> Result<Option<GroupInvitationLog>>;
    fn get_group_invitation_for_update(
        &self,
        s: &Session,
        id: i64,
    ) -> Result<Option<GroupInvitationLog>>;
    fn find_pending_group_invitation(
        &self,
        s: &Session,
        group_id: i64,
        receiver: &str,
    ) -> Result<Option<GroupInvitationLog>>;
    fn find_pending_group_invitation_for_update(
        &self,
        s: &Session,
        group_id: i64,
        receiver: &str,
    ) -> Result<Option<GroupInvitationLog>>;
    fn update_group_invitation_status(
        &self,
        s: &Session,
        id: i64,
        status: LogStatus,
    ) -> Result<GroupInvitationLog>;
    fn group_invitations_from(&self, s: &Session, sender: &str) -> Result<Vec<GroupInvitationLog>>;
    fn group_invitations_to(&self, s: &Session, receiver: &str) -> Result<Vec<GroupInvitationLog>>;
    fn delete_group_invitation(&self, s: &Session, id: i64) -> Result<usize>;
}

pub trait GroupRequestStore {
    fn insert_group_request(&self, s: &Session, new: &NewGroupRequest<'_>)
        -> Result<GroupRequestLog>;
    fn get_group_request(&self, s: &Session, id: i64) -> Result<Option<GroupRequestLog>>;
    fn get_group_request_for_update(&self, s: &Session, id: i64)
        -> Result<Option<GroupRequestLog>>;
    fn find_pending_group_request(
        &self,
        s: &Session,
        group_id: i64,
        sender: &str,
    ) -> Result<Option<GroupRequestLog>>;
    fn find_pending_group_request_for_update(
        &self,
        s: &Session,
        group_id: i64,
        sender: &str,
    ) -> Result<Option<GroupRequestLog>>;
    /// Resolve a pending request, recording who approved or refused it
    fn update_group_request_status(
        &self,
        s: &Session,
        id: i64,
        status: LogStatus,
        approver: &str,
    ) -> Result<GroupRequestLog>;
    fn group_requests_from(&self, s: &Session, sender: &str) -> Result<Vec<GroupRequestLog>>;
    fn group_requests_to(&self, s: &Session, group_id: i64) -> Result<Vec<GroupRequestLog>>;
    fn delete_group_request(&self, s: &Session, id: i64) -> Result<usize>;
}

pub trait RecordStore {
    fn insert_private_record(
        &self,
        s: &Session,
        sender: &str,
        receiver: &str,
        content: &str,
    ) -> Result<PrivateRecord>;
    /// Messages in both directions between `a` and `b`, oldest first
    fn private_records_between(&self, s: &Session, a: &str, b: &str) -> Result<Vec<PrivateRecord>>;
    fn delete_private_record(&self, s: &Session, id: i64) -> Result<usize>;
    fn insert_group_record(
        &self,
        s: &Session,
        group_id: i64,
        sender: &str,
        content: &str,
    ) -> Result<GroupRecord>;
    fn group_records(&self, s: &Session, group_id: i64) -> Result<Vec<GroupRecord>>;
    fn delete_group_record(&self, s: &Session, id: i64) -> Result<usize>;
    fn insert_broadcast_record(&self, s: &Session, sender: &str, content: &str)
        -> Result<BroadcastRecord>;
    /// Every broadcast, or only those of `sender`, oldest first
    fn list_broadcast_records(&self, s: &Session, sender: Option<&str>)
        -> Result<Vec<BroadcastRecord>>;
    fn delete_broadcast_record(&self, s: &Session, id: i64) -> Result<usize>;
}

/// Everything the services need from persistence
pub trait RelationshipStore:
    UserStore
    + FriendshipStore
    + FriendRequestStore
    + GroupStore
    + GroupMemberStore
    + GroupInvitationStore
    + GroupRequestStore
    + RecordStore
    + Send
    + Sync
{
}

impl<T> RelationshipStore for T where
    T: UserStore
        + FriendshipStore
        + FriendRequestStore
        + GroupStore
        + GroupMemberStore
        + GroupInvitationStore
        + GroupRequestStore
        + RecordStore
        + Send
        + Sync
{
}

/// SQLite implementation of every store trait
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteStore;

impl SqliteStore {
    pub fn new() -> Self {
        Self
    }
}

/// Locking reads only make sense inside a transaction
pub(crate) fn require_write_lock(s: &Session, what: &str) -> Result<()> {
    if s.in_transaction()? {
        Ok(())
    } else {
        Err(GraphError::Internal(format!(
            "{} requires an open transaction",
            what
        )))
    }
}

/// Map a status update that touched no rows to the right error
pub(crate) fn ensure_transitioned(updated: usize, what: &str, id: i64) -> Result<()> {
    if updated == 0 {
        Err(GraphError::InvalidArgument(format!(
            "{} {} is not pending",
            what, id
        )))
    } else {
        Ok(())
    }
}
