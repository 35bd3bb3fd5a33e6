//! Membership service - the group invitation/request reconciliation engine
//!
//! A user can join a group by accepting an invitation or by having a join
//! request approved. When an invitation and a join request for the same
//! (group, user) meet, the later one agrees the earlier one and inserts the
//! membership in the same transaction.

use std::sync::Arc;

use tracing::info;

use crate::config::EmptyListPolicy;
use crate::context::Context;
use crate::db::models::{
    GroupInvitationLog, GroupRequestLog, LogStatus, NewGroupInvitation, NewGroupRequest,
};
use crate::db::store::{
    GroupInvitationStore, GroupMemberStore, GroupRequestStore, GroupStore, UserStore,
};
use crate::db::{Database, RelationshipStore};
use crate::error::{GraphError, Result};
use crate::session::Session;

use super::events::{EventBus, GraphEvent};
use super::{emit_after_commit, non_empty};

pub struct MembershipService {
    db: Arc<Database>,
    store: Arc<dyn RelationshipStore>,
    events: Arc<EventBus>,
    policy: EmptyListPolicy,
}

impl MembershipService {
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
    // Invitations
    // =========================================================================

    /// Invite `receiver` into a group. A pending join request from the
    /// receiver is agreed on the spot, with `sender` recorded as approver.
    pub fn create_group_invitation(
        &self,
        ctx: &Context,
        sender: &str,
        receiver: &str,
        group_id: i64,
    ) -> Result<GroupInvitationLog> {
        if sender == receiver {
            return Err(GraphError::InvalidArgument(
                "cannot invite yourself into a group".into(),
            ));
        }

        let session = self.db.new_session(ctx)?;
        let log = session.with_transaction(|tx| {
            if self.store.get_user(tx, receiver)?.is_none() {
                return Err(GraphError::NotFound(format!("user {}", receiver)));
            }
            self.require_group(tx, group_id)?;
            if self.store.get_member(tx, group_id, receiver)?.is_some() {
                return Err(GraphError::AlreadyExists(format!(
                    "{} is already a member of group {}",
                    receiver, group_id
                )));
            }
            if let Some(existing) = self
                .store
                .find_pending_group_invitation(tx, group_id, receiver)?
            {
                return Err(GraphError::AlreadyExists(format!(
                    "pending invitation from {} for {} to group {} already exists",
                    existing.sender, receiver, group_id
                )));
            }

            let request = self
                .store
                .find_pending_group_request_for_update(tx, group_id, receiver)?;

            let status = match request {
                Some(request) => {
                    let agreed = self.store.update_group_request_status(
                        tx,
                        request.id,
                        LogStatus::Agreed,
                        sender,
                    )?;
                    self.emit(tx, GraphEvent::GroupRequestResolved {
                        id: agreed.id,
                        group_id,
                        sender: agreed.sender.clone(),
                        approver: sender.to_string(),
                        agreed: true,
                    })?;
                    self.join(tx, group_id, receiver)?;
                    LogStatus::Agreed
                }
                None => LogStatus::Pending,
            };

            let log = self.store.insert_group_invitation(
                tx,
                &NewGroupInvitation {
                    group_id,
                    sender,
                    receiver,
                    status,
                },
            )?;
            self.emit(tx, GraphEvent::GroupInvitationCreated {
                id: log.id,
                group_id,
                sender: log.sender.clone(),
                receiver: log.receiver.clone(),
            })?;
            Ok(log)
        })?;

        info!(
            id = log.id,
            group_id,
            sender = %sender,
            receiver = %receiver,
            status = %log.status,
            "Group invitation created"
        );
        Ok(log)
    }

    pub fn agree_group_invitation(&self, ctx: &Context, id: i64) -> Result<GroupInvitationLog> {
        self.resolve_invitation(ctx, id, LogStatus::Agreed)
    }

    pub fn refuse_group_invitation(&self, ctx: &Context, id: i64) -> Result<GroupInvitationLog> {
        self.resolve_invitation(ctx, id, LogStatus::Refused)
    }

    fn resolve_invitation(
        &self,
        ctx: &Context,
        id: i64,
        status: LogStatus,
    ) -> Result<GroupInvitationLog> {
        let session = self.db.new_session(ctx)?;
        let log = session.with_transaction(|tx| {
            let pending = self
                .store
                .get_group_invitation_for_update(tx, id)?
                .ok_or_else(|| GraphError::NotFound(format!("group invitation {}", id)))?;
            if !pending.status.is_pending() {
                return Err(GraphError::InvalidArgument(format!(
                    "group invitation {} was already {}",
                    id, pending.status
                )));
            }

            let log = self.store.update_group_invitation_status(tx, id, status)?;
            if status == LogStatus::Agreed {
                self.join(tx, log.group_id, &log.receiver)?;
            }
            self.emit(tx, GraphEvent::GroupInvitationResolved {
                id,
                group_id: log.group_id,
                receiver: log.receiver.clone(),
                agreed: status == LogStatus::Agreed,
            })?;
            Ok(log)
        })?;

        info!(id, group_id = log.group_id, status = %status, "Group invitation resolved");
        Ok(log)
    }

    // =========================================================================
    // Join requests
    // =========================================================================

    /// Ask to join a public group. A pending invitation for the sender is
    /// agreed on the spot.
    pub fn create_group_request(
        &self,
        ctx: &Context,
        sender: &str,
        group_id: i64,
    ) -> Result<GroupRequestLog> {
        let session = self.db.new_session(ctx)?;
        let log = session.with_transaction(|tx| {
            let group = self.require_group(tx, group_id)?;
            if !group.is_public {
                return Err(GraphError::PermissionDenied(format!(
                    "group {} is not public",
                    group_id
                )));
            }
            if self.store.get_member(tx, group_id, sender)?.is_some() {
                return Err(GraphError::AlreadyExists(format!(
                    "{} is already a member of group {}",
                    sender, group_id
                )));
            }
            if self
                .store
                .find_pending_group_request(tx, group_id, sender)?
                .is_some()
            {
                return Err(GraphError::AlreadyExists(format!(
                    "pending request from {} to join group {} already exists",
                    sender, group_id
                )));
            }

            let invitation = self
                .store
                .find_pending_group_invitation_for_update(tx, group_id, sender)?;

            let (status, approver) = match invitation {
                Some(invitation) => {
                    self.store
                        .update_group_invitation_status(tx, invitation.id, LogStatus::Agreed)?;
                    self.emit(tx, GraphEvent::GroupInvitationResolved {
                        id: invitation.id,
                        group_id,
                        receiver: sender.to_string(),
                        agreed: true,
                    })?;
                    self.join(tx, group_id, sender)?;
                    (LogStatus::Agreed, Some(invitation.sender))
                }
                None => (LogStatus::Pending, None),
            };

            let log = self.store.insert_group_request(
                tx,
                &NewGroupRequest {
                    group_id,
                    sender,
                    approver: approver.as_deref(),
                    status,
                },
            )?;
            self.emit(tx, GraphEvent::GroupRequestCreated {
                id: log.id,
                group_id,
                sender: log.sender.clone(),
            })?;
            Ok(log)
        })?;

        info!(
            id = log.id,
            group_id,
            sender = %sender,
            status = %log.status,
            "Group request created"
        );
        Ok(log)
    }

    /// Approve a join request. Whether `approver` is allowed to is the
    /// caller's decision.
    pub fn agree_group_request(
        &self,
        ctx: &Context,
        id: i64,
        approver: &str,
    ) -> Result<GroupRequestLog> {
        self.resolve_request(ctx, id, approver, LogStatus::Agreed)
    }

    pub fn refuse_group_request(
        &self,
        ctx: &Context,
        id: i64,
        approver: &str,
    ) -> Result<GroupRequestLog> {
        self.resolve_request(ctx, id, approver, LogStatus::Refused)
    }

    fn resolve_request(
        &self,
        ctx: &Context,
        id: i64,
        approver: &str,
        status: LogStatus,
    ) -> Result<GroupRequestLog> {
        let session = self.db.new_session(ctx)?;
        let log = session.with_transaction(|tx| {
            let pending = self
                .store
                .get_group_request_for_update(tx, id)?
                .ok_or_else(|| GraphError::NotFound(format!("group request {}", id)))?;
            if !pending.status.is_pending() {
                return Err(GraphError::InvalidArgument(format!(
                    "group request {} was already {}",
                    id, pending.status
                )));
            }

            let log = self
                .store
                .update_group_request_status(tx, id, status, approver)?;
            if status == LogStatus::Agreed {
                self.join(tx, log.group_id, &log.sender)?;
            }
            self.emit(tx, GraphEvent::GroupRequestResolved {
                id,
                group_id: log.group_id,
                sender: log.sender.clone(),
                approver: approver.to_string(),
                agreed: status == LogStatus::Agreed,
            })?;
            Ok(log)
        })?;

        info!(id, group_id = log.group_id, approver = %approver, status = %status, "Group request resolved");
        Ok(log)
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get_group_invitation(&self, ctx: &Context, id: i64) -> Result<GroupInvitationLog> {
        let session = self.db.new_session(ctx)?;
        self.store
            .get_group_invitation(&session, id)?
            .ok_or_else(|| GraphError::NotFound(format!("group invitation {}", id)))
    }

    pub fn group_invitations_from(
        &self,
        ctx: &Context,
        sender: &str,
    ) -> Result<Vec<GroupInvitationLog>> {
        let session = self.db.new_session(ctx)?;
        let logs = self.store.group_invitations_from(&session, sender)?;
        non_empty(logs, self.policy, || format!("no invitations from {}", sender))
    }

    pub fn group_invitations_to(
        &self,
        ctx: &Context,
        receiver: &str,
    ) -> Result<Vec<GroupInvitationLog>> {
        let session = self.db.new_session(ctx)?;
        let logs = self.store.group_invitations_to(&session, receiver)?;
        non_empty(logs, self.policy, || format!("no invitations to {}", receiver))
    }

    pub fn get_group_request(&self, ctx: &Context, id: i64) -> Result<GroupRequestLog> {
        let session = self.db.new_session(ctx)?;
        self.store
            .get_group_request(&session, id)?
            .ok_or_else(|| GraphError::NotFound(format!("group request {}", id)))
    }

    pub fn group_requests_from(&self, ctx: &Context, sender: &str) -> Result<Vec<GroupRequestLog>> {
        let session = self.db.new_session(ctx)?;
        let logs = self.store.group_requests_from(&session, sender)?;
        non_empty(logs, self.policy, || format!("no group requests from {}", sender))
    }

    pub fn group_requests_to(&self, ctx: &Context, group_id: i64) -> Result<Vec<GroupRequestLog>> {
        let session = self.db.new_session(ctx)?;
        let logs = self.store.group_requests_to(&session, group_id)?;
        non_empty(logs, self.policy, || {
            format!("no requests to join group {}", group_id)
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn require_group(&self, tx: &Session, group_id: i64) -> Result<crate::db::models::Group> {
        self.store
            .get_group(tx, group_id)?
            .ok_or_else(|| GraphError::NotFound(format!("group {}", group_id)))
    }

    fn join(&self, tx: &Session, group_id: i64, subject: &str) -> Result<()> {
        self.store.insert_member(tx, group_id, subject, false)?;
        self.emit(tx, GraphEvent::MemberJoined {
            group_id,
            subject: subject.to_string(),
        })
    }

    fn emit(&self, tx: &Session, event: GraphEvent) -> Result<()> {
        emit_after_commit(tx, &self.events, event)
    }
}
