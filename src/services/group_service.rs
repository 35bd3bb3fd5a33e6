//! Group service - group lifecycle and administration
//!
//! Admin operations are direct mutations. The caller decides whether the acting
//! user is allowed to perform them.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::config::EmptyListPolicy;
use crate::context::Context;
use crate::db::models::{Group, GroupMember, GroupType, LogStatus, NewGroup};
use crate::db::store::{
    GroupInvitationStore, GroupMemberStore, GroupRequestStore, GroupStore, UserStore,
};
use crate::db::{Database, RelationshipStore};
use crate::error::{GraphError, Result};
use crate::session::Session;

use super::events::{EventBus, GraphEvent};
use super::{emit_after_commit, non_empty};

/// Input for creating a group
#[derive(Debug, Clone, Deserialize)]
pub struct CreateGroupInput {
    pub name: String,
    #[serde(default)]
    pub group_type: GroupType,
    pub created_by: String,
}

pub struct GroupService {
    db: Arc<Database>,
    store: Arc<dyn RelationshipStore>,
    events: Arc<EventBus>,
    policy: EmptyListPolicy,
}

impl GroupService {
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

    /// Create a private group with its creator as the first admin
    pub fn create_group(&self, ctx: &Context, input: CreateGroupInput) -> Result<Group> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(GraphError::InvalidArgument("group name must not be empty".into()));
        }

        let session = self.db.new_session(ctx)?;
        let group = session.with_transaction(|tx| {
            if self.store.get_user(tx, &input.created_by)?.is_none() {
                return Err(GraphError::NotFound(format!("user {}", input.created_by)));
            }
            let group = self.store.insert_group(
                tx,
                &NewGroup {
                    name,
                    group_type: input.group_type,
                    is_public: false,
                    created_by: &input.created_by,
                },
            )?;
            self.store.insert_member(tx, group.id, &input.created_by, true)?;
            self.emit(tx, GraphEvent::GroupCreated {
                group_id: group.id,
                created_by: group.created_by.clone(),
            })?;
            Ok(group)
        })?;

        info!(
            group_id = group.id,
            name = %group.name,
            group_type = %group.group_type,
            created_by = %group.created_by,
            "Group created"
        );
        Ok(group)
    }

    pub fn delete_group(&self, ctx: &Context, group_id: i64) -> Result<()> {
        let session = self.db.new_session(ctx)?;
        session.with_transaction(|tx| {
            if self.store.delete_group(tx, group_id)? == 0 {
                return Err(GraphError::NotFound(format!("group {}", group_id)));
            }
            self.emit(tx, GraphEvent::GroupDeleted { group_id })
        })?;

        info!(group_id, "Group deleted");
        Ok(())
    }

    pub fn make_public(&self, ctx: &Context, group_id: i64) -> Result<()> {
        self.set_visibility(ctx, group_id, true)
    }

    pub fn make_private(&self, ctx: &Context, group_id: i64) -> Result<()> {
        self.set_visibility(ctx, group_id, false)
    }

    fn set_visibility(&self, ctx: &Context, group_id: i64, is_public: bool) -> Result<()> {
        let session = self.db.new_session(ctx)?;
        session.with_transaction(|tx| {
            if self.store.update_group_visibility(tx, group_id, is_public)? == 0 {
                return Err(GraphError::NotFound(format!("group {}", group_id)));
            }
            self.emit(tx, GraphEvent::GroupVisibilityChanged { group_id, is_public })
        })?;

        info!(group_id, is_public, "Group visibility changed");
        Ok(())
    }

    /// Add every subject as a plain member; all or nothing
    ///
    /// A pending invitation or join request for an assigned subject is agreed
    /// in the same transaction. The group's creator is recorded as the
    /// request's approver.
    pub fn assign_members(
        &self,
        ctx: &Context,
        group_id: i64,
        subjects: &[String],
    ) -> Result<Vec<GroupMember>> {
        let session = self.db.new_session(ctx)?;
        let members = session.with_transaction(|tx| {
            let group = self.require_group(tx, group_id)?;
            let mut members = Vec::with_capacity(subjects.len());
            for subject in subjects {
                members.push(self.store.insert_member(tx, group_id, subject, false)?);
                self.emit(tx, GraphEvent::MemberJoined {
                    group_id,
                    subject: subject.clone(),
                })?;
                self.settle_open_logs(tx, &group, subject)?;
            }
            Ok(members)
        })?;

        info!(group_id, count = members.len(), "Members assigned");
        Ok(members)
    }

    /// Remove every subject from the group; fails without changes if any is not a member
    pub fn remove_members(&self, ctx: &Context, group_id: i64, subjects: &[String]) -> Result<()> {
        let session = self.db.new_session(ctx)?;
        session.with_transaction(|tx| {
            self.require_group(tx, group_id)?;
            for subject in subjects {
                if self.store.delete_member(tx, group_id, subject)? == 0 {
                    return Err(GraphError::NotFound(format!(
                        "{} is not a member of group {}",
                        subject, group_id
                    )));
                }
                self.emit(tx, GraphEvent::MemberRemoved {
                    group_id,
                    subject: subject.clone(),
                })?;
            }
            Ok(())
        })?;

        info!(group_id, count = subjects.len(), "Members removed");
        Ok(())
    }

    pub fn assign_admins(&self, ctx: &Context, group_id: i64, subjects: &[String]) -> Result<()> {
        self.set_admins(ctx, group_id, subjects, true)
    }

    pub fn remove_admins(&self, ctx: &Context, group_id: i64, subjects: &[String]) -> Result<()> {
        self.set_admins(ctx, group_id, subjects, false)
    }

    fn set_admins(
        &self,
        ctx: &Context,
        group_id: i64,
        subjects: &[String],
        is_admin: bool,
    ) -> Result<()> {
        let session = self.db.new_session(ctx)?;
        session.with_transaction(|tx| {
            for subject in subjects {
                if self.store.set_admin(tx, group_id, subject, is_admin)? == 0 {
                    return Err(GraphError::NotFound(format!(
                        "{} is not a member of group {}",
                        subject, group_id
                    )));
                }
                self.emit(tx, GraphEvent::AdminChanged {
                    group_id,
                    subject: subject.clone(),
                    is_admin,
                })?;
            }
            Ok(())
        })?;

        info!(group_id, count = subjects.len(), is_admin, "Admins updated");
        Ok(())
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get_group(&self, ctx: &Context, group_id: i64) -> Result<Group> {
        let session = self.db.new_session(ctx)?;
        self.require_group(&session, group_id)
    }

    pub fn list_groups_created_by(&self, ctx: &Context, subject: &str) -> Result<Vec<Group>> {
        let session = self.db.new_session(ctx)?;
        let groups = self.store.list_groups_created_by(&session, subject)?;
        non_empty(groups, self.policy, || format!("no groups created by {}", subject))
    }

    pub fn list_members(&self, ctx: &Context, group_id: i64) -> Result<Vec<GroupMember>> {
        let session = self.db.new_session(ctx)?;
        let members = self.store.list_members(&session, group_id)?;
        non_empty(members, self.policy, || format!("group {} has no members", group_id))
    }

    pub fn list_admins(&self, ctx: &Context, group_id: i64) -> Result<Vec<GroupMember>> {
        let session = self.db.new_session(ctx)?;
        let admins = self.store.list_admins(&session, group_id)?;
        non_empty(admins, self.policy, || format!("group {} has no admins", group_id))
    }

    pub fn groups_of_user(&self, ctx: &Context, subject: &str) -> Result<Vec<Group>> {
        let session = self.db.new_session(ctx)?;
        let groups = self.store.groups_of_member(&session, subject)?;
        non_empty(groups, self.policy, || format!("{} is not in any group", subject))
    }

    pub fn is_member(&self, ctx: &Context, group_id: i64, subject: &str) -> Result<bool> {
        let session = self.db.new_session(ctx)?;
        Ok(self.store.get_member(&session, group_id, subject)?.is_some())
    }

    /// Agree whatever invitation or request was still waiting on `subject`
    fn settle_open_logs(&self, tx: &Session, group: &Group, subject: &str) -> Result<()> {
        if let Some(invitation) = self
            .store
            .find_pending_group_invitation_for_update(tx, group.id, subject)?
        {
            let agreed = self
                .store
                .update_group_invitation_status(tx, invitation.id, LogStatus::Agreed)?;
            self.emit(tx, GraphEvent::GroupInvitationResolved {
                id: agreed.id,
                group_id: group.id,
                receiver: agreed.receiver,
                agreed: true,
            })?;
        }

        if let Some(request) = self
            .store
            .find_pending_group_request_for_update(tx, group.id, subject)?
        {
            let agreed = self.store.update_group_request_status(
                tx,
                request.id,
                LogStatus::Agreed,
                &group.created_by,
            )?;
            self.emit(tx, GraphEvent::GroupRequestResolved {
                id: agreed.id,
                group_id: group.id,
                sender: agreed.sender,
                approver: group.created_by.clone(),
                agreed: true,
            })?;
        }
        Ok(())
    }

    fn require_group(&self, s: &Session, group_id: i64) -> Result<Group> {
        self.store
            .get_group(s, group_id)?
            .ok_or_else(|| GraphError::NotFound(format!("group {}", group_id)))
    }

    fn emit(&self, tx: &Session, event: GraphEvent) -> Result<()> {
        emit_after_commit(tx, &self.events, event)
    }
}
