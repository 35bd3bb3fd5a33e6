//! Group invitation logs
//!
//! An invitation is sent by a member to a user who is not yet in the group.

use rusqlite::{params, OptionalExtension};

use super::models::{
    current_timestamp, GroupInvitationLog, LogStatus, NewGroupInvitation, GROUP_INVITATION_COLUMNS,
};
use super::store::{ensure_transitioned, require_write_lock, GroupInvitationStore, SqliteStore};
use crate::error::{GraphError, Result};
use crate::session::Session;

fn select_one(
    s: &Session,
    filter: &str,
    params: impl rusqlite::Params,
    what: &str,
) -> Result<Option<GroupInvitationLog>> {
    s.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM group_invitation_logs WHERE {} ORDER BY id DESC LIMIT 1",
            GROUP_INVITATION_COLUMNS, filter
        );
        conn.query_row(&sql, params, GroupInvitationLog::from_row)
            .optional()
            .map_err(|e| GraphError::database(what.to_string(), e))
    })
}

fn select_many(
    s: &Session,
    filter: &str,
    subject: &str,
    what: &str,
) -> Result<Vec<GroupInvitationLog>> {
    s.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM group_invitation_logs WHERE {} ORDER BY id",
            GROUP_INVITATION_COLUMNS, filter
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| GraphError::database(what.to_string(), e))?;
        let rows = stmt
            .query_map([subject], GroupInvitationLog::from_row)
            .map_err(|e| GraphError::database(what.to_string(), e))?;
        let logs = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| GraphError::database(what.to_string(), e))?;
        Ok(logs)
    })
}

impl GroupInvitationStore for SqliteStore {
    fn insert_group_invitation(
        &self,
        s: &Session,
        new: &NewGroupInvitation<'_>,
    ) -> Result<GroupInvitationLog> {
        let now = current_timestamp();
        let id = s.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_invitation_logs (group_id, sender, receiver, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![new.group_id, new.sender, new.receiver, new.status, now],
            )
            .map_err(|e| {
                GraphError::database(
                    format!("insert invitation of {} to group {}", new.receiver, new.group_id),
                    e,
                )
            })?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(GroupInvitationLog {
            id,
            group_id: new.group_id,
            sender: new.sender.to_string(),
            receiver: new.receiver.to_string(),
            status: new.status,
            created_at: now,
            updated_at: now,
        })
    }

    fn get_group_invitation(&self, s: &Session, id: i64) -> Result<Option<GroupInvitationLog>> {
        select_one(s, "id = ?1", [id], &format!("get group invitation {}", id))
    }

    fn get_group_invitation_for_update(
        &self,
        s: &Session,
        id: i64,
    ) -> Result<Option<GroupInvitationLog>> {
        require_write_lock(s, "get_group_invitation_for_update")?;
        self.get_group_invitation(s, id)
    }

    fn find_pending_group_invitation(
        &self,
        s: &Session,
        group_id: i64,
        receiver: &str,
    ) -> Result<Option<GroupInvitationLog>> {
        select_one(
            s,
            "group_id = ?1 AND receiver = ?2 AND status = 'pending'",
            params![group_id, receiver],
            &format!("find pending invitation of {} to group {}", receiver, group_id),
        )
    }

    fn find_pending_group_invitation_for_update(
        &self,
        s: &Session,
        group_id: i64,
        receiver: &str,
    ) -> Result<Option<GroupInvitationLog>> {
        require_write_lock(s, "find_pending_group_invitation_for_update")?;
        self.find_pending_group_invitation(s, group_id, receiver)
    }

    fn update_group_invitation_status(
        &self,
        s: &Session,
        id: i64,
        status: LogStatus,
    ) -> Result<GroupInvitationLog> {
        let updated = s.with_conn(|conn| {
            conn.execute(
                "UPDATE group_invitation_logs SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'pending'",
                params![status, current_timestamp(), id],
            )
            .map_err(|e| GraphError::database(format!("update group invitation {}", id), e))
        })?;
        ensure_transitioned(updated, "group invitation", id)?;

        self.get_group_invitation(s, id)?
            .ok_or_else(|| GraphError::NotFound(format!("group invitation {}", id)))
    }

    fn group_invitations_from(&self, s: &Session, sender: &str) -> Result<Vec<GroupInvitationLog>> {
        select_many(s, "sender = ?1", sender, "list group invitations from sender")
    }

    fn group_invitations_to(&self, s: &Session, receiver: &str) -> Result<Vec<GroupInvitationLog>> {
        select_many(s, "receiver = ?1", receiver, "list group invitations to receiver")
    }

    fn delete_group_invitation(&self, s: &Session, id: i64) -> Result<usize> {
        s.with_conn(|conn| {
            conn.execute("DELETE FROM group_invitation_logs WHERE id = ?1", [id])
                .map_err(|e| GraphError::database(format!("delete group invitation {}", id), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::db::models::{GroupType, NewGroup};
    use crate::db::store::GroupStore;
    use crate::db::test_support::{seed_user, setup_test_db};
    use crate::error::ErrorKind;

    #[test]
    fn test_invitation_transitions() {
        let (_dir, db) = setup_test_db();
        let s = db.new_session(&Context::new()).unwrap();
        seed_user(&s, "alice");
        seed_user(&s, "bob");
        let store = SqliteStore::new();
        let group = store
            .insert_group(
                &s,
                &NewGroup {
                    name: "g",
                    group_type: GroupType::Default,
                    is_public: false,
                    created_by: "alice",
                },
            )
            .unwrap();

        let log = store
            .insert_group_invitation(
                &s,
                &NewGroupInvitation {
                    group_id: group.id,
                    sender: "alice",
                    receiver: "bob",
                    status: LogStatus::Pending,
                },
            )
            .unwrap();

        let found = store
            .find_pending_group_invitation(&s, group.id, "bob")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, log.id);
        assert_eq!(store.group_invitations_from(&s, "alice").unwrap().len(), 1);
        assert_eq!(store.group_invitations_to(&s, "bob").unwrap().len(), 1);

        store
            .update_group_invitation_status(&s, log.id, LogStatus::Agreed)
            .unwrap();
        let err = store
            .update_group_invitation_status(&s, log.id, LogStatus::Refused)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(store
            .find_pending_group_invitation(&s, group.id, "bob")
            .unwrap()
            .is_none());
    }
}
