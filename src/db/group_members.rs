//! Group membership rows

use rusqlite::{params, OptionalExtension};

use super::models::{current_timestamp, Group, GroupMember, GROUP_MEMBER_COLUMNS};
use super::store::{require_write_lock, GroupMemberStore, SqliteStore};
use crate::error::{GraphError, Result};
use crate::session::Session;

fn list_where(s: &Session, filter: &str, group_id: i64, what: &str) -> Result<Vec<GroupMember>> {
    s.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM group_members WHERE {} ORDER BY created_at, user_subject",
            GROUP_MEMBER_COLUMNS, filter
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| GraphError::database(what.to_string(), e))?;
        let rows = stmt
            .query_map([group_id], GroupMember::from_row)
            .map_err(|e| GraphError::database(what.to_string(), e))?;
        let members = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| GraphError::database(what.to_string(), e))?;
        Ok(members)
    })
}

impl GroupMemberStore for SqliteStore {
    fn insert_member(
        &self,
        s: &Session,
        group_id: i64,
        subject: &str,
        is_admin: bool,
    ) -> Result<GroupMember> {
        let member = GroupMember {
            group_id,
            user_subject: subject.to_string(),
            is_admin,
            created_at: current_timestamp(),
        };
        s.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_members (group_id, user_subject, is_admin, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![member.group_id, member.user_subject, member.is_admin, member.created_at],
            )
            .map_err(|e| {
                GraphError::database(format!("insert member {} into group {}", subject, group_id), e)
            })
        })?;
        Ok(member)
    }

    fn get_member(&self, s: &Session, group_id: i64, subject: &str) -> Result<Option<GroupMember>> {
        s.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM group_members WHERE group_id = ?1 AND user_subject = ?2",
                GROUP_MEMBER_COLUMNS
            );
            conn.query_row(&sql, params![group_id, subject], GroupMember::from_row)
                .optional()
                .map_err(|e| {
                    GraphError::database(format!("get member {} of group {}", subject, group_id), e)
                })
        })
    }

    fn get_member_for_update(
        &self,
        s: &Session,
        group_id: i64,
        subject: &str,
    ) -> Result<Option<GroupMember>> {
        require_write_lock(s, "get_member_for_update")?;
        self.get_member(s, group_id, subject)
    }

    fn list_members(&self, s: &Session, group_id: i64) -> Result<Vec<GroupMember>> {
        list_where(s, "group_id = ?1", group_id, "list group members")
    }

    fn list_admins(&self, s: &Session, group_id: i64) -> Result<Vec<GroupMember>> {
        list_where(s, "group_id = ?1 AND is_admin = 1", group_id, "list group admins")
    }

    fn groups_of_member(&self, s: &Session, subject: &str) -> Result<Vec<Group>> {
        s.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT g.id, g.name, g.group_type, g.is_public, g.created_by, g.created_at
                     FROM chat_groups g
                     JOIN group_members m ON m.group_id = g.id
                     WHERE m.user_subject = ?1
                     ORDER BY m.created_at, g.id",
                )
                .map_err(|e| GraphError::database("prepare groups of member", e))?;
            let rows = stmt
                .query_map([subject], Group::from_row)
                .map_err(|e| GraphError::database(format!("list groups of {}", subject), e))?;
            let groups = rows
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| GraphError::database(format!("read groups of {}", subject), e))?;
            Ok(groups)
        })
    }

    fn set_admin(&self, s: &Session, group_id: i64, subject: &str, is_admin: bool) -> Result<usize> {
        s.with_conn(|conn| {
            conn.execute(
                "UPDATE group_members SET is_admin = ?1 WHERE group_id = ?2 AND user_subject = ?3",
                params![is_admin, group_id, subject],
            )
            .map_err(|e| {
                GraphError::database(format!("set admin {} in group {}", subject, group_id), e)
            })
        })
    }

    fn delete_member(&self, s: &Session, group_id: i64, subject: &str) -> Result<usize> {
        s.with_conn(|conn| {
            conn.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_subject = ?2",
                params![group_id, subject],
            )
            .map_err(|e| {
                GraphError::database(format!("delete member {} of group {}", subject, group_id), e)
            })
        })
    }
}
