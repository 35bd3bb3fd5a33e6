//! Group join request logs

use rusqlite::{params, OptionalExtension};

use super::models::{
    current_timestamp, GroupRequestLog, LogStatus, NewGroupRequest, GROUP_REQUEST_COLUMNS,
};
use super::store::{ensure_transitioned, require_write_lock, GroupRequestStore, SqliteStore};
use crate::error::{GraphError, Result};
use crate::session::Session;

fn select_one(
    s: &Session,
    filter: &str,
    params: impl rusqlite::Params,
    what: &str,
) -> Result<Option<GroupRequestLog>> {
    s.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM group_request_logs WHERE {} ORDER BY id DESC LIMIT 1",
            GROUP_REQUEST_COLUMNS, filter
        );
        conn.query_row(&sql, params, GroupRequestLog::from_row)
            .optional()
            .map_err(|e| GraphError::database(what.to_string(), e))
    })
}

fn select_many(
    s: &Session,
    filter: &str,
    params: impl rusqlite::Params,
    what: &str,
) -> Result<Vec<GroupRequestLog>> {
    s.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM group_request_logs WHERE {} ORDER BY id",
            GROUP_REQUEST_COLUMNS, filter
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| GraphError::database(what.to_string(), e))?;
        let rows = stmt
            .query_map(params, GroupRequestLog::from_row)
            .map_err(|e| GraphError::database(what.to_string(), e))?;
        let logs = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| GraphError::database(what.to_string(), e))?;
        Ok(logs)
    })
}

impl GroupRequestStore for SqliteStore {
    fn insert_group_request(
        &self,
        s: &Session,
        new: &NewGroupRequest<'_>,
    ) -> Result<GroupRequestLog> {
        let now = current_timestamp();
        let id = s.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_request_logs (group_id, sender, approver, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![new.group_id, new.sender, new.approver, new.status, now],
            )
            .map_err(|e| {
                GraphError::database(
                    format!("insert request of {} to join group {}", new.sender, new.group_id),
                    e,
                )
            })?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(GroupRequestLog {
            id,
            group_id: new.group_id,
            sender: new.sender.to_string(),
            approver: new.approver.map(str::to_string),
            status: new.status,
            created_at: now,
            updated_at: now,
        })
    }

    fn get_group_request(&self, s: &Session, id: i64) -> Result<Option<GroupRequestLog>> {
        select_one(s, "id = ?1", [id], &format!("get group request {}", id))
    }

    fn get_group_request_for_update(
        &self,
        s: &Session,
        id: i64,
    ) -> Result<Option<GroupRequestLog>> {
        require_write_lock(s, "get_group_request_for_update")?;
        self.get_group_request(s, id)
    }

    fn find_pending_group_request(
        &self,
        s: &Session,
        group_id: i64,
        sender: &str,
    ) -> Result<Option<GroupRequestLog>> {
        select_one(
            s,
            "group_id = ?1 AND sender = ?2 AND status = 'pending'",
            params![group_id, sender],
            &format!("find pending request of {} for group {}", sender, group_id),
        )
    }

    fn find_pending_group_request_for_update(
        &self,
        s: &Session,
        group_id: i64,
        sender: &str,
    ) -> Result<Option<GroupRequestLog>> {
        require_write_lock(s, "find_pending_group_request_for_update")?;
        self.find_pending_group_request(s, group_id, sender)
    }

    fn update_group_request_status(
        &self,
        s: &Session,
        id: i64,
        status: LogStatus,
        approver: &str,
    ) -> Result<GroupRequestLog> {
        let updated = s.with_conn(|conn| {
            conn.execute(
                "UPDATE group_request_logs SET status = ?1, approver = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = 'pending'",
                params![status, approver, current_timestamp(), id],
            )
            .map_err(|e| GraphError::database(format!("update group request {}", id), e))
        })?;
        ensure_transitioned(updated, "group request", id)?;

        self.get_group_request(s, id)?
            .ok_or_else(|| GraphError::NotFound(format!("group request {}", id)))
    }

    fn group_requests_from(&self, s: &Session, sender: &str) -> Result<Vec<GroupRequestLog>> {
        select_many(s, "sender = ?1", [sender], "list group requests from sender")
    }

    fn group_requests_to(&self, s: &Session, group_id: i64) -> Result<Vec<GroupRequestLog>> {
        select_many(s, "group_id = ?1", [group_id], "list group requests to group")
    }

    fn delete_group_request(&self, s: &Session, id: i64) -> Result<usize> {
        s.with_conn(|conn| {
            conn.execute("DELETE FROM group_request_logs WHERE id = ?1", [id])
                .map_err(|e| GraphError::database(format!("delete group request {}", id), e))
        })
    }
}
