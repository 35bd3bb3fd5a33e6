//! Chat groups

use rusqlite::{params, OptionalExtension};

use super::models::{current_timestamp, Group, NewGroup, GROUP_COLUMNS};
use super::store::{require_write_lock, GroupStore, SqliteStore};
use crate::error::{GraphError, Result};
use crate::session::Session;

impl GroupStore for SqliteStore {
    fn insert_group(&self, s: &Session, new: &NewGroup<'_>) -> Result<Group> {
        let now = current_timestamp();
        let id = s.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_groups (name, group_type, is_public, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![new.name, new.group_type, new.is_public, new.created_by, now],
            )
            .map_err(|e| GraphError::database(format!("insert group '{}'", new.name), e))?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(Group {
            id,
            name: new.name.to_string(),
            group_type: new.group_type,
            is_public: new.is_public,
            created_by: new.created_by.to_string(),
            created_at: now,
        })
    }

    fn get_group(&self, s: &Session, id: i64) -> Result<Option<Group>> {
        s.with_conn(|conn| {
            let sql = format!("SELECT {} FROM chat_groups WHERE id = ?1", GROUP_COLUMNS);
            conn.query_row(&sql, [id], Group::from_row)
                .optional()
                .map_err(|e| GraphError::database(format!("get group {}", id), e))
        })
    }

    fn get_group_for_update(&self, s: &Session, id: i64) -> Result<Option<Group>> {
        require_write_lock(s, "get_group_for_update")?;
        self.get_group(s, id)
    }

    fn list_groups_created_by(&self, s: &Session, subject: &str) -> Result<Vec<Group>> {
        s.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chat_groups WHERE created_by = ?1 ORDER BY id",
                GROUP_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| GraphError::database("prepare list groups", e))?;
            let rows = stmt
                .query_map([subject], Group::from_row)
                .map_err(|e| GraphError::database(format!("list groups created by {}", subject), e))?;
            let groups = rows
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| GraphError::database(format!("read groups created by {}", subject), e))?;
            Ok(groups)
        })
    }

    fn update_group_visibility(&self, s: &Session, id: i64, is_public: bool) -> Result<usize> {
        s.with_conn(|conn| {
            conn.execute(
                "UPDATE chat_groups SET is_public = ?1 WHERE id = ?2",
                params![is_public, id],
            )
            .map_err(|e| GraphError::database(format!("update visibility of group {}", id), e))
        })
    }

    fn delete_group(&self, s: &Session, id: i64) -> Result<usize> {
        s.with_conn(|conn| {
            conn.execute("DELETE FROM chat_groups WHERE id = ?1", [id])
                .map_err(|e| GraphError::database(format!("delete group {}", id), e))
        })
    }
}
