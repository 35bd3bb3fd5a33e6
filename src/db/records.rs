//! Delivered message records

use rusqlite::params;

use super::models::{
    current_timestamp, BroadcastRecord, GroupRecord, PrivateRecord, BROADCAST_RECORD_COLUMNS,
    GROUP_RECORD_COLUMNS, PRIVATE_RECORD_COLUMNS,
};
use super::store::{RecordStore, SqliteStore};
use crate::error::{GraphError, Result};
use crate::session::Session;

impl RecordStore for SqliteStore {
    fn insert_private_record(
        &self,
        s: &Session,
        sender: &str,
        receiver: &str,
        content: &str,
    ) -> Result<PrivateRecord> {
        let now = current_timestamp();
        let id = s.with_conn(|conn| {
            conn.execute(
                "INSERT INTO private_records (sender, receiver, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![sender, receiver, content, now],
            )
            .map_err(|e| GraphError::database(format!("insert record {} -> {}", sender, receiver), e))?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(PrivateRecord {
            id,
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            content: content.to_string(),
            created_at: now,
        })
    }

    fn private_records_between(&self, s: &Session, a: &str, b: &str) -> Result<Vec<PrivateRecord>> {
        s.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM private_records
                 WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
                 ORDER BY id",
                PRIVATE_RECORD_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| GraphError::database("prepare private records", e))?;
            let rows = stmt
                .query_map([a, b], PrivateRecord::from_row)
                .map_err(|e| GraphError::database(format!("list records between {} and {}", a, b), e))?;
            let records = rows
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| GraphError::database(format!("read records between {} and {}", a, b), e))?;
            Ok(records)
        })
    }

    fn delete_private_record(&self, s: &Session, id: i64) -> Result<usize> {
        s.with_conn(|conn| {
            conn.execute("DELETE FROM private_records WHERE id = ?1", [id])
                .map_err(|e| GraphError::database(format!("delete private record {}", id), e))
        })
    }

    fn insert_group_record(
        &self,
        s: &Session,
        group_id: i64,
        sender: &str,
        content: &str,
    ) -> Result<GroupRecord> {
        let now = current_timestamp();
        let id = s.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_records (group_id, sender, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![group_id, sender, content, now],
            )
            .map_err(|e| GraphError::database(format!("insert record in group {}", group_id), e))?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(GroupRecord {
            id,
            group_id,
            sender: sender.to_string(),
            content: content.to_string(),
            created_at: now,
        })
    }

    fn group_records(&self, s: &Session, group_id: i64) -> Result<Vec<GroupRecord>> {
        s.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM group_records WHERE group_id = ?1 ORDER BY id",
                GROUP_RECORD_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| GraphError::database("prepare group records", e))?;
            let rows = stmt
                .query_map([group_id], GroupRecord::from_row)
                .map_err(|e| GraphError::database(format!("list records of group {}", group_id), e))?;
            let records = rows
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| GraphError::database(format!("read records of group {}", group_id), e))?;
            Ok(records)
        })
    }

    fn delete_group_record(&self, s: &Session, id: i64) -> Result<usize> {
        s.with_conn(|conn| {
            conn.execute("DELETE FROM group_records WHERE id = ?1", [id])
                .map_err(|e| GraphError::database(format!("delete group record {}", id), e))
        })
    }

    fn insert_broadcast_record(
        &self,
        s: &Session,
        sender: &str,
        content: &str,
    ) -> Result<BroadcastRecord> {
        let now = current_timestamp();
        let id = s.with_conn(|conn| {
            conn.execute(
                "INSERT INTO broadcast_records (sender, content, created_at) VALUES (?1, ?2, ?3)",
                params![sender, content, now],
            )
            .map_err(|e| GraphError::database(format!("insert broadcast from {}", sender), e))?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(BroadcastRecord {
            id,
            sender: sender.to_string(),
            content: content.to_string(),
            created_at: now,
        })
    }

    fn list_broadcast_records(
        &self,
        s: &Session,
        sender: Option<&str>,
    ) -> Result<Vec<BroadcastRecord>> {
        s.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM broadcast_records WHERE ?1 IS NULL OR sender = ?1 ORDER BY id",
                BROADCAST_RECORD_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| GraphError::database("prepare broadcast records", e))?;
            let rows = stmt
                .query_map([sender], BroadcastRecord::from_row)
                .map_err(|e| GraphError::database("list broadcast records", e))?;
            let records = rows
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| GraphError::database("read broadcast records", e))?;
            Ok(records)
        })
    }

    fn delete_broadcast_record(&self, s: &Session, id: i64) -> Result<usize> {
        s.with_conn(|conn| {
            conn.execute("DELETE FROM broadcast_records WHERE id = ?1", [id])
                .map_err(|e| GraphError::database(format!("delete broadcast record {}", id), e))
        })
    }
}
