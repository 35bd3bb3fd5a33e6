//! Database schema definitions

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{GraphError, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| GraphError::database("create schema_version table", e))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(|e| GraphError::database("read schema_version", e))?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| GraphError::database("clear schema_version", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| GraphError::database("set schema_version", e))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(USERS_SCHEMA)
        .map_err(|e| GraphError::database("create user tables", e))?;

    conn.execute_batch(FRIENDS_SCHEMA)
        .map_err(|e| GraphError::database("create friend tables", e))?;

    conn.execute_batch(GROUPS_SCHEMA)
        .map_err(|e| GraphError::database("create group tables", e))?;

    conn.execute_batch(RECORDS_SCHEMA)
        .map_err(|e| GraphError::database("create record tables", e))?;

    conn.execute_batch(BROADCAST_RECORDS_SCHEMA)
        .map_err(|e| GraphError::database("create broadcast_records", e))?;

    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<()> {
    if from_version < 2 {
        info!("Migration v1 -> v2: adding broadcast_records");
        conn.execute_batch(BROADCAST_RECORDS_SCHEMA)
            .map_err(|e| GraphError::database("create broadcast_records", e))?;
    }
    set_schema_version(conn, SCHEMA_VERSION)
}

const USERS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    subject TEXT PRIMARY KEY NOT NULL,
    nickname TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

const FRIENDS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS friendships (
    user_subject TEXT NOT NULL REFERENCES users(subject) ON DELETE CASCADE,
    friend_subject TEXT NOT NULL REFERENCES users(subject) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    PRIMARY KEY (user_subject, friend_subject)
);

CREATE INDEX IF NOT EXISTS idx_friendships_friend ON friendships(friend_subject);

CREATE TABLE IF NOT EXISTS friend_request_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender TEXT NOT NULL REFERENCES users(subject) ON DELETE CASCADE,
    receiver TEXT NOT NULL REFERENCES users(subject) ON DELETE CASCADE,
    status TEXT NOT NULL CHECK (status IN ('pending', 'agreed', 'refused')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_friend_requests_pair ON friend_request_logs(sender, receiver, status);
CREATE INDEX IF NOT EXISTS idx_friend_requests_receiver ON friend_request_logs(receiver);
"#;

const GROUPS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chat_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    group_type TEXT NOT NULL DEFAULT 'default'
        CHECK (group_type IN ('default', 'dating', 'game', 'study')),
    is_public INTEGER NOT NULL DEFAULT 0,
    created_by TEXT NOT NULL REFERENCES users(subject) ON DELETE CASCADE,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_groups_created_by ON chat_groups(created_by);

CREATE TABLE IF NOT EXISTS group_members (
    group_id INTEGER NOT NULL REFERENCES chat_groups(id) ON DELETE CASCADE,
    user_subject TEXT NOT NULL REFERENCES users(subject) ON DELETE CASCADE,
    is_admin INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    PRIMARY KEY (group_id, user_subject)
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_subject);

CREATE TABLE IF NOT EXISTS group_invitation_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL REFERENCES chat_groups(id) ON DELETE CASCADE,
    sender TEXT NOT NULL REFERENCES users(subject) ON DELETE CASCADE,
    receiver TEXT NOT NULL REFERENCES users(subject) ON DELETE CASCADE,
    status TEXT NOT NULL CHECK (status IN ('pending', 'agreed', 'refused')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_group_invitations_pending ON group_invitation_logs(group_id, receiver, status);
CREATE INDEX IF NOT EXISTS idx_group_invitations_sender ON group_invitation_logs(sender);
CREATE INDEX IF NOT EXISTS idx_group_invitations_receiver ON group_invitation_logs(receiver);

CREATE TABLE IF NOT EXISTS group_request_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL REFERENCES chat_groups(id) ON DELETE CASCADE,
    sender TEXT NOT NULL REFERENCES users(subject) ON DELETE CASCADE,
    approver TEXT REFERENCES users(subject) ON DELETE SET NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'agreed', 'refused')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_group_requests_pending ON group_request_logs(group_id, sender, status);
CREATE INDEX IF NOT EXISTS idx_group_requests_sender ON group_request_logs(sender);
"#;

const RECORDS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS private_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender TEXT NOT NULL REFERENCES users(subject) ON DELETE CASCADE,
    receiver TEXT NOT NULL REFERENCES users(subject) ON DELETE CASCADE,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_private_records_pair ON private_records(sender, receiver);

CREATE TABLE IF NOT EXISTS group_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL REFERENCES chat_groups(id) ON DELETE CASCADE,
    sender TEXT NOT NULL REFERENCES users(subject) ON DELETE CASCADE,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_group_records_group ON group_records(group_id);
"#;

const BROADCAST_RECORDS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS broadcast_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender TEXT NOT NULL REFERENCES users(subject) ON DELETE CASCADE,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_broadcast_records_sender ON broadcast_records(sender);
"#;
