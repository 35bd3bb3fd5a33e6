//! Row types and status tokens for the social-graph tables
//!
//! Reading structs mirror table rows. `New*` structs carry the columns a
//! caller supplies on INSERT. Timestamps are `DateTime<Utc>` stored as TEXT.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

// ============================================================================
// Timestamp Helpers
// ============================================================================

/// Current UTC timestamp for TEXT timestamp columns
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

// ============================================================================
// Log Status
// ============================================================================

/// Lifecycle of a friend request, group invitation or group request.
/// `Agreed` and `Refused` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Agreed,
    Refused,
}

impl LogStatus {
    pub const ALL: [LogStatus; 3] = [LogStatus::Pending, LogStatus::Agreed, LogStatus::Refused];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Agreed => "agreed",
            LogStatus::Refused => "refused",
        }
    }

    pub fn index(&self) -> i32 {
        match self {
            LogStatus::Pending => 0,
            LogStatus::Agreed => 1,
            LogStatus::Refused => 2,
        }
    }

    pub fn from_index(index: i32) -> Option<Self> {
        Self::ALL.get(usize::try_from(index).ok()?).copied()
    }

    pub fn is_pending(&self) -> bool {
        *self == LogStatus::Pending
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogStatus {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LogStatus::Pending),
            "agreed" => Ok(LogStatus::Agreed),
            "refused" => Ok(LogStatus::Refused),
            other => Err(GraphError::InvalidArgument(format!("unknown status '{}'", other))),
        }
    }
}

impl ToSql for LogStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for LogStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: GraphError| FromSqlError::Other(Box::new(e)))
    }
}

// ============================================================================
// Group Type
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    #[default]
    Default,
    Dating,
    Game,
    Study,
}

impl GroupType {
    pub const ALL: [GroupType; 4] = [
        GroupType::Default,
        GroupType::Dating,
        GroupType::Game,
        GroupType::Study,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupType::Default => "default",
            GroupType::Dating => "dating",
            GroupType::Game => "game",
            GroupType::Study => "study",
        }
    }

    pub fn index(&self) -> i32 {
        match self {
            GroupType::Default => 0,
            GroupType::Dating => 1,
            GroupType::Game => 2,
            GroupType::Study => 3,
        }
    }

    pub fn from_index(index: i32) -> Option<Self> {
        Self::ALL.get(usize::try_from(index).ok()?).copied()
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(GroupType::Default),
            "dating" => Ok(GroupType::Dating),
            "game" => Ok(GroupType::Game),
            "study" => Ok(GroupType::Study),
            other => Err(GraphError::InvalidArgument(format!("unknown group type '{}'", other))),
        }
    }
}

impl ToSql for GroupType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for GroupType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: GraphError| FromSqlError::Other(Box::new(e)))
    }
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub subject: String,
    pub nickname: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) const USER_COLUMNS: &str = "subject, nickname, created_at";

impl User {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            subject: row.get(0)?,
            nickname: row.get(1)?,
            created_at: row.get(2)?,
        })
    }
}

// ============================================================================
// Friendships
// ============================================================================

/// One direction of a friendship. Edges always exist in pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Friendship {
    pub user_subject: String,
    pub friend_subject: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) const FRIENDSHIP_COLUMNS: &str = "user_subject, friend_subject, created_at";

impl Friendship {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_subject: row.get(0)?,
            friend_subject: row.get(1)?,
            created_at: row.get(2)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendRequestLog {
    pub id: i64,
    pub sender: String,
    pub receiver: String,
    pub status: LogStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const FRIEND_REQUEST_COLUMNS: &str =
    "id, sender, receiver, status, created_at, updated_at";

impl FriendRequestLog {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sender: row.get(1)?,
            receiver: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewFriendRequest<'a> {
    pub sender: &'a str,
    pub receiver: &'a str,
    pub status: LogStatus,
}

// ============================================================================
// Groups
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub group_type: GroupType,
    pub is_public: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) const GROUP_COLUMNS: &str = "id, name, group_type, is_public, created_by, created_at";

impl Group {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            group_type: row.get(2)?,
            is_public: row.get(3)?,
            created_by: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewGroup<'a> {
    pub name: &'a str,
    pub group_type: GroupType,
    pub is_public: bool,
    pub created_by: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub group_id: i64,
    pub user_subject: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

pub(crate) const GROUP_MEMBER_COLUMNS: &str = "group_id, user_subject, is_admin, created_at";

impl GroupMember {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            group_id: row.get(0)?,
            user_subject: row.get(1)?,
            is_admin: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInvitationLog {
    pub id: i64,
    pub group_id: i64,
    pub sender: String,
    pub receiver: String,
    pub status: LogStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const GROUP_INVITATION_COLUMNS: &str =
    "id, group_id, sender, receiver, status, created_at, updated_at";

impl GroupInvitationLog {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            group_id: row.get(1)?,
            sender: row.get(2)?,
            receiver: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewGroupInvitation<'a> {
    pub group_id: i64,
    pub sender: &'a str,
    pub receiver: &'a str,
    pub status: LogStatus,
}

/// A user's request to join a group. `approver` stays empty until resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRequestLog {
    pub id: i64,
    pub group_id: i64,
    pub sender: String,
    pub approver: Option<String>,
    pub status: LogStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const GROUP_REQUEST_COLUMNS: &str =
    "id, group_id, sender, approver, status, created_at, updated_at";

impl GroupRequestLog {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            group_id: row.get(1)?,
            sender: row.get(2)?,
            approver: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewGroupRequest<'a> {
    pub group_id: i64,
    pub sender: &'a str,
    pub approver: Option<&'a str>,
    pub status: LogStatus,
}

// ============================================================================
// Message Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateRecord {
    pub id: i64,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) const PRIVATE_RECORD_COLUMNS: &str = "id, sender, receiver, content, created_at";

impl PrivateRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sender: row.get(1)?,
            receiver: row.get(2)?,
            content: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: i64,
    pub group_id: i64,
    pub sender: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) const GROUP_RECORD_COLUMNS: &str = "id, group_id, sender, content, created_at";

impl GroupRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            group_id: row.get(1)?,
            sender: row.get(2)?,
            content: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

/// A message addressed to every user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastRecord {
    pub id: i64,
    pub sender: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) const BROADCAST_RECORD_COLUMNS: &str = "id, sender, content, created_at";

impl BroadcastRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sender: row.get(1)?,
            content: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}
