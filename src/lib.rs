//! chat-graph - social-graph store for chat backends
//!
//! Users become friends and join groups through a request/invitation
//! handshake. Requests sent independently in opposite directions are
//! reconciled into exactly one accepted relationship, even when they race.
//!
//! ## Architecture
//!
//! ```text
//! Context (cancellation, deadline, optional Session)
//!     ↓
//! Services (FriendService, MembershipService, GroupService, ...)
//!     ↓
//! Session (BEGIN IMMEDIATE / SAVEPOINT nesting, after-commit hooks)
//!     ↓
//! RelationshipStore (SqliteStore over rusqlite)
//! ```
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/chat-graph/
//! ├── graph.db               # SQLite database (WAL mode)
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod services;
pub mod session;

pub use config::{Config, EmptyListPolicy};
pub use context::Context;
pub use db::models::{
    BroadcastRecord, Friendship, FriendRequestLog, Group, GroupInvitationLog, GroupMember, GroupRecord,
    GroupRequestLog, GroupType, LogStatus, PrivateRecord, User,
};
pub use db::{Database, DbStats, RelationshipStore, SqliteStore};
pub use error::{ErrorKind, ErrorResponse, GraphError, Result};
pub use services::{
    CreateGroupInput, EventBus, FriendService, GraphEvent, GroupService, MembershipService,
    RecordService, Services, UserService,
};
pub use session::Session;
