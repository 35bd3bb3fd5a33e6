//! Service layer for chat-graph
//!
//! Services hold the business rules between a transport layer and the store.
//! Each write operation:
//! - validates its input before touching the database
//! - runs its reads and writes in one `with_transaction` scope, joining the
//!   caller's transaction when the context carries a session
//! - queues its events as after-commit hooks
//!
//! ## Architecture
//!
//! ```text
//! Transport / CLI (thin)
//!     ↓
//! Service Layer (validation, reconciliation, events)
//!     ↓
//! RelationshipStore (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod events;
pub mod user_service;
pub mod friend_service;
pub mod group_service;
pub mod membership_service;
pub mod record_service;

// Re-exports
pub use events::{EventBus, EventListener, GraphEvent, LoggingEventListener};
pub use friend_service::FriendService;
pub use group_service::{CreateGroupInput, GroupService};
pub use membership_service::MembershipService;
pub use record_service::RecordService;
pub use user_service::UserService;

use std::sync::Arc;

use crate::config::{Config, EmptyListPolicy};
use crate::db::{Database, RelationshipStore, SqliteStore};
use crate::error::{GraphError, Result};
use crate::session::Session;

/// Service container for dependency injection
///
/// Holds all services with a shared database handle, store and event bus.
pub struct Services {
    pub users: Arc<UserService>,
    pub friends: Arc<FriendService>,
    pub groups: Arc<GroupService>,
    pub membership: Arc<MembershipService>,
    pub records: Arc<RecordService>,
    pub events: Arc<EventBus>,
    pub db: Arc<Database>,
}

impl Services {
    /// Create all services over the SQLite store
    pub fn new(db: Arc<Database>, policy: EmptyListPolicy) -> Self {
        Self::with_store(db, Arc::new(SqliteStore::new()), Arc::new(EventBus::new()), policy)
    }

    pub fn from_config(db: Arc<Database>, config: &Config) -> Self {
        Self::with_store(
            db,
            Arc::new(SqliteStore::new()),
            Arc::new(EventBus::with_capacity(config.event_capacity)),
            config.empty_list_policy,
        )
    }

    /// Create all services over an arbitrary store implementation
    pub fn with_store(
        db: Arc<Database>,
        store: Arc<dyn RelationshipStore>,
        events: Arc<EventBus>,
        policy: EmptyListPolicy,
    ) -> Self {
        Self {
            users: Arc::new(UserService::new(db.clone(), store.clone(), events.clone())),
            friends: Arc::new(FriendService::new(
                db.clone(),
                store.clone(),
                events.clone(),
                policy,
            )),
            groups: Arc::new(GroupService::new(
                db.clone(),
                store.clone(),
                events.clone(),
                policy,
            )),
            membership: Arc::new(MembershipService::new(
                db.clone(),
                store.clone(),
                events.clone(),
                policy,
            )),
            records: Arc::new(RecordService::new(
                db.clone(),
                store,
                events.clone(),
                policy,
            )),
            events,
            db,
        }
    }
}

/// Apply the empty-list policy to a query result
pub(crate) fn non_empty<T>(
    items: Vec<T>,
    policy: EmptyListPolicy,
    what: impl FnOnce() -> String,
) -> Result<Vec<T>> {
    if items.is_empty() && policy == EmptyListPolicy::NotFound {
        return Err(GraphError::NotFound(what()));
    }
    Ok(items)
}

/// Queue `event` for delivery once the surrounding transaction commits
pub(crate) fn emit_after_commit(tx: &Session, events: &Arc<EventBus>, event: GraphEvent) -> Result<()> {
    let events = Arc::clone(events);
    tx.after_commit(move || events.emit(event))
}
