//! Event system for social-graph changes
//!
//! Services queue events as after-commit hooks, so a subscriber never sees an
//! event for work that was rolled back. A real-time hub that pushes
//! notifications to connected clients subscribes here.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Graph events emitted by services
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEvent {
    // User events
    UserRegistered {
        subject: String,
    },
    UserDeleted {
        subject: String,
    },

    // Friend events
    FriendRequestCreated {
        id: i64,
        sender: String,
        receiver: String,
    },
    FriendRequestAgreed {
        id: i64,
        sender: String,
        receiver: String,
    },
    FriendRequestRefused {
        id: i64,
        sender: String,
        receiver: String,
    },
    FriendshipFormed {
        a: String,
        b: String,
    },
    FriendshipRemoved {
        a: String,
        b: String,
    },

    // Group events
    GroupCreated {
        group_id: i64,
        created_by: String,
    },
    GroupDeleted {
        group_id: i64,
    },
    GroupVisibilityChanged {
        group_id: i64,
        is_public: bool,
    },
    GroupInvitationCreated {
        id: i64,
        group_id: i64,
        sender: String,
        receiver: String,
    },
    GroupInvitationResolved {
        id: i64,
        group_id: i64,
        receiver: String,
        agreed: bool,
    },
    GroupRequestCreated {
        id: i64,
        group_id: i64,
        sender: String,
    },
    GroupRequestResolved {
        id: i64,
        group_id: i64,
        sender: String,
        approver: String,
        agreed: bool,
    },
    MemberJoined {
        group_id: i64,
        subject: String,
    },
    MemberRemoved {
        group_id: i64,
        subject: String,
    },
    AdminChanged {
        group_id: i64,
        subject: String,
        is_admin: bool,
    },

    // Message events
    PrivateMessageStored {
        id: i64,
        sender: String,
        receiver: String,
    },
    GroupMessageStored {
        id: i64,
        group_id: i64,
        sender: String,
    },
    BroadcastMessageStored {
        id: i64,
        sender: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &GraphEvent);
}

/// Event bus for broadcasting graph events
pub struct EventBus {
    sender: broadcast::Sender<GraphEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: GraphEvent) {
        trace!(event = ?event, "Emitting graph event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &GraphEvent) {
        match event {
            GraphEvent::FriendshipFormed { a, b } => {
                info!(a = %a, b = %b, "Friendship formed");
            }
            GraphEvent::FriendshipRemoved { a, b } => {
                info!(a = %a, b = %b, "Friendship removed");
            }
            GraphEvent::MemberJoined { group_id, subject } => {
                info!(group_id, subject = %subject, "Member joined group");
            }
            GraphEvent::FriendRequestCreated { id, sender, receiver } => {
                debug!(id, sender = %sender, receiver = %receiver, "Friend request created");
            }
            GraphEvent::GroupCreated { group_id, created_by } => {
                debug!(group_id, created_by = %created_by, "Group created");
            }
            GraphEvent::BroadcastMessageStored { id, sender } => {
                info!(id, sender = %sender, "Broadcast stored");
            }
            _ => {
                trace!(event = ?event, "Graph event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(GraphEvent::FriendshipFormed {
            a: "alice".into(),
            b: "bob".into(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        assert_eq!(
            event,
            GraphEvent::FriendshipFormed {
                a: "alice".into(),
                b: "bob".into(),
            }
        );
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(GraphEvent::GroupDeleted { group_id: 1 });
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(GraphEvent::MemberJoined {
            group_id: 7,
            subject: "bob".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "member_joined");
        assert_eq!(json["group_id"], 7);
    }

    #[tokio::test]
    async fn test_logging_listener_stops_when_bus_dropped() {
        let bus = Arc::new(EventBus::new());
        let handle = spawn_logging_listener(Arc::clone(&bus));
        bus.emit(GraphEvent::UserRegistered {
            subject: "alice".into(),
        });
        drop(bus);

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener did not stop")
            .unwrap();
    }
}
