//! Integration tests for sessions shared across services
//!
//! A caller opens a transaction, hands it to several services through the
//! context, and decides once whether all of their work lands.

mod common;

use std::time::{Duration, Instant};

use chat_graph::{Context, EmptyListPolicy, ErrorKind, GraphEvent, LogStatus};
use common::{create_services, public_group, register};

#[test]
fn test_services_share_caller_transaction() {
    let (services, _temp) = create_services(EmptyListPolicy::Empty);
    register(&services, &["alice", "bob"]);
    let group = public_group(&services, "alice", "hikers");
    let ctx = Context::new();
    let mut rx = services.events.subscribe();

    let root = services.db.new_session(&ctx).unwrap();
    let tx = root.begin().unwrap();
    let joined = ctx.with_session(tx.clone());

    services
        .friends
        .create_friend_request(&joined, "alice", "bob")
        .unwrap();
    services
        .membership
        .create_group_request(&joined, "bob", group.id)
        .unwrap();

    // Nothing is delivered while the transaction is open
    assert!(rx.try_recv().is_err());

    tx.commit().unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], GraphEvent::FriendRequestCreated { .. }));
    assert!(matches!(events[1], GraphEvent::GroupRequestCreated { .. }));

    assert_eq!(
        services.friends.friend_requests_to(&ctx, "bob").unwrap().len(),
        1
    );
    assert_eq!(
        services.membership.group_requests_to(&ctx, group.id).unwrap().len(),
        1
    );
}

#[test]
fn test_failed_operation_discards_only_its_savepoint() {
    let (services, _temp) = create_services(EmptyListPolicy::Empty);
    register(&services, &["alice", "bob"]);
    let ctx = Context::new();
    let mut rx = services.events.subscribe();

    let root = services.db.new_session(&ctx).unwrap();
    let tx = root.begin().unwrap();
    let joined = ctx.with_session(tx.clone());

    services
        .friends
        .create_friend_request(&joined, "alice", "bob")
        .unwrap();
    let err = services
        .friends
        .create_friend_request(&joined, "alice", "ghost")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // The outer transaction is still usable after the inner failure
    assert!(!tx.is_resolved());
    tx.commit().unwrap();

    let logs = services.friends.friend_requests_from(&ctx, "alice").unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Pending);

    assert!(matches!(
        rx.try_recv().unwrap(),
        GraphEvent::FriendRequestCreated { .. }
    ));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_rollback_drops_events() {
    let (services, _temp) = create_services(EmptyListPolicy::Empty);
    let ctx = Context::new();
    let mut rx = services.events.subscribe();

    let root = services.db.new_session(&ctx).unwrap();
    let tx = root.begin().unwrap();
    services
        .users
        .register_user_with_subject(&ctx.with_session(tx.clone()), "alice", "Alice")
        .unwrap();
    tx.rollback().unwrap();

    assert!(rx.try_recv().is_err());
    assert_eq!(
        services.users.get_user(&ctx, "alice").unwrap_err().kind(),
        ErrorKind::NotFound
    );

    // Resolving twice is a no-op
    tx.rollback().unwrap();
    tx.commit().unwrap();
    assert_eq!(services.db.stats(&ctx).unwrap().user_count, 0);
}

#[test]
fn test_dropped_transaction_rolls_back() {
    let (services, _temp) = create_services(EmptyListPolicy::Empty);
    let ctx = Context::new();

    {
        let root = services.db.new_session(&ctx).unwrap();
        let tx = root.begin().unwrap();
        services
            .users
            .register_user_with_subject(&ctx.with_session(tx), "alice", "Alice")
            .unwrap();
    }

    assert_eq!(services.db.stats(&ctx).unwrap().user_count, 0);
}

#[test]
fn test_cancelled_context_stops_work() {
    let (services, _temp) = create_services(EmptyListPolicy::Empty);
    let ctx = Context::new().with_cancel();
    ctx.cancel();

    let err = services
        .users
        .register_user_with_subject(&ctx, "alice", "Alice")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);

    let expired = Context::new().with_timeout(Duration::ZERO);
    std::thread::sleep(Duration::from_millis(5));
    let err = services.users.get_user(&expired, "alice").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
}

#[test]
fn test_cancel_while_waiting_for_write_lock() {
    let (services, _temp) = create_services(EmptyListPolicy::Empty);
    register(&services, &["alice", "bob"]);

    let holder = services.db.new_session(&Context::new()).unwrap();
    let held = holder.begin().unwrap();

    let ctx = Context::new().with_cancel();
    let canceller = {
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            ctx.cancel();
        })
    };

    let started = Instant::now();
    let err = services
        .friends
        .create_friend_request(&ctx, "alice", "bob")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);
    assert!(started.elapsed() < Duration::from_secs(2));
    canceller.join().unwrap();

    held.rollback().unwrap();
    assert_eq!(services.db.stats(&Context::new()).unwrap().friend_request_count, 0);
}

#[test]
fn test_deadline_while_waiting_for_write_lock() {
    let (services, _temp) = create_services(EmptyListPolicy::Empty);
    register(&services, &["alice", "bob"]);

    let holder = services.db.new_session(&Context::new()).unwrap();
    let held = holder.begin().unwrap();

    let ctx = Context::new().with_timeout(Duration::from_millis(100));
    let started = Instant::now();
    let err = services
        .friends
        .create_friend_request(&ctx, "alice", "bob")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    assert!(started.elapsed() < Duration::from_secs(2));

    // Once the lock is free the same request goes through
    held.commit().unwrap();
    let log = services
        .friends
        .create_friend_request(&Context::new(), "alice", "bob")
        .unwrap();
    assert_eq!(log.status, LogStatus::Pending);
}
