//! Integration tests for friend request reconciliation
//!
//! Opposite requests between the same pair must end in one mutual
//! friendship, whether they arrive one after the other or race on separate
//! connections.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use chat_graph::{Context, EmptyListPolicy, ErrorKind, GraphEvent, LogStatus};
use common::{create_services, register};

#[test]
fn test_sequential_opposite_requests() {
    let (services, _temp) = create_services(EmptyListPolicy::NotFound);
    register(&services, &["alice", "bob"]);
    let ctx = Context::new();

    let pending = services
        .friends
        .create_friend_request(&ctx, "alice", "bob")
        .unwrap();
    assert_eq!(pending.status, LogStatus::Pending);

    let reconciled = services
        .friends
        .create_friend_request(&ctx, "bob", "alice")
        .unwrap();
    assert_eq!(reconciled.status, LogStatus::Agreed);

    let sent = services.friends.friend_requests_from(&ctx, "alice").unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status, LogStatus::Agreed);

    let alice_friends = services.friends.list_friends(&ctx, "alice").unwrap();
    let bob_friends = services.friends.list_friends(&ctx, "bob").unwrap();
    assert_eq!(alice_friends.len(), 1);
    assert_eq!(bob_friends.len(), 1);
    assert_eq!(alice_friends[0].friend_subject, "bob");
    assert_eq!(bob_friends[0].friend_subject, "alice");

    let stats = services.db.stats(&ctx).unwrap();
    assert_eq!(stats.friendship_count, 1);
    assert_eq!(stats.pending_friend_request_count, 0);
}

#[test]
fn test_concurrent_opposite_requests_converge() {
    for _ in 0..8 {
        let (services, _temp) = create_services(EmptyListPolicy::Empty);
        register(&services, &["alice", "bob"]);

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [("alice", "bob"), ("bob", "alice")]
            .into_iter()
            .map(|(sender, receiver)| {
                let friends = Arc::clone(&services.friends);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    friends.create_friend_request(&Context::new(), sender, receiver)
                })
            })
            .collect();

        let logs: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        // One request was created pending and then agreed by the other
        assert_eq!(
            logs.iter().filter(|l| l.status == LogStatus::Agreed).count(),
            1
        );

        let ctx = Context::new();
        assert!(services.friends.is_friend(&ctx, "alice", "bob").unwrap());
        assert!(services.friends.is_friend(&ctx, "bob", "alice").unwrap());

        let stats = services.db.stats(&ctx).unwrap();
        assert_eq!(stats.friendship_count, 1);
        assert_eq!(stats.friend_request_count, 2);
        assert_eq!(stats.pending_friend_request_count, 0);
    }
}

#[test]
fn test_request_after_friendship_rejected() {
    let (services, _temp) = create_services(EmptyListPolicy::NotFound);
    register(&services, &["alice", "bob"]);
    let ctx = Context::new();

    let log = services
        .friends
        .create_friend_request(&ctx, "alice", "bob")
        .unwrap();
    services
        .friends
        .agree_friend_request(&ctx, log.id, "bob")
        .unwrap();

    for (sender, receiver) in [("alice", "bob"), ("bob", "alice")] {
        let err = services
            .friends
            .create_friend_request(&ctx, sender, receiver)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(err.http_status(), 409);
    }
}

#[test]
fn test_refused_request_can_be_resent() {
    let (services, _temp) = create_services(EmptyListPolicy::NotFound);
    register(&services, &["alice", "bob"]);
    let ctx = Context::new();

    let first = services
        .friends
        .create_friend_request(&ctx, "alice", "bob")
        .unwrap();
    services
        .friends
        .refuse_friend_request(&ctx, first.id, "bob")
        .unwrap();

    let second = services
        .friends
        .create_friend_request(&ctx, "alice", "bob")
        .unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.status, LogStatus::Pending);
    assert_eq!(
        services.friends.friend_requests_to(&ctx, "bob").unwrap().len(),
        2
    );
}

#[test]
fn test_events_follow_commit() {
    let (services, _temp) = create_services(EmptyListPolicy::NotFound);
    register(&services, &["alice", "bob"]);
    let mut rx = services.events.subscribe();
    let ctx = Context::new();

    services
        .friends
        .create_friend_request(&ctx, "alice", "bob")
        .unwrap();
    services
        .friends
        .create_friend_request(&ctx, "bob", "alice")
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events
        .iter()
        .any(|e| matches!(e, GraphEvent::FriendshipFormed { .. })));

    // A failed request emits nothing
    let err = services
        .friends
        .create_friend_request(&ctx, "alice", "bob")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_racing_agree_and_refuse_leave_one_winner() {
    for _ in 0..8 {
        let (services, _temp) = create_services(EmptyListPolicy::Empty);
        register(&services, &["alice", "bob"]);
        let log = services
            .friends
            .create_friend_request(&Context::new(), "alice", "bob")
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [true, false]
            .into_iter()
            .map(|agree| {
                let friends = Arc::clone(&services.friends);
                let barrier = Arc::clone(&barrier);
                let id = log.id;
                thread::spawn(move || {
                    barrier.wait();
                    let ctx = Context::new();
                    if agree {
                        friends.agree_friend_request(&ctx, id, "bob")
                    } else {
                        friends.refuse_friend_request(&ctx, id, "bob")
                    }
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser.kind(), ErrorKind::InvalidArgument);

        let ctx = Context::new();
        let stored = services.friends.get_friend_request(&ctx, log.id).unwrap();
        assert_eq!(stored.status, winners[0].status);
        assert_eq!(
            services.friends.is_friend(&ctx, "alice", "bob").unwrap(),
            stored.status == LogStatus::Agreed
        );
    }
}
