//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chat_graph::{Context, CreateGroupInput, Database, EmptyListPolicy, Group, GroupType, Services};
use tempfile::TempDir;

/// Services over a database in a temp dir; keep the `TempDir` alive
pub fn create_services(policy: EmptyListPolicy) -> (Services, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Arc::new(Database::open(&temp_dir.path().join("graph.db")).unwrap());
    (Services::new(db, policy), temp_dir)
}

/// Register users whose subject doubles as nickname
pub fn register(services: &Services, subjects: &[&str]) {
    let ctx = Context::new();
    for subject in subjects {
        services
            .users
            .register_user_with_subject(&ctx, subject, subject)
            .unwrap();
    }
}

/// A public group owned by `owner`
pub fn public_group(services: &Services, owner: &str, name: &str) -> Group {
    let ctx = Context::new();
    let group = services
        .groups
        .create_group(
            &ctx,
            CreateGroupInput {
                name: name.to_string(),
                group_type: GroupType::Study,
                created_by: owner.to_string(),
            },
        )
        .unwrap();
    services.groups.make_public(&ctx, group.id).unwrap();
    group
}
