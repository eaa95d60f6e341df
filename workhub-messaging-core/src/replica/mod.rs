// workhub-messaging-core/src/replica/mod.rs
//! Replica records and the handlers that keep them in step with their owners.
//!
//! Delivery is unordered and may repeat or drop events, so every handler
//! operation is idempotent on the entity's external identifier: create
//! overwrites, update merges, delete of an absent record does nothing.

mod handlers;
mod record;
mod store;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::catalog::entities;
use crate::{DispatchTable, MessagingError};

pub use handlers::{LoginStatusHandler, PersonReplicaHandler, RecordReplicaHandler};
pub use record::{Fields, LoginStatus, PersonKind, PersonReplica, RecordId};
pub use store::{InMemoryReplicaStore, ReplicaStore};

/// Store collection holding both worker and customer replicas.
pub const PERSONS: &str = "person";
pub const SERVICES: &str = "service";
pub const SUBSCRIPTIONS: &str = "subscription";
pub const POSTS: &str = "post";

/// Applies one decoded `(action, payload)` to the local replica store.
#[async_trait]
pub trait ReplicaHandler: Send + Sync {
    async fn apply(&self, action: &str, payload: Value) -> Result<(), MessagingError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaOp {
    Create,
    Update,
    Delete,
}

impl ReplicaOp {
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Handlers for every replicated entity class, all writing to `store`.
pub fn standard_dispatch_table(store: Arc<dyn ReplicaStore>) -> DispatchTable {
    const CRUD: &[&str] = &["create", "update", "delete"];

    let workers = Arc::new(PersonReplicaHandler::new(PersonKind::Worker, store.clone()));
    let customers = Arc::new(PersonReplicaHandler::new(PersonKind::Customer, store.clone()));
    let logins = Arc::new(LoginStatusHandler::new(store.clone()));
    let services = Arc::new(RecordReplicaHandler::new(SERVICES, "id", store.clone()));
    let subscriptions = Arc::new(
        RecordReplicaHandler::new(SUBSCRIPTIONS, "id", store.clone())
            .with_alias("workerunfollow", ReplicaOp::Update),
    );
    let posts = Arc::new(RecordReplicaHandler::new(POSTS, "id", store));

    DispatchTable::new()
        .routes(entities::WORKER, CRUD, workers)
        .routes(entities::CUSTOMER, CRUD, customers)
        .routes(entities::USER, &["login", "logout"], logins)
        .routes(entities::SERVICES_PROVIDED, CRUD, services)
        .routes(
            entities::SUBSCRIPTION,
            &["create", "update", "delete", "workerunfollow"],
            subscriptions,
        )
        .routes(entities::POST, CRUD, posts)
}
