// workhub-messaging-core/src/replica/handlers.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{
    Fields, LoginStatus, PersonKind, PersonReplica, RecordId, ReplicaHandler, ReplicaOp,
    ReplicaStore, PERSONS,
};
use crate::MessagingError;

const PERSON_ID_FIELDS: &[&str] = &["id_person", "id"];
const USER_ID_FIELDS: &[&str] = &["id_user", "user"];

fn unsupported(entity: &str, action: &str) -> MessagingError {
    MessagingError::Handler(format!("{entity} replica does not support action {action:?}"))
}

fn first_id(payload: &Value, fields: &[&str]) -> Option<RecordId> {
    fields
        .iter()
        .find_map(|f| payload.get(*f).and_then(RecordId::from_value))
}

fn into_object(payload: Value) -> Result<Fields, MessagingError> {
    match payload {
        Value::Object(map) => Ok(map),
        other => Err(MessagingError::Handler(format!(
            "expected an entity object, got {other}"
        ))),
    }
}

async fn stored_status(
    store: &dyn ReplicaStore,
    id: &RecordId,
) -> Result<Option<LoginStatus>, MessagingError> {
    Ok(store
        .get(PERSONS, id)
        .await?
        .and_then(|fields| fields.get("login_status").cloned())
        .and_then(|v| serde_json::from_value(v).ok()))
}

/// Worker and customer replicas. Both live in the person collection, told
/// apart by the `user_type` discriminator.
pub struct PersonReplicaHandler {
    kind: PersonKind,
    store: Arc<dyn ReplicaStore>,
}

impl PersonReplicaHandler {
    pub fn new(kind: PersonKind, store: Arc<dyn ReplicaStore>) -> Self {
        Self { kind, store }
    }

    async fn create(&self, payload: &Value) -> Result<(), MessagingError> {
        let id = RecordId::from_payload(payload, PERSON_ID_FIELDS)?;

        // a login event may have raced ahead of the create
        let login_status = match payload.get("login_status") {
            Some(v) => serde_json::from_value(v.clone())?,
            None => stored_status(self.store.as_ref(), &id)
                .await?
                .unwrap_or_default(),
        };

        let person = PersonReplica {
            id_person: id.clone(),
            id_user: first_id(payload, USER_ID_FIELDS),
            login_status,
            user_type: Some(self.kind),
        };
        self.store.replace(PERSONS, &id, person.into_fields()?).await
    }

    async fn update(&self, payload: &Value) -> Result<(), MessagingError> {
        let id = RecordId::from_payload(payload, PERSON_ID_FIELDS)?;

        let mut fields = Fields::new();
        fields.insert("id_person".into(), id.to_value());
        if let Some(user) = first_id(payload, USER_ID_FIELDS) {
            fields.insert("id_user".into(), user.to_value());
        }
        if let Some(status) = payload.get("login_status") {
            let status: LoginStatus = serde_json::from_value(status.clone())?;
            fields.insert("login_status".into(), serde_json::to_value(status)?);
        }
        fields.insert("user_type".into(), serde_json::to_value(self.kind)?);

        self.store.upsert(PERSONS, &id, fields).await
    }

    async fn delete(&self, payload: &Value) -> Result<(), MessagingError> {
        let id = RecordId::from_payload(payload, PERSON_ID_FIELDS)?;
        if !self.store.delete(PERSONS, &id).await? {
            debug!(id = %id, kind = ?self.kind, "delete for absent person replica");
        }
        Ok(())
    }
}

#[async_trait]
impl ReplicaHandler for PersonReplicaHandler {
    async fn apply(&self, action: &str, payload: Value) -> Result<(), MessagingError> {
        match ReplicaOp::from_action(action) {
            Some(ReplicaOp::Create) => self.create(&payload).await,
            Some(ReplicaOp::Update) => self.update(&payload).await,
            Some(ReplicaOp::Delete) => self.delete(&payload).await,
            None => Err(unsupported("person", action)),
        }
    }
}

/// Login/logout events. Touches only `login_status` on an existing replica
/// and creates a minimal one when the person has not been replicated yet.
pub struct LoginStatusHandler {
    store: Arc<dyn ReplicaStore>,
}

impl LoginStatusHandler {
    pub fn new(store: Arc<dyn ReplicaStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReplicaHandler for LoginStatusHandler {
    async fn apply(&self, action: &str, payload: Value) -> Result<(), MessagingError> {
        let status = match payload.get("login_status") {
            Some(v) => serde_json::from_value(v.clone())?,
            None => LoginStatus::from_action(action).ok_or_else(|| unsupported("user", action))?,
        };
        let id = RecordId::from_payload(&payload, PERSON_ID_FIELDS)?;

        let fields = if self.store.get(PERSONS, &id).await?.is_some() {
            let mut fields = Fields::new();
            fields.insert("login_status".into(), serde_json::to_value(status)?);
            fields
        } else {
            debug!(id = %id, "login status for unreplicated person, creating minimal replica");
            PersonReplica {
                id_person: id.clone(),
                id_user: first_id(&payload, USER_ID_FIELDS),
                login_status: status,
                user_type: payload
                    .get("user_type")
                    .and_then(|v| serde_json::from_value(v.clone()).ok()),
            }
            .into_fields()?
        };

        self.store.upsert(PERSONS, &id, fields).await
    }
}

/// Keyed replica that stores the entity object as received.
pub struct RecordReplicaHandler {
    collection: String,
    id_field: String,
    aliases: HashMap<String, ReplicaOp>,
    store: Arc<dyn ReplicaStore>,
}

impl RecordReplicaHandler {
    pub fn new(
        collection: impl Into<String>,
        id_field: impl Into<String>,
        store: Arc<dyn ReplicaStore>,
    ) -> Self {
        Self {
            collection: collection.into(),
            id_field: id_field.into(),
            aliases: HashMap::new(),
            store,
        }
    }

    /// Treats a domain-specific action as one of the three replica operations.
    pub fn with_alias(mut self, action: impl Into<String>, op: ReplicaOp) -> Self {
        self.aliases.insert(action.into(), op);
        self
    }
}

#[async_trait]
impl ReplicaHandler for RecordReplicaHandler {
    async fn apply(&self, action: &str, payload: Value) -> Result<(), MessagingError> {
        let op = self
            .aliases
            .get(action)
            .copied()
            .or_else(|| ReplicaOp::from_action(action))
            .ok_or_else(|| unsupported(&self.collection, action))?;
        let id = RecordId::from_payload(&payload, &[self.id_field.as_str()])?;

        match op {
            ReplicaOp::Create => {
                let fields = into_object(payload)?;
                self.store.replace(&self.collection, &id, fields).await
            }
            ReplicaOp::Update => {
                let fields = into_object(payload)?;
                self.store.upsert(&self.collection, &id, fields).await
            }
            ReplicaOp::Delete => {
                if !self.store.delete(&self.collection, &id).await? {
                    debug!(collection = %self.collection, id = %id, "delete for absent replica");
                }
                Ok(())
            }
        }
    }
}
