// workhub-messaging-core/src/replica/store.rs
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Fields, RecordId};
use crate::MessagingError;

/// Local datastore the replica handlers mutate.
///
/// Owned by the surrounding service; each implementation brings its own
/// concurrency discipline. `collection` names the entity class.
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    /// Writes the record, discarding whatever was stored under `id` before.
    async fn replace(
        &self,
        collection: &str,
        id: &RecordId,
        fields: Fields,
    ) -> Result<(), MessagingError>;

    /// Merges `fields` into the record, creating it when absent.
    async fn upsert(
        &self,
        collection: &str,
        id: &RecordId,
        fields: Fields,
    ) -> Result<(), MessagingError>;

    /// Returns whether a record was removed.
    async fn delete(&self, collection: &str, id: &RecordId) -> Result<bool, MessagingError>;

    async fn get(&self, collection: &str, id: &RecordId) -> Result<Option<Fields>, MessagingError>;

    async fn count(&self, collection: &str) -> Result<usize, MessagingError>;
}

#[derive(Debug, Default)]
pub struct InMemoryReplicaStore {
    collections: RwLock<HashMap<String, HashMap<RecordId, Fields>>>,
}

impl InMemoryReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplicaStore for InMemoryReplicaStore {
    async fn replace(
        &self,
        collection: &str,
        id: &RecordId,
        fields: Fields,
    ) -> Result<(), MessagingError> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &RecordId,
        fields: Fields,
    ) -> Result<(), MessagingError> {
        let mut guard = self.collections.write().await;
        let record = guard
            .entry(collection.to_string())
            .or_default()
            .entry(id.clone())
            .or_default();
        record.extend(fields);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> Result<bool, MessagingError> {
        Ok(self
            .collections
            .write()
            .await
            .get_mut(collection)
            .and_then(|records| records.remove(id))
            .is_some())
    }

    async fn get(&self, collection: &str, id: &RecordId) -> Result<Option<Fields>, MessagingError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned())
    }

    async fn count(&self, collection: &str) -> Result<usize, MessagingError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map_or(0, HashMap::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[tokio::test]
    async fn upsert_keeps_absent_fields() {
        let store = InMemoryReplicaStore::new();
        let id = RecordId::Int(1);
        store
            .replace("service", &id, fields(json!({"id": 1, "service_name": "plumbing"})))
            .await
            .unwrap();
        store
            .upsert("service", &id, fields(json!({"service_description": "pipes"})))
            .await
            .unwrap();

        let record = store.get("service", &id).await.unwrap().unwrap();
        assert_eq!(record["service_name"], "plumbing");
        assert_eq!(record["service_description"], "pipes");
    }

    #[tokio::test]
    async fn replace_discards_previous_fields() {
        let store = InMemoryReplicaStore::new();
        let id = RecordId::Int(1);
        store
            .replace("post", &id, fields(json!({"id": 1, "title": "a"})))
            .await
            .unwrap();
        store
            .replace("post", &id, fields(json!({"id": 1})))
            .await
            .unwrap();

        let record = store.get("post", &id).await.unwrap().unwrap();
        assert!(!record.contains_key("title"));
        assert_eq!(store.count("post").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deleting_an_absent_record_is_a_no_op() {
        let store = InMemoryReplicaStore::new();
        assert!(!store.delete("person", &RecordId::Int(9)).await.unwrap());
        assert_eq!(store.count("person").await.unwrap(), 0);
    }
}
