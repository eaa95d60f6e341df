// workhub-messaging-core/src/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{MessagingError, RoutingKey};

/// One event on the wire.
///
/// Only `payload` travels as the message body. `message_id` and
/// `published_at_utc` ride in broker properties for log correlation and
/// never influence routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: Uuid,
    pub routing_key: String,
    pub payload: serde_json::Value,
    pub persistent: bool,
    pub published_at_utc: DateTime<Utc>,
}

impl Envelope {
    pub fn new(routing_key: &RoutingKey, payload: serde_json::Value) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            routing_key: routing_key.encode(),
            payload,
            persistent: true,
            published_at_utc: Utc::now(),
        }
    }

    /// JSON body: the full entity for create/update, the bare identifier for delete.
    pub fn body(&self) -> Result<Vec<u8>, MessagingError> {
        Ok(serde_json::to_vec(&self.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelopes_are_persistent() {
        let rk = RoutingKey::new("user", "worker", "create", "offre").unwrap();
        let env = Envelope::new(&rk, json!({"id": 7, "user": 42}));
        assert!(env.persistent);
        assert_eq!(env.routing_key, "user.worker.create_offre");
    }

    #[test]
    fn body_is_the_bare_payload() {
        let rk = RoutingKey::new("abonnement", "subscription", "delete", "recommendation").unwrap();
        let env = Envelope::new(&rk, json!(12));
        assert_eq!(env.body().unwrap(), b"12");
    }
}
