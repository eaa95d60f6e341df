// workhub-messaging-core/src/error.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("handler error: {0}")]
    Handler(String),

    /// A segment handed to the routing-key encoder cannot be addressed.
    #[error("invalid address segment {segment:?}: {reason}")]
    InvalidAddress {
        segment: String,
        reason: &'static str,
    },

    /// A received routing key does not follow `source.entity.action_destination`.
    #[error("malformed routing key {key:?}: {reason}")]
    MalformedKey { key: String, reason: &'static str },

    #[error("configuration missing: {var}")]
    ConfigMissing { var: String },

    #[error("configuration invalid for {var}: {reason}")]
    ConfigInvalid { var: String, reason: String },
}

impl MessagingError {
    /// Broker-side failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MessagingError::Connection(_)
                | MessagingError::Publish(_)
                | MessagingError::Subscribe(_)
        )
    }

    /// Violations of the addressing contract. Consumers treat these as routing noise.
    pub fn is_addressing(&self) -> bool {
        matches!(
            self,
            MessagingError::InvalidAddress { .. } | MessagingError::MalformedKey { .. }
        )
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(e: serde_json::Error) -> Self {
        MessagingError::Serialization(e.to_string())
    }
}
