// workhub-messaging-core/src/handler.rs
use crate::MessagingError;
use async_trait::async_trait;

#[async_trait]
pub trait EventCallback: Send + Sync {
    async fn handle(&self, routing_key: &str, body: &[u8]) -> Result<(), MessagingError>;
}

/// When a consumer acknowledges a delivery to the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// Ack as soon as the delivery arrives. A failing handler loses the event.
    #[default]
    OnReceipt,
    /// Ack after the handler succeeds; reject without requeue (dead-letter) when it fails.
    AfterHandler,
}

impl std::str::FromStr for AckMode {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on-receipt" | "on_receipt" => Ok(Self::OnReceipt),
            "after-handler" | "after_handler" => Ok(Self::AfterHandler),
            _ => Err(MessagingError::ConfigInvalid {
                var: "WORKHUB_ACK_MODE".to_string(),
                reason: format!("unknown ack mode: {s}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_mode_parses() {
        assert_eq!("on-receipt".parse::<AckMode>().unwrap(), AckMode::OnReceipt);
        assert_eq!("AFTER_HANDLER".parse::<AckMode>().unwrap(), AckMode::AfterHandler);
        assert!("sometimes".parse::<AckMode>().is_err());
        assert_eq!(AckMode::default(), AckMode::OnReceipt);
    }
}
