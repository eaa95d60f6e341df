// workhub-messaging-core/src/bus.rs
use std::sync::Arc;
use async_trait::async_trait;
use crate::{Envelope, EventCallback, MessagingError};

/// One topic exchange, seen from a single service.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes one envelope. Returns once the broker has accepted the frame.
    async fn publish(&self, envelope: &Envelope) -> Result<(), MessagingError>;

    /// Declares a durable queue and binds it, without consuming from it.
    async fn provision(&self, queue: &str, bindings: &[&str]) -> Result<(), MessagingError>;

    /// Provisions `queue` and starts a background loop feeding its deliveries to `handler`.
    async fn subscribe(
        &self,
        queue: &str,
        bindings: &[&str],
        handler: Arc<dyn EventCallback>,
    ) -> Result<(), MessagingError>;

    /// The exchange this bus is attached to. `None` for buses that carry every
    /// source's events.
    fn exchange(&self) -> Option<&str> {
        None
    }
}
