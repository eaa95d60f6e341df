use std::sync::Arc;

use serde_json::Value;
use tracing::warn;
use workhub_messaging_core::catalog::EventType;
use workhub_messaging_core::{FanOutReport, MessagingError, Publisher};

use crate::{RabbitEventBus, RabbitMqOptions};

/// Open, fan out one event, close.
///
/// For callers without a long-lived bus. The connection is closed on every
/// path once it has been opened; a failed connect is returned to the caller,
/// whose local write has already committed and must stand.
pub async fn publish_scoped(
    opts: RabbitMqOptions,
    event: &EventType,
    payload: &Value,
) -> Result<FanOutReport, MessagingError> {
    let bus = Arc::new(RabbitEventBus::connect(opts).await?);

    let outcome = match Publisher::open(event.source, bus.clone(), &[]).await {
        Ok(publisher) => Ok(publisher.emit(event, payload).await),
        Err(e) => Err(e),
    };

    if let Err(e) = bus.close().await {
        warn!(source = %event.source, "closing publish connection failed: {e}");
    }
    outcome
}
