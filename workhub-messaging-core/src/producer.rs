// workhub-messaging-core/src/producer.rs
//! Outbound side: one envelope per interested destination.
//!
//! Propagation runs after the local write has committed and never rolls it
//! back. A failed publish is logged and reported; there is no outbox or
//! retry, so a destination that misses an event stays stale until the next
//! event for the same entity.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn, Instrument, Span};

use crate::catalog::{producer_binding, producer_queue, ConsumerTopology, EventType};
use crate::{telemetry, Envelope, EventBus, MessagingError, RoutingKey};

/// Result of publishing to one destination.
#[derive(Debug)]
pub struct PublishAttempt {
    pub destination: String,
    /// `None` when the address could not be encoded.
    pub routing_key: Option<String>,
    pub result: Result<(), MessagingError>,
}

#[derive(Debug, Default)]
pub struct FanOutReport {
    pub attempts: Vec<PublishAttempt>,
}

impl FanOutReport {
    pub fn delivered(&self) -> impl Iterator<Item = &PublishAttempt> {
        self.attempts.iter().filter(|a| a.result.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &PublishAttempt> {
        self.attempts.iter().filter(|a| a.result.is_err())
    }

    pub fn is_complete(&self) -> bool {
        self.attempts.iter().all(|a| a.result.is_ok())
    }
}

/// Publishing handle for one source service over a shared bus.
pub struct Publisher {
    source: String,
    bus: Arc<dyn EventBus>,
    span: Span,
}

impl Publisher {
    /// Provisions the source's own queue (bound `source.#`) and every queue in
    /// `downstream`, so events published before a consumer first starts are kept.
    pub async fn open(
        source: &str,
        bus: Arc<dyn EventBus>,
        downstream: &[ConsumerTopology],
    ) -> Result<Self, MessagingError> {
        let span = telemetry::service_span(source);

        async {
            let own_binding = producer_binding(source);
            bus.provision(&producer_queue(source), &[own_binding.as_str()])
                .await?;
            for topo in downstream {
                bus.provision(&topo.queue, &topo.binding_refs()).await?;
            }
            info!(downstream = downstream.len(), "publisher ready");
            Ok::<(), MessagingError>(())
        }
        .instrument(span.clone())
        .await?;

        Ok(Self {
            source: source.to_string(),
            bus,
            span,
        })
    }

    /// A publisher that provisions nothing.
    pub fn unprovisioned(source: &str, bus: Arc<dyn EventBus>) -> Self {
        Self {
            source: source.to_string(),
            span: telemetry::service_span(source),
            bus,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Publishes one persistent envelope.
    #[instrument(parent = &self.span, skip(self, payload), fields(routing_key = %routing_key))]
    pub async fn publish(
        &self,
        payload: &Value,
        routing_key: &RoutingKey,
    ) -> Result<(), MessagingError> {
        let envelope = Envelope::new(routing_key, payload.clone());
        self.bus.publish(&envelope).await?;
        debug!(message_id = %envelope.message_id, "published");
        Ok(())
    }

    /// Entry point for the CRUD layer, called once per committed write.
    ///
    /// Publishes once per destination. A failure for one destination never
    /// stops the attempts for the rest.
    #[instrument(parent = &self.span, skip(self, payload, destinations))]
    pub async fn on_write_committed(
        &self,
        entity: &str,
        action: &str,
        payload: &Value,
        destinations: &[&str],
    ) -> FanOutReport {
        let mut report = FanOutReport::default();

        for destination in destinations {
            let attempt = match RoutingKey::new(&self.source, entity, action, destination) {
                Ok(rk) => PublishAttempt {
                    destination: destination.to_string(),
                    routing_key: Some(rk.encode()),
                    result: self.publish(payload, &rk).await,
                },
                Err(e) => PublishAttempt {
                    destination: destination.to_string(),
                    routing_key: None,
                    result: Err(e),
                },
            };

            if let Err(e) = &attempt.result {
                warn!(
                    destination = %attempt.destination,
                    routing_key = ?attempt.routing_key,
                    error = %e,
                    "event not propagated"
                );
            }
            report.attempts.push(attempt);
        }

        report
    }

    /// Fans a declared event type out to its interest set.
    ///
    /// An event type declared for another source is not published: no consumer
    /// binds it under this source's namespace. Each destination is reported as
    /// an [`MessagingError::InvalidAddress`] attempt instead.
    pub async fn emit(&self, event: &EventType, payload: &Value) -> FanOutReport {
        if event.source != self.source {
            warn!(
                expected = %self.source,
                declared = %event.source,
                entity = event.entity,
                action = event.action,
                "event type declared for another source, not published"
            );
            let attempts = event
                .destinations
                .iter()
                .map(|destination| PublishAttempt {
                    destination: destination.to_string(),
                    routing_key: None,
                    result: Err(MessagingError::InvalidAddress {
                        segment: event.source.to_string(),
                        reason: "event type belongs to another source",
                    }),
                })
                .collect();
            return FanOutReport { attempts };
        }
        self.on_write_committed(event.entity, event.action, payload, event.destinations)
            .await
    }
}
