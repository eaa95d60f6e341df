// workhub-messaging-core/src/dispatch.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, instrument, Span};

use crate::replica::ReplicaHandler;
use crate::{telemetry, EventCallback, MessagingError, RoutingKey};

/// Handlers by `(entity_class, action)`. Fixed once the consumer starts.
#[derive(Clone, Default)]
pub struct DispatchTable {
    routes: HashMap<(String, String), Arc<dyn ReplicaHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, entity: &str, action: &str, handler: Arc<dyn ReplicaHandler>) -> Self {
        self.routes
            .insert((entity.to_string(), action.to_string()), handler);
        self
    }

    pub fn routes(self, entity: &str, actions: &[&str], handler: Arc<dyn ReplicaHandler>) -> Self {
        actions.iter().fold(self, |table, action| {
            table.route(entity, action, Arc::clone(&handler))
        })
    }

    pub fn lookup(&self, entity: &str, action: &str) -> Option<&Arc<dyn ReplicaHandler>> {
        self.routes.get(&(entity.to_string(), action.to_string()))
    }

    pub fn handles_entity(&self, entity: &str) -> bool {
        self.routes.keys().any(|(e, _)| e == entity)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied { entity: String, action: String },
    Dropped(DropReason),
}

/// Why a delivery was ignored. None of these are errors: the exchange is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    MalformedKey,
    OtherDestination(String),
    NoHandler { entity: String, action: String },
}

/// Routes deliveries addressed to one service into its replica handlers.
pub struct Dispatcher {
    service: String,
    table: DispatchTable,
    span: Span,
}

impl Dispatcher {
    pub fn new(service: impl Into<String>, table: DispatchTable) -> Self {
        let service = service.into();
        let span = telemetry::service_span(&service);
        Self {
            service,
            table,
            span,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    #[instrument(parent = &self.span, skip(self, body))]
    pub async fn dispatch(
        &self,
        routing_key: &str,
        body: &[u8],
    ) -> Result<DispatchOutcome, MessagingError> {
        let rk = match RoutingKey::decode(routing_key) {
            Ok(rk) => rk,
            Err(e) => {
                debug!(routing_key, error = %e, "dropping unparsable routing key");
                return Ok(DispatchOutcome::Dropped(DropReason::MalformedKey));
            }
        };

        if !rk.is_addressed_to(&self.service) {
            debug!(routing_key, destination = %rk.destination, "dropping event for another service");
            return Ok(DispatchOutcome::Dropped(DropReason::OtherDestination(
                rk.destination,
            )));
        }

        let Some(handler) = self.table.lookup(&rk.entity, &rk.action) else {
            debug!(routing_key, "no handler registered");
            return Ok(DispatchOutcome::Dropped(DropReason::NoHandler {
                entity: rk.entity,
                action: rk.action,
            }));
        };

        let payload: serde_json::Value = serde_json::from_slice(body)?;
        if let Err(e) = handler.apply(&rk.action, payload).await {
            error!(routing_key, error = %e, "replica handler failed");
            return Err(MessagingError::Handler(format!("{routing_key}: {e}")));
        }

        debug!(routing_key, "event applied");
        Ok(DispatchOutcome::Applied {
            entity: rk.entity,
            action: rk.action,
        })
    }
}

#[async_trait]
impl EventCallback for Dispatcher {
    async fn handle(&self, routing_key: &str, body: &[u8]) -> Result<(), MessagingError> {
        self.dispatch(routing_key, body).await.map(|_| ())
    }
}
