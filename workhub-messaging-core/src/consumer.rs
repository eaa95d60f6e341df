// workhub-messaging-core/src/consumer.rs
use std::sync::Arc;

use tracing::info;

use crate::catalog::ConsumerTopology;
use crate::{DispatchTable, Dispatcher, EventBus, MessagingError};

/// Binds the service's queue and starts its background receive loop.
///
/// The loop belongs to the bus and runs for the life of the process; this
/// returns as soon as it has been started. Fails with
/// [`MessagingError::Subscribe`] when the bus is attached to an exchange other
/// than the topology's, since none of its bindings could ever match there.
pub async fn start(
    bus: &dyn EventBus,
    topology: &ConsumerTopology,
    table: DispatchTable,
) -> Result<(), MessagingError> {
    if let Some(exchange) = bus.exchange() {
        if exchange != topology.exchange {
            return Err(MessagingError::Subscribe(format!(
                "{} consumes {} but the bus is attached to {exchange}",
                topology.service, topology.exchange
            )));
        }
    }

    let dispatcher = Arc::new(Dispatcher::new(topology.service.clone(), table));
    bus.subscribe(&topology.queue, &topology.binding_refs(), dispatcher)
        .await?;

    info!(
        service = %topology.service,
        queue = %topology.queue,
        exchange = %topology.exchange,
        bindings = ?topology.bindings,
        "replica consumer started"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{self, services};
    use crate::{Envelope, EventCallback};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Bus attached to one named exchange that records subscriptions.
    struct NamedBus {
        exchange: String,
        subscribed: Mutex<Vec<String>>,
    }

    impl NamedBus {
        fn on(exchange: &str) -> Self {
            Self {
                exchange: exchange.to_string(),
                subscribed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EventBus for NamedBus {
        async fn publish(&self, _envelope: &Envelope) -> Result<(), MessagingError> {
            Ok(())
        }

        async fn provision(&self, _queue: &str, _bindings: &[&str]) -> Result<(), MessagingError> {
            Ok(())
        }

        async fn subscribe(
            &self,
            queue: &str,
            _bindings: &[&str],
            _handler: Arc<dyn EventCallback>,
        ) -> Result<(), MessagingError> {
            self.subscribed.lock().unwrap().push(queue.to_string());
            Ok(())
        }

        fn exchange(&self) -> Option<&str> {
            Some(self.exchange.as_str())
        }
    }

    #[tokio::test]
    async fn subscribes_on_the_topology_exchange() {
        let bus = NamedBus::on("user_events");
        let topology = catalog::consumer_topology(services::OFFRE, services::USER).unwrap();
        start(&bus, &topology, DispatchTable::new()).await.unwrap();
        assert_eq!(*bus.subscribed.lock().unwrap(), vec!["user_offre_queue"]);
    }

    #[tokio::test]
    async fn refuses_a_bus_on_another_exchange() {
        let bus = NamedBus::on("publication_events");
        let topology = catalog::consumer_topology(services::OFFRE, services::USER).unwrap();
        let err = start(&bus, &topology, DispatchTable::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Subscribe(_)));
        assert!(bus.subscribed.lock().unwrap().is_empty());
    }
}
