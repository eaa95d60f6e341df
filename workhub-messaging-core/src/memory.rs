// workhub-messaging-core/src/memory.rs
//! In-process topic exchange.
//!
//! Same routing behaviour as the broker: durable queues bound by topic
//! patterns, one copy per matching queue, FIFO per queue, and messages that
//! match no queue are gone. Used for tests and single-process setups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::routing::topic_matches;
use crate::{AckMode, Envelope, EventBus, EventCallback, MessagingError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,
}

struct QueueState {
    bindings: Vec<String>,
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: Option<mpsc::UnboundedReceiver<Delivery>>,
}

impl QueueState {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            bindings: Vec::new(),
            sender,
            receiver: Some(receiver),
        }
    }

    fn is_bound_to(&self, routing_key: &str) -> bool {
        self.bindings.iter().any(|b| topic_matches(b, routing_key))
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    published: Vec<Envelope>,
    dead_letters: HashMap<String, Vec<Delivery>>,
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    ack_mode: AckMode,
    log_published: bool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ack_mode(ack_mode: AckMode) -> Self {
        Self {
            ack_mode,
            ..Self::default()
        }
    }

    /// Keeps a copy of every accepted envelope until [`Self::take_published`]
    /// drains it. Off by default.
    pub fn with_publish_log(mut self) -> Self {
        self.log_published = true;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>, MessagingError> {
        self.state
            .lock()
            .map_err(|_| MessagingError::Connection("in-memory broker state poisoned".into()))
    }

    /// Envelopes accepted since the last call, in publish order. Always empty
    /// unless the broker was built [`with_publish_log`](Self::with_publish_log).
    pub fn take_published(&self) -> Vec<Envelope> {
        self.lock()
            .map(|mut s| std::mem::take(&mut s.published))
            .unwrap_or_default()
    }

    /// Deliveries rejected by a failing handler under [`AckMode::AfterHandler`].
    pub fn dead_letters(&self, queue: &str) -> Vec<Delivery> {
        self.lock()
            .ok()
            .and_then(|s| s.dead_letters.get(queue).cloned())
            .unwrap_or_default()
    }

    pub fn bindings(&self, queue: &str) -> Vec<String> {
        self.lock()
            .ok()
            .and_then(|s| s.queues.get(queue).map(|q| q.bindings.clone()))
            .unwrap_or_default()
    }

    fn declare(state: &mut BrokerState, queue: &str, bindings: &[&str]) {
        let q = state
            .queues
            .entry(queue.to_string())
            .or_insert_with(QueueState::new);
        for binding in bindings {
            if !q.bindings.iter().any(|b| b == binding) {
                q.bindings.push(binding.to_string());
            }
        }
    }
}

#[async_trait]
impl EventBus for InMemoryBroker {
    async fn publish(&self, envelope: &Envelope) -> Result<(), MessagingError> {
        let body = envelope.body()?;
        let mut state = self.lock()?;

        let mut routed = 0usize;
        for (name, queue) in state.queues.iter() {
            if !queue.is_bound_to(&envelope.routing_key) {
                continue;
            }
            let delivery = Delivery {
                routing_key: envelope.routing_key.clone(),
                body: body.clone(),
            };
            if queue.sender.send(delivery).is_err() {
                warn!(queue = %name, "queue consumer has gone away");
            }
            routed += 1;
        }

        if routed == 0 {
            debug!(routing_key = %envelope.routing_key, "no queue bound, message discarded");
        }
        if self.log_published {
            state.published.push(envelope.clone());
        }
        Ok(())
    }

    async fn provision(&self, queue: &str, bindings: &[&str]) -> Result<(), MessagingError> {
        let mut state = self.lock()?;
        Self::declare(&mut state, queue, bindings);
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        bindings: &[&str],
        handler: Arc<dyn EventCallback>,
    ) -> Result<(), MessagingError> {
        let mut receiver = {
            let mut state = self.lock()?;
            Self::declare(&mut state, queue, bindings);
            state
                .queues
                .get_mut(queue)
                .and_then(|q| q.receiver.take())
                .ok_or_else(|| {
                    MessagingError::Subscribe(format!("queue {queue} already has a consumer"))
                })?
        };

        let queue_owned = queue.to_string();
        let ack_mode = self.ack_mode;
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            while let Some(delivery) = receiver.recv().await {
                let Err(err) = handler.handle(&delivery.routing_key, &delivery.body).await else {
                    continue;
                };
                error!(
                    queue = %queue_owned,
                    routing_key = %delivery.routing_key,
                    error = %err,
                    "handler error"
                );
                if ack_mode == AckMode::AfterHandler {
                    if let Ok(mut s) = state.lock() {
                        s.dead_letters
                            .entry(queue_owned.clone())
                            .or_default()
                            .push(delivery);
                    }
                }
            }
            debug!(queue = %queue_owned, "consumer loop ended");
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RoutingKey;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedSender;

    struct Forward(UnboundedSender<String>);

    #[async_trait]
    impl EventCallback for Forward {
        async fn handle(&self, routing_key: &str, _body: &[u8]) -> Result<(), MessagingError> {
            let _ = self.0.send(routing_key.to_string());
            Ok(())
        }
    }

    struct Reject;

    #[async_trait]
    impl EventCallback for Reject {
        async fn handle(&self, _routing_key: &str, _body: &[u8]) -> Result<(), MessagingError> {
            Err(MessagingError::Handler("nope".into()))
        }
    }

    fn envelope(key: &str) -> Envelope {
        Envelope::new(&key.parse::<RoutingKey>().unwrap(), json!({"id": 1}))
    }

    #[tokio::test]
    async fn delivers_once_per_queue_in_order() {
        let broker = InMemoryBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        broker
            .subscribe("q", &["user.#", "user.worker.*"], Arc::new(Forward(tx)))
            .await
            .unwrap();

        broker.publish(&envelope("user.worker.create_offre")).await.unwrap();
        broker.publish(&envelope("user.worker.delete_offre")).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some("user.worker.create_offre"));
        assert_eq!(second.as_deref(), Some("user.worker.delete_offre"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn provisioned_queues_hold_messages_until_consumed() {
        let broker = InMemoryBroker::new();
        broker.provision("q", &["user.worker.*"]).await.unwrap();
        broker.publish(&envelope("user.worker.create_offre")).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        broker.subscribe("q", &[], Arc::new(Forward(tx))).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(got.as_deref(), Some("user.worker.create_offre"));
        assert_eq!(broker.bindings("q"), vec!["user.worker.*"]);
    }

    #[tokio::test]
    async fn publish_log_is_off_by_default() {
        let broker = InMemoryBroker::new();
        broker.publish(&envelope("user.worker.create_offre")).await.unwrap();
        assert!(broker.take_published().is_empty());
    }

    #[tokio::test]
    async fn unbound_messages_are_discarded_but_logged_when_asked() {
        let broker = InMemoryBroker::new().with_publish_log();
        broker.publish(&envelope("user.worker.create_offre")).await.unwrap();
        broker.publish(&envelope("user.worker.delete_offre")).await.unwrap();

        let logged: Vec<String> = broker
            .take_published()
            .into_iter()
            .map(|e| e.routing_key)
            .collect();
        assert_eq!(logged, vec!["user.worker.create_offre", "user.worker.delete_offre"]);
        // drained
        assert!(broker.take_published().is_empty());
    }

    #[tokio::test]
    async fn second_consumer_on_a_queue_is_refused() {
        let broker = InMemoryBroker::new();
        broker.subscribe("q", &["a.#"], Arc::new(Reject)).await.unwrap();
        let err = broker.subscribe("q", &["a.#"], Arc::new(Reject)).await.unwrap_err();
        assert!(matches!(err, MessagingError::Subscribe(_)));
    }

    #[tokio::test]
    async fn after_handler_mode_dead_letters_failures() {
        let broker = InMemoryBroker::with_ack_mode(AckMode::AfterHandler);
        broker.subscribe("q", &["user.#"], Arc::new(Reject)).await.unwrap();
        broker.publish(&envelope("user.worker.create_offre")).await.unwrap();

        let mut dead = Vec::new();
        for _ in 0..100 {
            dead = broker.dead_letters("q");
            if !dead.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].routing_key, "user.worker.create_offre");
    }

    #[tokio::test]
    async fn on_receipt_mode_loses_failures() {
        let broker = InMemoryBroker::new();
        broker.subscribe("q", &["user.#"], Arc::new(Reject)).await.unwrap();
        broker.publish(&envelope("user.worker.create_offre")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(broker.dead_letters("q").is_empty());
    }
}
