use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::*,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::RwLock, time::sleep};
use tracing::{debug, error, info, warn};

use crate::options::{dlq_queue, RabbitMqOptions};
use workhub_messaging_core::{AckMode, Envelope, EventBus, EventCallback, MessagingError};

const PERSISTENT: u8 = 2;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

struct ConnState {
    conn: Connection,
    pub_ch: Channel,
}

fn conn_err(e: lapin::Error) -> MessagingError {
    MessagingError::Connection(e.to_string())
}

/// One topic exchange over a single AMQP connection.
///
/// Built once at startup and shared by the service's publisher and consumers;
/// publishes go through one channel, each consumer gets its own. A closed
/// channel on a live connection is replaced without reconnecting; a dead
/// connection is closed before its replacement is opened.
pub struct RabbitEventBus {
    opts: RabbitMqOptions,
    state: Arc<RwLock<Option<ConnState>>>,
    closed: Arc<AtomicBool>,
    connections_opened: Arc<AtomicUsize>,
}

impl RabbitEventBus {
    pub async fn connect(opts: RabbitMqOptions) -> Result<Self, MessagingError> {
        let bus = Self {
            opts,
            state: Arc::new(RwLock::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
            connections_opened: Arc::new(AtomicUsize::new(0)),
        };
        bus.restore_channel().await?;
        Ok(bus)
    }

    pub fn options(&self) -> &RabbitMqOptions {
        &self.opts
    }

    /// Connections opened over the life of this bus, reconnects included.
    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::SeqCst)
    }

    async fn within<T, F>(&self, what: &str, fut: F) -> Result<T, MessagingError>
    where
        F: Future<Output = Result<T, MessagingError>>,
    {
        tokio::time::timeout(self.opts.operation_timeout, fut)
            .await
            .map_err(|_| {
                MessagingError::Connection(format!(
                    "{what} timed out after {:?}",
                    self.opts.operation_timeout
                ))
            })?
    }

    /// Opens the publish channel: confirms if enabled, then the durable exchange.
    async fn open_publish_channel(&self, conn: &Connection) -> Result<Channel, MessagingError> {
        let ch = conn.create_channel().await.map_err(conn_err)?;

        if self.opts.confirms {
            ch.confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(conn_err)?;
        }

        ch.exchange_declare(
            &self.opts.exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: self.opts.durable,
                auto_delete: false,
                internal: false,
                nowait: false,
                passive: false,
            },
            FieldTable::default(),
        )
        .await
        .map_err(conn_err)?;

        Ok(ch)
    }

    /// Brings the publish channel back under the write lock.
    ///
    /// Another task may have restored it while this one waited for the lock,
    /// so the state is checked again before anything is opened.
    async fn restore_channel(&self) -> Result<Channel, MessagingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MessagingError::Connection("event bus is closed".into()));
        }

        let mut guard = self.state.write().await;

        if let Some(state) = guard.as_mut() {
            if state.pub_ch.status().connected() {
                return Ok(state.pub_ch.clone());
            }
            if state.conn.status().connected() {
                let ch = self
                    .within("open channel", self.open_publish_channel(&state.conn))
                    .await?;
                state.pub_ch = ch.clone();
                debug!(exchange = %self.opts.exchange, "publish channel reopened");
                return Ok(ch);
            }
        }

        if let Some(stale) = guard.take() {
            let closing = self
                .within("close stale connection", async {
                    stale.conn.close(200, "reconnecting").await.map_err(conn_err)
                })
                .await;
            if let Err(e) = closing {
                debug!(exchange = %self.opts.exchange, "stale connection close: {e}");
            }
        }

        let (conn, ch) = self
            .within("connect", async {
                let conn = Connection::connect(&self.opts.uri, ConnectionProperties::default())
                    .await
                    .map_err(conn_err)?;
                let ch = self.open_publish_channel(&conn).await?;
                Ok((conn, ch))
            })
            .await?;
        self.connections_opened.fetch_add(1, Ordering::SeqCst);
        *guard = Some(ConnState {
            conn,
            pub_ch: ch.clone(),
        });

        info!(
            exchange = %self.opts.exchange,
            service = %self.opts.service,
            "RabbitMQ connected"
        );
        Ok(ch)
    }

    async fn current_channel(&self) -> Result<Channel, MessagingError> {
        if let Some(ch) = self
            .state
            .read()
            .await
            .as_ref()
            .map(|s| s.pub_ch.clone())
        {
            if ch.status().connected() {
                return Ok(ch);
            }
            warn!(exchange = %self.opts.exchange, "publish channel lost, restoring");
        }
        self.restore_channel().await
    }

    /// A fresh channel owned by one consumer loop.
    async fn consumer_channel(&self) -> Result<Channel, MessagingError> {
        self.current_channel().await?;
        let guard = self.state.read().await;
        let state = guard
            .as_ref()
            .ok_or_else(|| MessagingError::Connection("not connected".into()))?;
        self.within("open consumer channel", async {
            state.conn.create_channel().await.map_err(conn_err)
        })
        .await
    }

    fn queue_options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            durable: self.opts.durable,
            auto_delete: false,
            exclusive: false,
            nowait: false,
            passive: false,
        }
    }

    /// Declares `queue` and binds it once per pattern.
    ///
    /// Under [`AckMode::AfterHandler`] the queue dead-letters rejected
    /// deliveries into `<queue>.dlq`. Switching modes on an existing queue
    /// is refused by the broker, since queue arguments are fixed at creation.
    async fn declare_topology_for_queue(
        &self,
        queue: &str,
        bindings: &[&str],
        ch: &Channel,
    ) -> Result<(), MessagingError> {
        let mut args = FieldTable::default();
        if self.opts.ack_mode == AckMode::AfterHandler {
            let dlq = dlq_queue(queue);
            args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(self.opts.exchange.clone().into()),
            );
            args.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(dlq.clone().into()),
            );

            ch.queue_declare(&dlq, self.queue_options(), FieldTable::default())
                .await
                .map_err(conn_err)?;
            ch.queue_bind(
                &dlq,
                &self.opts.exchange,
                &dlq,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(conn_err)?;
        }

        ch.queue_declare(queue, self.queue_options(), args)
            .await
            .map_err(conn_err)?;

        for rk in bindings {
            ch.queue_bind(
                queue,
                &self.opts.exchange,
                rk,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(conn_err)?;
        }

        debug!(queue, bindings = ?bindings, "queue topology declared");
        Ok(())
    }

    /// Closes the connection and stops consumer loops from reconnecting.
    /// Later calls are no-ops.
    pub async fn close(&self) -> Result<(), MessagingError> {
        self.closed.store(true, Ordering::SeqCst);
        let Some(state) = self.state.write().await.take() else {
            return Ok(());
        };
        self.within("close", async {
            state.conn.close(200, "closing").await.map_err(conn_err)
        })
        .await?;
        info!(exchange = %self.opts.exchange, "RabbitMQ connection closed");
        Ok(())
    }

    fn clone_for_task(&self) -> Self {
        Self {
            opts: self.opts.clone(),
            state: Arc::clone(&self.state),
            closed: Arc::clone(&self.closed),
            connections_opened: Arc::clone(&self.connections_opened),
        }
    }
}

#[async_trait]
impl EventBus for RabbitEventBus {
    async fn publish(&self, envelope: &Envelope) -> Result<(), MessagingError> {
        let body = envelope.body()?;
        let ch = self.current_channel().await?;

        let mut properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_message_id(envelope.message_id.to_string().into())
            .with_timestamp(envelope.published_at_utc.timestamp().max(0) as u64);
        if envelope.persistent {
            properties = properties.with_delivery_mode(PERSISTENT);
        }

        let confirm = self
            .within("publish", async {
                ch.basic_publish(
                    &self.opts.exchange,
                    &envelope.routing_key,
                    BasicPublishOptions {
                        mandatory: false,
                        immediate: false,
                    },
                    &body,
                    properties,
                )
                .await
                .map_err(|e| MessagingError::Publish(e.to_string()))?
                .await
                .map_err(|e| MessagingError::Publish(e.to_string()))
            })
            .await?;

        if confirm.is_nack() {
            return Err(MessagingError::Publish(
                "publisher confirm NACK".to_string(),
            ));
        }
        Ok(())
    }

    fn exchange(&self) -> Option<&str> {
        Some(self.opts.exchange.as_str())
    }

    async fn provision(&self, queue: &str, bindings: &[&str]) -> Result<(), MessagingError> {
        let ch = self.current_channel().await?;
        self.within("provision", self.declare_topology_for_queue(queue, bindings, &ch))
            .await
    }

    async fn subscribe(
        &self,
        queue: &str,
        bindings: &[&str],
        handler: Arc<dyn EventCallback>,
    ) -> Result<(), MessagingError> {
        let queue_owned = queue.to_string();
        let bindings_owned: Vec<String> = bindings.iter().map(|s| s.to_string()).collect();
        let handler_owned = Arc::clone(&handler);
        let bus = self.clone_for_task();

        tokio::spawn(async move {
            while !bus.closed.load(Ordering::SeqCst) {
                let ch = match bus.consumer_channel().await {
                    Ok(c) => c,
                    Err(e) => {
                        error!("subscribe: no channel yet: {e}");
                        sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };

                let prefetch = bus.opts.prefetch;
                if let Err(e) = bus
                    .within("basic_qos", async {
                        ch.basic_qos(prefetch, BasicQosOptions { global: false })
                            .await
                            .map_err(|e| MessagingError::Subscribe(e.to_string()))
                    })
                    .await
                {
                    error!("basic_qos failed: {e}");
                    sleep(RECONNECT_DELAY).await;
                    continue;
                }

                let binding_refs: Vec<&str> = bindings_owned.iter().map(|s| s.as_str()).collect();
                if let Err(e) = bus
                    .within(
                        "declare consumer topology",
                        bus.declare_topology_for_queue(&queue_owned, &binding_refs, &ch),
                    )
                    .await
                {
                    error!("declare_topology_for_queue failed: {e}");
                    sleep(RECONNECT_DELAY).await;
                    continue;
                }

                let consumer_tag = format!("consumer-{}", bus.opts.service);
                let consumer = match bus
                    .within("basic_consume", async {
                        ch.basic_consume(
                            &queue_owned,
                            &consumer_tag,
                            BasicConsumeOptions {
                                no_ack: false,
                                exclusive: false,
                                nowait: false,
                                ..Default::default()
                            },
                            FieldTable::default(),
                        )
                        .await
                        .map_err(|e| MessagingError::Subscribe(e.to_string()))
                    })
                    .await
                {
                    Ok(c) => c,
                    Err(e) => {
                        error!("basic_consume failed: {e}");
                        sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };

                info!(
                    queue = %queue_owned,
                    exchange = %bus.opts.exchange,
                    ack_mode = ?bus.opts.ack_mode,
                    "consuming"
                );

                let mut stream = consumer;
                while let Some(delivery) = stream.next().await {
                    let d = match delivery {
                        Ok(d) => d,
                        Err(e) => {
                            error!("delivery error: {e}");
                            break;
                        }
                    };

                    let rk = d.routing_key.as_str().to_string();
                    if bus.opts.ack_mode == AckMode::OnReceipt {
                        if let Err(e) = d.ack(BasicAckOptions { multiple: false }).await {
                            error!(routing_key = %rk, "ack failed: {e}");
                        }
                    }

                    let outcome = handler_owned.handle(&rk, &d.data).await;
                    match (bus.opts.ack_mode, outcome) {
                        (AckMode::OnReceipt, Ok(())) => {}
                        (AckMode::OnReceipt, Err(err)) => {
                            error!(routing_key = %rk, "handler error, event dropped: {err}");
                        }
                        (AckMode::AfterHandler, Ok(())) => {
                            if let Err(e) = d.ack(BasicAckOptions { multiple: false }).await {
                                error!(routing_key = %rk, "ack failed: {e}");
                            }
                        }
                        (AckMode::AfterHandler, Err(err)) => {
                            error!(routing_key = %rk, "handler error, dead-lettering: {err}");
                            if let Err(e) = d
                                .nack(BasicNackOptions {
                                    multiple: false,
                                    requeue: false,
                                })
                                .await
                            {
                                error!(routing_key = %rk, "nack failed: {e}");
                            }
                        }
                    }
                }

                if !bus.closed.load(Ordering::SeqCst) {
                    sleep(RECONNECT_DELAY).await;
                }
            }
            info!(queue = %queue_owned, "consumer loop stopped");
        });

        Ok(())
    }
}
