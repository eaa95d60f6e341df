use std::time::Duration;

use workhub_messaging_core::{AckMode, MessagingError};

#[derive(Clone, Debug)]
pub struct RabbitMqOptions {
    pub uri: String,
    pub exchange: String,
    /// Service identity; also names the consumer tag.
    pub service: String,
    pub durable: bool,
    pub prefetch: u16,
    /// When true, enables publisher confirms and fails the publish on a broker NACK.
    pub confirms: bool,
    pub ack_mode: AckMode,
    /// Upper bound on connect, publish and close.
    pub operation_timeout: Duration,
}

impl RabbitMqOptions {
    pub fn new(uri: impl Into<String>, exchange: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            exchange: exchange.into(),
            service: service.into(),
            durable: true,
            prefetch: 1,
            confirms: false,
            ack_mode: AckMode::OnReceipt,
            operation_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Reads the connection from the process environment. See [`Self::from_lookup`].
    pub fn from_env(exchange: &str) -> Result<Self, MessagingError> {
        Self::from_lookup(exchange, |var| std::env::var(var).ok())
    }

    /// `RABBITMQ_URI` wins; otherwise the URI is built from `RABBITMQ_HOST`,
    /// `RABBITMQ_PORT`, `RABBITMQ_USER`, `RABBITMQ_PASSWORD` and `RABBITMQ_VHOST`.
    /// `WORKHUB_SERVICE` is required. `RABBITMQ_PREFETCH`, `RABBITMQ_TIMEOUT_MS`,
    /// `RABBITMQ_CONFIRMS` and `WORKHUB_ACK_MODE` are optional.
    pub fn from_lookup<F>(exchange: &str, lookup: F) -> Result<Self, MessagingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &str| {
            lookup(var).ok_or_else(|| MessagingError::ConfigMissing {
                var: var.to_string(),
            })
        };

        let uri = match lookup("RABBITMQ_URI") {
            Some(uri) => uri,
            None => {
                let host = required("RABBITMQ_HOST")?;
                let port: u16 = parse_or(&lookup, "RABBITMQ_PORT", 5672)?;
                let user = required("RABBITMQ_USER")?;
                let password = required("RABBITMQ_PASSWORD")?;
                let vhost = lookup("RABBITMQ_VHOST").unwrap_or_else(|| "/".to_string());
                format!(
                    "amqp://{user}:{password}@{host}:{port}/{}",
                    vhost.replace('/', "%2f")
                )
            }
        };

        let mut opts = Self::new(uri, exchange, required("WORKHUB_SERVICE")?);
        opts.prefetch = parse_or(&lookup, "RABBITMQ_PREFETCH", 1)?;
        opts.confirms = parse_or(&lookup, "RABBITMQ_CONFIRMS", false)?;
        opts.operation_timeout =
            Duration::from_millis(parse_or(&lookup, "RABBITMQ_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?);
        opts.ack_mode = parse_or(&lookup, "WORKHUB_ACK_MODE", AckMode::OnReceipt)?;
        Ok(opts)
    }
}

const DEFAULT_TIMEOUT_MS: u64 = 5_000;

fn parse_or<F, T>(lookup: &F, var: &str, default: T) -> Result<T, MessagingError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| MessagingError::ConfigInvalid {
            var: var.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Dead-letter queue receiving deliveries rejected under [`AckMode::AfterHandler`].
pub fn dlq_queue(queue: &str) -> String {
    format!("{}.dlq", queue)
}
