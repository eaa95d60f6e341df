mod options;
mod rabbit_event_bus;
mod scoped;

pub use options::{dlq_queue, RabbitMqOptions};
pub use rabbit_event_bus::RabbitEventBus;
pub use scoped::publish_scoped;
