// workhub-messaging-core/src/telemetry.rs
//! Process-wide tracing setup.
//!
//! Call [`init`] once from the service's startup path, then hand each
//! publisher and dispatcher its [`service_span`] instead of configuring
//! logging per call.

use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber. `RUST_LOG` overrides `default_directive`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

pub fn service_span(service: &str) -> Span {
    tracing::info_span!("workhub_service", service = %service)
}
