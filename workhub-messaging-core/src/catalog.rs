// workhub-messaging-core/src/catalog.rs
//! Declared event types and broker topology.
//!
//! Each event type names its own interest set. Fan-out never means
//! "every service"; a destination receives an event only when it is
//! listed here.

use crate::routing::{entity_binding, namespace_binding};

pub mod services {
    pub const USER: &str = "user";
    pub const PUBLICATION: &str = "publication";
    pub const OFFRE: &str = "offre";
    pub const ABONNEMENT: &str = "abonnement";
    pub const MESSAGERIE: &str = "messagerie";
    pub const RECOMMENDATION: &str = "recommendation";

    pub const ALL: &[&str] = &[USER, PUBLICATION, OFFRE, ABONNEMENT, MESSAGERIE, RECOMMENDATION];
}

pub mod entities {
    pub const WORKER: &str = "worker";
    pub const CUSTOMER: &str = "customer";
    /// Login/logout events are addressed on the `user` entity class.
    pub const USER: &str = "user";
    pub const SERVICES_PROVIDED: &str = "servicesprovided";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const POST: &str = "post";
}

use entities as e;
use services as s;

/// One kind of cross-service event and the services that want it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventType {
    pub source: &'static str,
    pub entity: &'static str,
    pub action: &'static str,
    pub destinations: &'static [&'static str],
}

impl EventType {
    pub fn is_delivered_to(&self, service: &str) -> bool {
        self.destinations.iter().any(|d| *d == service)
    }
}

const PERSON_READERS: &[&str] = &[
    s::OFFRE,
    s::ABONNEMENT,
    s::MESSAGERIE,
    s::PUBLICATION,
    s::RECOMMENDATION,
];
const CUSTOMER_READERS: &[&str] = &[s::OFFRE, s::ABONNEMENT, s::MESSAGERIE, s::PUBLICATION];
const SERVICE_READERS: &[&str] = &[s::OFFRE, s::RECOMMENDATION];
const RECOMMENDER: &[&str] = &[s::RECOMMENDATION];

const fn event(
    source: &'static str,
    entity: &'static str,
    action: &'static str,
    destinations: &'static [&'static str],
) -> EventType {
    EventType {
        source,
        entity,
        action,
        destinations,
    }
}

pub const WORKER_CREATED: EventType = event(s::USER, e::WORKER, "create", PERSON_READERS);
pub const WORKER_UPDATED: EventType = event(s::USER, e::WORKER, "update", PERSON_READERS);
pub const WORKER_DELETED: EventType = event(s::USER, e::WORKER, "delete", PERSON_READERS);
pub const CUSTOMER_CREATED: EventType = event(s::USER, e::CUSTOMER, "create", CUSTOMER_READERS);
pub const CUSTOMER_UPDATED: EventType = event(s::USER, e::CUSTOMER, "update", CUSTOMER_READERS);
pub const CUSTOMER_DELETED: EventType = event(s::USER, e::CUSTOMER, "delete", CUSTOMER_READERS);
pub const USER_LOGGED_IN: EventType = event(s::USER, e::USER, "login", PERSON_READERS);
pub const USER_LOGGED_OUT: EventType = event(s::USER, e::USER, "logout", PERSON_READERS);
pub const SERVICE_CREATED: EventType =
    event(s::USER, e::SERVICES_PROVIDED, "create", SERVICE_READERS);
pub const SERVICE_DELETED: EventType =
    event(s::USER, e::SERVICES_PROVIDED, "delete", SERVICE_READERS);
pub const POST_CREATED: EventType = event(s::PUBLICATION, e::POST, "create", RECOMMENDER);
pub const POST_DELETED: EventType = event(s::PUBLICATION, e::POST, "delete", RECOMMENDER);
pub const SUBSCRIPTION_CREATED: EventType =
    event(s::ABONNEMENT, e::SUBSCRIPTION, "create", RECOMMENDER);
pub const SUBSCRIPTION_DELETED: EventType =
    event(s::ABONNEMENT, e::SUBSCRIPTION, "delete", RECOMMENDER);
pub const SUBSCRIPTION_UNFOLLOWED: EventType =
    event(s::ABONNEMENT, e::SUBSCRIPTION, "workerunfollow", RECOMMENDER);

pub const EVENT_TYPES: &[EventType] = &[
    WORKER_CREATED,
    WORKER_UPDATED,
    WORKER_DELETED,
    CUSTOMER_CREATED,
    CUSTOMER_UPDATED,
    CUSTOMER_DELETED,
    USER_LOGGED_IN,
    USER_LOGGED_OUT,
    SERVICE_CREATED,
    SERVICE_DELETED,
    POST_CREATED,
    POST_DELETED,
    SUBSCRIPTION_CREATED,
    SUBSCRIPTION_DELETED,
    SUBSCRIPTION_UNFOLLOWED,
];

pub fn exchange_name(source: &str) -> String {
    format!("{source}_events")
}

pub fn queue_name(source: &str, service: &str) -> String {
    format!("{source}_{service}_queue")
}

/// The queue a producer provisions for its own namespace.
pub fn producer_queue(source: &str) -> String {
    format!("{source}_queue")
}

pub fn producer_binding(source: &str) -> String {
    namespace_binding(source)
}

/// Where one service consumes the events of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerTopology {
    pub service: String,
    pub source: String,
    pub exchange: String,
    pub queue: String,
    pub bindings: Vec<String>,
}

impl ConsumerTopology {
    pub fn binding_refs(&self) -> Vec<&str> {
        self.bindings.iter().map(String::as_str).collect()
    }
}

/// `None` when `service` has no declared interest in anything `source` emits.
pub fn consumer_topology(service: &str, source: &str) -> Option<ConsumerTopology> {
    let mut bindings: Vec<String> = Vec::new();
    for ev in EVENT_TYPES
        .iter()
        .filter(|ev| ev.source == source && ev.is_delivered_to(service))
    {
        let binding = entity_binding(ev.source, ev.entity);
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
    }

    if bindings.is_empty() {
        return None;
    }
    Some(ConsumerTopology {
        service: service.to_string(),
        source: source.to_string(),
        exchange: exchange_name(source),
        queue: queue_name(source, service),
        bindings,
    })
}

/// Every source a service consumes from, with its topology.
pub fn consumer_topologies(service: &str) -> Vec<ConsumerTopology> {
    services::ALL
        .iter()
        .filter_map(|source| consumer_topology(service, source))
        .collect()
}

/// Consumer queues fed by `source`, for provisioning ahead of the consumers.
pub fn downstream_topologies(source: &str) -> Vec<ConsumerTopology> {
    services::ALL
        .iter()
        .filter_map(|service| consumer_topology(service, source))
        .collect()
}
