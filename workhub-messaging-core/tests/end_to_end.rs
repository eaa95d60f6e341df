//! Producer -> in-memory exchange -> consumer -> replica store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use workhub_messaging_core::catalog::{self, services};
use workhub_messaging_core::replica::{
    standard_dispatch_table, Fields, InMemoryReplicaStore, LoginStatus, PersonKind,
    PersonReplica, RecordId, ReplicaStore, PERSONS, SUBSCRIPTIONS,
};
use workhub_messaging_core::{consumer, EventBus, InMemoryBroker, Publisher, RoutingKey};

async fn wait_for(store: &InMemoryReplicaStore, collection: &str, id: i64) -> Fields {
    for _ in 0..200 {
        if let Some(fields) = store.get(collection, &RecordId::Int(id)).await.unwrap() {
            return fields;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{collection}/{id} never replicated");
}

async fn start_service(
    broker: &InMemoryBroker,
    service: &str,
    source: &str,
) -> Arc<InMemoryReplicaStore> {
    let store = Arc::new(InMemoryReplicaStore::new());
    let topology = catalog::consumer_topology(service, source).unwrap();
    consumer::start(broker, &topology, standard_dispatch_table(store.clone()))
        .await
        .unwrap();
    store
}

fn key(raw: &str) -> RoutingKey {
    raw.parse().unwrap()
}

#[tokio::test]
async fn worker_create_reaches_offre() {
    let broker = InMemoryBroker::new();
    let store = start_service(&broker, services::OFFRE, services::USER).await;
    let publisher = Publisher::unprovisioned(services::USER, Arc::new(broker.clone()));

    publisher
        .publish(&json!({"id": 7, "user": 42}), &key("user.worker.create_offre"))
        .await
        .unwrap();

    let replica = PersonReplica::from_fields(wait_for(&store, PERSONS, 7).await).unwrap();
    assert_eq!(replica.id_person, RecordId::Int(7));
    assert_eq!(replica.id_user, Some(RecordId::Int(42)));
    assert_eq!(replica.user_type, Some(PersonKind::Worker));
}

#[tokio::test]
async fn login_before_replication_creates_minimal_replica() {
    let broker = InMemoryBroker::new();
    let store = start_service(&broker, services::OFFRE, services::USER).await;
    let publisher = Publisher::unprovisioned(services::USER, Arc::new(broker.clone()));

    publisher
        .publish(
            &json!({"id_person": 11, "id_user": 110, "login_status": "Login", "user_type": "Customer"}),
            &key("user.user.login_offre"),
        )
        .await
        .unwrap();

    let replica = PersonReplica::from_fields(wait_for(&store, PERSONS, 11).await).unwrap();
    assert_eq!(replica.login_status, LoginStatus::Login);
    assert_eq!(replica.user_type, Some(PersonKind::Customer));
}

#[tokio::test]
async fn subscription_create_then_delete_leaves_nothing() {
    let broker = InMemoryBroker::new();
    let store = start_service(&broker, services::RECOMMENDATION, services::ABONNEMENT).await;
    let publisher = Publisher::unprovisioned(services::ABONNEMENT, Arc::new(broker.clone()));

    publisher
        .publish(
            &json!({"id": 4, "worker": 7, "customer": 3, "subscribe_status": "Follow"}),
            &key("abonnement.subscription.create_recommendation"),
        )
        .await
        .unwrap();
    publisher
        .publish(&json!(4), &key("abonnement.subscription.delete_recommendation"))
        .await
        .unwrap();
    // queues are FIFO: once the marker lands, both earlier events were applied
    publisher
        .publish(&json!({"id": 5}), &key("abonnement.subscription.create_recommendation"))
        .await
        .unwrap();
    wait_for(&store, SUBSCRIPTIONS, 5).await;

    assert!(store
        .get(SUBSCRIPTIONS, &RecordId::Int(4))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn shared_bindings_are_filtered_by_destination() {
    let broker = InMemoryBroker::new();
    let offre = start_service(&broker, services::OFFRE, services::USER).await;
    let recommendation = start_service(&broker, services::RECOMMENDATION, services::USER).await;
    let publisher = Publisher::unprovisioned(services::USER, Arc::new(broker.clone()));

    publisher
        .publish(&json!({"id": 8, "user": 80}), &key("user.worker.create_recommendation"))
        .await
        .unwrap();
    publisher
        .publish(&json!({"id": 9, "user": 90}), &key("user.worker.create_offre"))
        .await
        .unwrap();

    wait_for(&recommendation, PERSONS, 8).await;
    wait_for(&offre, PERSONS, 9).await;
    assert_eq!(offre.count(PERSONS).await.unwrap(), 1);
    assert_eq!(recommendation.count(PERSONS).await.unwrap(), 1);
}

#[tokio::test]
async fn fan_out_reaches_every_declared_destination() {
    let broker = InMemoryBroker::new();
    let publisher = Publisher::open(
        services::USER,
        Arc::new(broker.clone()),
        &catalog::downstream_topologies(services::USER),
    )
    .await
    .unwrap();

    // consumers start after the publish; provisioned queues keep the events
    let report = publisher
        .emit(&catalog::WORKER_CREATED, &json!({"id": 21, "user": 210}))
        .await;
    assert!(report.is_complete());
    assert_eq!(report.attempts.len(), 5);

    for service in catalog::WORKER_CREATED.destinations {
        let store = start_service(&broker, service, services::USER).await;
        let replica = PersonReplica::from_fields(wait_for(&store, PERSONS, 21).await).unwrap();
        assert_eq!(replica.user_type, Some(PersonKind::Worker));
    }

    assert_eq!(broker.bindings("user_queue"), vec!["user.#"]);
}

#[tokio::test]
async fn unknown_routes_do_not_stop_the_consumer() {
    let broker = InMemoryBroker::new();
    let store = start_service(&broker, services::OFFRE, services::USER).await;
    let bus: Arc<dyn EventBus> = Arc::new(broker.clone());
    let publisher = Publisher::unprovisioned(services::USER, bus);

    // bound entity, unrouted action
    publisher
        .publish(&json!({"id": 1}), &key("user.worker.promote_offre"))
        .await
        .unwrap();
    // routed, but the handler rejects a payload without an identifier
    publisher
        .publish(&json!({"name": "no id"}), &key("user.worker.create_offre"))
        .await
        .unwrap();
    publisher
        .publish(&json!({"id": 2, "user": 20}), &key("user.customer.create_offre"))
        .await
        .unwrap();

    let replica = PersonReplica::from_fields(wait_for(&store, PERSONS, 2).await).unwrap();
    assert_eq!(replica.user_type, Some(PersonKind::Customer));
    assert_eq!(store.count(PERSONS).await.unwrap(), 1);
}

#[tokio::test]
async fn string_primary_key_delete_removes_the_subscription() {
    let broker = InMemoryBroker::new();
    let store = start_service(&broker, services::RECOMMENDATION, services::ABONNEMENT).await;
    let publisher = Publisher::unprovisioned(services::ABONNEMENT, Arc::new(broker.clone()));

    publisher
        .publish(
            &json!({"id": 12, "worker": 7}),
            &key("abonnement.subscription.create_recommendation"),
        )
        .await
        .unwrap();
    // the abonnement service publishes the URL pk, which is a string
    publisher
        .publish(&json!("12"), &key("abonnement.subscription.delete_recommendation"))
        .await
        .unwrap();
    publisher
        .publish(&json!({"id": 13}), &key("abonnement.subscription.create_recommendation"))
        .await
        .unwrap();
    wait_for(&store, SUBSCRIPTIONS, 13).await;

    assert!(store
        .get(SUBSCRIPTIONS, &RecordId::Int(12))
        .await
        .unwrap()
        .is_none());
    assert_eq!(store.count(SUBSCRIPTIONS).await.unwrap(), 1);
}

#[tokio::test]
async fn string_person_id_logout_updates_the_worker_replica() {
    let broker = InMemoryBroker::new();
    let store = start_service(&broker, services::OFFRE, services::USER).await;
    let publisher = Publisher::unprovisioned(services::USER, Arc::new(broker.clone()));

    publisher
        .publish(&json!({"id": 7, "user": 42}), &key("user.worker.create_offre"))
        .await
        .unwrap();
    publisher
        .publish(
            &json!({"id_person": "7", "id_user": "42", "login_status": "Logout"}),
            &key("user.user.logout_offre"),
        )
        .await
        .unwrap();
    publisher
        .publish(&json!({"id": 8, "user": 80}), &key("user.worker.create_offre"))
        .await
        .unwrap();
    wait_for(&store, PERSONS, 8).await;

    let replica = PersonReplica::from_fields(wait_for(&store, PERSONS, 7).await).unwrap();
    assert_eq!(replica.login_status, LoginStatus::Logout);
    assert_eq!(replica.user_type, Some(PersonKind::Worker));
    assert_eq!(store.count(PERSONS).await.unwrap(), 2);
}
