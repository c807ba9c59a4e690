//! End-to-end session behavior over the in-process channel transport.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;

use xds_server::transport::channel::{self, ClientEnd};
use xds_server::{
    ClientMessage, ContentHash, Delta, KnownResources, Observer, Resource, RetryPolicy,
    ServerConfig, SessionEvent, SessionManager, SessionState, Snapshot, Subscription,
    TokioRuntime, TypeUrl, Version,
};

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<SessionEvent>>>);

impl Observer for Recorder {
    fn on_event(&self, event: &SessionEvent) {
        self.0.lock().push(event.clone());
    }
}

impl Recorder {
    fn events(&self) -> Vec<SessionEvent> {
        self.0.lock().clone()
    }
}

fn manager_with(config: ServerConfig, recorder: &Recorder) -> SessionManager<TokioRuntime> {
    SessionManager::builder(TokioRuntime)
        .with_config(config)
        .with_observer(recorder.clone())
        .build()
}

async fn recv(client: &mut ClientEnd) -> Delta {
    timeout(Duration::from_secs(60), client.recv())
        .await
        .expect("timed out waiting for a delta")
        .expect("session closed")
}

async fn assert_quiet(client: &mut ClientEnd, within: Duration) {
    if let Ok(next) = timeout(within, client.recv()).await {
        panic!("expected no delta, got {next:?}");
    }
}

fn names(resources: &[Arc<Resource>]) -> Vec<&str> {
    resources.iter().map(|r| r.name()).collect()
}

#[tokio::test(start_paused = true)]
async fn add_ack_then_update() {
    let recorder = Recorder::default();
    let manager = manager_with(ServerConfig::new(), &recorder);
    manager
        .store()
        .publish(TypeUrl::endpoint(), vec![Resource::new("ep1", "P1")]);

    let (transport, mut client) = channel::channel(8);
    let session = manager.accept("envoy-1", transport);
    assert_eq!(session.state(), SessionState::Connected);

    client.subscribe_all(TypeUrl::ENDPOINT).await.unwrap();
    let first = recv(&mut client).await;
    assert_eq!(first.version, Version::new(1));
    assert_eq!(names(&first.added), ["ep1"]);
    assert!(first.updated.is_empty());
    assert_eq!(session.state(), SessionState::Active);

    client.ack(&first).await.unwrap();
    // Acked and unchanged: nothing more to send.
    assert_quiet(&mut client, Duration::from_millis(100)).await;

    manager
        .store()
        .publish(TypeUrl::endpoint(), vec![Resource::new("ep1", "P2")]);
    let second = recv(&mut client).await;
    assert_eq!(second.version, Version::new(2));
    assert!(second.added.is_empty());
    assert_eq!(names(&second.updated), ["ep1"]);
    assert_eq!(second.updated[0].hash(), ContentHash::of(b"P2"));

    assert!(recorder.events().contains(&SessionEvent::AckReceived {
        session: session.id(),
        type_url: TypeUrl::endpoint(),
        version: Version::new(1),
    }));
}

#[tokio::test(start_paused = true)]
async fn nack_is_retried_after_backoff_from_acked_state() {
    let recorder = Recorder::default();
    let manager = manager_with(ServerConfig::new(), &recorder);
    let store = manager.store();
    store.publish(TypeUrl::endpoint(), vec![Resource::new("ep1", "good")]);

    let (transport, mut client) = channel::channel(8);
    manager.accept("envoy-1", transport);
    client.subscribe_all(TypeUrl::ENDPOINT).await.unwrap();
    let first = recv(&mut client).await;
    client.ack(&first).await.unwrap();

    store.publish(TypeUrl::endpoint(), vec![Resource::new("ep1", "bad")]);
    let rejected = recv(&mut client).await;
    assert_eq!(rejected.version, Version::new(2));
    client.nack(&rejected, "cannot apply").await.unwrap();

    // Default initial backoff is one second.
    assert_quiet(&mut client, Duration::from_millis(500)).await;
    let retry = recv(&mut client).await;

    // Still computed against version 1, so ep1 is an update again.
    assert_eq!(retry.version, Version::new(2));
    assert!(retry.added.is_empty());
    assert_eq!(names(&retry.updated), ["ep1"]);

    client.ack(&retry).await.unwrap();
    assert_quiet(&mut client, Duration::from_secs(5)).await;

    let events = recorder.events();
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::NackReceived { version, message, .. }
            if *version == Version::new(2) && message == "cannot apply"
    )));
}

#[tokio::test(start_paused = true)]
async fn retry_ceiling_closes_session() {
    let recorder = Recorder::default();
    let config = ServerConfig::new()
        .with_retry_policy(RetryPolicy::default().with_retry_ceiling(Some(1)));
    let manager = manager_with(config, &recorder);
    manager
        .store()
        .publish(TypeUrl::cluster(), vec![Resource::new("c1", "x")]);

    let (transport, mut client) = channel::channel(8);
    let session = manager.accept("envoy-1", transport);
    client.subscribe_all(TypeUrl::CLUSTER).await.unwrap();

    let delta = recv(&mut client).await;
    client.nack(&delta, "no").await.unwrap();
    let retry = recv(&mut client).await;
    client.nack(&retry, "still no").await.unwrap();

    session.closed().await;
    assert_eq!(session.state(), SessionState::Closed);
    assert!(client.recv().await.is_none());
    assert_eq!(manager.session_count(), 0);
    assert!(!manager.registry().contains_session(session.id()));

    let reason = recorder.events().into_iter().find_map(|e| match e {
        SessionEvent::SessionClosed { reason, .. } => reason,
        _ => None,
    });
    assert!(reason.is_some_and(|r| r.contains("rejected 2 times")));
}

fn held(snapshot: &Snapshot) -> KnownResources {
    snapshot
        .iter()
        .map(|r| (r.name().to_string(), r.hash()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn client_applying_every_delta_converges_when_publishes_overtake_acks() {
    let recorder = Recorder::default();
    let manager = manager_with(ServerConfig::new(), &recorder);
    let store = manager.store();
    store.publish(
        TypeUrl::endpoint(),
        vec![Resource::new("ep1", "a"), Resource::new("ep2", "x")],
    );

    let (transport, mut client) = channel::channel(8);
    manager.accept("envoy-1", transport);
    client.subscribe_all(TypeUrl::ENDPOINT).await.unwrap();

    let first = recv(&mut client).await;
    let mut applied = first.apply_to(&KnownResources::new());
    client.ack(&first).await.unwrap();
    assert_quiet(&mut client, Duration::from_millis(100)).await;

    // Version 2 stays unacked while version 3 reverts ep1 and restores ep2.
    store.publish(TypeUrl::endpoint(), vec![Resource::new("ep1", "b")]);
    let second = recv(&mut client).await;
    applied = second.apply_to(&applied);

    store.publish(
        TypeUrl::endpoint(),
        vec![
            Resource::new("ep1", "a"),
            Resource::new("ep2", "x"),
            Resource::new("ep3", "c"),
        ],
    );
    let third = recv(&mut client).await;
    assert_eq!(third.version, Version::new(3));
    applied = third.apply_to(&applied);

    client.ack(&second).await.unwrap();
    client.ack(&third).await.unwrap();
    assert_quiet(&mut client, Duration::from_secs(5)).await;

    let current = store.current_snapshot(TypeUrl::ENDPOINT).unwrap();
    assert_eq!(applied, held(&current));

    // The server's view matches the client's: the next change is minimal.
    store.publish(
        TypeUrl::endpoint(),
        vec![
            Resource::new("ep1", "a"),
            Resource::new("ep2", "x"),
            Resource::new("ep3", "d"),
        ],
    );
    let fourth = recv(&mut client).await;
    assert!(fourth.added.is_empty());
    assert_eq!(names(&fourth.updated), ["ep3"]);
    assert!(fourth.removed.is_empty());
    applied = fourth.apply_to(&applied);
    assert_eq!(applied, held(&store.current_snapshot(TypeUrl::ENDPOINT).unwrap()));
}

#[tokio::test(start_paused = true)]
async fn named_subscription_ignores_unrelated_changes() {
    let manager = SessionManager::new(TokioRuntime);
    let store = manager.store();
    store.publish(
        TypeUrl::endpoint(),
        vec![Resource::new("ep1", "a"), Resource::new("ep2", "b")],
    );

    let (transport, mut client) = channel::channel(8);
    manager.accept("envoy-1", transport);
    client
        .subscribe(TypeUrl::ENDPOINT, Subscription::named(["ep1"]))
        .await
        .unwrap();

    let first = recv(&mut client).await;
    assert_eq!(names(&first.added), ["ep1"]);
    client.ack(&first).await.unwrap();

    store.publish(
        TypeUrl::endpoint(),
        vec![Resource::new("ep1", "a"), Resource::new("ep2", "changed")],
    );
    assert_quiet(&mut client, Duration::from_secs(1)).await;

    // Widening to a wildcard brings in the rest.
    client.subscribe_all(TypeUrl::ENDPOINT).await.unwrap();
    let widened = recv(&mut client).await;
    assert_eq!(names(&widened.added), ["ep2"]);
    assert_eq!(widened.version, Version::new(2));
}

#[tokio::test(start_paused = true)]
async fn narrowing_subscription_removes_resources() {
    let manager = SessionManager::new(TokioRuntime);
    manager.store().publish(
        TypeUrl::endpoint(),
        vec![Resource::new("ep1", "a"), Resource::new("ep2", "b")],
    );

    let (transport, mut client) = channel::channel(8);
    manager.accept("envoy-1", transport);
    client.subscribe_all(TypeUrl::ENDPOINT).await.unwrap();
    let first = recv(&mut client).await;
    client.ack(&first).await.unwrap();

    client
        .subscribe(TypeUrl::ENDPOINT, Subscription::named(["ep2"]))
        .await
        .unwrap();
    let narrowed = recv(&mut client).await;
    assert!(narrowed.added.is_empty());
    assert_eq!(narrowed.removed, ["ep1"]);
}

#[tokio::test(start_paused = true)]
async fn unknown_version_ack_is_ignored() {
    let recorder = Recorder::default();
    let manager = manager_with(ServerConfig::new(), &recorder);
    let (transport, mut client) = channel::channel(8);
    let session = manager.accept("envoy-1", transport);

    client.subscribe_all(TypeUrl::LISTENER).await.unwrap();
    client
        .send(ClientMessage::ack(TypeUrl::LISTENER, Version::new(42)))
        .await
        .unwrap();

    manager
        .store()
        .publish(TypeUrl::listener(), vec![Resource::new("l1", "x")]);
    let delta = recv(&mut client).await;
    assert_eq!(names(&delta.added), ["l1"]);
    assert_eq!(session.state(), SessionState::Active);

    assert!(
        !recorder
            .events()
            .iter()
            .any(|e| matches!(e, SessionEvent::AckReceived { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn unsubscribing_last_type_keeps_session_active() {
    let manager = SessionManager::new(TokioRuntime);
    let (transport, mut client) = channel::channel(8);
    let session = manager.accept("envoy-1", transport);

    client.subscribe_all(TypeUrl::ROUTE).await.unwrap();
    client.unsubscribe(TypeUrl::ROUTE).await.unwrap();
    // Unknown types are a no-op.
    client.unsubscribe(TypeUrl::CLUSTER).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(manager.state(session.id()), Some(SessionState::Active));
    assert!(manager.registry().subscription(session.id(), TypeUrl::ROUTE).is_none());

    manager
        .store()
        .publish(TypeUrl::route(), vec![Resource::new("r1", "x")]);
    assert_quiet(&mut client, Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_mid_flight_cleans_up() {
    let recorder = Recorder::default();
    let manager = manager_with(ServerConfig::new(), &recorder);
    let store = Arc::clone(manager.store());

    // Room for one delta only, and the client never reads.
    let (transport, client) = channel::channel(1);
    let session = manager.accept("envoy-1", transport);
    client.subscribe_all(TypeUrl::ENDPOINT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    store.publish(TypeUrl::endpoint(), vec![Resource::new("ep1", "a")]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.publish(TypeUrl::endpoint(), vec![Resource::new("ep1", "b")]);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(manager.disconnect(session.id()));
    session.closed().await;

    assert_eq!(manager.session_count(), 0);
    assert_eq!(manager.state(session.id()), None);
    assert!(!manager.registry().contains_session(session.id()));
    assert!(manager.registry().subscribers(TypeUrl::ENDPOINT).is_empty());
    assert!(!manager.disconnect(session.id()));

    // Only the first delta made it to the transport.
    let sent: Vec<_> = recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::DeltaSent { version, .. } => Some(version),
            _ => None,
        })
        .collect();
    assert_eq!(sent, [Version::new(1)]);

    // Publishing keeps working with nobody connected.
    assert_eq!(
        store.publish(TypeUrl::endpoint(), vec![Resource::new("ep1", "c")]),
        Version::new(3)
    );
    assert!(recorder.events().iter().any(|e| matches!(
        e,
        SessionEvent::SessionClosed { reason: None, .. }
    )));
    drop(client);
}

#[tokio::test(start_paused = true)]
async fn client_hangup_closes_session() {
    let manager = SessionManager::new(TokioRuntime);
    let (transport, client) = channel::channel(8);
    let session = manager.accept("envoy-1", transport);
    client.subscribe_all(TypeUrl::CLUSTER).await.unwrap();

    drop(client);
    session.closed().await;
    assert_eq!(manager.session_count(), 0);
    assert!(manager.registry().subscribers(TypeUrl::CLUSTER).is_empty());
}

#[tokio::test(start_paused = true)]
async fn lagging_session_catches_up_on_every_type() {
    let recorder = Recorder::default();
    let config = ServerConfig::new().with_publish_channel_capacity(1).unwrap();
    let manager = manager_with(config, &recorder);
    let store = manager.store();

    let (transport, mut client) = channel::channel(8);
    manager.accept("envoy-1", transport);
    client.subscribe_all(TypeUrl::ENDPOINT).await.unwrap();
    client.subscribe_all(TypeUrl::CLUSTER).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The session does not run between these, so it falls behind.
    for i in 0..3 {
        store.publish(TypeUrl::endpoint(), vec![Resource::new("ep1", format!("e{i}"))]);
        store.publish(TypeUrl::cluster(), vec![Resource::new("c1", format!("c{i}"))]);
    }

    let mut latest = Vec::new();
    for _ in 0..2 {
        let delta = recv(&mut client).await;
        latest.push((delta.type_url.to_string(), delta.version));
    }
    latest.sort();
    assert_eq!(
        latest,
        [
            (TypeUrl::CLUSTER.to_string(), Version::new(3)),
            (TypeUrl::ENDPOINT.to_string(), Version::new(3)),
        ]
    );
    assert_quiet(&mut client, Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn sessions_do_not_share_state() {
    let manager = SessionManager::new(TokioRuntime);
    manager
        .store()
        .publish(TypeUrl::endpoint(), vec![Resource::new("ep1", "a")]);

    let (t1, mut c1) = channel::channel(8);
    let (t2, mut c2) = channel::channel(8);
    manager.accept("envoy-1", t1);
    manager.accept("envoy-2", t2);
    assert_eq!(manager.session_count(), 2);

    c1.subscribe_all(TypeUrl::ENDPOINT).await.unwrap();
    c2.subscribe_all(TypeUrl::ENDPOINT).await.unwrap();
    let d1 = recv(&mut c1).await;
    let d2 = recv(&mut c2).await;
    c1.ack(&d1).await.unwrap();
    // c2 never acks.

    manager
        .store()
        .publish(TypeUrl::endpoint(), vec![Resource::new("ep1", "b")]);
    assert_eq!(names(&recv(&mut c1).await.updated), ["ep1"]);
    // Still unacked, so ep1 is new to the second client.
    assert_eq!(names(&recv(&mut c2).await.added), ["ep1"]);
    assert_eq!(d2.version, Version::new(1));
}
