//! Test helpers and utilities for integration tests

use microgear::cache::{CredentialCache, MemoryCache};
use microgear::testing::{MockGateway, MockTransport};
use microgear::{DeviceIdentity, GearClient, GearConfig, GearEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[allow(dead_code)]
pub const APPID: &str = "myapp";

/// A client wired to mocks, plus handles to inspect them
#[allow(dead_code)]
pub struct Harness {
    pub gear: GearClient,
    pub transport: MockTransport,
    pub gateway: MockGateway,
    pub events: broadcast::Receiver<GearEvent>,
}

/// Create a test configuration for integration tests
#[allow(dead_code)]
pub fn test_config() -> GearConfig {
    let mut config = GearConfig::new("testkey", "testsecret");
    config.secure = false;
    config
}

#[allow(dead_code)]
pub fn harness() -> Harness {
    harness_with(DeviceIdentity::new("testkey", "testsecret"), false, MockTransport::new())
}

#[allow(dead_code)]
pub fn harness_with(
    identity: DeviceIdentity,
    track_presence: bool,
    transport: MockTransport,
) -> Harness {
    harness_with_cache(identity, track_presence, transport, Box::new(MemoryCache::new()))
}

#[allow(dead_code)]
pub fn harness_with_cache(
    identity: DeviceIdentity,
    track_presence: bool,
    transport: MockTransport,
    cache: Box<dyn CredentialCache>,
) -> Harness {
    let gateway = MockGateway::new();
    let gear = GearClient::builder(identity)
        .config(test_config())
        .gateway(Arc::new(gateway.clone()))
        .transport(Box::new(transport.clone()))
        .cache(cache)
        .track_presence(track_presence)
        .build()
        .expect("client should build");
    let events = gear.events();

    Harness {
        gear,
        transport,
        gateway,
        events,
    }
}

/// Receive the next event, failing the test if none arrives
#[allow(dead_code)]
pub async fn next_event(events: &mut broadcast::Receiver<GearEvent>) -> GearEvent {
    tokio::time::timeout(Duration::from_secs(60), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skip events until one matches `predicate`
#[allow(dead_code)]
pub async fn wait_for(
    events: &mut broadcast::Receiver<GearEvent>,
    predicate: impl Fn(&GearEvent) -> bool,
) -> GearEvent {
    loop {
        let event = next_event(events).await;
        if predicate(&event) {
            return event;
        }
    }
}

/// User subscriptions recorded by the transport, control channels excluded
#[allow(dead_code)]
pub fn user_subscriptions(transport: &MockTransport) -> Vec<String> {
    transport
        .subscriptions()
        .into_iter()
        .filter(|topic| !topic.starts_with("/&") && !topic.contains("/&"))
        .collect()
}
