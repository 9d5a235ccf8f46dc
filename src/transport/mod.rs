//! Publish/subscribe transport layer
//!
//! [`Transport`] is the seam between the broker session and the wire
//! protocol. [`mqtt::MqttTransport`] drives a real broker through rumqttc;
//! tests inject [`crate::testing::MockTransport`].

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::MqttTransport;

/// Delivery guarantee requested for a publish or subscription
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Per-publish options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub qos: Qos,
    pub retain: bool,
}

impl PublishOptions {
    pub fn retained() -> Self {
        Self {
            retain: true,
            ..Self::default()
        }
    }
}

/// Last-will message registered with the broker at connect time.
/// The topic is already on the wire (namespaced) when it reaches the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct WillMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

/// Produces a fresh `(username, password)` pair for each reconnect attempt.
/// The broker username embeds the current time, so credentials captured at
/// open go stale once the transport starts reconnecting on its own.
#[derive(Clone)]
pub struct CredentialRefresh(Arc<dyn Fn() -> (String, String) + Send + Sync>);

impl CredentialRefresh {
    pub fn new(derive: impl Fn() -> (String, String) + Send + Sync + 'static) -> Self {
        Self(Arc::new(derive))
    }

    pub fn fresh(&self) -> (String, String) {
        (self.0)()
    }
}

impl fmt::Debug for CredentialRefresh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialRefresh(..)")
    }
}

impl PartialEq for CredentialRefresh {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Everything needed to open one broker session
#[derive(Clone, PartialEq)]
pub struct SessionParams {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    /// Delay before the transport retries after a plain network drop
    pub retry_interval: Duration,
    pub will: Option<WillMessage>,
    /// Re-derives username and password before every automatic reconnect
    pub refresh: Option<CredentialRefresh>,
}

impl fmt::Debug for SessionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .field("keep_alive", &self.keep_alive)
            .field("will", &self.will.as_ref().map(|w| &w.topic))
            .finish_non_exhaustive()
    }
}

/// Why the broker refused a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    BadCredentials,
    NotAuthorized,
}

/// Events a transport reports for the session it opened
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The broker acknowledged the connection (also after an automatic reconnect)
    Connected,
    /// A message arrived on a subscribed wire topic
    Message { topic: String, payload: Bytes },
    /// The connection dropped; the transport will try again on its own
    Closed,
    /// The broker refused the credentials; the transport has stopped
    AuthRejected(AuthFailure),
    /// The session ended for good
    Ended,
}

/// Transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport is not open")]
    NotOpen,
    #[error("Transport request failed: {0}")]
    Request(String),
    #[error("Invalid session parameters: {0}")]
    InvalidParams(String),
}

/// Publish/subscribe session operations consumed by the broker session
#[async_trait]
pub trait Transport: Send {
    /// Open a session. Events for it arrive on the returned channel until it
    /// yields [`TransportEvent::Ended`] or [`TransportEvent::AuthRejected`].
    async fn open(
        &mut self,
        params: SessionParams,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    async fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), TransportError>;

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), TransportError>;

    /// Close the session; a no-op when none is open
    async fn close(&mut self) -> Result<(), TransportError>;
}
