//! Broker session: owns the transport handle for one client
//!
//! Credentials are derived fresh on every [`BrokerSession::open`] and again
//! by the transport before each automatic reconnect. Publish
//! and subscribe fail immediately while no session is connected; nothing is
//! queued for later delivery.

use crate::config::GearConfig;
use crate::error::{GearError, GearResult};
use crate::token::{AccessToken, BrokerEndpoint, DeviceIdentity};
use crate::transport::{
    CredentialRefresh, PublishOptions, Qos, SessionParams, Transport, TransportEvent,
    WillMessage,
};
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

pub mod credentials;

pub use credentials::BrokerCredentials;

/// Connection settings that do not change between reconnects
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub secure: bool,
    pub port: u16,
    pub keep_alive: Duration,
    pub retry_interval: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &GearConfig) -> Self {
        Self {
            secure: config.secure,
            port: config.broker.port_for(config.secure),
            keep_alive: config.broker.keep_alive(),
            retry_interval: config.broker.transport_retry(),
        }
    }
}

/// One supervised publish/subscribe session
pub struct BrokerSession {
    transport: Box<dyn Transport>,
    settings: SessionSettings,
    events: Option<mpsc::Receiver<TransportEvent>>,
    connected: bool,
}

impl BrokerSession {
    pub fn new(transport: Box<dyn Transport>, settings: SessionSettings) -> Self {
        Self {
            transport,
            settings,
            events: None,
            connected: false,
        }
    }

    /// A transport session exists (it may be between reconnects)
    pub fn is_open(&self) -> bool {
        self.events.is_some()
    }

    /// The broker has acknowledged the current connection
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Open a transport session towards `endpoint`'s host
    pub async fn open(
        &mut self,
        identity: &DeviceIdentity,
        access: &AccessToken,
        endpoint: &BrokerEndpoint,
        will: Option<WillMessage>,
    ) -> GearResult<()> {
        if self.is_open() {
            self.close().await;
        }

        let credentials = BrokerCredentials::derive_now(identity, access);
        let refresh = {
            let identity = identity.clone();
            let access = access.clone();
            CredentialRefresh::new(move || {
                let fresh = BrokerCredentials::derive_now(&identity, &access);
                (fresh.username, fresh.password)
            })
        };
        let params = SessionParams {
            host: endpoint.host.clone(),
            port: self.settings.port,
            secure: self.settings.secure,
            client_id: credentials.client_id,
            username: credentials.username,
            password: credentials.password,
            keep_alive: self.settings.keep_alive,
            retry_interval: self.settings.retry_interval,
            will,
            refresh: Some(refresh),
        };

        debug!(params = ?params, "Opening broker session");
        let events = self.transport.open(params).await?;
        self.events = Some(events);
        self.connected = false;
        Ok(())
    }

    /// Next transport event. Pending forever while no session is open, so it
    /// can sit in a `select!` unconditionally.
    pub async fn next_event(&mut self) -> TransportEvent {
        let Some(events) = self.events.as_mut() else {
            return std::future::pending().await;
        };

        let event = events.recv().await.unwrap_or(TransportEvent::Ended);
        match &event {
            TransportEvent::Connected => self.connected = true,
            TransportEvent::Closed => self.connected = false,
            TransportEvent::AuthRejected(_) | TransportEvent::Ended => {
                self.connected = false;
                self.events = None;
            }
            TransportEvent::Message { .. } => {}
        }
        event
    }

    pub async fn publish(
        &mut self,
        wire_topic: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> GearResult<()> {
        self.ensure_connected("publish")?;
        self.transport.publish(wire_topic, payload, options).await?;
        Ok(())
    }

    pub async fn subscribe(&mut self, wire_topic: &str) -> GearResult<()> {
        self.ensure_connected("subscribe")?;
        self.transport.subscribe(wire_topic, Qos::AtMostOnce).await?;
        Ok(())
    }

    pub async fn unsubscribe(&mut self, wire_topic: &str) -> GearResult<()> {
        self.ensure_connected("unsubscribe")?;
        self.transport.unsubscribe(wire_topic).await?;
        Ok(())
    }

    /// Close the transport. Returns true if a session was open.
    pub async fn close(&mut self) -> bool {
        let was_open = self.events.take().is_some();
        self.connected = false;
        if let Err(e) = self.transport.close().await {
            debug!("Transport close failed: {}", e);
        }
        was_open
    }

    fn ensure_connected(&self, operation: &'static str) -> GearResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(GearError::not_connected(operation))
        }
    }
}
