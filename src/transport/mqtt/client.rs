//! Impure I/O operations for the MQTT transport
//!
//! Each [`MqttTransport::open`] creates a fresh rumqttc client and spawns a
//! supervisor task that polls its event loop, reports [`TransportEvent`]s and
//! pauses between reconnect attempts. Credentials are re-derived before each
//! reconnect since the broker username is time-stamped.

use super::connection::{
    configure_mqtt_options, to_mqtt_qos, ConnectionState, REQUEST_CHANNEL_CAPACITY,
};
use super::message_handler::{EventRoute, MessageHandler};
use crate::transport::{
    CredentialRefresh, PublishOptions, Qos, SessionParams, Transport, TransportError,
    TransportEvent,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Buffered transport events per session
const EVENT_CHANNEL_CAPACITY: usize = 64;
/// How long `close` waits for the DISCONNECT packet to go out
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// rumqttc-backed transport
pub struct MqttTransport {
    client: Option<AsyncClient>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self {
            client: None,
            event_loop_handle: None,
            state_rx: None,
            shutdown_tx: None,
        }
    }

    /// Current connection state; `None` before the first open
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state()
            .is_some_and(|state| state.is_connected())
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.client.as_ref().ok_or(TransportError::NotOpen)
    }

    /// Stop any running supervisor without a graceful DISCONNECT
    fn stop_supervisor(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
        self.client = None;
    }

    /// Perform interruptible sleep with shutdown monitoring.
    /// Returns true if sleep completed, false if shutdown requested.
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Shutdown requested during reconnect delay");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Poll until our DISCONNECT is flushed or the grace period ends
    async fn drain_until_disconnect(event_loop: &mut EventLoop) {
        let drained = tokio::time::timeout(CLOSE_GRACE, async {
            loop {
                match event_loop.poll().await {
                    Ok(event) => {
                        if MessageHandler::route_mqtt_event(&event) == EventRoute::DisconnectSent {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        })
        .await;
        if drained.is_err() {
            debug!("DISCONNECT not flushed within grace period");
        }
    }

    /// Swap fresh credentials into the options the next poll connects with
    fn refresh_credentials(event_loop: &mut EventLoop, refresh: Option<&CredentialRefresh>) {
        if let Some(refresh) = refresh {
            let (username, password) = refresh.fresh();
            debug!(username = %username, "Re-derived broker credentials for reconnect");
            event_loop.mqtt_options.set_credentials(username, password);
        }
    }

    /// Supervisor loop: poll the event loop, forward events, back off on errors
    async fn run_event_loop(
        mut event_loop: EventLoop,
        events: mpsc::Sender<TransportEvent>,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        retry_interval: Duration,
        refresh: Option<CredentialRefresh>,
    ) {
        loop {
            let route = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        Self::drain_until_disconnect(&mut event_loop).await;
                        let _ = events.send(TransportEvent::Ended).await;
                        break;
                    }
                    continue;
                }
                polled = event_loop.poll() => match polled {
                    Ok(event) => MessageHandler::route_mqtt_event(&event),
                    Err(e) => MessageHandler::route_connection_error(&e),
                },
            };

            match &route {
                EventRoute::ConnectionAcknowledged => {
                    info!("Broker session established");
                    let _ = state_tx.send(ConnectionState::Connected);
                }
                EventRoute::NetworkError(reason) => {
                    warn!("Broker connection lost: {}", reason);
                    let _ = state_tx.send(ConnectionState::Reconnecting(reason.clone()));
                }
                EventRoute::Disconnected => {
                    info!("Broker closed the connection");
                    let _ = state_tx.send(ConnectionState::Reconnecting(
                        "disconnected by broker".to_string(),
                    ));
                }
                EventRoute::Refused(failure) => {
                    warn!(failure = ?failure, "Broker refused the connection");
                }
                EventRoute::InfrastructureEvent(event) => {
                    debug!(target: "mqtt_transport", "MQTT event: {}", event);
                }
                _ => {}
            }

            if let Some(event) = route.transport_event() {
                if events.send(event).await.is_err() {
                    debug!("Transport event receiver dropped, stopping event loop");
                    break;
                }
            }

            if route.is_terminal() {
                break;
            }

            if matches!(route, EventRoute::NetworkError(_))
                && !Self::interruptible_sleep(shutdown_rx.clone(), retry_interval).await
            {
                let _ = events.send(TransportEvent::Ended).await;
                break;
            }

            // The next poll reconnects
            if matches!(route, EventRoute::NetworkError(_) | EventRoute::Disconnected) {
                Self::refresh_credentials(&mut event_loop, refresh.as_ref());
            }
        }

        let _ = state_tx.send(ConnectionState::Stopped);
        debug!("MQTT event loop stopped");
    }
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn open(
        &mut self,
        params: SessionParams,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        self.stop_supervisor();

        let options = configure_mqtt_options(&params)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(host = %params.host, port = params.port, secure = params.secure, "Opening broker session");
        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            events_tx,
            state_tx,
            shutdown_rx,
            params.retry_interval,
            params.refresh.clone(),
        ));

        self.client = Some(client);
        self.event_loop_handle = Some(handle);
        self.state_rx = Some(state_rx);
        self.shutdown_tx = Some(shutdown_tx);
        Ok(events_rx)
    }

    async fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), TransportError> {
        self.client()?
            .subscribe(topic, to_mqtt_qos(qos))
            .await
            .map_err(|e| TransportError::Request(format!("subscribe {topic}: {e}")))
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client()?
            .unsubscribe(topic)
            .await
            .map_err(|e| TransportError::Request(format!("unsubscribe {topic}: {e}")))
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        self.client()?
            .publish_bytes(topic, to_mqtt_qos(options.qos), options.retain, payload)
            .await
            .map_err(|e| TransportError::Request(format!("publish {topic}: {e}")))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        if let Err(e) = client.try_disconnect() {
            debug!("DISCONNECT could not be queued: {}", e);
        }
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(CLOSE_GRACE * 2, handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) => warn!("Event loop task panicked: {}", e),
                Err(_) => warn!("Event loop task didn't shut down gracefully"),
            }
        }
        info!("Broker session closed");
        Ok(())
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        // No async in Drop; callers wanting a clean DISCONNECT call close() first
        self.stop_supervisor();
    }
}
