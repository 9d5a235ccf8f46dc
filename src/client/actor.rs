//! The single task that owns all state of one client
//!
//! Commands, transport events and the one wake-up timer are handled strictly
//! one at a time, so token state, the subscription set and the alias never
//! see concurrent writers.

use super::commands::{Command, ConnectOptions, Reply};
use super::events::GearEvent;
use crate::cache::FileCache;
use crate::error::{GearError, GearResult};
use crate::protocol::{ControlMessage, TopicBuilder};
use crate::router::{Inbound, TopicRouter};
use crate::session::BrokerSession;
use crate::token::{TokenManager, TokenStep};
use crate::transport::{AuthFailure, PublishOptions, TransportEvent, WillMessage};
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn, Instrument};

pub(crate) struct GearActor {
    tokens: TokenManager,
    session: BrokerSession,
    router: TopicRouter,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<GearEvent>,
    reconnect_interval: Duration,
    will: Option<WillMessage>,
    /// Between `connect()` and `disconnect()`
    connecting: bool,
    wake_at: Option<Instant>,
    pending_connects: Vec<Reply<GearResult<()>>>,
}

impl GearActor {
    pub(crate) fn new(
        tokens: TokenManager,
        session: BrokerSession,
        router: TopicRouter,
        commands: mpsc::Receiver<Command>,
        events: broadcast::Sender<GearEvent>,
        reconnect_interval: Duration,
    ) -> Self {
        Self {
            tokens,
            session,
            router,
            commands,
            events,
            reconnect_interval,
            will: None,
            connecting: false,
            wake_at: None,
            pending_connects: Vec::new(),
        }
    }

    pub(crate) fn spawn(self) -> tokio::task::JoinHandle<()> {
        let span = crate::gear_span!(device_key = %self.tokens.identity().key());
        tokio::spawn(self.run().instrument(span))
    }

    async fn run(mut self) {
        debug!("Client actor started");
        loop {
            let wake_at = self.wake_at;
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = self.session.next_event() => self.handle_transport_event(event).await,
                _ = sleep_until(wake_at.unwrap_or_else(Instant::now)), if wake_at.is_some() => {
                    self.wake_at = None;
                    self.drive_tokens().await;
                }
            }
        }

        self.session.close().await;
        debug!("Client actor stopped, all handles dropped");
    }

    fn emit(&self, event: GearEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn schedule(&mut self, delay: Duration) {
        self.wake_at = Some(Instant::now() + delay);
    }

    fn resolve_pending(&mut self, mut outcome: impl FnMut() -> GearResult<()>) {
        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(outcome());
        }
    }

    /// Advance the token state machine until it must wait or is ready
    async fn drive_tokens(&mut self) {
        if !self.connecting || self.session.is_open() {
            return;
        }

        let span = crate::token_span!(appid = %self.tokens.appid());
        loop {
            let step = self.tokens.advance().instrument(span.clone()).await;
            match step {
                TokenStep::Continue | TokenStep::EndpointResolved => continue,
                TokenStep::RetryLater => {
                    let delay = self.tokens.retry_delay();
                    debug!(delay_ms = delay.as_millis() as u64, "Token step deferred");
                    self.schedule(delay);
                    return;
                }
                TokenStep::Rejected(reason) => {
                    self.emit(GearEvent::Rejected(reason));
                    let delay = self.tokens.retry_delay();
                    self.schedule(delay);
                    return;
                }
                TokenStep::NoToken(cause) => {
                    let reason = cause.to_string();
                    let err = GearError::invalid_credentials(reason.clone());
                    error!("{}", err.event_reason());
                    self.emit(GearEvent::Error(err.event_reason()));
                    self.connecting = false;
                    self.resolve_pending(|| Err(GearError::invalid_credentials(reason.clone())));
                    return;
                }
                TokenStep::Ready { access, endpoint } => {
                    let will = self.will.clone().map(|will| WillMessage {
                        topic: self.router.wire(&will.topic),
                        ..will
                    });
                    let opened = self
                        .session
                        .open(self.tokens.identity(), &access, &endpoint, will)
                        .instrument(crate::broker_span!(host = %endpoint.host))
                        .await;
                    if let Err(e) = opened {
                        warn!("Failed to open broker session: {}", e);
                        self.emit(GearEvent::Error(e.event_reason()));
                        self.schedule(self.reconnect_interval);
                    }
                    return;
                }
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected().await,
            TransportEvent::Message { topic, payload } => self.on_message(&topic, payload),
            TransportEvent::Closed => {
                debug!("Broker connection closed");
                self.emit(GearEvent::Disconnected);
            }
            TransportEvent::AuthRejected(failure) => self.on_auth_rejected(failure).await,
            TransportEvent::Ended => {
                self.emit(GearEvent::PieClosed);
                self.emit(GearEvent::Closed);
                if self.connecting {
                    self.schedule(self.reconnect_interval);
                }
            }
        }
    }

    async fn on_connected(&mut self) {
        if let Some(access) = self.tokens.access_token() {
            let control = TopicBuilder::client_control(&access.token);
            if let Err(e) = self.session.subscribe(&control).await {
                warn!("Failed to subscribe to control channel: {}", e);
            }
        }

        for topic in self.router.replay_topics() {
            debug!(topic = %topic, "Resubscribing");
            if let Err(e) = self.session.subscribe(&topic).await {
                warn!(topic = %topic, "Resubscribe failed: {}", e);
            }
        }

        if let Some(alias) = self.router.alias().map(str::to_string) {
            if let Err(e) = self.publish_alias(&alias).await {
                warn!("Failed to re-apply alias: {}", e);
            }
        }

        info!(appid = %self.router.appid(), "Microgear connected");
        self.emit(GearEvent::Connected);
        self.resolve_pending(|| Ok(()));
    }

    fn on_message(&mut self, wire_topic: &str, payload: Bytes) {
        match self.router.route_inbound(wire_topic, payload) {
            Inbound::Control(ControlMessage::Present(value)) => {
                self.emit(GearEvent::Present(value))
            }
            Inbound::Control(ControlMessage::Absent(value)) => self.emit(GearEvent::Absent(value)),
            Inbound::Control(ControlMessage::ResetEndpoint) => {
                if self.tokens.reset_endpoint() {
                    info!("Endpoint reset requested by broker");
                    self.emit(GearEvent::Info("endpoint reset".to_string()));
                }
            }
            Inbound::Control(ControlMessage::Unknown(verb)) => {
                debug!(verb = %verb, "Ignoring unknown control message");
            }
            Inbound::Public { topic, payload } => {
                self.emit(GearEvent::Message { topic, payload })
            }
        }
    }

    async fn on_auth_rejected(&mut self, failure: AuthFailure) {
        match failure {
            AuthFailure::BadCredentials => {
                info!("Broker rejected credentials, requesting a new token");
                self.emit(GearEvent::Info(
                    "invalid token, requesting a new one".to_string(),
                ));
            }
            AuthFailure::NotAuthorized => {
                warn!("Broker reports microgear unauthorized");
                self.emit(GearEvent::Warning("microgear unauthorized".to_string()));
            }
        }

        self.tokens.invalidate();
        self.session.close().await;
        if self.connecting {
            self.schedule(self.reconnect_interval);
        }
    }

    async fn publish_alias(&mut self, alias: &str) -> GearResult<()> {
        let wire = self.router.wire(&TopicBuilder::set_alias(alias));
        self.session
            .publish(&wire, Bytes::new(), PublishOptions::default())
            .await?;
        self.router.set_alias(Some(alias.to_string()));
        Ok(())
    }

    /// Subscribe a public topic; reports failures as `error` events
    async fn subscribe_topic(&mut self, topic: &str) -> bool {
        let wire = self.router.wire(topic);
        match self.session.subscribe(&wire).await {
            Ok(()) => {
                self.router.track(topic);
                true
            }
            Err(e) => {
                self.emit(GearEvent::Error(e.event_reason()));
                false
            }
        }
    }

    /// Unsubscribe a public topic; reports failures as `error` events and
    /// keeps the topic tracked unless the transport accepted the request
    async fn unsubscribe_topic(&mut self, topic: &str) -> GearResult<()> {
        if !self.session.is_connected() {
            let err = GearError::not_connected("unsubscribe");
            self.emit(GearEvent::Error(err.event_reason()));
            return Err(err);
        }
        if !self.router.is_tracked(topic) {
            debug!(topic = %topic, "Not subscribed, nothing to undo");
            return Ok(());
        }

        let wire = self.router.wire(topic);
        match self.session.unsubscribe(&wire).await {
            Ok(()) => {
                self.router.untrack(topic);
                Ok(())
            }
            Err(e) => {
                warn!(topic = %topic, "Unsubscribe failed: {}", e);
                self.emit(GearEvent::Error(e.event_reason()));
                Err(e)
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                appid,
                options,
                reply,
            } => self.connect(appid, options, reply).await,
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::Publish {
                topic,
                payload,
                options,
                reply,
            } => {
                let wire = self.router.wire(&topic);
                let result = self.session.publish(&wire, payload, options).await;
                if let Err(e) = &result {
                    self.emit(GearEvent::Error(e.event_reason()));
                }
                let _ = reply.send(result);
            }
            Command::Subscribe { topic, reply } => {
                let accepted = self.subscribe_topic(&topic).await;
                let _ = reply.send(accepted);
            }
            Command::Unsubscribe { topic, reply } => {
                let result = self.unsubscribe_topic(&topic).await;
                let _ = reply.send(result);
            }
            Command::SetAlias { alias, reply } => {
                let result = self.publish_alias(&alias).await;
                if let Err(e) = &result {
                    self.emit(GearEvent::Error(e.event_reason()));
                }
                let _ = reply.send(result);
            }
            Command::SetName { name, reply } => {
                let released = match self.router.name().map(str::to_string) {
                    Some(previous) => self
                        .unsubscribe_topic(&TopicBuilder::gearname(&previous))
                        .await
                        .is_ok(),
                    None => true,
                };
                let accepted =
                    released && self.subscribe_topic(&TopicBuilder::gearname(&name)).await;
                if accepted {
                    self.router.set_name(Some(name));
                }
                let _ = reply.send(accepted);
            }
            Command::UnsetName { reply } => {
                if let Some(previous) = self.router.name().map(str::to_string) {
                    if self
                        .unsubscribe_topic(&TopicBuilder::gearname(&previous))
                        .await
                        .is_ok()
                    {
                        self.router.set_name(None);
                    }
                }
                let _ = reply.send(());
            }
            Command::ResetToken { reply } => {
                let result = self.tokens.revoke().await;
                if let Err(e) = &result {
                    warn!("Token reset failed: {}", e);
                    self.emit(GearEvent::Error(format!(
                        "Reset token error: {}",
                        e.event_reason()
                    )));
                }
                let _ = reply.send(result);
            }
            Command::SetCachePath { path, reply } => {
                debug!(path = %path.display(), "Switching cache file");
                self.tokens.replace_cache(Box::new(FileCache::new(path)));
                let _ = reply.send(());
            }
            Command::EnablePresence { reply } => {
                if self.router.enable_presence() && self.session.is_connected() {
                    self.subscribe_control(&TopicBuilder::present()).await;
                }
                let _ = reply.send(());
            }
            Command::EnableAbsence { reply } => {
                if self.router.enable_absence() && self.session.is_connected() {
                    self.subscribe_control(&TopicBuilder::absent()).await;
                }
                let _ = reply.send(());
            }
        }
    }

    /// Subscribe a presence channel without tracking it as a user subscription
    async fn subscribe_control(&mut self, topic: &str) {
        let wire = self.router.wire(topic);
        if let Err(e) = self.session.subscribe(&wire).await {
            warn!(topic = %wire, "Presence subscribe failed: {}", e);
        }
    }

    async fn connect(
        &mut self,
        appid: String,
        options: ConnectOptions,
        reply: Reply<GearResult<()>>,
    ) {
        if self.session.is_connected() {
            if self.router.appid() == appid {
                let _ = reply.send(Ok(()));
                return;
            }
            info!(from = %self.router.appid(), to = %appid, "Switching application");
            self.session.close().await;
            self.connecting = false;
        }

        self.tokens.set_appid(appid.clone());
        self.router.set_appid(appid);
        self.will = options.will;
        self.pending_connects.push(reply);

        if !self.connecting {
            info!(appid = %self.router.appid(), "Connecting");
            self.connecting = true;
            self.wake_at = None;
            self.drive_tokens().await;
        }
    }

    async fn disconnect(&mut self) {
        self.connecting = false;
        self.wake_at = None;
        let was_open = self.session.close().await;

        self.emit(GearEvent::Disconnected);
        if was_open {
            self.emit(GearEvent::PieClosed);
            self.emit(GearEvent::Closed);
        }
        self.resolve_pending(|| {
            Err(GearError::Disconnected(
                "disconnect() called before the session opened".to_string(),
            ))
        });
        info!("Microgear disconnected");
    }
}
