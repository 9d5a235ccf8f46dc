//! `GearClient`: the public façade
//!
//! A `GearClient` is a cheap, cloneable handle. All state lives in one actor
//! task spawned by [`GearClientBuilder::build`]; handles talk to it over a
//! command channel and observe it through a broadcast channel of
//! [`GearEvent`]s.
//!
//! ```rust,no_run
//! use microgear::client::GearClient;
//! use microgear::config::GearConfig;
//! use microgear::gateway::RequestSigner;
//! use std::sync::Arc;
//!
//! # async fn demo(signer: Arc<dyn RequestSigner>) -> microgear::GearResult<()> {
//! let config = GearConfig::new("my-device-key", "my-device-secret");
//! let gear = GearClient::from_config(&config, signer)?;
//! let mut events = gear.events();
//!
//! gear.connect("myapp").await?;
//! gear.subscribe("/room/temp").await;
//! gear.publish("/room/temp", "21.5").await?;
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{}: {:?}", event.name(), event);
//! }
//! # Ok(())
//! # }
//! ```

use crate::cache::{CredentialCache, FileCache, MemoryCache};
use crate::config::{ConfigError, GearConfig};
use crate::error::{GearError, GearResult};
use crate::gateway::{Gateway, HttpGateway, RequestSigner};
use crate::protocol::TopicBuilder;
use crate::router::TopicRouter;
use crate::session::{BrokerSession, SessionSettings};
use crate::token::{Backoff, DeviceIdentity, TokenManager};
use crate::transport::{MqttTransport, PublishOptions, Transport};
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

mod actor;
pub mod commands;
pub mod events;

use actor::GearActor;
use commands::Command;
pub use commands::ConnectOptions;
pub use events::GearEvent;

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Handle to one device client
#[derive(Clone)]
pub struct GearClient {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<GearEvent>,
    device_key: Arc<str>,
}

impl std::fmt::Debug for GearClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GearClient")
            .field("device_key", &self.device_key)
            .finish_non_exhaustive()
    }
}

impl GearClient {
    pub fn builder(identity: DeviceIdentity) -> GearClientBuilder {
        GearClientBuilder::new(identity)
    }

    /// Production client: HTTP gateway, MQTT transport and a file cache, all
    /// configured from `config`. Must be called inside a tokio runtime.
    pub fn from_config(config: &GearConfig, signer: Arc<dyn RequestSigner>) -> GearResult<Self> {
        config.validate()?;
        let mut identity = DeviceIdentity::new(config.gear.key.clone(), config.gear_secret()?);
        if let Some(alias) = &config.gear.alias {
            identity = identity.with_alias(alias);
        }
        let gateway = HttpGateway::new(&config.gateway, config.secure, signer)?;

        Self::builder(identity)
            .config(config.clone())
            .gateway(Arc::new(gateway))
            .transport(Box::new(MqttTransport::new()))
            .cache(Box::new(FileCache::new(config.cache_file())))
            .build()
    }

    pub fn device_key(&self) -> &str {
        &self.device_key
    }

    /// Another handle to the same client
    pub fn instance(&self) -> GearClient {
        self.clone()
    }

    /// New receiver for client events. Only events sent after this call are seen.
    pub fn events(&self) -> broadcast::Receiver<GearEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> GearResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| GearError::ClientClosed)?;
        response.await.map_err(|_| GearError::ClientClosed)
    }

    /// Connect under application `appid`; resolves once the broker session opens
    pub async fn connect(&self, appid: &str) -> GearResult<()> {
        self.connect_with(appid, ConnectOptions::default()).await
    }

    pub async fn connect_with(&self, appid: &str, options: ConnectOptions) -> GearResult<()> {
        let appid = appid.to_string();
        self.request(|reply| Command::Connect {
            appid,
            options,
            reply,
        })
        .await?
    }

    /// Close the session. Emits `disconnected` even when nothing was open.
    pub async fn disconnect(&self) -> GearResult<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Publish to a public topic. While disconnected this emits an `error`
    /// event and returns [`GearError::NotConnected`]; nothing is queued.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> GearResult<()> {
        self.publish_with(topic, payload, PublishOptions::default())
            .await
    }

    pub async fn publish_with(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> GearResult<()> {
        let topic = topic.to_string();
        let payload = payload.into();
        self.request(|reply| Command::Publish {
            topic,
            payload,
            options,
            reply,
        })
        .await?
    }

    /// Subscribe to a public topic; returns whether it was accepted
    pub async fn subscribe(&self, topic: &str) -> bool {
        let topic = topic.to_string();
        self.request(|reply| Command::Subscribe { topic, reply })
            .await
            .unwrap_or(false)
    }

    /// Unsubscribe a public topic; a no-op if it is not subscribed. While
    /// disconnected this emits an `error` event and the topic stays tracked.
    pub async fn unsubscribe(&self, topic: &str) -> GearResult<()> {
        let topic = topic.to_string();
        self.request(|reply| Command::Unsubscribe { topic, reply })
            .await?
    }

    /// Send `message` to the gear named `gearname`
    pub async fn chat(&self, gearname: &str, message: impl Into<Bytes>) -> GearResult<()> {
        self.publish(&TopicBuilder::gearname(gearname), message)
            .await
    }

    /// Announce a new alias; it is re-applied after every reconnect
    pub async fn set_alias(&self, alias: &str) -> GearResult<()> {
        let alias = alias.to_string();
        self.request(|reply| Command::SetAlias { alias, reply })
            .await?
    }

    #[deprecated(note = "use set_alias")]
    pub async fn set_name(&self, name: &str) -> bool {
        let name = name.to_string();
        self.request(|reply| Command::SetName { name, reply })
            .await
            .unwrap_or(false)
    }

    #[deprecated(note = "use set_alias")]
    pub async fn unset_name(&self) -> GearResult<()> {
        self.request(|reply| Command::UnsetName { reply }).await
    }

    pub async fn readstream(&self, stream: &str, filter: &str) -> GearResult<()> {
        let payload = serde_json::json!({ "filter": filter }).to_string();
        self.publish(&TopicBuilder::readstream(stream), payload)
            .await
    }

    /// `data` is embedded as JSON, so pass a value rather than pre-encoded text
    pub async fn writestream(&self, stream: &str, data: serde_json::Value) -> GearResult<()> {
        let payload = serde_json::json!({ "data": data }).to_string();
        self.publish(&TopicBuilder::writestream(stream), payload)
            .await
    }

    pub async fn readpostbox(&self, box_name: &str) -> GearResult<()> {
        self.publish(&TopicBuilder::readpostbox(box_name), Bytes::new())
            .await
    }

    pub async fn writepostbox(&self, box_name: &str, data: impl Into<Bytes>) -> GearResult<()> {
        self.publish(&TopicBuilder::writepostbox(box_name), data)
            .await
    }

    /// Revoke the cached access token and clear the cache.
    /// On failure the cache is left as it was.
    pub async fn reset_token(&self) -> GearResult<()> {
        self.request(|reply| Command::ResetToken { reply }).await?
    }

    /// Move the credential cache to `path`
    pub async fn set_cache_path(&self, path: impl Into<PathBuf>) -> GearResult<()> {
        let path = path.into();
        self.request(|reply| Command::SetCachePath { path, reply })
            .await
    }

    /// Start receiving `present` events
    pub async fn enable_presence(&self) -> GearResult<()> {
        self.request(|reply| Command::EnablePresence { reply })
            .await
    }

    /// Start receiving `absent` events
    pub async fn enable_absence(&self) -> GearResult<()> {
        self.request(|reply| Command::EnableAbsence { reply })
            .await
    }
}

/// Assembles a client from injectable parts
pub struct GearClientBuilder {
    identity: DeviceIdentity,
    config: Option<GearConfig>,
    gateway: Option<Arc<dyn Gateway>>,
    transport: Option<Box<dyn Transport>>,
    cache: Option<Box<dyn CredentialCache>>,
    track_presence: bool,
    track_absence: bool,
}

impl GearClientBuilder {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            config: None,
            gateway: None,
            transport: None,
            cache: None,
            track_presence: false,
            track_absence: false,
        }
    }

    /// Timing, ports and gateway parameters; the `[gear]` section is ignored
    pub fn config(mut self, config: GearConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn gateway(mut self, gateway: Arc<dyn Gateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to an in-memory cache
    pub fn cache(mut self, cache: Box<dyn CredentialCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn track_presence(mut self, enabled: bool) -> Self {
        self.track_presence = enabled;
        self
    }

    pub fn track_absence(mut self, enabled: bool) -> Self {
        self.track_absence = enabled;
        self
    }

    /// Spawn the client actor. Must be called inside a tokio runtime.
    pub fn build(self) -> GearResult<GearClient> {
        let gateway = self.gateway.ok_or_else(|| {
            ConfigError::InvalidConfig("a gateway is required to build a client".to_string())
        })?;
        let transport = self.transport.ok_or_else(|| {
            ConfigError::InvalidConfig("a transport is required to build a client".to_string())
        })?;
        let config = self.config.unwrap_or_else(|| {
            GearConfig::new(self.identity.key(), self.identity.secret())
        });
        let cache = self
            .cache
            .unwrap_or_else(|| Box::new(MemoryCache::new()));

        let mut router = TopicRouter::new().with_presence(self.track_presence, self.track_absence);
        router.set_alias(self.identity.alias().map(str::to_string));

        let device_key: Arc<str> = Arc::from(self.identity.key());
        let tokens = TokenManager::new(
            self.identity,
            gateway,
            cache,
            &config.gateway,
            Backoff::from_config(&config.token),
        );
        let session = BrokerSession::new(transport, SessionSettings::from_config(&config));

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        GearActor::new(
            tokens,
            session,
            router,
            command_rx,
            event_tx.clone(),
            config.broker.reconnect_interval(),
        )
        .spawn();

        Ok(GearClient {
            commands: command_tx,
            events: event_tx,
            device_key,
        })
    }
}
