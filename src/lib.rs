//! Microgear - NETPIE device connector
//!
//! Connects a device to the NETPIE publish/subscribe fabric. The connector
//! bootstraps OAuth credentials from the gateway, opens and supervises a
//! broker session, and maps public topic names into the application
//! namespace.
//!
//! # Overview
//!
//! - [`token`]: request/access token state machine with backoff and caching
//! - [`gateway`]: HTTP calls to the credential-issuing gateway
//! - [`session`]: broker credentials and session lifecycle
//! - [`router`]: topic namespacing, subscription replay, alias and presence
//! - [`client`]: the [`GearClient`] façade and its event stream
//!
//! # Quick Start
//!
//! ```rust
//! use microgear::testing::{MockGateway, MockTransport};
//! use microgear::token::DeviceIdentity;
//! use microgear::{GearClient, GearEvent};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> microgear::GearResult<()> {
//! let transport = MockTransport::new();
//! let gear = GearClient::builder(DeviceIdentity::new("key", "secret"))
//!     .gateway(Arc::new(MockGateway::new()))
//!     .transport(Box::new(transport.clone()))
//!     .build()?;
//!
//! let mut events = gear.events();
//! gear.connect("myapp").await?;
//! assert_eq!(events.recv().await.ok(), Some(GearEvent::Connected));
//!
//! gear.publish("/room/temp", "21.5").await?;
//! assert_eq!(transport.published()[0].0, "/myapp/room/temp");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod protocol;
pub mod router;
pub mod session;
pub mod testing;
pub mod token;
pub mod transport;

pub use cache::{CredentialCache, FileCache, MemoryCache};
pub use client::{ConnectOptions, GearClient, GearClientBuilder, GearEvent};
pub use config::{ConfigError, GearConfig};
pub use error::{GearError, GearResult};
pub use token::DeviceIdentity;
pub use transport::{PublishOptions, Qos, WillMessage};
