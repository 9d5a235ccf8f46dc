//! Token acquisition for the device
//!
//! Turns a device key/secret pair into an access token plus a resolved broker
//! endpoint through the two-legged OAuth handshake, with caching and
//! exponential backoff.
//!
//! - [`types`] - identity and token records as persisted in the cache
//! - [`crypto`] - HMAC-SHA1 derivations (revoke code, broker password)
//! - [`backoff`] - bounded doubling delay between attempts
//! - [`manager`] - the re-entrant state machine driven by the client actor

pub mod backoff;
pub mod crypto;
pub mod manager;
pub mod types;

pub use backoff::Backoff;
pub use manager::{TokenManager, TokenStep};
pub use types::{AccessToken, BrokerEndpoint, DeviceIdentity, RequestToken};
