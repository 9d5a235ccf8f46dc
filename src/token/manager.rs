//! Token acquisition state machine
//!
//! [`TokenManager::advance`] performs at most one gateway call and reports a
//! [`TokenStep`]. The client actor keeps calling it (immediately, or after
//! [`TokenManager::retry_delay`]) until it yields [`TokenStep::Ready`] or the
//! terminal [`TokenStep::NoToken`].

use super::backoff::Backoff;
use super::crypto;
use super::types::{AccessToken, BrokerEndpoint, DeviceIdentity, RequestToken};
use crate::cache::{CredentialCache, ACCESS_TOKEN_KEY, DEVICE_KEY, REQUEST_TOKEN_KEY};
use crate::config::GatewaySection;
use crate::error::{GearError, GearResult};
use crate::gateway::{Gateway, GatewayError, RequestTokenParams};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one [`TokenManager::advance`] call
#[derive(Debug)]
pub enum TokenStep {
    /// The gateway refused to issue a request token. Terminal: bad key/secret.
    NoToken(GatewayError),
    /// Nothing to do until the backoff delay has elapsed
    RetryLater,
    /// The access-token exchange was rejected and the request token discarded
    Rejected(String),
    /// An access token was issued; advance again immediately
    Continue,
    /// The broker endpoint was resolved; advance again immediately
    EndpointResolved,
    /// Ready to open a broker session
    Ready {
        access: AccessToken,
        endpoint: BrokerEndpoint,
    },
}

/// Drives the two-legged handshake and endpoint lookup for one device
pub struct TokenManager {
    identity: DeviceIdentity,
    gateway: Arc<dyn Gateway>,
    cache: Box<dyn CredentialCache>,
    appid: String,
    scope: String,
    api_revision: String,
    request_token: Option<RequestToken>,
    access_token: Option<AccessToken>,
    backoff: Backoff,
}

impl TokenManager {
    pub fn new(
        identity: DeviceIdentity,
        gateway: Arc<dyn Gateway>,
        cache: Box<dyn CredentialCache>,
        gateway_config: &GatewaySection,
        backoff: Backoff,
    ) -> Self {
        Self {
            identity,
            gateway,
            cache,
            appid: String::new(),
            scope: gateway_config.scope.clone(),
            api_revision: gateway_config.api_revision.clone(),
            request_token: None,
            access_token: None,
            backoff,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn set_appid(&mut self, appid: impl Into<String>) {
        self.appid = appid.into();
    }

    pub fn appid(&self) -> &str {
        &self.appid
    }

    pub fn access_token(&self) -> Option<&AccessToken> {
        self.access_token.as_ref()
    }

    pub fn request_token(&self) -> Option<&RequestToken> {
        self.request_token.as_ref()
    }

    /// Swap the backing store, e.g. after a cache path override
    pub fn replace_cache(&mut self, cache: Box<dyn CredentialCache>) {
        self.cache = cache;
    }

    /// Delay before the next attempt after [`TokenStep::RetryLater`] or
    /// [`TokenStep::Rejected`]; doubles on every call up to the maximum
    pub fn retry_delay(&mut self) -> Duration {
        self.backoff.next_delay()
    }

    /// Run one step of the handshake
    pub async fn advance(&mut self) -> TokenStep {
        self.check_identity();

        if self.access_token.is_none() {
            self.access_token = self.cached(ACCESS_TOKEN_KEY);
        }

        match self.access_token.clone() {
            Some(access) if access.has_endpoint() => self.ready(access),
            Some(access) => self.resolve_endpoint(access).await,
            None => {
                if self.request_token.is_none() {
                    self.request_token = self.cached(REQUEST_TOKEN_KEY);
                }
                match self.request_token.clone() {
                    Some(request) => self.exchange_request_token(request).await,
                    None => self.obtain_request_token().await,
                }
            }
        }
    }

    /// Discard both tokens after the broker refused our credentials
    pub fn invalidate(&mut self) {
        info!("Invalidating cached tokens");
        self.request_token = None;
        self.access_token = None;
        self.clear_cached(Some(ACCESS_TOKEN_KEY));
        self.clear_cached(Some(REQUEST_TOKEN_KEY));
    }

    /// Forget the resolved endpoint so the next advance looks it up again.
    /// Returns false when there was no endpoint to reset.
    pub fn reset_endpoint(&mut self) -> bool {
        if self.access_token.is_none() {
            self.access_token = self.cached(ACCESS_TOKEN_KEY);
        }
        let Some(access) = self.access_token.as_mut() else {
            return false;
        };
        if !access.has_endpoint() {
            return false;
        }
        access.endpoint.clear();
        let snapshot = access.clone();
        self.persist(ACCESS_TOKEN_KEY, &snapshot);
        true
    }

    /// Revoke the current access token and clear the cache on success.
    /// Falls back to the in-memory token when it was never persisted.
    pub async fn revoke(&mut self) -> GearResult<()> {
        let Some(access) = self
            .cached::<AccessToken>(ACCESS_TOKEN_KEY)
            .or_else(|| self.access_token.clone())
        else {
            debug!("No access token to revoke");
            return Ok(());
        };

        let code = access.revokecode.replace('/', "_");
        let body = self.gateway.revoke(&access.token, &code).await?;
        if body == "FAILED" {
            return Err(GearError::RevokeFailed(body));
        }

        self.cache.clear(None)?;
        self.request_token = None;
        self.access_token = None;
        info!("Access token revoked");
        Ok(())
    }

    /// Reset all token state when the cache belongs to a different device key
    fn check_identity(&mut self) {
        let cached_key = self
            .cache
            .get(DEVICE_KEY)
            .and_then(|value| value.as_str().map(str::to_string));

        match cached_key.as_deref() {
            Some(key) if key == self.identity.key() => return,
            Some(key) => {
                info!(cached = %key, "Device key changed, discarding cached tokens");
                self.request_token = None;
                self.access_token = None;
                self.clear_cached(None);
            }
            None => {}
        }
        let key = self.identity.key().to_string();
        self.persist(DEVICE_KEY, &key);
    }

    fn ready(&mut self, access: AccessToken) -> TokenStep {
        match BrokerEndpoint::parse(&access.endpoint) {
            Ok(endpoint) => {
                self.backoff.reset();
                TokenStep::Ready { access, endpoint }
            }
            Err(e) => {
                warn!("Discarding unusable endpoint, will look it up again: {}", e);
                self.reset_endpoint();
                TokenStep::RetryLater
            }
        }
    }

    async fn resolve_endpoint(&mut self, mut access: AccessToken) -> TokenStep {
        match self.gateway.lookup_endpoint(&self.identity, &access).await {
            Ok(endpoint) => {
                debug!(endpoint = %endpoint, "Broker endpoint resolved");
                access.endpoint = endpoint;
                self.persist(ACCESS_TOKEN_KEY, &access);
                self.access_token = Some(access);
                TokenStep::EndpointResolved
            }
            Err(e) => {
                warn!("Endpoint lookup failed, will retry: {}", e);
                TokenStep::RetryLater
            }
        }
    }

    async fn exchange_request_token(&mut self, request: RequestToken) -> TokenStep {
        match self.gateway.access_token(&self.identity, &request).await {
            Ok(grant) => {
                let revokecode =
                    crypto::revoke_code(&grant.token, &grant.secret, self.identity.secret());
                let access = AccessToken {
                    token: grant.token.clone(),
                    secret: grant.secret.clone(),
                    appkey: grant.appkey.clone(),
                    endpoint: grant.endpoint.clone(),
                    revokecode,
                };

                if grant.already_redeemed() {
                    warn!("Request token was already redeemed, keeping access token for this session only");
                } else {
                    self.persist(ACCESS_TOKEN_KEY, &access);
                }
                self.clear_cached(Some(REQUEST_TOKEN_KEY));
                self.request_token = None;
                self.access_token = Some(access);
                self.backoff.reset();
                info!("Access token issued");
                TokenStep::Continue
            }
            Err(e) if e.is_authorization_pending() => {
                debug!("Access token not authorized yet, will retry");
                TokenStep::RetryLater
            }
            Err(e) => {
                warn!("Request token rejected: {}", e);
                self.request_token = None;
                self.clear_cached(Some(REQUEST_TOKEN_KEY));
                TokenStep::Rejected("Request token rejected".to_string())
            }
        }
    }

    async fn obtain_request_token(&mut self) -> TokenStep {
        let verifier = self
            .identity
            .alias()
            .map(str::to_string)
            .unwrap_or_else(|| self.api_revision.clone());
        let params = RequestTokenParams {
            scope: self.scope.clone(),
            appid: self.appid.clone(),
            api_revision: self.api_revision.clone(),
            verifier: verifier.clone(),
        };

        match self.gateway.request_token(&self.identity, &params).await {
            Ok(grant) => {
                let request = RequestToken {
                    token: grant.token,
                    secret: grant.secret,
                    verifier,
                };
                self.persist(REQUEST_TOKEN_KEY, &request);
                self.request_token = Some(request);
                debug!("Request token issued");
                TokenStep::RetryLater
            }
            // No HTTP answer at all: the gateway is unreachable, not refusing us
            Err(e) if e.status().is_none() && matches!(e, GatewayError::Http(_)) => {
                warn!("Gateway unreachable, will retry: {}", e);
                TokenStep::RetryLater
            }
            Err(e) => TokenStep::NoToken(e),
        }
    }

    fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.cache.get(key)?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(key = key, "Ignoring malformed cache entry: {}", e);
                None
            }
        }
    }

    fn persist<T: Serialize>(&mut self, key: &str, value: &T) {
        let result = serde_json::to_value(value)
            .map_err(crate::cache::CacheError::from)
            .and_then(|value| self.cache.set(key, value));
        if let Err(e) = result {
            warn!(key = key, "Failed to persist cache entry: {}", e);
        }
    }

    fn clear_cached(&mut self, key: Option<&str>) {
        if let Err(e) = self.cache.clear(key) {
            warn!("Failed to clear cache: {}", e);
        }
    }
}
