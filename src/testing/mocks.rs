//! Mock implementations for testing
//!
//! `MockTransport` and `MockGateway` are cheap to clone; every clone shares
//! the same recorded state, so a test keeps one handle while the client owns
//! another.

use crate::gateway::{
    AccessGrant, Gateway, GatewayError, RequestSigner, RequestTokenParams, SigningRequest,
    TokenGrant,
};
use crate::token::{AccessToken, DeviceIdentity, RequestToken};
use crate::transport::{
    AuthFailure, PublishOptions, Qos, SessionParams, Transport, TransportError, TransportEvent,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub type PublishedMessage = (String, Bytes, PublishOptions);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct TransportState {
    auto_connect: bool,
    fail_open: bool,
    pending_rejections: VecDeque<AuthFailure>,
    opened: Vec<SessionParams>,
    opened_at: Vec<Instant>,
    refreshed: Vec<(String, String)>,
    subscriptions: Vec<String>,
    unsubscriptions: Vec<String>,
    published: Vec<PublishedMessage>,
    close_count: usize,
    sender: Option<mpsc::Sender<TransportEvent>>,
}

/// In-memory transport recording every call
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    /// Transport that acknowledges every open immediately
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                auto_connect: true,
                fail_open: false,
                pending_rejections: VecDeque::new(),
                opened: Vec::new(),
                opened_at: Vec::new(),
                refreshed: Vec::new(),
                subscriptions: Vec::new(),
                unsubscriptions: Vec::new(),
                published: Vec::new(),
                close_count: 0,
                sender: None,
            })),
        }
    }

    /// Leave opened sessions unacknowledged until [`MockTransport::inject`]
    pub fn without_auto_connect(self) -> Self {
        lock(&self.state).auto_connect = false;
        self
    }

    /// Make every `open` fail
    pub fn with_failing_open(self) -> Self {
        lock(&self.state).fail_open = true;
        self
    }

    /// The next open is refused by the broker with `failure`
    pub fn reject_next_open(&self, failure: AuthFailure) {
        lock(&self.state).pending_rejections.push_back(failure);
    }

    /// Deliver an event on the current session; false if none is open
    pub fn inject(&self, event: TransportEvent) -> bool {
        let state = lock(&self.state);
        match &state.sender {
            Some(sender) => sender.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver an inbound message on `wire_topic`
    pub fn deliver(&self, wire_topic: &str, payload: &[u8]) -> bool {
        self.inject(TransportEvent::Message {
            topic: wire_topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Drop the connection and come back, as the broker library would,
    /// re-deriving credentials in between
    pub fn simulate_reconnect(&self) -> bool {
        if !self.inject(TransportEvent::Closed) {
            return false;
        }
        let refresh = lock(&self.state)
            .opened
            .last()
            .and_then(|params| params.refresh.clone());
        if let Some(refresh) = refresh {
            let fresh = refresh.fresh();
            lock(&self.state).refreshed.push(fresh);
        }
        self.inject(TransportEvent::Connected)
    }

    /// `(username, password)` pairs derived by simulated reconnects
    pub fn refreshed_credentials(&self) -> Vec<(String, String)> {
        lock(&self.state).refreshed.clone()
    }

    pub fn opened_sessions(&self) -> Vec<SessionParams> {
        lock(&self.state).opened.clone()
    }

    /// Runtime clock reading at each open, for timing assertions
    pub fn open_times(&self) -> Vec<Instant> {
        lock(&self.state).opened_at.clone()
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).opened.len()
    }

    /// Every subscribe call in order, replays included
    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.state).subscriptions.clone()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        lock(&self.state).unsubscriptions.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state).published.clone()
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).close_count
    }

    pub fn clear_history(&self) {
        let mut state = lock(&self.state);
        state.subscriptions.clear();
        state.unsubscriptions.clear();
        state.published.clear();
    }

    fn ensure_open(state: &TransportState) -> Result<(), TransportError> {
        if state.sender.is_some() {
            Ok(())
        } else {
            Err(TransportError::NotOpen)
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &mut self,
        params: SessionParams,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let mut state = lock(&self.state);
        if state.fail_open {
            return Err(TransportError::Request("mock open failure".to_string()));
        }
        state.opened.push(params);
        state.opened_at.push(Instant::now());

        let (tx, rx) = mpsc::channel(64);
        if let Some(failure) = state.pending_rejections.pop_front() {
            let _ = tx.try_send(TransportEvent::AuthRejected(failure));
        } else if state.auto_connect {
            let _ = tx.try_send(TransportEvent::Connected);
        }
        state.sender = Some(tx);
        Ok(rx)
    }

    async fn subscribe(&mut self, topic: &str, _qos: Qos) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        Self::ensure_open(&state)?;
        state.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        Self::ensure_open(&state)?;
        state.unsubscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        Self::ensure_open(&state)?;
        state.published.push((topic.to_string(), payload, options));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.close_count += 1;
        state.sender = None;
        Ok(())
    }
}

#[derive(Debug)]
struct GatewayState {
    refuse_request_tokens: bool,
    access_failures: VecDeque<u16>,
    redeemed_flag: bool,
    grant_endpoint: String,
    lookup_endpoint: Option<String>,
    revoke_body: String,
    issued: u32,
    request_token_calls: usize,
    access_token_calls: usize,
    lookup_calls: usize,
    revoked: Vec<(String, String)>,
    last_request_params: Option<RequestTokenParams>,
}

/// Scriptable gateway; succeeds on every leg unless told otherwise
#[derive(Debug, Clone)]
pub struct MockGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GatewayState {
                refuse_request_tokens: false,
                access_failures: VecDeque::new(),
                redeemed_flag: false,
                grant_endpoint: "pie://gb.netpie.io:1883".to_string(),
                lookup_endpoint: Some("gb.netpie.io:1883".to_string()),
                revoke_body: "OK".to_string(),
                issued: 0,
                request_token_calls: 0,
                access_token_calls: 0,
                lookup_calls: 0,
                revoked: Vec::new(),
                last_request_params: None,
            })),
        }
    }

    /// Leg 1 answers 401 from now on
    pub fn refuse_request_tokens(&self) {
        lock(&self.state).refuse_request_tokens = true;
    }

    /// The next leg 2 call fails with `status`
    pub fn fail_access_token_with(&self, status: u16) {
        lock(&self.state).access_failures.push_back(status);
    }

    pub fn set_redeemed_flag(&self, redeemed: bool) {
        lock(&self.state).redeemed_flag = redeemed;
    }

    /// Endpoint carried by leg 2 responses; empty forces a lookup
    pub fn set_grant_endpoint(&self, endpoint: &str) {
        lock(&self.state).grant_endpoint = endpoint.to_string();
    }

    /// Endpoint lookup result; `None` makes the lookup fail
    pub fn set_lookup_endpoint(&self, endpoint: Option<&str>) {
        lock(&self.state).lookup_endpoint = endpoint.map(str::to_string);
    }

    pub fn set_revoke_body(&self, body: &str) {
        lock(&self.state).revoke_body = body.to_string();
    }

    pub fn request_token_calls(&self) -> usize {
        lock(&self.state).request_token_calls
    }

    pub fn access_token_calls(&self) -> usize {
        lock(&self.state).access_token_calls
    }

    pub fn lookup_calls(&self) -> usize {
        lock(&self.state).lookup_calls
    }

    pub fn revoke_calls(&self) -> usize {
        lock(&self.state).revoked.len()
    }

    /// `(token, revoke code)` pairs in call order
    pub fn revoked(&self) -> Vec<(String, String)> {
        lock(&self.state).revoked.clone()
    }

    pub fn last_request_params(&self) -> Option<RequestTokenParams> {
        lock(&self.state).last_request_params.clone()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn request_token(
        &self,
        _identity: &DeviceIdentity,
        params: &RequestTokenParams,
    ) -> Result<TokenGrant, GatewayError> {
        let mut state = lock(&self.state);
        state.request_token_calls += 1;
        state.last_request_params = Some(params.clone());
        if state.refuse_request_tokens {
            return Err(GatewayError::Status {
                code: 401,
                body: "Unauthorized".to_string(),
            });
        }
        state.issued += 1;
        Ok(TokenGrant {
            token: format!("rtoken-{}", state.issued),
            secret: format!("rsecret-{}", state.issued),
        })
    }

    async fn access_token(
        &self,
        _identity: &DeviceIdentity,
        _request: &RequestToken,
    ) -> Result<AccessGrant, GatewayError> {
        let mut state = lock(&self.state);
        state.access_token_calls += 1;
        if let Some(code) = state.access_failures.pop_front() {
            return Err(GatewayError::Status {
                code,
                body: String::new(),
            });
        }
        state.issued += 1;
        Ok(AccessGrant {
            token: format!("atoken-{}", state.issued),
            secret: format!("asecret/{}", state.issued),
            appkey: "appkey".to_string(),
            endpoint: state.grant_endpoint.clone(),
            flag: state.redeemed_flag.then(|| "S".to_string()),
        })
    }

    async fn lookup_endpoint(
        &self,
        _identity: &DeviceIdentity,
        _access: &AccessToken,
    ) -> Result<String, GatewayError> {
        let mut state = lock(&self.state);
        state.lookup_calls += 1;
        state
            .lookup_endpoint
            .clone()
            .ok_or_else(|| GatewayError::Status {
                code: 503,
                body: "unavailable".to_string(),
            })
    }

    async fn revoke(&self, token: &str, revoke_code: &str) -> Result<String, GatewayError> {
        let mut state = lock(&self.state);
        state
            .revoked
            .push((token.to_string(), revoke_code.to_string()));
        Ok(state.revoke_body.clone())
    }
}

/// Signer producing a fixed, inspectable header
#[derive(Debug, Clone, Default)]
pub struct MockSigner;

impl RequestSigner for MockSigner {
    fn authorization(&self, request: &SigningRequest<'_>) -> Result<String, GatewayError> {
        Ok(format!(
            "OAuth oauth_consumer_key=\"{}\", oauth_token=\"{}\", oauth_verifier=\"{}\"",
            request.consumer_key,
            request.token.unwrap_or_default(),
            request.verifier.unwrap_or_default()
        ))
    }
}
