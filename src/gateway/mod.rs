//! Credential-issuing gateway
//!
//! The [`Gateway`] trait is the seam between the token state machine and the
//! HTTP service that issues request tokens, access tokens and broker
//! endpoints. [`http::HttpGateway`] is the production implementation; tests
//! use [`crate::testing::MockGateway`].

use crate::token::{AccessToken, DeviceIdentity, RequestToken};
use async_trait::async_trait;
use thiserror::Error;

pub mod http;

pub use http::{HttpGateway, RequestSigner, SigningRequest};

/// Parameters for the first OAuth leg
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTokenParams {
    pub scope: String,
    pub appid: String,
    pub api_revision: String,
    pub verifier: String,
}

impl RequestTokenParams {
    /// Form parameters in the order the gateway documents them
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("scope".to_string(), self.scope.clone()),
            ("appid".to_string(), self.appid.clone()),
            ("mgrev".to_string(), self.api_revision.clone()),
            ("verifier".to_string(), self.verifier.clone()),
        ]
    }
}

/// Token pair returned by the first leg
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub token: String,
    pub secret: String,
}

/// Result of the second leg
#[derive(Debug, Clone, PartialEq)]
pub struct AccessGrant {
    pub token: String,
    pub secret: String,
    pub appkey: String,
    pub endpoint: String,
    /// `S` when the request token had already been redeemed
    pub flag: Option<String>,
}

impl AccessGrant {
    pub fn already_redeemed(&self) -> bool {
        self.flag.as_deref() == Some("S")
    }
}

/// Gateway call failures
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway returned HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("Gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Malformed gateway response: {0}")]
    Malformed(String),
    #[error("Request signing failed: {0}")]
    Signing(String),
}

impl GatewayError {
    /// HTTP status when the gateway answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Status { code, .. } => Some(*code),
            GatewayError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// 401 on the access-token leg: the user has not approved the device yet
    pub fn is_authorization_pending(&self) -> bool {
        self.status() == Some(401)
    }
}

/// Async operations offered by the credential-issuing service
#[async_trait]
pub trait Gateway: Send + Sync {
    /// OAuth leg 1: exchange device credentials for a request token
    async fn request_token(
        &self,
        identity: &DeviceIdentity,
        params: &RequestTokenParams,
    ) -> Result<TokenGrant, GatewayError>;

    /// OAuth leg 2: exchange a request token for an access token
    async fn access_token(
        &self,
        identity: &DeviceIdentity,
        request: &RequestToken,
    ) -> Result<AccessGrant, GatewayError>;

    /// Resolve the broker address for this device
    async fn lookup_endpoint(
        &self,
        identity: &DeviceIdentity,
        access: &AccessToken,
    ) -> Result<String, GatewayError>;

    /// Revoke an access token; the body is `FAILED` when the gateway refuses
    async fn revoke(&self, token: &str, revoke_code: &str) -> Result<String, GatewayError>;
}

/// Extract the endpoint from a lookup body: plain text, a JSON string, or a
/// JSON object carrying an `endpoint` field
pub fn parse_endpoint_body(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let endpoint = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(serde_json::Value::Object(map)) => map.get("endpoint")?.as_str()?.to_string(),
        _ => trimmed.to_string(),
    };
    let endpoint = endpoint.trim().to_string();
    (!endpoint.is_empty()).then_some(endpoint)
}
