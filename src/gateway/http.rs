//! reqwest-backed gateway client
//!
//! OAuth request signing is not done here: an injected [`RequestSigner`]
//! produces the `Authorization` header for each call.

use super::{
    parse_endpoint_body, AccessGrant, Gateway, GatewayError, RequestTokenParams, TokenGrant,
};
use crate::config::GatewaySection;
use crate::token::{AccessToken, DeviceIdentity, RequestToken};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Everything a signer needs to authorize one gateway request
#[derive(Debug, Clone, Copy)]
pub struct SigningRequest<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub consumer_key: &'a str,
    pub consumer_secret: &'a str,
    pub token: Option<&'a str>,
    pub token_secret: Option<&'a str>,
    pub verifier: Option<&'a str>,
    pub params: &'a [(String, String)],
}

/// OAuth 1.0 HMAC-SHA1 request signing primitive
pub trait RequestSigner: Send + Sync {
    /// Value of the `Authorization` header for this request
    fn authorization(&self, request: &SigningRequest<'_>) -> Result<String, GatewayError>;
}

/// Gateway client speaking HTTP(S) to the token service
pub struct HttpGateway {
    client: Client,
    base_url: String,
    signer: Arc<dyn RequestSigner>,
}

impl HttpGateway {
    /// Build a client for the configured gateway in the selected mode
    pub fn new(
        config: &GatewaySection,
        secure: bool,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self, GatewayError> {
        Self::with_base_url(
            config.base_url(secure),
            Duration::from_secs(config.timeout_secs),
            signer,
        )
    }

    /// Build a client against an explicit base URL
    pub fn with_base_url(
        base_url: impl Into<String>,
        timeout: Duration,
        signer: Arc<dyn RequestSigner>,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Return the body of a successful response, or the status as an error
    async fn read_body(response: Response) -> Result<String, GatewayError> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(GatewayError::Status {
                code: status.as_u16(),
                body,
            })
        }
    }

    /// Parse a form-urlencoded OAuth response (pure function)
    fn parse_form(body: &str) -> HashMap<String, String> {
        url::form_urlencoded::parse(body.trim().as_bytes())
            .into_owned()
            .collect()
    }

    fn required(fields: &HashMap<String, String>, name: &str) -> Result<String, GatewayError> {
        fields
            .get(name)
            .filter(|value| !value.is_empty())
            .cloned()
            .ok_or_else(|| GatewayError::Malformed(format!("missing {name}")))
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn request_token(
        &self,
        identity: &DeviceIdentity,
        params: &RequestTokenParams,
    ) -> Result<TokenGrant, GatewayError> {
        let url = self.url("/api/rtoken");
        let pairs = params.to_pairs();
        let authorization = self.signer.authorization(&SigningRequest {
            method: "POST",
            url: &url,
            consumer_key: identity.key(),
            consumer_secret: identity.secret(),
            token: None,
            token_secret: None,
            verifier: None,
            params: &pairs,
        })?;

        debug!(appid = %params.appid, "Requesting a request token");
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, authorization)
            .form(&pairs)
            .send()
            .await?;

        let fields = Self::parse_form(&Self::read_body(response).await?);
        Ok(TokenGrant {
            token: Self::required(&fields, "oauth_token")?,
            secret: Self::required(&fields, "oauth_token_secret")?,
        })
    }

    async fn access_token(
        &self,
        identity: &DeviceIdentity,
        request: &RequestToken,
    ) -> Result<AccessGrant, GatewayError> {
        let url = self.url("/api/atoken");
        let authorization = self.signer.authorization(&SigningRequest {
            method: "POST",
            url: &url,
            consumer_key: identity.key(),
            consumer_secret: identity.secret(),
            token: Some(&request.token),
            token_secret: Some(&request.secret),
            verifier: Some(&request.verifier),
            params: &[],
        })?;

        debug!("Requesting an access token");
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, authorization)
            .send()
            .await?;

        let fields = Self::parse_form(&Self::read_body(response).await?);
        Ok(AccessGrant {
            token: Self::required(&fields, "oauth_token")?,
            secret: Self::required(&fields, "oauth_token_secret")?,
            appkey: fields.get("appkey").cloned().unwrap_or_default(),
            endpoint: fields.get("endpoint").cloned().unwrap_or_default(),
            flag: fields.get("flag").cloned(),
        })
    }

    async fn lookup_endpoint(
        &self,
        identity: &DeviceIdentity,
        access: &AccessToken,
    ) -> Result<String, GatewayError> {
        let url = self.url(&format!("/api/endpoint/{}", identity.key()));
        let authorization = self.signer.authorization(&SigningRequest {
            method: "GET",
            url: &url,
            consumer_key: identity.key(),
            consumer_secret: identity.secret(),
            token: Some(&access.token),
            token_secret: Some(&access.secret),
            verifier: None,
            params: &[],
        })?;

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, authorization)
            .send()
            .await?;

        let body = Self::read_body(response).await?;
        parse_endpoint_body(&body)
            .ok_or_else(|| GatewayError::Malformed("empty endpoint lookup response".to_string()))
    }

    async fn revoke(&self, token: &str, revoke_code: &str) -> Result<String, GatewayError> {
        let url = self.url(&format!("/api/revoke/{token}/{revoke_code}"));
        let response = self.client.get(&url).send().await?;
        let body = Self::read_body(response).await?;
        Ok(body.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_form_decodes_values() {
        let fields = HttpGateway::parse_form(
            "oauth_token=abc&oauth_token_secret=d%2Fe&endpoint=pie%3A%2F%2Fgb.netpie.io%3A1883&flag=S\n",
        );
        assert_eq!(fields["oauth_token"], "abc");
        assert_eq!(fields["oauth_token_secret"], "d/e");
        assert_eq!(fields["endpoint"], "pie://gb.netpie.io:1883");
        assert_eq!(fields["flag"], "S");
    }

    #[test]
    fn test_required_rejects_missing_and_empty() {
        let fields = HttpGateway::parse_form("oauth_token=&other=1");
        assert!(matches!(
            HttpGateway::required(&fields, "oauth_token"),
            Err(GatewayError::Malformed(_))
        ));
        assert!(HttpGateway::required(&fields, "oauth_token_secret").is_err());
        assert_eq!(HttpGateway::required(&fields, "other").unwrap(), "1");
    }
}
