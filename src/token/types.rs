//! Identity and token records

use crate::error::{GearError, GearResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Maximum alias length advertised to the fabric
pub const MAX_ALIAS_LEN: usize = 16;

/// Device credentials, immutable for the lifetime of a client
#[derive(Clone, PartialEq)]
pub struct DeviceIdentity {
    key: String,
    secret: String,
    alias: Option<String>,
}

impl DeviceIdentity {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
            alias: None,
        }
    }

    /// Attach an alias; anything past 16 characters is dropped
    pub fn with_alias(mut self, alias: impl AsRef<str>) -> Self {
        let alias: String = alias.as_ref().chars().take(MAX_ALIAS_LEN).collect();
        self.alias = (!alias.is_empty()).then_some(alias);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("key", &self.key)
            .field("secret", &"***")
            .field("alias", &self.alias)
            .finish()
    }
}

/// First-leg credential, cached until the access token is issued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestToken {
    pub token: String,
    pub secret: String,
    pub verifier: String,
}

/// Second-leg credential used to derive broker authentication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub secret: String,
    #[serde(default)]
    pub appkey: String,
    /// Broker address; empty until resolved through the endpoint lookup
    #[serde(default)]
    pub endpoint: String,
    pub revokecode: String,
}

impl AccessToken {
    pub fn has_endpoint(&self) -> bool {
        !self.endpoint.trim().is_empty()
    }
}

/// Broker host resolved from an access token endpoint. A port in the
/// endpoint is validated but the configured broker port is what gets dialled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
}

impl BrokerEndpoint {
    /// Parse `scheme://host:port`, `host:port` or a bare host
    pub fn parse(raw: &str) -> GearResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(GearError::InvalidEndpoint("empty endpoint".to_string()));
        }

        if raw.contains("://") {
            let url = Url::parse(raw).map_err(|_| GearError::InvalidEndpoint(raw.to_string()))?;
            let host = url
                .host_str()
                .filter(|host| !host.is_empty())
                .ok_or_else(|| GearError::InvalidEndpoint(raw.to_string()))?;
            return Ok(Self {
                host: host.to_string(),
            });
        }

        match raw.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                port.parse::<u16>()
                    .map_err(|_| GearError::InvalidEndpoint(raw.to_string()))?;
                Ok(Self {
                    host: host.to_string(),
                })
            }
            Some(_) => Err(GearError::InvalidEndpoint(raw.to_string())),
            None => Ok(Self {
                host: raw.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_truncated_to_sixteen_chars() {
        let identity = DeviceIdentity::new("k", "s").with_alias("a-very-long-alias-name-here");
        assert_eq!(identity.alias(), Some("a-very-long-alia"));
        assert_eq!(identity.alias().unwrap().chars().count(), MAX_ALIAS_LEN);
    }

    #[test]
    fn test_alias_truncation_counts_characters() {
        let identity = DeviceIdentity::new("k", "s").with_alias("ไทยไทยไทยไทยไทยไทย");
        assert_eq!(identity.alias().unwrap().chars().count(), MAX_ALIAS_LEN);
    }

    #[test]
    fn test_empty_alias_is_none() {
        let identity = DeviceIdentity::new("k", "s").with_alias("");
        assert_eq!(identity.alias(), None);
    }

    #[test]
    fn test_debug_hides_secret() {
        let identity = DeviceIdentity::new("key1", "supersecret");
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("key1"));
        assert!(!rendered.contains("supersecret"));
    }

    #[test]
    fn test_access_token_cache_shape() {
        let token = AccessToken {
            token: "t".to_string(),
            secret: "s".to_string(),
            appkey: "a".to_string(),
            endpoint: String::new(),
            revokecode: "r".to_string(),
        };
        let value = serde_json::to_value(&token).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "token": "t", "secret": "s", "appkey": "a", "endpoint": "", "revokecode": "r"
            })
        );
        assert!(!token.has_endpoint());
    }

    #[test]
    fn test_endpoint_parse_url() {
        let endpoint = BrokerEndpoint::parse("pie://gb.netpie.io:1883").unwrap();
        assert_eq!(endpoint.host, "gb.netpie.io");
    }

    #[test]
    fn test_endpoint_parse_host_port() {
        let endpoint = BrokerEndpoint::parse(" broker.local:8883\n").unwrap();
        assert_eq!(endpoint.host, "broker.local");
    }

    #[test]
    fn test_endpoint_parse_bare_host() {
        let endpoint = BrokerEndpoint::parse("broker.local").unwrap();
        assert_eq!(endpoint.host, "broker.local");
    }

    #[test]
    fn test_endpoint_parse_rejects_garbage() {
        assert!(BrokerEndpoint::parse("").is_err());
        assert!(BrokerEndpoint::parse(":1883").is_err());
        assert!(BrokerEndpoint::parse("host:notaport").is_err());
    }
}
