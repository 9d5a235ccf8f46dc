//! Configuration for a microgear device client
//!
//! Loaded from TOML. Only the `[gear]` section is required; every other
//! section falls back to the public NETPIE defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default gateway host issuing tokens and endpoints
pub const DEFAULT_GATEWAY_ADDRESS: &str = "ga.netpie.io";

/// Revision string sent as `mgrev` and used as the default verifier
pub const DEFAULT_API_REVISION: &str = "RS1a";

/// Main client configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GearConfig {
    pub gear: GearSection,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub token: TokenSection,
    #[serde(default)]
    pub cache: CacheSection,
    /// Encrypted transport for both gateway calls and the broker session
    #[serde(default = "default_secure")]
    pub secure: bool,
}

/// Device identity section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GearSection {
    /// Application key issued for this device
    pub key: String,
    /// Application secret (prefer `secret_env` outside of tests)
    pub secret: Option<String>,
    /// Environment variable containing the secret
    pub secret_env: Option<String>,
    /// Optional alias advertised on connect, truncated to 16 characters
    pub alias: Option<String>,
}

/// Credential-issuing gateway section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewaySection {
    #[serde(default = "default_gateway_address")]
    pub address: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default = "default_gateway_secure_port")]
    pub secure_port: u16,
    /// OAuth scope requested with the request token
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_api_revision")]
    pub api_revision: String,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
}

/// Broker session section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_broker_secure_port")]
    pub secure_port: u16,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Delay before reconnecting after the broker refused our credentials
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
    /// Delay between transport-level retries after a network drop
    #[serde(default = "default_transport_retry")]
    pub transport_retry_ms: u64,
}

/// Token acquisition backoff section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenSection {
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

/// Credential cache location
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheSection {
    /// Directory holding `microgear-{key}.cache`
    pub dir: Option<PathBuf>,
    /// Explicit cache file, overrides `dir`
    pub path: Option<PathBuf>,
}

fn default_secure() -> bool {
    true
}

fn default_gateway_address() -> String {
    DEFAULT_GATEWAY_ADDRESS.to_string()
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_secure_port() -> u16 {
    8081
}

fn default_api_revision() -> String {
    DEFAULT_API_REVISION.to_string()
}

fn default_gateway_timeout() -> u64 {
    30
}

fn default_broker_port() -> u16 {
    1883
}

fn default_broker_secure_port() -> u16 {
    8883
}

fn default_keepalive() -> u64 {
    10
}

fn default_reconnect_interval() -> u64 {
    5000
}

fn default_transport_retry() -> u64 {
    1000
}

fn default_min_delay() -> u64 {
    100
}

fn default_max_delay() -> u64 {
    30000
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            address: default_gateway_address(),
            port: default_gateway_port(),
            secure_port: default_gateway_secure_port(),
            scope: String::new(),
            api_revision: default_api_revision(),
            timeout_secs: default_gateway_timeout(),
        }
    }
}

impl GatewaySection {
    /// Base URL for gateway calls in the selected mode
    pub fn base_url(&self, secure: bool) -> String {
        if secure {
            format!("https://{}:{}", self.address, self.secure_port)
        } else {
            format!("http://{}:{}", self.address, self.port)
        }
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            port: default_broker_port(),
            secure_port: default_broker_secure_port(),
            keepalive_secs: default_keepalive(),
            reconnect_interval_ms: default_reconnect_interval(),
            transport_retry_ms: default_transport_retry(),
        }
    }
}

impl BrokerSection {
    /// Broker port for the selected mode
    pub fn port_for(&self, secure: bool) -> u16 {
        if secure {
            self.secure_port
        } else {
            self.port
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn transport_retry(&self) -> Duration {
        Duration::from_millis(self.transport_retry_ms)
    }
}

impl Default for TokenSection {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GearConfig {
    /// Minimal configuration for a device key/secret pair
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            gear: GearSection {
                key: key.into(),
                secret: Some(secret.into()),
                secret_env: None,
                alias: None,
            },
            gateway: GatewaySection::default(),
            broker: BrokerSection::default(),
            token: TokenSection::default(),
            cache: CacheSection::default(),
            secure: default_secure(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GearConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gear.key.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "[gear] key must not be empty".to_string(),
            ));
        }
        if self.gear.secret.is_none() && self.gear.secret_env.is_none() {
            return Err(ConfigError::InvalidConfig(
                "[gear] requires either secret or secret_env".to_string(),
            ));
        }
        if self.token.min_delay_ms == 0 || self.token.min_delay_ms > self.token.max_delay_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "[token] delays must satisfy 0 < min ({}) <= max ({})",
                self.token.min_delay_ms, self.token.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Resolve the device secret, reading `secret_env` at runtime
    pub fn gear_secret(&self) -> Result<String, ConfigError> {
        if let Some(secret) = &self.gear.secret {
            return Ok(secret.clone());
        }
        let name = self.gear.secret_env.as_deref().ok_or_else(|| {
            ConfigError::InvalidConfig("[gear] requires either secret or secret_env".to_string())
        })?;
        std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.to_string()))
    }

    /// Cache file location: explicit path, or `microgear-{key}.cache` in `dir`
    pub fn cache_file(&self) -> PathBuf {
        if let Some(path) = &self.cache.path {
            return path.clone();
        }
        let dir = self
            .cache
            .dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        dir.join(format!("microgear-{}.cache", self.gear.key))
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
secure = false

[gear]
key = "testkey"
secret = "testsecret"
alias = "bench-gear"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
secure = true

[gear]
key = "AbCdEf123"
secret = "s3cr3t"
alias = "kitchen"

[gateway]
address = "gateway.example.com"
port = 9080
secure_port = 9081
scope = "r:/foo"

[broker]
port = 2883
secure_port = 9883
keepalive_secs = 30
reconnect_interval_ms = 2000

[token]
min_delay_ms = 50
max_delay_ms = 1000

[cache]
dir = "/var/lib/microgear"
"#;

        let config = GearConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.gear.key, "AbCdEf123");
        assert_eq!(config.gear.alias.as_deref(), Some("kitchen"));
        assert_eq!(config.gateway.base_url(true), "https://gateway.example.com:9081");
        assert_eq!(config.gateway.base_url(false), "http://gateway.example.com:9080");
        assert_eq!(config.gateway.scope, "r:/foo");
        assert_eq!(config.broker.port_for(true), 9883);
        assert_eq!(config.broker.keep_alive(), Duration::from_secs(30));
        assert_eq!(config.broker.reconnect_interval(), Duration::from_millis(2000));
        assert_eq!(config.token.max_delay_ms, 1000);
        assert_eq!(
            config.cache_file(),
            PathBuf::from("/var/lib/microgear/microgear-AbCdEf123.cache")
        );
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let toml_content = r#"
[gear]
key = "k"
secret = "s"
"#;

        let config = GearConfig::from_toml_str(toml_content).unwrap();
        assert!(config.secure);
        assert_eq!(config.gateway.address, DEFAULT_GATEWAY_ADDRESS);
        assert_eq!(config.gateway.api_revision, DEFAULT_API_REVISION);
        assert_eq!(config.broker.port_for(false), 1883);
        assert_eq!(config.broker.port_for(true), 8883);
        assert_eq!(config.broker.keepalive_secs, 10);
        assert_eq!(config.broker.reconnect_interval_ms, 5000);
        assert_eq!(config.token.min_delay_ms, 100);
        assert_eq!(config.token.max_delay_ms, 30000);
        assert_eq!(config.cache_file(), PathBuf::from("./microgear-k.cache"));
    }

    #[test]
    fn test_explicit_cache_path_wins() {
        let mut config = GearConfig::new("k", "s");
        config.cache.dir = Some(PathBuf::from("/tmp"));
        config.cache.path = Some(PathBuf::from("/etc/gear.cache"));
        assert_eq!(config.cache_file(), PathBuf::from("/etc/gear.cache"));
    }

    #[test]
    fn test_empty_key_rejected() {
        let result = GearConfig::from_toml_str("[gear]\nkey = \"\"\nsecret = \"s\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_secret_rejected() {
        let result = GearConfig::from_toml_str("[gear]\nkey = \"k\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_inverted_delays_rejected() {
        let toml_content = r#"
[gear]
key = "k"
secret = "s"

[token]
min_delay_ms = 500
max_delay_ms = 100
"#;
        let result = GearConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_secret_from_env() {
        std::env::set_var("MICROGEAR_TEST_SECRET_CFG", "from-env");
        let mut config = GearConfig::new("k", "unused");
        config.gear.secret = None;
        config.gear.secret_env = Some("MICROGEAR_TEST_SECRET_CFG".to_string());

        assert_eq!(config.gear_secret().unwrap(), "from-env");
    }

    #[test]
    fn test_missing_secret_env_var() {
        let mut config = GearConfig::new("k", "unused");
        config.gear.secret = None;
        config.gear.secret_env = Some("MICROGEAR_TEST_SECRET_DOES_NOT_EXIST".to_string());

        assert!(matches!(
            config.gear_secret(),
            Err(ConfigError::EnvVarNotFound(_))
        ));
    }

    #[test]
    fn test_test_config_parses() {
        let config = GearConfig::test_config();
        assert!(!config.secure);
        assert_eq!(config.gear.key, "testkey");
    }
}
