//! Per-connection broker credentials

use crate::token::crypto;
use crate::token::{AccessToken, DeviceIdentity};

/// Username, password and client id for one broker connection.
/// Derived again on every (re)connect since the username embeds the time.
#[derive(Clone, PartialEq)]
pub struct BrokerCredentials {
    pub client_id: String,
    pub username: String,
    pub password: String,
}

impl BrokerCredentials {
    /// `username = "{devicekey}%{unix_time}"`, password signs
    /// `"{access.token}%{username}"` with the access and device secrets
    pub fn derive(identity: &DeviceIdentity, access: &AccessToken, unix_time: i64) -> Self {
        let username = format!("{}%{}", identity.key(), unix_time);
        let password = crypto::sign(
            &access.secret,
            identity.secret(),
            &format!("{}%{}", access.token, username),
        );
        Self {
            client_id: access.token.clone(),
            username,
            password,
        }
    }

    /// Derive with the current wall-clock time
    pub fn derive_now(identity: &DeviceIdentity, access: &AccessToken) -> Self {
        Self::derive(identity, access, chrono::Utc::now().timestamp())
    }
}

impl std::fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access() -> AccessToken {
        AccessToken {
            token: "tok".to_string(),
            secret: "ts".to_string(),
            appkey: String::new(),
            endpoint: "pie://gb.netpie.io:1883".to_string(),
            revokecode: String::new(),
        }
    }

    #[test]
    fn test_derive_known_vector() {
        let identity = DeviceIdentity::new("key1", "ds");
        let credentials = BrokerCredentials::derive(&identity, &access(), 1_700_000_000);

        assert_eq!(credentials.client_id, "tok");
        assert_eq!(credentials.username, "key1%1700000000");
        // Slashes are kept in the password, unlike the revoke code
        assert_eq!(credentials.password, "x41/fuqG73zeqzyHMTckSkq8h0Q=");
    }

    #[test]
    fn test_password_is_deterministic_and_time_bound() {
        let identity = DeviceIdentity::new("key1", "ds");
        let first = BrokerCredentials::derive(&identity, &access(), 1_700_000_000);
        let again = BrokerCredentials::derive(&identity, &access(), 1_700_000_000);
        let later = BrokerCredentials::derive(&identity, &access(), 1_700_000_001);

        assert_eq!(first, again);
        assert_ne!(first.password, later.password);
        assert_ne!(first.username, later.username);
    }

    #[test]
    fn test_debug_hides_password() {
        let identity = DeviceIdentity::new("key1", "ds");
        let credentials = BrokerCredentials::derive(&identity, &access(), 1);
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains(&credentials.password));
    }
}
