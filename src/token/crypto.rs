//! HMAC-SHA1 derivations shared by the token flow and the broker session

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// `base64(HMAC-SHA1(key = "{token_secret}&{device_secret}", message))`
pub fn sign(token_secret: &str, device_secret: &str, message: &str) -> String {
    let key = format!("{token_secret}&{device_secret}");
    let mut mac = HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any size");
    mac.update(message.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Revoke code proving possession of the access token secret.
/// `/` is replaced with `_` so the code can be used as a URL path segment.
pub fn revoke_code(access_token: &str, access_secret: &str, device_secret: &str) -> String {
    sign(access_secret, device_secret, access_token).replace('/', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_joins_secrets_with_ampersand() {
        let mut mac = HmacSha1::new_from_slice(b"ts&ds").unwrap();
        mac.update(b"tok");
        let expected = STANDARD.encode(mac.finalize().into_bytes());

        assert_eq!(sign("ts", "ds", "tok"), expected);
        assert_eq!(sign("ts", "ds", "tok"), "A5Gvub21Anb8wBxdmRecKf7b674=");
    }

    #[test]
    fn test_known_hmac_sha1_value() {
        // HMAC-SHA1(key="key", "The quick brown fox jumps over the lazy dog")
        // = de7c9b85b8b78aa6bc8a7a36f70a90701c9db4d9
        let mut mac = HmacSha1::new_from_slice(b"key").unwrap();
        mac.update(b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            STANDARD.encode(mac.finalize().into_bytes()),
            "3nybhbi3iqa8ino29wqQcBydtNk="
        );
    }

    #[test]
    fn test_sign_is_deterministic() {
        assert_eq!(sign("a", "b", "msg"), sign("a", "b", "msg"));
        assert_ne!(sign("a", "b", "msg"), sign("a", "b", "msg2"));
        assert_ne!(sign("a", "b", "msg"), sign("a", "c", "msg"));
    }

    #[test]
    fn test_revoke_code_has_no_slashes() {
        for i in 0..64 {
            let code = revoke_code(&format!("token-{i}"), "secret", "device");
            assert!(!code.contains('/'), "revoke code must be path-safe: {code}");
        }
    }
}
