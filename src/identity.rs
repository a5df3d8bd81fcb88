//! Derivation of opaque voter and network identities.
//!
//! Raw device tokens and source addresses never reach the store; they are
//! reduced to one-way SHA-256 fingerprints scoped to a single poll.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;

/// Environment variable holding the server-side hashing secret.
pub const SALT_ENV: &str = "VOTER_HASH_SALT";

/// Fallback when no network address can be determined at all.
const ADDRESS_SENTINEL: &str = "0.0.0.0";

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    salt: String,
}

impl IdentityConfig {
    /// Load the hashing secret from the environment.
    ///
    /// A missing or empty salt is a startup-time fatal, never a per-request
    /// condition.
    pub fn from_env() -> Result<Self, crate::error::PollError> {
        match std::env::var(SALT_ENV) {
            Ok(salt) if !salt.trim().is_empty() => Ok(Self { salt }),
            _ => Err(crate::error::PollError::Config(format!(
                "{SALT_ENV} must be set to a non-empty secret"
            ))),
        }
    }

    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// Stable, non-invertible identity of a (poll, device) pair.
    pub fn voter_fingerprint(&self, poll_id: &str, device_token: &str) -> String {
        sha256_hex(&format!("{poll_id}:{device_token}:{}", self.salt))
    }

    /// Stable, non-invertible identity of a (poll, network origin) pair.
    pub fn network_fingerprint(&self, poll_id: &str, source_address: &str) -> String {
        sha256_hex(&format!("{poll_id}:{source_address}"))
    }
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Best-effort originating network address of a request: the left-most
/// `X-Forwarded-For` entry when present, else `X-Real-IP`, else the direct
/// peer address, else a sentinel.
pub fn source_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| ADDRESS_SENTINEL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_voter_fingerprint_is_deterministic() {
        let config = IdentityConfig::new("secret");
        let a = config.voter_fingerprint("poll1", "device1");
        let b = config.voter_fingerprint("poll1", "device1");
        assert_eq!(a, b);
        // 32 bytes of SHA-256 as hex
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprints_are_scoped_per_poll() {
        let config = IdentityConfig::new("secret");
        assert_ne!(
            config.voter_fingerprint("poll1", "device1"),
            config.voter_fingerprint("poll2", "device1")
        );
        assert_ne!(
            config.network_fingerprint("poll1", "10.0.0.1"),
            config.network_fingerprint("poll2", "10.0.0.1")
        );
    }

    #[test]
    fn test_fingerprint_does_not_leak_input() {
        let config = IdentityConfig::new("secret");
        let fp = config.voter_fingerprint("poll1", "device-token-xyz");
        assert!(!fp.contains("device-token-xyz"));
        assert!(!fp.contains("secret"));
    }

    #[test]
    fn test_different_salts_diverge() {
        let a = IdentityConfig::new("salt-a").voter_fingerprint("poll1", "device1");
        let b = IdentityConfig::new("salt-b").voter_fingerprint("poll1", "device1");
        assert_ne!(a, b);
    }

    #[test]
    #[serial]
    fn test_from_env_requires_salt() {
        std::env::remove_var(SALT_ENV);
        assert!(IdentityConfig::from_env().is_err());

        std::env::set_var(SALT_ENV, "  ");
        assert!(IdentityConfig::from_env().is_err());

        std::env::set_var(SALT_ENV, "test-salt");
        assert!(IdentityConfig::from_env().is_ok());
        std::env::remove_var(SALT_ENV);
    }

    #[test]
    fn test_source_address_prefers_leftmost_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.7, 10.0.0.1, 10.0.0.2".parse().unwrap(),
        );
        headers.insert("x-real-ip", "198.51.100.1".parse().unwrap());

        assert_eq!(source_address(&headers, None), "203.0.113.7");
    }

    #[test]
    fn test_source_address_fallback_chain() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.1".parse().unwrap());
        assert_eq!(source_address(&headers, None), "198.51.100.1");

        let headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.4:12345".parse().unwrap();
        assert_eq!(source_address(&headers, Some(peer)), "192.0.2.4");

        assert_eq!(source_address(&headers, None), "0.0.0.0");
    }
}
