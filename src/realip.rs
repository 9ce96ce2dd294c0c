//! RealIP handshake rewriting: append the client's real
//! address to the `serverAddress` field of the handshake that gets
//! replayed to the backend, since the backend otherwise only sees this
//! proxy's own address as the peer.
//!
//! Two wire formats are supported, selected per-endpoint by
//! `config::RealIpMode`, both using NUL as a field separator to match the
//! Forge/BungeeCord suffix convention `utils::clean_hostname` already
//! strips on the way in:
//!
//! - v2.4 (`old`): `serverAddress || "\0" || clientIP || "\0"`
//! - v2.5 (`new`): `serverAddress || "\0" || clientIP || "\0" || millis ||
//!   "\0" || base64(sig) || "\0"`, where `sig` is an ECDSA P-256/SHA-256
//!   signature over the concatenation `serverAddress || clientIP || millis`
//!   (no separators in the signed message itself), letting the backend
//!   verify the suffix was appended by a proxy holding the matching
//!   private key rather than forged by the client.

use crate::client_packets::Handshake;
use crate::config::RealIpMode;
use base64::{engine::general_purpose::STANDARD, Engine};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use std::fmt;
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug)]
pub enum RealIpError {
    MissingKey,
    KeyRead(std::io::Error),
    KeyParse(String),
}

impl fmt::Display for RealIpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RealIpError::MissingKey => write!(f, "real_ip mode 'new' requires real_ip_key_path"),
            RealIpError::KeyRead(e) => write!(f, "failed to read real ip signing key: {e}"),
            RealIpError::KeyParse(e) => write!(f, "failed to parse real ip signing key: {e}"),
        }
    }
}

impl std::error::Error for RealIpError {}

/// Resolved, endpoint-scoped behavior for rewriting a handshake's
/// `serverAddress` before it is replayed to the backend.
pub enum HandshakeModifier {
    None,
    RealIpV2_4,
    RealIpV2_5 { key: Box<SigningKey> },
}

impl HandshakeModifier {
    pub fn load(mode: &RealIpMode, key_path: Option<&str>) -> Result<Self, RealIpError> {
        match mode {
            RealIpMode::None => Ok(HandshakeModifier::None),
            RealIpMode::Old => Ok(HandshakeModifier::RealIpV2_4),
            RealIpMode::New => {
                let path = key_path.ok_or(RealIpError::MissingKey)?;
                let pem = fs::read_to_string(path).map_err(RealIpError::KeyRead)?;
                let key = SigningKey::from_pkcs8_pem(&pem)
                    .map_err(|e| RealIpError::KeyParse(e.to_string()))?;
                Ok(HandshakeModifier::RealIpV2_5 { key: Box::new(key) })
            }
        }
    }

    /// Rewrites `handshake.server_address` in place, appending the client's
    /// address (and, for v2.5, a timestamp and signature) to what the client
    /// originally sent.
    pub fn apply(&self, handshake: &mut Handshake, client_ip: &str) {
        match self {
            HandshakeModifier::None => {}
            HandshakeModifier::RealIpV2_4 => {
                handshake.server_address =
                    format!("{}\0{client_ip}\0", handshake.server_address);
            }
            HandshakeModifier::RealIpV2_5 { key } => {
                let timestamp = now_millis();
                let message = format!("{}{client_ip}{timestamp}", handshake.server_address);
                let signature: Signature = key.sign(message.as_bytes());
                let encoded = STANDARD.encode(signature.to_bytes());
                handshake.server_address = format!(
                    "{}\0{client_ip}\0{timestamp}\0{encoded}\0",
                    handshake.server_address
                );
            }
        }
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::HandshakeState;

    fn sample_handshake() -> Handshake {
        Handshake {
            protocol_version: 765,
            server_address: "play.example.com".to_string(),
            server_port: 25565,
            next_state: HandshakeState::Login,
        }
    }

    #[test]
    fn v2_4_appends_nul_separated_ip_suffix() {
        let modifier = HandshakeModifier::RealIpV2_4;
        let mut hs = sample_handshake();
        modifier.apply(&mut hs, "203.0.113.7");
        assert_eq!(hs.server_address, "play.example.com\0203.0.113.7\0");
    }

    #[test]
    fn none_leaves_address_untouched() {
        let modifier = HandshakeModifier::None;
        let mut hs = sample_handshake();
        modifier.apply(&mut hs, "203.0.113.7");
        assert_eq!(hs.server_address, "play.example.com");
    }

    #[test]
    fn v2_5_appends_ip_timestamp_and_signature() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let modifier = HandshakeModifier::RealIpV2_5 { key: Box::new(key) };
        let mut hs = sample_handshake();
        modifier.apply(&mut hs, "203.0.113.7");

        assert!(hs.server_address.starts_with("play.example.com\0203.0.113.7\0"));
        assert!(hs.server_address.ends_with('\0'));
        let parts: Vec<&str> = hs.server_address.split('\0').collect();
        // "play.example.com", "203.0.113.7", millis, signature, "" (trailing separator)
        assert_eq!(parts.len(), 5);
        assert!(parts[2].parse::<u128>().is_ok());
        assert!(!parts[3].is_empty());
    }
}
