//! WireGuard key handling and peer identity encoding.
//!
//! Peers are identified by their raw 32-byte X25519 public key; the tunnel
//! backend and the session store use its standard base64 form.

use crate::error::{NodeError, NodeResult};
use base64::Engine;
use boringtun::x25519::{PublicKey, StaticSecret};
use rand::rngs::OsRng;
use std::fmt;

/// Length of a WireGuard public key.
pub const KEY_LEN: usize = 32;

/// A WireGuard keypair (private + public key).
#[derive(Clone)]
pub struct WgKeyPair {
    private_key: StaticSecret,
    public_key: PublicKey,
}

impl WgKeyPair {
    /// Generate a new random WireGuard keypair.
    pub fn generate() -> Self {
        let private_key = StaticSecret::random_from_rng(OsRng);
        let public_key = PublicKey::from(&private_key);
        Self {
            private_key,
            public_key,
        }
    }

    /// Create a keypair from a base64-encoded private key.
    pub fn from_base64_private_key(base64: &str) -> NodeResult<Self> {
        let bytes = decode_key(base64)?;
        let private_key = StaticSecret::from(bytes);
        let public_key = PublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn public_key_bytes(&self) -> [u8; KEY_LEN] {
        self.public_key.to_bytes()
    }

    pub fn public_key_base64(&self) -> String {
        encode_identity(&self.public_key_bytes())
    }

    pub fn private_key_base64(&self) -> String {
        encode_identity(&self.private_key.to_bytes())
    }
}

impl fmt::Debug for WgKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only show public key in debug output
        f.debug_struct("WgKeyPair")
            .field("public_key", &self.public_key_base64())
            .finish()
    }
}

/// Encode raw key bytes as the identity string used by the backend.
pub fn encode_identity(key: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// Decode a backend identity string back to raw key bytes.
pub fn decode_identity(identity: &str) -> NodeResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(identity)
        .map_err(|e| NodeError::backend_with_source(format!("Invalid peer identity '{}'", identity), e))
}

fn decode_key(base64: &str) -> NodeResult<[u8; KEY_LEN]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(base64.trim())
        .map_err(|e| NodeError::config_with_source("Invalid base64 private key", e))?;

    <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        NodeError::config(format!(
            "Invalid key length: expected {} bytes, got {}",
            KEY_LEN,
            bytes.len()
        ))
    })
}
