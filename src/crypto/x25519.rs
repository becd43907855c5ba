//! Curve25519 key material
//!
//! Key generation and public-key derivation for the box primitive. All
//! randomness comes from the OS source and every draw is fallible: a tunnel
//! that cannot get fresh entropy must stop rather than reuse key material.

use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CryptoError;

/// Key length for X25519 (both private and public keys are 32 bytes)
pub const KEY_LEN: usize = 32;

/// A Curve25519 key pair
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: [u8; KEY_LEN],
    pub public_key: [u8; KEY_LEN],
}

impl KeyPair {
    /// Build a key pair from an existing private key
    pub fn from_private(private_key: [u8; KEY_LEN]) -> Self {
        Self {
            public_key: public_key(&private_key),
            private_key,
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_key))
            .finish_non_exhaustive()
    }
}

/// Fill `buf` from the OS random source
pub fn random_bytes(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::EntropyUnavailable {
            reason: e.to_string(),
        })
}

/// Generate a new X25519 keypair
pub fn generate_keypair() -> Result<KeyPair, CryptoError> {
    let mut private_key = [0u8; KEY_LEN];
    random_bytes(&mut private_key)?;
    Ok(KeyPair::from_private(private_key))
}

/// Derive public key from private key
pub fn public_key(private_key: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let secret = StaticSecret::from(*private_key);
    PublicKey::from(&secret).to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let pair = generate_keypair().unwrap();

        // Keys should not be all zeros
        assert!(!pair.private_key.iter().all(|&b| b == 0));
        assert!(!pair.public_key.iter().all(|&b| b == 0));

        // Derived public key should match
        assert_eq!(public_key(&pair.private_key), pair.public_key);
    }

    #[test]
    fn test_keypairs_differ() {
        let a = generate_keypair().unwrap();
        let b = generate_keypair().unwrap();
        assert_ne!(a.public_key, b.public_key);
    }

    #[test]
    fn test_public_key_derivation() {
        // Known test vector (from RFC 7748)
        let private = [
            0x77, 0x07, 0x6d, 0x0a, 0x73, 0x18, 0xa5, 0x7d, 0x3c, 0x16, 0xc1, 0x72, 0x51, 0xb2,
            0x66, 0x45, 0xdf, 0x4c, 0x2f, 0x87, 0xeb, 0xc0, 0x99, 0x2a, 0xb1, 0x77, 0xfb, 0xa5,
            0x1d, 0xb9, 0x2c, 0x2a,
        ];

        let expected_public = [
            0x85, 0x20, 0xf0, 0x09, 0x89, 0x30, 0xa7, 0x54, 0x74, 0x8b, 0x7d, 0xdc, 0xb4, 0x3e,
            0xf7, 0x5a, 0x0d, 0xbf, 0x3a, 0x0d, 0x26, 0x38, 0x1a, 0xf4, 0xeb, 0xa4, 0xa9, 0x8e,
            0xaa, 0x9b, 0x4e, 0x6a,
        ];

        assert_eq!(public_key(&private), expected_public);
        assert_eq!(KeyPair::from_private(private).public_key, expected_public);
    }

    #[test]
    fn test_debug_hides_private_key() {
        let pair = KeyPair::from_private([7u8; 32]);
        let rendered = format!("{:?}", pair);
        assert!(!rendered.contains(&hex::encode([7u8; 32])));
    }
}
