//! Single box key with a fixed all-zero nonce
//!
//! Every packet is sealed under the same nonce, so this offers no replay
//! protection and leaks plaintext relationships. Kept for interoperability
//! with old peers only.

use crate::config::{ConfigSource, IdentityKeys};
use crate::crypto::nacl_box::{self, SharedKey, NONCE_LEN, TAG_LEN};
use crate::error::{ProtocolError, Result};
use crate::protocol::{Context, Outcome, Protocol};

const NONCE: [u8; NONCE_LEN] = [0u8; NONCE_LEN];

pub struct Nacl0Protocol {
    shared: SharedKey,
}

impl Nacl0Protocol {
    pub fn new(keys: &IdentityKeys) -> Self {
        tracing::warn!("nacl0 reuses a single nonce for every packet; use salty instead");
        Self {
            shared: nacl_box::precompute(&keys.peer_public, &keys.private),
        }
    }

    pub fn from_config(source: &dyn ConfigSource) -> Result<Self> {
        Ok(Self::new(&IdentityKeys::load(source)?))
    }
}

impl Protocol for Nacl0Protocol {
    fn name(&self) -> &'static str {
        "nacl0"
    }

    fn encode(&mut self, _ctx: &mut Context, plaintext: &[u8]) -> Result<Outcome> {
        Ok(Outcome::Packet(nacl_box::seal(&self.shared, &NONCE, plaintext)?))
    }

    fn decode(&mut self, _ctx: &mut Context, packet: &[u8]) -> Result<Outcome> {
        if packet.len() < TAG_LEN {
            return Ok(Outcome::Rejected(ProtocolError::ShortPacket {
                kind: "nacl0",
                expected: TAG_LEN,
                got: packet.len(),
            }));
        }

        Ok(match nacl_box::open(&self.shared, &NONCE, packet) {
            Ok(plaintext) => Outcome::Packet(plaintext),
            Err(_) => Outcome::Rejected(ProtocolError::Decryption { kind: "nacl0" }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::x25519;

    fn pair() -> (Nacl0Protocol, Nacl0Protocol) {
        let a = [0x0a; 32];
        let b = [0x0b; 32];
        let alice = IdentityKeys {
            peer_public: x25519::public_key(&b),
            private: a,
        };
        let bob = IdentityKeys {
            peer_public: x25519::public_key(&a),
            private: b,
        };
        (Nacl0Protocol::new(&alice), Nacl0Protocol::new(&bob))
    }

    #[test]
    fn test_round_trip() {
        let (mut alice, mut bob) = pair();
        let mut ctx = Context::new();

        let Outcome::Packet(wire) = alice.encode(&mut ctx, b"hello bob").unwrap() else {
            panic!("expected packet");
        };
        assert_eq!(wire.len(), TAG_LEN + 9);
        assert_eq!(
            bob.decode(&mut ctx, &wire).unwrap(),
            Outcome::Packet(b"hello bob".to_vec())
        );
    }

    #[test]
    fn test_short_packet() {
        let (_, mut bob) = pair();
        let mut ctx = Context::new();
        assert!(matches!(
            bob.decode(&mut ctx, &[0u8; 10]).unwrap(),
            Outcome::Rejected(ProtocolError::ShortPacket { got: 10, .. })
        ));
    }

    #[test]
    fn test_tampered_packet() {
        let (mut alice, mut bob) = pair();
        let mut ctx = Context::new();

        let Outcome::Packet(mut wire) = alice.encode(&mut ctx, b"payload").unwrap() else {
            panic!("expected packet");
        };
        wire[TAG_LEN] ^= 0x01;
        assert_eq!(
            bob.decode(&mut ctx, &wire).unwrap(),
            Outcome::Rejected(ProtocolError::Decryption { kind: "nacl0" })
        );
    }
}
