//! Single box key with TAI64NA timestamp nonces
//!
//! Each packet carries the 16-byte TAI64NA label it was sealed under:
//!
//! ```text
//! label(16) | tag(16) | ciphertext
//! ```
//!
//! The full nonce is 8 bytes whose last byte is the sender's role bit,
//! followed by the label. A receiver accepts only labels strictly greater
//! than the last one it accepted.

use std::time::{Duration, SystemTime};

use tai64::Tai64N;

use crate::config::{ConfigSource, IdentityKeys};
use crate::crypto::nacl_box::{self, SharedKey, NONCE_LEN, TAG_LEN};
use crate::error::{ProtocolError, Result};
use crate::protocol::{Context, Outcome, Protocol, Roles};

/// TAI64NA label length: seconds(8) | nanoseconds(4) | attoseconds(4)
pub const LABEL_LEN: usize = 16;

const LABEL_OFFSET: usize = NONCE_LEN - LABEL_LEN;

/// Bytes added to every packet
pub const OVERHEAD: usize = LABEL_LEN + TAG_LEN;

type Label = [u8; LABEL_LEN];

/// Label for a wall-clock time, attoseconds zero
fn label_at(time: SystemTime) -> Label {
    let mut label = [0u8; LABEL_LEN];
    label[..12].copy_from_slice(&Tai64N::from_system_time(&time).to_bytes());
    label
}

/// The smallest label greater than `label`
fn next_label(label: &Label) -> Label {
    u128::from_be_bytes(*label).wrapping_add(1).to_be_bytes()
}

pub struct NaclTaiProtocol {
    shared: SharedKey,
    roles: Roles,
    last_sent: Label,
    last_accepted: Label,
}

impl NaclTaiProtocol {
    /// `window` back-dates the acceptance floor from `now`; without one any
    /// first label is accepted
    pub fn new(
        keys: &IdentityKeys,
        role: Option<bool>,
        window: Option<Duration>,
        now: SystemTime,
    ) -> Self {
        let last_accepted = match window {
            Some(window) => label_at(now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH)),
            None => {
                tracing::warn!("TIME_WINDOW not set, risking an initial replay attack");
                [0u8; LABEL_LEN]
            }
        };

        Self {
            shared: nacl_box::precompute(&keys.peer_public, &keys.private),
            roles: Roles::derive(&keys.own_public(), &keys.peer_public, role),
            last_sent: [0u8; LABEL_LEN],
            last_accepted,
        }
    }

    pub fn from_config(source: &dyn ConfigSource, ctx: &mut Context) -> Result<Self> {
        let keys = IdentityKeys::load(source)?;
        let role = IdentityKeys::role_override(source)?;
        let window = crate::config::lookup_parsed::<u64>(source, "TIME_WINDOW")?
            .map(Duration::from_secs);
        Ok(Self::new(&keys, role, window, ctx.wall()))
    }

    fn nonce(role_bit: u8, label: &Label) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        nonce[LABEL_OFFSET - 1] = role_bit;
        nonce[LABEL_OFFSET..].copy_from_slice(label);
        nonce
    }
}

impl Protocol for NaclTaiProtocol {
    fn name(&self) -> &'static str {
        "nacltai"
    }

    fn encode(&mut self, ctx: &mut Context, plaintext: &[u8]) -> Result<Outcome> {
        // A clock that stalls or steps back must still yield fresh nonces
        let mut label = label_at(ctx.wall());
        if label <= self.last_sent {
            label = next_label(&self.last_sent);
        }

        let sealed = nacl_box::seal(&self.shared, &Self::nonce(self.roles.send, &label), plaintext)?;
        self.last_sent = label;

        let mut packet = Vec::with_capacity(LABEL_LEN + sealed.len());
        packet.extend_from_slice(&label);
        packet.extend_from_slice(&sealed);
        Ok(Outcome::Packet(packet))
    }

    fn decode(&mut self, _ctx: &mut Context, packet: &[u8]) -> Result<Outcome> {
        if packet.len() < OVERHEAD {
            return Ok(Outcome::Rejected(ProtocolError::ShortPacket {
                kind: "nacltai",
                expected: OVERHEAD,
                got: packet.len(),
            }));
        }

        let (label_bytes, sealed) = packet.split_at(LABEL_LEN);
        let mut label = [0u8; LABEL_LEN];
        label.copy_from_slice(label_bytes);

        if label <= self.last_accepted {
            return Ok(Outcome::Rejected(ProtocolError::TimestampRegression));
        }

        match nacl_box::open(&self.shared, &Self::nonce(self.roles.recv, &label), sealed) {
            Ok(plaintext) => {
                self.last_accepted = label;
                Ok(Outcome::Packet(plaintext))
            }
            Err(_) => Ok(Outcome::Rejected(ProtocolError::Decryption { kind: "nacltai" })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::x25519;

    fn keys() -> (IdentityKeys, IdentityKeys) {
        let a = [0x1a; 32];
        let b = [0x2b; 32];
        (
            IdentityKeys {
                peer_public: x25519::public_key(&b),
                private: a,
            },
            IdentityKeys {
                peer_public: x25519::public_key(&a),
                private: b,
            },
        )
    }

    fn pair(now: SystemTime) -> (NaclTaiProtocol, NaclTaiProtocol) {
        let (alice, bob) = keys();
        (
            NaclTaiProtocol::new(&alice, None, None, now),
            NaclTaiProtocol::new(&bob, None, None, now),
        )
    }

    fn wire(outcome: Outcome) -> Vec<u8> {
        match outcome {
            Outcome::Packet(packet) => packet,
            other => panic!("expected packet, got {:?}", other),
        }
    }

    #[test]
    fn test_roles_are_complementary() {
        let (alice, bob) = pair(SystemTime::now());
        assert_eq!(alice.roles.send, bob.roles.recv);
        assert_eq!(alice.roles.recv, bob.roles.send);
        assert_ne!(alice.roles.send, alice.roles.recv);
    }

    #[test]
    fn test_greater_key_sends_with_bit_one() {
        let (alice, bob) = keys();
        let now = SystemTime::now();
        let (greater, lesser) = if alice.own_public() > bob.own_public() {
            (alice, bob)
        } else {
            (bob, alice)
        };

        let greater = NaclTaiProtocol::new(&greater, None, None, now);
        let lesser = NaclTaiProtocol::new(&lesser, None, None, now);
        assert_eq!((greater.roles.send, greater.roles.recv), (1, 0));
        assert_eq!((lesser.roles.send, lesser.roles.recv), (0, 1));
    }

    #[test]
    fn test_role_setting_overrides_key_order() {
        let (alice, _) = keys();
        let now = SystemTime::now();

        let first = NaclTaiProtocol::new(&alice, Some(true), None, now);
        assert_eq!((first.roles.send, first.roles.recv), (1, 0));
        let second = NaclTaiProtocol::new(&alice, Some(false), None, now);
        assert_eq!((second.roles.send, second.roles.recv), (0, 1));
    }

    #[test]
    fn test_round_trip() {
        let (mut alice, mut bob) = pair(SystemTime::now());
        let mut ctx = Context::new();

        let packet = wire(alice.encode(&mut ctx, b"tai payload").unwrap());
        assert_eq!(packet.len(), OVERHEAD + 11);
        assert_eq!(
            bob.decode(&mut ctx, &packet).unwrap(),
            Outcome::Packet(b"tai payload".to_vec())
        );
    }

    #[test]
    fn test_replay_rejected() {
        let (mut alice, mut bob) = pair(SystemTime::now());
        let mut ctx = Context::new();

        let packet = wire(alice.encode(&mut ctx, b"once").unwrap());
        assert!(matches!(bob.decode(&mut ctx, &packet).unwrap(), Outcome::Packet(_)));
        assert_eq!(
            bob.decode(&mut ctx, &packet).unwrap(),
            Outcome::Rejected(ProtocolError::TimestampRegression)
        );
    }

    #[test]
    fn test_labels_increase_with_frozen_clock() {
        let now = SystemTime::now();
        let (mut alice, mut bob) = pair(now);
        let mut ctx = Context::at(std::time::Instant::now(), now);

        let first = wire(alice.encode(&mut ctx, b"a").unwrap());
        let second = wire(alice.encode(&mut ctx, b"b").unwrap());
        assert!(second[..LABEL_LEN] > first[..LABEL_LEN]);

        assert!(matches!(bob.decode(&mut ctx, &first).unwrap(), Outcome::Packet(_)));
        assert!(matches!(bob.decode(&mut ctx, &second).unwrap(), Outcome::Packet(_)));
    }

    #[test]
    fn test_later_second_smaller_nanos_accepted() {
        let (mut alice, mut bob) = pair(SystemTime::now());
        let base = SystemTime::now();

        let mut early = Context::at(std::time::Instant::now(), base + Duration::from_millis(900));
        let mut late = Context::at(std::time::Instant::now(), base + Duration::from_millis(1100));

        let first = wire(alice.encode(&mut early, b"a").unwrap());
        let second = wire(alice.encode(&mut late, b"b").unwrap());

        assert!(matches!(bob.decode(&mut early, &first).unwrap(), Outcome::Packet(_)));
        assert!(matches!(bob.decode(&mut late, &second).unwrap(), Outcome::Packet(_)));
    }

    #[test]
    fn test_time_window_floor() {
        let now = SystemTime::now();
        let (alice_keys, bob_keys) = keys();
        let mut alice = NaclTaiProtocol::new(&alice_keys, None, None, now);
        let mut bob =
            NaclTaiProtocol::new(&bob_keys, None, Some(Duration::from_secs(60)), now);

        let mut stale = Context::at(std::time::Instant::now(), now - Duration::from_secs(120));
        let packet = wire(alice.encode(&mut stale, b"old").unwrap());
        assert_eq!(
            bob.decode(&mut stale, &packet).unwrap(),
            Outcome::Rejected(ProtocolError::TimestampRegression)
        );

        let mut fresh = Context::at(std::time::Instant::now(), now);
        let packet = wire(alice.encode(&mut fresh, b"new").unwrap());
        assert!(matches!(bob.decode(&mut fresh, &packet).unwrap(), Outcome::Packet(_)));
    }

    #[test]
    fn test_forged_label_does_not_advance_floor() {
        let (mut alice, mut bob) = pair(SystemTime::now());
        let mut ctx = Context::new();

        let genuine = wire(alice.encode(&mut ctx, b"genuine").unwrap());
        let mut forged = genuine.clone();
        forged[0] = 0xff;
        assert_eq!(
            bob.decode(&mut ctx, &forged).unwrap(),
            Outcome::Rejected(ProtocolError::Decryption { kind: "nacltai" })
        );
        assert!(matches!(bob.decode(&mut ctx, &genuine).unwrap(), Outcome::Packet(_)));
    }

    #[test]
    fn test_short_packet() {
        let (_, mut bob) = pair(SystemTime::now());
        let mut ctx = Context::new();
        assert!(matches!(
            bob.decode(&mut ctx, &[0u8; OVERHEAD - 1]).unwrap(),
            Outcome::Rejected(ProtocolError::ShortPacket { .. })
        ));
    }
}
