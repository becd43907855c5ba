//! Salty packet layouts
//!
//! Data packet:
//!
//! ```text
//! byte 0        bit 7     0
//!               bit 6     sender key id
//!               bit 5     recipient key id
//!               bits 4-0  counter bits 28..24
//! bytes 1-3               counter bits 23..0
//! bytes 4-19              tag
//! bytes 20-               ciphertext
//! ```
//!
//! Control packet:
//!
//! ```text
//! byte 0                  0x80
//! bytes 1-8               control counter (big endian)
//! bytes 9-24              tag
//! bytes 25-145            sealed ControlPayload
//! ```

use crate::crypto::nacl_box::{NONCE_LEN, TAG_LEN};
use crate::crypto::x25519::KEY_LEN;

/// Set in byte 0 of control packets, clear in data packets
pub const CONTROL_FLAG: u8 = 0x80;

pub const DATA_HEADER_LEN: usize = 4;

/// Smallest valid data packet
pub const DATA_MIN_LEN: usize = DATA_HEADER_LEN + TAG_LEN;

/// Counter bits carried by a data header
pub const COUNTER_MASK: u32 = 0x1FFF_FFFF;

/// Random part of a data nonce; the remaining 4 bytes hold the counter
pub const NONCE_PREFIX_LEN: usize = NONCE_LEN - 4;

pub const CONTROL_HEADER_LEN: usize = 1 + 8;

/// flags(1) | sender key(32) | sender nonce(24) | recipient key(32) |
/// recipient nonce(24) | last accepted counter(8)
pub const CONTROL_PAYLOAD_LEN: usize = 1 + KEY_LEN + NONCE_LEN + KEY_LEN + NONCE_LEN + 8;

pub const CONTROL_PACKET_LEN: usize = CONTROL_HEADER_LEN + TAG_LEN + CONTROL_PAYLOAD_LEN;

const FLAG_SENDER: u8 = 1 << 6;
const FLAG_RECIPIENT: u8 = 1 << 5;
const FLAG_ACK: u8 = 1 << 4;

/// Whether a received packet belongs to the control channel
pub fn is_control(packet: &[u8]) -> bool {
    packet.first().is_some_and(|b| b & CONTROL_FLAG != 0)
}

fn key_id_bits(sender: u8, recipient: u8) -> u8 {
    (if sender & 1 != 0 { FLAG_SENDER } else { 0 })
        | (if recipient & 1 != 0 { FLAG_RECIPIENT } else { 0 })
}

/// Header of a data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// The sender's local key id
    pub sender_key_id: u8,
    /// The sender's idea of the recipient's key id
    pub recipient_key_id: u8,
    /// Packet counter, at most 29 bits
    pub counter: u32,
}

impl DataHeader {
    pub fn to_bytes(&self) -> [u8; DATA_HEADER_LEN] {
        let mut bytes = (self.counter & COUNTER_MASK).to_be_bytes();
        bytes[0] |= key_id_bits(self.sender_key_id, self.recipient_key_id);
        bytes
    }

    /// Parse the first four bytes of a data packet
    pub fn parse(packet: &[u8]) -> Option<Self> {
        let bytes: [u8; DATA_HEADER_LEN] = packet.get(..DATA_HEADER_LEN)?.try_into().ok()?;
        if bytes[0] & CONTROL_FLAG != 0 {
            return None;
        }
        Some(Self {
            sender_key_id: (bytes[0] >> 6) & 1,
            recipient_key_id: (bytes[0] >> 5) & 1,
            counter: u32::from_be_bytes(bytes) & COUNTER_MASK,
        })
    }

    /// Index into the receiver's decoder table
    ///
    /// The sender's key id is the receiver's remote key id, so this equals
    /// `(remote << 1) | local` from the receiver's point of view.
    pub fn decoder_index(&self) -> usize {
        usize::from(((self.sender_key_id & 1) << 1) | (self.recipient_key_id & 1))
    }
}

/// Full data nonce for a prefix and counter
pub fn data_nonce(prefix: &[u8; NONCE_PREFIX_LEN], counter: u32) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Build a data packet from its header and sealed body
pub fn frame_data(header: &DataHeader, sealed: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(DATA_HEADER_LEN + sealed.len());
    packet.extend_from_slice(&header.to_bytes());
    packet.extend_from_slice(sealed);
    packet
}

/// Nonce protecting a control message
///
/// Byte 0 separates the two directions, bytes 16..24 carry the counter.
pub fn control_nonce(role_bit: u8, counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[0] = role_bit & 1;
    nonce[16..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Build a control packet from its counter and sealed payload
pub fn frame_control(counter: u64, sealed: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(CONTROL_HEADER_LEN + sealed.len());
    packet.push(CONTROL_FLAG);
    packet.extend_from_slice(&counter.to_be_bytes());
    packet.extend_from_slice(sealed);
    packet
}

/// Split a control packet into its counter and sealed payload
pub fn parse_control(packet: &[u8]) -> Option<(u64, &[u8])> {
    if packet.len() < CONTROL_PACKET_LEN || !is_control(packet) {
        return None;
    }
    let counter = u64::from_be_bytes(packet[1..CONTROL_HEADER_LEN].try_into().ok()?);
    Some((counter, &packet[CONTROL_HEADER_LEN..]))
}

/// Decrypted body of a control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPayload {
    pub sender_key_id: u8,
    pub recipient_key_id: u8,
    /// This message acknowledges one from the peer and must not be answered
    pub ack: bool,
    pub sender_public: [u8; KEY_LEN],
    pub sender_nonce: [u8; NONCE_LEN],
    /// What the sender believes our key to be
    pub recipient_public: [u8; KEY_LEN],
    pub recipient_nonce: [u8; NONCE_LEN],
    /// Highest control counter the sender has accepted from us
    pub last_accepted: u64,
}

impl ControlPayload {
    pub fn to_bytes(&self) -> [u8; CONTROL_PAYLOAD_LEN] {
        let mut bytes = [0u8; CONTROL_PAYLOAD_LEN];
        bytes[0] = key_id_bits(self.sender_key_id, self.recipient_key_id)
            | if self.ack { FLAG_ACK } else { 0 };

        let mut offset = 1;
        for field in [
            &self.sender_public[..],
            &self.sender_nonce[..],
            &self.recipient_public[..],
            &self.recipient_nonce[..],
            &self.last_accepted.to_be_bytes()[..],
        ] {
            bytes[offset..offset + field.len()].copy_from_slice(field);
            offset += field.len();
        }
        bytes
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < CONTROL_PAYLOAD_LEN {
            return None;
        }
        let flags = bytes[0];
        let mut rest = &bytes[1..];
        let mut take = |len: usize| {
            let (field, tail) = rest.split_at(len);
            rest = tail;
            field
        };

        Some(Self {
            sender_key_id: (flags >> 6) & 1,
            recipient_key_id: (flags >> 5) & 1,
            ack: flags & FLAG_ACK != 0,
            sender_public: take(KEY_LEN).try_into().ok()?,
            sender_nonce: take(NONCE_LEN).try_into().ok()?,
            recipient_public: take(KEY_LEN).try_into().ok()?,
            recipient_nonce: take(NONCE_LEN).try_into().ok()?,
            last_accepted: u64::from_be_bytes(take(8).try_into().ok()?),
        })
    }
}
