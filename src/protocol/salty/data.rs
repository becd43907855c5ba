//! Data channel: sealing with the installed encoder, and the four decoders
//! selected by the key-id pair in each packet header

use crate::crypto::nacl_box::{self, SharedKey};
use crate::crypto::x25519::KEY_LEN;
use crate::error::{ProtocolError, Result};
use crate::protocol::Outcome;

use super::keys::{KeySlot, RemoteKey};
use super::wire::{self, DataHeader, DATA_HEADER_LEN, DATA_MIN_LEN, NONCE_PREFIX_LEN};

/// Counter value at which a slot can no longer send
pub const EXHAUSTION_LIMIT: u32 = 1 << 29;

/// Default counter value at which rotation starts
pub const DEFAULT_ROTATE_AT: u32 = 1 << 28;

/// Number of accepted counters remembered per decoder
pub const REPLAY_SLOTS: usize = 5;

/// Seal one packet with the encoder slot
///
/// The counter is advanced before use, so the first packet carries 1.
/// Packets that would need a counter beyond the exhaustion limit are
/// rejected instead of reusing a nonce.
pub fn seal(
    shared: &SharedKey,
    slot: &mut KeySlot,
    sender_key_id: u8,
    recipient_key_id: u8,
    plaintext: &[u8],
) -> Result<Outcome> {
    if slot.counter() >= EXHAUSTION_LIMIT - 1 {
        return Ok(Outcome::Rejected(ProtocolError::NonceExhausted));
    }

    let (counter, nonce) = slot.next_nonce();
    let sealed = nacl_box::seal(shared, &nonce, plaintext)?;

    let header = DataHeader {
        sender_key_id,
        recipient_key_id,
        counter,
    };
    tracing::trace!(
        "Encoded packet of {} bytes, counter {}, keys {}/{}",
        plaintext.len(),
        counter,
        sender_key_id,
        recipient_key_id
    );
    Ok(Outcome::Packet(wire::frame_data(&header, &sealed)))
}

/// Five most recently accepted counters
///
/// A counter is accepted if it matches none of them and exceeds their
/// minimum; it then replaces the minimum. This tolerates some reordering
/// but is not an exact sliding window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayWindow {
    seen: [u32; REPLAY_SLOTS],
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a counter, returning the slot it would replace
    pub fn check(&self, counter: u32) -> std::result::Result<usize, ProtocolError> {
        let mut min_index = 0;
        let mut min = u32::MAX;
        for (index, &seen) in self.seen.iter().enumerate() {
            if seen == counter {
                return Err(ProtocolError::DuplicateCounter { counter });
            }
            if seen < min {
                min = seen;
                min_index = index;
            }
        }

        if counter <= min {
            return Err(ProtocolError::LateCounter {
                counter,
                floor: min,
            });
        }
        Ok(min_index)
    }

    /// Record a counter previously passed by [`check`](Self::check)
    pub fn accept(&mut self, index: usize, counter: u32) {
        self.seen[index] = counter;
    }
}

/// Opens packets for one (remote key, local key) combination
pub struct Decoder {
    remote_public: [u8; KEY_LEN],
    local_public: [u8; KEY_LEN],
    nonce_prefix: [u8; NONCE_PREFIX_LEN],
    shared: SharedKey,
    window: ReplayWindow,
}

impl Decoder {
    pub fn new(remote: &RemoteKey, local: &KeySlot) -> Self {
        Self {
            remote_public: remote.public_key,
            local_public: *local.public_key(),
            nonce_prefix: remote.nonce_prefix(),
            shared: nacl_box::precompute(&remote.public_key, local.private_key()),
            window: ReplayWindow::new(),
        }
    }

    fn same_material(&self, remote: &RemoteKey, local: &KeySlot) -> bool {
        self.remote_public == remote.public_key
            && self.local_public == *local.public_key()
            && self.nonce_prefix == remote.nonce_prefix()
    }

    /// Open a packet; state changes only if authentication succeeds
    pub fn open(
        &mut self,
        header: &DataHeader,
        sealed: &[u8],
    ) -> std::result::Result<Vec<u8>, ProtocolError> {
        let replace = self.window.check(header.counter)?;
        let nonce = wire::data_nonce(&self.nonce_prefix, header.counter);

        let plaintext = nacl_box::open(&self.shared, &nonce, sealed)
            .map_err(|_| ProtocolError::Decryption { kind: "data" })?;
        self.window.accept(replace, header.counter);
        Ok(plaintext)
    }
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("remote_public", &hex::encode(self.remote_public))
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

/// Decoders indexed by `(remote key id << 1) | local key id`
#[derive(Debug, Default)]
pub struct DecoderTable {
    decoders: [Option<Decoder>; 4],
}

impl DecoderTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(remote_key_id: u8, local_key_id: u8) -> usize {
        usize::from(((remote_key_id & 1) << 1) | (local_key_id & 1))
    }

    /// (Re)derive the decoder for the remote key and local slot `local_key_id`
    ///
    /// A decoder whose key material is unchanged keeps its replay window.
    /// Without a local slot the entry is cleared.
    pub fn derive(&mut self, remote: &RemoteKey, local_key_id: u8, local: Option<&KeySlot>) {
        let entry = &mut self.decoders[Self::index(remote.key_id, local_key_id)];
        match local {
            Some(slot) => {
                if !entry.as_ref().is_some_and(|d| d.same_material(remote, slot)) {
                    *entry = Some(Decoder::new(remote, slot));
                }
            }
            None => *entry = None,
        }
    }

    pub fn get(&self, remote_key_id: u8, local_key_id: u8) -> Option<&Decoder> {
        self.decoders[Self::index(remote_key_id, local_key_id)].as_ref()
    }

    /// Authenticate and decrypt a data packet
    pub fn open(&mut self, packet: &[u8]) -> std::result::Result<Vec<u8>, ProtocolError> {
        if packet.len() < DATA_MIN_LEN {
            return Err(ProtocolError::ShortPacket {
                kind: "data",
                expected: DATA_MIN_LEN,
                got: packet.len(),
            });
        }
        let header = DataHeader::parse(packet).ok_or(ProtocolError::ShortPacket {
            kind: "data",
            expected: DATA_MIN_LEN,
            got: packet.len(),
        })?;

        let decoder = self.decoders[header.decoder_index()]
            .as_mut()
            .ok_or(ProtocolError::NoDecoder {
                remote_key_id: header.sender_key_id,
                local_key_id: header.recipient_key_id,
            })?;

        tracing::trace!(
            "Decoding data packet of {} bytes with counter {}",
            packet.len(),
            header.counter
        );
        decoder.open(&header, &packet[DATA_HEADER_LEN..])
    }
}
