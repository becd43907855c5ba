//! Local data-key slots and the peer's announced key
//!
//! Each side holds two ephemeral key slots. One is current; the other is
//! pending while a rotation waits for the peer to confirm it.

use crate::crypto::nacl_box::{self, SharedKey, NONCE_LEN};
use crate::crypto::x25519::{self, KeyPair, KEY_LEN};
use crate::error::CryptoError;

use super::wire::{data_nonce, NONCE_PREFIX_LEN};

/// One ephemeral key pair with its nonce prefix and send counter
pub struct KeySlot {
    keypair: KeyPair,
    nonce_prefix: [u8; NONCE_PREFIX_LEN],
    counter: u32,
}

impl KeySlot {
    /// Fresh key pair and random nonce prefix, counter zero
    pub fn generate() -> Result<Self, CryptoError> {
        let keypair = x25519::generate_keypair()?;
        let mut nonce_prefix = [0u8; NONCE_PREFIX_LEN];
        x25519::random_bytes(&mut nonce_prefix)?;

        Ok(Self {
            keypair,
            nonce_prefix,
            counter: 0,
        })
    }

    pub fn public_key(&self) -> &[u8; KEY_LEN] {
        &self.keypair.public_key
    }

    pub fn private_key(&self) -> &[u8; KEY_LEN] {
        &self.keypair.private_key
    }

    pub fn nonce_prefix(&self) -> &[u8; NONCE_PREFIX_LEN] {
        &self.nonce_prefix
    }

    /// Nonce as announced to the peer: prefix plus current counter
    pub fn nonce(&self) -> [u8; NONCE_LEN] {
        data_nonce(&self.nonce_prefix, self.counter)
    }

    /// Last counter value used for sending
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Whether the peer's view of this slot is exact
    ///
    /// Only the prefix of the nonce is compared; the counter part moves.
    pub fn matches(&self, public_key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN]) -> bool {
        self.keypair.public_key == *public_key
            && self.nonce_prefix[..] == nonce[..NONCE_PREFIX_LEN]
    }

    /// Advance the counter and return the nonce to seal under
    pub fn next_nonce(&mut self) -> (u32, [u8; NONCE_LEN]) {
        self.counter = self.counter.wrapping_add(1);
        (self.counter, data_nonce(&self.nonce_prefix, self.counter))
    }

    #[cfg(test)]
    pub(crate) fn set_counter(&mut self, counter: u32) {
        self.counter = counter;
    }
}

impl std::fmt::Debug for KeySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySlot")
            .field("public_key", &hex::encode(self.keypair.public_key))
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

/// Slot in use for sending and its key against the peer
struct Encoder {
    key_id: u8,
    shared: SharedKey,
}

/// The two local key slots
#[derive(Default)]
pub struct LocalKeys {
    slots: [Option<KeySlot>; 2],
    current: u8,
    pending: Option<u8>,
    encoder: Option<Encoder>,
}

impl LocalKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the slot after the current one with fresh material and mark it
    /// pending
    ///
    /// Returns the pending key id.
    pub fn begin_rotation(&mut self) -> Result<u8, CryptoError> {
        let next = (self.current + 1) % 2;
        let slot = KeySlot::generate()?;
        if self.encoder_id() == Some(next) {
            self.encoder = None;
        }
        self.slots[usize::from(next)] = Some(slot);
        self.pending = Some(next);
        Ok(next)
    }

    /// Make the pending slot current
    pub fn promote(&mut self) {
        if let Some(next) = self.pending.take() {
            self.current = next;
        }
    }

    pub fn current_id(&self) -> u8 {
        self.current
    }

    pub fn pending_id(&self) -> Option<u8> {
        self.pending
    }

    /// Key id announced in control messages: the pending one if any
    pub fn announced_id(&self) -> u8 {
        self.pending.unwrap_or(self.current)
    }

    pub fn slot(&self, id: u8) -> Option<&KeySlot> {
        self.slots[usize::from(id & 1)].as_ref()
    }

    /// Install slot `id` as the encoder, keyed against `remote_public`
    ///
    /// The slot's counter carries over so no nonce repeats under a key.
    pub fn install_encoder(&mut self, id: u8, remote_public: &[u8; KEY_LEN]) -> bool {
        let key_id = id & 1;
        match self.slots[usize::from(key_id)].as_ref() {
            Some(slot) => {
                self.encoder = Some(Encoder {
                    key_id,
                    shared: nacl_box::precompute(remote_public, slot.private_key()),
                });
                true
            }
            None => false,
        }
    }

    pub fn encoder_id(&self) -> Option<u8> {
        self.encoder.as_ref().map(|encoder| encoder.key_id)
    }

    /// The sending key and its slot
    pub fn encoder_mut(&mut self) -> Option<(&SharedKey, &mut KeySlot)> {
        let encoder = self.encoder.as_ref()?;
        let slot = self.slots[usize::from(encoder.key_id)].as_mut()?;
        Some((&encoder.shared, slot))
    }
}

impl std::fmt::Debug for LocalKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeys")
            .field("slots", &self.slots)
            .field("current", &self.current)
            .field("pending", &self.pending)
            .field("encoder", &self.encoder_id())
            .finish()
    }
}

/// What the peer last announced about its own key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteKey {
    pub key_id: u8,
    pub public_key: [u8; KEY_LEN],
    pub nonce: [u8; NONCE_LEN],
}

impl RemoteKey {
    pub fn nonce_prefix(&self) -> [u8; NONCE_PREFIX_LEN] {
        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        prefix.copy_from_slice(&self.nonce[..NONCE_PREFIX_LEN]);
        prefix
    }
}
