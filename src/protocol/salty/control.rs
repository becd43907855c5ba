//! Control channel
//!
//! Key announcements travel under a box keyed by the long-term identity
//! keys. Each side numbers its messages with a strictly increasing counter
//! and accepts only counters above the last one it accepted.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::IdentityKeys;
use crate::crypto::nacl_box::{self, SharedKey};
use crate::error::{ProtocolError, Result};
use crate::protocol::{Context, Outcome, Roles};

use super::keys::RemoteKey;
use super::wire::{self, ControlPayload, CONTROL_PACKET_LEN};
use super::SaltyProtocol;

/// Sealing state for the control channel
pub struct ControlChannel {
    shared: SharedKey,
    roles: Roles,
    sent: u64,
    last_accepted: u64,
}

impl ControlChannel {
    /// The outgoing counter starts at the wall-clock seconds shifted left by
    /// eight, so a restarted peer is not stuck below its old counter
    pub fn new(keys: &IdentityKeys, role: Option<bool>, wall: SystemTime) -> Self {
        let seconds = wall
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            shared: nacl_box::precompute(&keys.peer_public, &keys.private),
            roles: Roles::derive(&keys.own_public(), &keys.peer_public, role),
            sent: seconds << 8,
            last_accepted: 0,
        }
    }

    /// Counter of the last message sealed
    pub fn sent_counter(&self) -> u64 {
        self.sent
    }

    /// Counter of the last message accepted
    pub fn last_accepted(&self) -> u64 {
        self.last_accepted
    }

    /// Seal and frame a payload under the next counter
    pub fn seal(&mut self, payload: &ControlPayload) -> Result<Vec<u8>> {
        self.sent += 1;
        let nonce = wire::control_nonce(self.roles.send, self.sent);
        let sealed = nacl_box::seal(&self.shared, &nonce, &payload.to_bytes())?;
        Ok(wire::frame_control(self.sent, &sealed))
    }

    /// Authenticate and decrypt a control packet
    ///
    /// The accepted counter only moves when the packet opens.
    pub fn open(&mut self, packet: &[u8]) -> std::result::Result<ControlPayload, ProtocolError> {
        let short = ProtocolError::ShortPacket {
            kind: "control",
            expected: CONTROL_PACKET_LEN,
            got: packet.len(),
        };
        let (counter, sealed) = wire::parse_control(packet).ok_or_else(|| short.clone())?;

        if counter <= self.last_accepted {
            return Err(ProtocolError::LateControl {
                counter,
                last: self.last_accepted,
            });
        }

        let nonce = wire::control_nonce(self.roles.recv, counter);
        let plaintext = nacl_box::open(&self.shared, &nonce, sealed)
            .map_err(|_| ProtocolError::Decryption { kind: "control" })?;
        let payload = ControlPayload::parse(&plaintext).ok_or(short)?;

        self.last_accepted = counter;
        Ok(payload)
    }

    /// Jump the outgoing counter up to what the peer has already accepted
    pub fn fast_forward(&mut self, peer_last_accepted: u64) -> bool {
        if peer_last_accepted > self.sent {
            self.sent = peer_last_accepted;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("roles", &self.roles)
            .field("sent", &self.sent)
            .field("last_accepted", &self.last_accepted)
            .finish_non_exhaustive()
    }
}

/// Reasons to answer a control message
const REPLY_ACK: u8 = 1;
const REPLY_ANNOUNCE: u8 = 2;

impl SaltyProtocol {
    /// Announce our key to the peer
    ///
    /// The announced slot is the pending one during a rotation, otherwise
    /// the current one.
    pub(super) fn send_key_update(&mut self, ctx: &mut Context, ack: bool) -> Result<()> {
        let key_id = self.local.announced_id();
        let Some(slot) = self.local.slot(key_id) else {
            return Ok(());
        };
        let remote = self.remote.clone().unwrap_or_default();

        tracing::debug!(
            "Sending key update nlkid={}, rkid={}, ack={}",
            key_id,
            remote.key_id,
            ack
        );

        let payload = ControlPayload {
            sender_key_id: key_id,
            recipient_key_id: remote.key_id,
            ack,
            sender_public: *slot.public_key(),
            sender_nonce: slot.nonce(),
            recipient_public: remote.public_key,
            recipient_nonce: remote.nonce,
            last_accepted: self.control.last_accepted(),
        };

        ctx.send(self.control.seal(&payload)?);
        self.last_update_sent = Some(ctx.now());
        Ok(())
    }

    /// Apply a received control message
    pub(super) fn receive_control(&mut self, ctx: &mut Context, packet: &[u8]) -> Result<Outcome> {
        let payload = match self.control.open(packet) {
            Ok(payload) => payload,
            Err(e) => return Ok(Outcome::Rejected(e)),
        };

        let mut reply = 0u8;
        if !payload.ack {
            reply |= REPLY_ACK;
        }

        let remote = RemoteKey {
            key_id: payload.sender_key_id,
            public_key: payload.sender_public,
            nonce: payload.sender_nonce,
        };

        if self.control.fast_forward(payload.last_accepted) {
            tracing::warn!(
                "Remote expects newer control counter ({}), moving forward",
                payload.last_accepted
            );
        }

        // The peer must echo one of our slots exactly before we use it
        let confirmed = Some(payload.recipient_key_id).filter(|&id| {
            self.local
                .slot(id)
                .is_some_and(|slot| slot.matches(&payload.recipient_public, &payload.recipient_nonce))
        });
        if confirmed.is_none() {
            reply |= REPLY_ANNOUNCE;
        }

        for local_id in 0..2 {
            self.decoders
                .derive(&remote, local_id, self.local.slot(local_id));
        }

        if confirmed.is_some() && confirmed == self.local.pending_id() {
            self.local.promote();
            tracing::debug!("Key {} confirmed by peer", self.local.current_id());
        }
        if let Some(id) = confirmed.filter(|&id| id == self.local.current_id()) {
            self.local.install_encoder(id, &remote.public_key);
        }

        tracing::debug!(
            "Decoded control packet: rkid={}, lkid={}, ack={}, lkvalid={}, uptodate={}",
            remote.key_id,
            payload.recipient_key_id,
            payload.ack,
            confirmed.is_some(),
            self.local.pending_id().is_none()
        );
        self.remote = Some(remote);

        if self.local.pending_id().is_some() {
            reply |= REPLY_ANNOUNCE;
        }
        if reply != 0 {
            self.send_key_update(ctx, reply & REPLY_ANNOUNCE == 0)?;
        }

        Ok(Outcome::Consumed)
    }
}
