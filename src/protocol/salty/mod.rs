//! Salty: rotating ephemeral keys over a long-term control channel
//!
//! Each side keeps two ephemeral key slots and announces new ones on the
//! control channel. A slot is used for sending only after the peer echoes
//! its public key and nonce back, and data packets name the key pair they
//! were sealed under so traffic keeps flowing across a rotation.
//!
//! Rotation starts at startup, every five minutes, and when the send
//! counter of the active slot passes the rotation threshold. Unconfirmed
//! announcements are retried from [`Protocol::idle`].

pub mod control;
pub mod data;
pub mod keys;
pub mod wire;

use std::time::{Duration, Instant};

use crate::config::{ConfigSource, IdentityKeys};
use crate::error::{ProtocolError, Result};
use crate::protocol::{Context, Outcome, Protocol};

use control::ControlChannel;
use data::DecoderTable;
use keys::{LocalKeys, RemoteKey};

/// Timing and threshold knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaltyOptions {
    /// Send counter at which a new key is announced
    pub rotate_at: u32,
    /// Age of the last rotation after which a new one starts
    pub rekey_interval: Duration,
    /// Minimum gap between retries of an unconfirmed announcement
    pub retry_interval: Duration,
    /// Idle wake-up interval requested from the driver
    pub poll_timeout: Duration,
}

impl Default for SaltyOptions {
    fn default() -> Self {
        Self {
            rotate_at: data::DEFAULT_ROTATE_AT,
            rekey_interval: Duration::from_secs(300),
            retry_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(5),
        }
    }
}

pub struct SaltyProtocol {
    options: SaltyOptions,
    control: ControlChannel,
    local: LocalKeys,
    remote: Option<RemoteKey>,
    decoders: DecoderTable,
    last_key_update: Instant,
    last_update_sent: Option<Instant>,
}

impl SaltyProtocol {
    /// Set up state and send the first key announcement into `ctx`
    pub fn new(
        keys: &IdentityKeys,
        role: Option<bool>,
        options: SaltyOptions,
        ctx: &mut Context,
    ) -> Result<Self> {
        let mut protocol = Self {
            options,
            control: ControlChannel::new(keys, role, ctx.wall()),
            local: LocalKeys::new(),
            remote: None,
            decoders: DecoderTable::new(),
            last_key_update: ctx.now(),
            last_update_sent: None,
        };
        protocol.begin_key_update(ctx)?;
        Ok(protocol)
    }

    pub fn from_config(source: &dyn ConfigSource, ctx: &mut Context) -> Result<Self> {
        let keys = IdentityKeys::load(source)?;
        let role = IdentityKeys::role_override(source)?;
        Self::new(&keys, role, SaltyOptions::default(), ctx)
    }

    /// Key id used for sending
    pub fn current_key_id(&self) -> u8 {
        self.local.current_id()
    }

    /// Key id announced but not yet confirmed
    pub fn pending_key_id(&self) -> Option<u8> {
        self.local.pending_id()
    }

    /// Whether data can be sent
    pub fn is_established(&self) -> bool {
        self.local.encoder_id().is_some()
    }

    /// Last counter used by the sending slot
    pub fn send_counter(&self) -> Option<u32> {
        let id = self.local.encoder_id()?;
        self.local.slot(id).map(|slot| slot.counter())
    }

    pub fn control(&self) -> &ControlChannel {
        &self.control
    }

    fn remote_key_id(&self) -> u8 {
        self.remote.as_ref().map_or(0, |remote| remote.key_id)
    }

    /// Generate a pending key and announce it
    fn begin_key_update(&mut self, ctx: &mut Context) -> Result<()> {
        let next = self.local.begin_rotation()?;
        tracing::debug!(
            "Beginning key update nlkid={}, rkid={}",
            next,
            self.remote_key_id()
        );

        if let Some(remote) = &self.remote {
            self.decoders.derive(remote, next, self.local.slot(next));
            // Packets for the replaced key under the peer's other key are dead
            let stale = RemoteKey {
                key_id: remote.key_id ^ 1,
                ..RemoteKey::default()
            };
            self.decoders.derive(&stale, next, None);
        }

        self.send_key_update(ctx, false)?;
        self.last_key_update = ctx.now();
        Ok(())
    }

    fn begin_key_update_if_necessary(&mut self, ctx: &mut Context) -> Result<()> {
        let now = ctx.now();
        if now.saturating_duration_since(self.last_key_update) > self.options.rekey_interval {
            return self.begin_key_update(ctx);
        }

        let retry_due = self
            .last_update_sent
            .map_or(true, |sent| now.saturating_duration_since(sent) > self.options.retry_interval);
        if self.local.pending_id().is_some() && retry_due {
            self.send_key_update(ctx, false)?;
        }
        Ok(())
    }
}

impl Protocol for SaltyProtocol {
    fn name(&self) -> &'static str {
        "salty"
    }

    fn poll_timeout(&self) -> Option<Duration> {
        Some(self.options.poll_timeout)
    }

    fn encode(&mut self, ctx: &mut Context, plaintext: &[u8]) -> Result<Outcome> {
        self.begin_key_update_if_necessary(ctx)?;

        if let Some(counter) = self.send_counter() {
            if counter >= self.options.rotate_at && self.local.pending_id().is_none() {
                tracing::debug!("Send counter {} reached rotation threshold", counter);
                self.begin_key_update(ctx)?;
            }
        }

        let sender_key_id = self.local.current_id();
        let recipient_key_id = self.remote_key_id();
        let Some((shared, slot)) = self.local.encoder_mut() else {
            if self.local.pending_id().is_none() {
                self.begin_key_update(ctx)?;
            }
            tracing::debug!(
                "Discarding outgoing packet of {} bytes because encoder is not available",
                plaintext.len()
            );
            return Ok(Outcome::Deferred);
        };

        data::seal(shared, slot, sender_key_id, recipient_key_id, plaintext)
    }

    fn decode(&mut self, ctx: &mut Context, packet: &[u8]) -> Result<Outcome> {
        self.begin_key_update_if_necessary(ctx)?;

        if packet.is_empty() {
            return Ok(Outcome::Rejected(ProtocolError::ShortPacket {
                kind: "salty",
                expected: 1,
                got: 0,
            }));
        }
        if wire::is_control(packet) {
            return self.receive_control(ctx, packet);
        }

        Ok(match self.decoders.open(packet) {
            Ok(plaintext) => Outcome::Packet(plaintext),
            Err(e) => Outcome::Rejected(e),
        })
    }

    fn idle(&mut self, ctx: &mut Context) -> Result<()> {
        self.begin_key_update_if_necessary(ctx)
    }
}

impl std::fmt::Debug for SaltyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaltyProtocol")
            .field("control", &self.control)
            .field("local", &self.local)
            .field("remote_key_id", &self.remote_key_id())
            .finish_non_exhaustive()
    }
}
