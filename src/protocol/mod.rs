//! Tunnel protocol implementations
//!
//! Each protocol transforms packets between the tunnel device (plaintext)
//! and the UDP socket (wire format):
//! - `raw`: passthrough, no protection
//! - `nacl0`: single precomputed box key, fixed nonce
//! - `nacltai`: single box key with TAI64NA labels for replay protection
//! - `salty`: rotating ephemeral keys with forward secrecy

pub mod nacl0;
pub mod nacltai;
pub mod raw;
pub mod registry;
pub mod salty;

use std::time::{Duration, Instant, SystemTime};

use crate::error::{ProtocolError, Result};

pub use registry::ProtocolKind;

/// Result of handing one packet to a protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A transformed packet to forward to the other side
    Packet(Vec<u8>),
    /// The packet was accepted but produced nothing to forward
    /// (e.g. a Salty control message)
    Consumed,
    /// The packet cannot be encoded yet; it is dropped, not queued
    Deferred,
    /// The packet was rejected; no protocol state changed
    Rejected(ProtocolError),
}

/// Per-call protocol context
///
/// Carries the clock readings for this call and collects packets the
/// protocol wants sent to the peer on its own initiative.
#[derive(Debug)]
pub struct Context {
    now: Instant,
    wall: SystemTime,
    outbound: Vec<Vec<u8>>,
}

impl Context {
    /// Context stamped with the current time
    pub fn new() -> Self {
        Self::at(Instant::now(), SystemTime::now())
    }

    /// Context at an explicit time
    pub fn at(now: Instant, wall: SystemTime) -> Self {
        Self {
            now,
            wall,
            outbound: Vec::new(),
        }
    }

    /// Monotonic time of this call
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Wall-clock time of this call
    pub fn wall(&self) -> SystemTime {
        self.wall
    }

    /// Queue a packet for the peer
    pub fn send(&mut self, packet: Vec<u8>) {
        self.outbound.push(packet);
    }

    /// Take all queued packets
    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbound)
    }

    /// Number of queued packets
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Direction bits mixed into nonces so the two peers never share one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roles {
    /// Bit placed in nonces we seal
    pub send: u8,
    /// Bit expected in nonces we open
    pub recv: u8,
}

impl Roles {
    /// Derive the bits from key ordering, or from an explicit ROLE
    ///
    /// The peer with the greater public key sends with bit 1. Identical keys
    /// (a loopback tunnel) use bit 0 both ways.
    pub fn derive(own_public: &[u8; 32], peer_public: &[u8; 32], role: Option<bool>) -> Self {
        let roles: u8 = match role {
            Some(true) => 1,
            Some(false) => 2,
            None => match own_public.cmp(peer_public) {
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
                std::cmp::Ordering::Less => 2,
            },
        };
        Self {
            send: roles & 1,
            recv: (roles >> 1) & 1,
        }
    }
}

/// A packet transformation protocol
///
/// Implementations own their state; the session driver calls them from a
/// single task only. `Err` is reserved for fatal conditions.
pub trait Protocol: Send + Sync {
    /// Registry name of this protocol
    fn name(&self) -> &'static str;

    /// How long the driver may wait for traffic before calling [`idle`](Self::idle)
    fn poll_timeout(&self) -> Option<Duration> {
        None
    }

    /// Transform a packet read from the tunnel device
    fn encode(&mut self, ctx: &mut Context, plaintext: &[u8]) -> Result<Outcome>;

    /// Transform a packet received from the network
    fn decode(&mut self, ctx: &mut Context, packet: &[u8]) -> Result<Outcome>;

    /// Periodic work when no traffic arrived within the poll timeout
    fn idle(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }
}
