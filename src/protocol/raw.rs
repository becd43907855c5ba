//! Unprotected passthrough

use crate::error::Result;
use crate::protocol::{Context, Outcome, Protocol};

/// Forwards packets unchanged in both directions
#[derive(Debug, Default)]
pub struct RawProtocol;

impl RawProtocol {
    pub fn new() -> Self {
        Self
    }
}

impl Protocol for RawProtocol {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn encode(&mut self, _ctx: &mut Context, plaintext: &[u8]) -> Result<Outcome> {
        Ok(Outcome::Packet(plaintext.to_vec()))
    }

    fn decode(&mut self, _ctx: &mut Context, packet: &[u8]) -> Result<Outcome> {
        Ok(Outcome::Packet(packet.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        let mut raw = RawProtocol::new();
        let mut ctx = Context::new();

        let packet = b"\x45\x00\x00\x1c plain ip".to_vec();
        assert_eq!(
            raw.encode(&mut ctx, &packet).unwrap(),
            Outcome::Packet(packet.clone())
        );
        assert_eq!(
            raw.decode(&mut ctx, &packet).unwrap(),
            Outcome::Packet(packet)
        );
        assert_eq!(ctx.outbound_len(), 0);
    }

    #[test]
    fn test_empty_packet() {
        let mut raw = RawProtocol::new();
        let mut ctx = Context::new();
        assert_eq!(raw.decode(&mut ctx, &[]).unwrap(), Outcome::Packet(Vec::new()));
    }
}
