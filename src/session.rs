//! Session driver
//!
//! Relays packets between the tunnel device and the UDP socket through the
//! active protocol:
//! - device read -> encode -> socket send
//! - socket receive -> decode -> device write
//! - poll timeout -> protocol idle work
//!
//! Everything runs on one task; the protocol state is never shared.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{NetworkError, Result};
use crate::protocol::{Context, Outcome, Protocol};
use crate::transport::{is_transient, Datagram, Endpoint};
use crate::tunnel::TunnelDevice;

/// Buffer size for packets
const BUFFER_SIZE: usize = 65536;

/// Sleep for the protocol's poll timeout, or forever if it has none
async fn idle_timer(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

/// A running tunnel
pub struct Session<D, S> {
    device: D,
    socket: S,
    endpoint: Endpoint,
    protocol: Box<dyn Protocol>,
}

impl<D: TunnelDevice, S: Datagram> Session<D, S> {
    pub fn new(device: D, socket: S, endpoint: Endpoint, protocol: Box<dyn Protocol>) -> Self {
        Self {
            device,
            socket,
            endpoint,
            protocol,
        }
    }

    /// Current remote endpoint
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Send packets the protocol queued on `ctx`
    ///
    /// They go to the current endpoint and are dropped while a floating
    /// endpoint is still unknown.
    pub async fn flush(&mut self, ctx: &mut Context) {
        let packets = ctx.take_outbound();
        if packets.is_empty() {
            return;
        }

        let Some(addr) = self.endpoint.current() else {
            tracing::debug!(
                "Remote endpoint unknown, dropping {} protocol packets",
                packets.len()
            );
            return;
        };

        for packet in packets {
            send_packet(&self.socket, &packet, addr).await;
        }
    }

    /// Run until `shutdown` completes or a fatal error occurs
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut device_buf = vec![0u8; BUFFER_SIZE];
        let mut socket_buf = vec![0u8; BUFFER_SIZE];
        tokio::pin!(shutdown);

        tracing::info!(
            "The tunnel is now operational ({} protocol on {})",
            self.protocol.name(),
            self.device.name()
        );

        loop {
            let timeout = self.protocol.poll_timeout();

            tokio::select! {
                // Read from device -> encode -> send via UDP
                result = self.device.read(&mut device_buf) => {
                    let len = result?;
                    self.handle_device_packet(&device_buf[..len]).await?;
                }

                // Receive from UDP -> decode -> write to device
                result = self.socket.recv_from(&mut socket_buf) => {
                    match result {
                        Ok((len, from)) => {
                            self.handle_network_packet(&socket_buf[..len], from).await?;
                        }
                        Err(e) if is_transient(&e) => {
                            tracing::warn!("Received error on UDP socket: {}", e);
                        }
                        Err(e) => {
                            return Err(NetworkError::SocketFailed {
                                reason: e.to_string(),
                            }
                            .into());
                        }
                    }
                }

                _ = idle_timer(timeout) => {
                    self.handle_idle().await?;
                }

                _ = &mut shutdown => {
                    tracing::info!("Shutting down tunnel");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_device_packet(&mut self, packet: &[u8]) -> Result<()> {
        let Some(addr) = self.endpoint.current() else {
            tracing::trace!(
                "Dropping {} byte packet, remote endpoint not known yet",
                packet.len()
            );
            return Ok(());
        };

        let mut ctx = Context::new();
        let outcome = self.protocol.encode(&mut ctx, packet)?;
        self.flush(&mut ctx).await;

        match outcome {
            Outcome::Packet(encoded) => send_packet(&self.socket, &encoded, addr).await,
            Outcome::Consumed | Outcome::Deferred => {}
            Outcome::Rejected(e) => {
                tracing::warn!("Dropping outgoing packet: {}", e);
            }
        }
        Ok(())
    }

    async fn handle_network_packet(&mut self, packet: &[u8], from: SocketAddr) -> Result<()> {
        let mut ctx = Context::new();
        let outcome = self.protocol.decode(&mut ctx, packet)?;

        match outcome {
            Outcome::Packet(decoded) => {
                self.observe(from);
                if !decoded.is_empty() {
                    self.device.write(&decoded).await?;
                }
            }
            Outcome::Consumed => self.observe(from),
            Outcome::Deferred => {}
            Outcome::Rejected(e) => {
                tracing::warn!("Dropping packet from {}: {}", from, e);
            }
        }

        self.flush(&mut ctx).await;
        Ok(())
    }

    async fn handle_idle(&mut self) -> Result<()> {
        let mut ctx = Context::new();
        self.protocol.idle(&mut ctx)?;
        self.flush(&mut ctx).await;
        Ok(())
    }

    fn observe(&mut self, from: SocketAddr) {
        if self.endpoint.observe(from) {
            tracing::info!("Remote endpoint has changed to {}", from);
        }
    }
}

/// Send one datagram; failures are logged and the packet is dropped
///
/// A failed send says nothing about whether the socket still works.
async fn send_packet<S: Datagram>(socket: &S, packet: &[u8], addr: SocketAddr) {
    if let Err(e) = socket.send_to(packet, addr).await {
        if is_transient(&e) {
            tracing::debug!("Failed to send to {}: {}", addr, e);
        } else {
            tracing::warn!("Failed to send {} bytes to {}: {}", packet.len(), addr, e);
        }
    }
}
