//! UDP transport and remote endpoint tracking

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::config::TunnelSettings;
use crate::error::{ConfigError, NetworkError, SaltTunError};

/// A datagram socket the session driver can send and receive on
#[async_trait]
pub trait Datagram: Send + Sync {
    /// Send one datagram to `addr`
    async fn send_to(&self, packet: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram and its source
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

/// Where packets for the peer go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Configured address; the socket is connected to it
    Fixed(SocketAddr),
    /// Follows the source of accepted packets; unknown until the first one
    Floating(Option<SocketAddr>),
}

impl Endpoint {
    /// Address to send to, if known
    pub fn current(&self) -> Option<SocketAddr> {
        match self {
            Self::Fixed(addr) => Some(*addr),
            Self::Floating(addr) => *addr,
        }
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, Self::Floating(_))
    }

    /// Note the source of an accepted packet
    ///
    /// Returns true when a floating endpoint moved.
    pub fn observe(&mut self, source: SocketAddr) -> bool {
        match self {
            Self::Floating(current) if *current != Some(source) => {
                *current = Some(source);
                true
            }
            _ => false,
        }
    }
}

/// Bound UDP socket
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    connected: Option<SocketAddr>,
}

impl UdpTransport {
    /// Bind to `local` and, for fixed endpoints, connect to the peer
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(local: SocketAddr, endpoint: &Endpoint) -> Result<Self, NetworkError> {
        let bind_failed = |e: io::Error| NetworkError::BindFailed {
            addr: local.to_string(),
            reason: e.to_string(),
        };

        let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))
            .map_err(bind_failed)?;
        socket.set_nonblocking(true).map_err(bind_failed)?;
        socket.bind(&local.into()).map_err(bind_failed)?;

        let connected = match endpoint {
            Endpoint::Fixed(remote) => {
                socket
                    .connect(&(*remote).into())
                    .map_err(|e| NetworkError::ConnectFailed {
                        addr: remote.to_string(),
                        reason: e.to_string(),
                    })?;
                Some(*remote)
            }
            Endpoint::Floating(_) => None,
        };

        let socket = UdpSocket::from_std(socket.into()).map_err(bind_failed)?;
        tracing::info!("UDP socket bound to {}", local);

        Ok(Self { socket, connected })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl Datagram for UdpTransport {
    async fn send_to(&self, packet: &[u8], addr: SocketAddr) -> io::Result<usize> {
        match self.connected {
            Some(remote) if remote == addr => self.socket.send(packet).await,
            _ => self.socket.send_to(packet, addr).await,
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }
}

/// Socket errors that do not end the session
///
/// ICMP errors reported on a UDP socket (refused, unreachable) say nothing
/// about our own socket, so the driver logs them and carries on.
pub fn is_transient(err: &io::Error) -> bool {
    use io::ErrorKind::*;

    if matches!(
        err.kind(),
        ConnectionRefused | ConnectionReset | ConnectionAborted | WouldBlock | Interrupted | TimedOut
    ) {
        return true;
    }

    #[cfg(unix)]
    {
        if let Some(code) = err.raw_os_error() {
            return matches!(
                code,
                libc::EHOSTUNREACH | libc::ENETUNREACH | libc::EHOSTDOWN | libc::ENETDOWN
            );
        }
    }

    false
}

/// Resolve a host name or literal address with the system resolver
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, NetworkError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| NetworkError::DnsResolutionFailed {
            host: host.to_string(),
        })?
        .next()
        .ok_or_else(|| NetworkError::DnsResolutionFailed {
            host: host.to_string(),
        })
}

/// Work out the bind address and remote endpoint from the settings
///
/// The remote endpoint floats when no remote address is configured, when it
/// is the unspecified address, or when REMOTE_FLOAT is set.
pub async fn resolve_addresses(
    settings: &TunnelSettings,
) -> Result<(SocketAddr, Endpoint), SaltTunError> {
    let local = match &settings.local_address {
        Some(host) => Some(resolve(host, settings.local_port).await?),
        None => None,
    };
    let remote = match &settings.remote_address {
        Some(host) => Some(resolve(host, settings.remote_port).await?),
        None => None,
    };

    if let (Some(local), Some(remote)) = (local, remote) {
        if local.is_ipv4() != remote.is_ipv4() {
            return Err(ConfigError::AddressFamilyMismatch.into());
        }
    }

    let local = local.unwrap_or_else(|| {
        let any = match remote {
            Some(SocketAddr::V6(_)) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        SocketAddr::new(any, settings.local_port)
    });

    let endpoint = match remote {
        Some(remote) if !remote.ip().is_unspecified() => {
            if settings.remote_float {
                Endpoint::Floating(Some(remote))
            } else {
                Endpoint::Fixed(remote)
            }
        }
        _ => Endpoint::Floating(None),
    };

    Ok((local, endpoint))
}
