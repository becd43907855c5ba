//! Two session drivers running Salty over an in-memory link

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};

use salttun::config::MapSource;
use salttun::crypto::x25519;
use salttun::error::{SaltTunError, TunnelError};
use salttun::protocol::{Context, ProtocolKind};
use salttun::transport::{Datagram, Endpoint};
use salttun::tunnel::TunnelDevice;
use salttun::Session;

struct MemoryDevice {
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl TunnelDevice for MemoryDevice {
    fn name(&self) -> &str {
        "mem0"
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, SaltTunError> {
        let packet = self.rx.lock().await.recv().await.ok_or_else(|| {
            SaltTunError::from(TunnelError::ReadFailed {
                reason: "device closed".to_string(),
            })
        })?;
        buf[..packet.len()].copy_from_slice(&packet);
        Ok(packet.len())
    }

    async fn write(&self, packet: &[u8]) -> Result<usize, SaltTunError> {
        let _ = self.tx.send(packet.to_vec());
        Ok(packet.len())
    }
}

/// One end of a point-to-point datagram link
struct LinkEnd {
    addr: SocketAddr,
    peer_addr: SocketAddr,
    rx: Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    peer: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
}

#[async_trait]
impl Datagram for LinkEnd {
    async fn send_to(&self, packet: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if addr != self.peer_addr {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        let _ = self.peer.send((packet.to_vec(), self.addr));
        Ok(packet.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match self.rx.lock().await.recv().await {
            Some((packet, from)) => {
                buf[..packet.len()].copy_from_slice(&packet);
                Ok((packet.len(), from))
            }
            None => std::future::pending().await,
        }
    }
}

fn link(a: SocketAddr, b: SocketAddr) -> (LinkEnd, LinkEnd) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        LinkEnd {
            addr: a,
            peer_addr: b,
            rx: Mutex::new(a_rx),
            peer: b_tx,
        },
        LinkEnd {
            addr: b,
            peer_addr: a,
            rx: Mutex::new(b_rx),
            peer: a_tx,
        },
    )
}

struct Node {
    device_in: mpsc::UnboundedSender<Vec<u8>>,
    device_out: mpsc::UnboundedReceiver<Vec<u8>>,
    stop: oneshot::Sender<()>,
    driver: tokio::task::JoinHandle<(Result<(), SaltTunError>, Endpoint)>,
}

async fn start(own: u8, peer: u8, socket: LinkEnd, endpoint: Endpoint) -> Node {
    let source = MapSource::new()
        .with("PROTOCOL", "salty")
        .with("PRIVATE_KEY", hex::encode([own; 32]))
        .with("PUBLIC_KEY", hex::encode(x25519::public_key(&[peer; 32])));

    let mut ctx = Context::new();
    let protocol = ProtocolKind::select(&source)
        .unwrap()
        .build(&source, &mut ctx)
        .unwrap();

    let (device_in, device_rx) = mpsc::unbounded_channel();
    let (device_tx, device_out) = mpsc::unbounded_channel();
    let device = MemoryDevice {
        rx: Mutex::new(device_rx),
        tx: device_tx,
    };

    let mut session = Session::new(device, socket, endpoint, protocol);
    session.flush(&mut ctx).await;

    let (stop, stopped) = oneshot::channel::<()>();
    let driver = tokio::spawn(async move {
        let result = session
            .run(async {
                let _ = stopped.await;
            })
            .await;
        (result, session.endpoint())
    });

    Node {
        device_in,
        device_out,
        stop,
        driver,
    }
}

#[tokio::test]
async fn test_salty_sessions_relay_both_ways() {
    let a_addr: SocketAddr = "192.0.2.1:2998".parse().unwrap();
    let b_addr: SocketAddr = "192.0.2.2:2998".parse().unwrap();
    let (a_link, b_link) = link(a_addr, b_addr);

    let mut a = start(0x31, 0x42, a_link, Endpoint::Fixed(b_addr)).await;
    let mut b = start(0x42, 0x31, b_link, Endpoint::Floating(None)).await;

    // Packets sent before the handshake settles are dropped, so keep trying
    let payload = vec![0x5Au8; 100];
    let mut delivered = None;
    for _ in 0..50 {
        a.device_in.send(payload.clone()).unwrap();
        if let Ok(packet) = tokio::time::timeout(Duration::from_millis(100), b.device_out.recv()).await
        {
            delivered = packet;
            break;
        }
    }
    assert_eq!(delivered, Some(payload));

    b.device_in.send(b"reply".to_vec()).unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), a.device_out.recv())
        .await
        .unwrap();
    assert_eq!(reply, Some(b"reply".to_vec()));

    a.stop.send(()).unwrap();
    b.stop.send(()).unwrap();
    let (a_result, a_endpoint) = a.driver.await.unwrap();
    let (b_result, b_endpoint) = b.driver.await.unwrap();
    a_result.unwrap();
    b_result.unwrap();

    assert_eq!(a_endpoint, Endpoint::Fixed(b_addr));
    assert_eq!(b_endpoint, Endpoint::Floating(Some(a_addr)));
}
