//! Pre-connection host discovery: broadcast a probe, collect name replies.

use log::{debug, info};
use shared::codec;
use shared::Message;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

/// Broadcasts discovery probes and collects every reply that arrives within
/// `timeout_ms`. Replies are distinct by source address; nothing else is
/// deduplicated. An empty result is a normal outcome and the caller falls
/// back to manual host entry.
pub async fn discover(udp_port: u16, timeout_ms: u64) -> io::Result<Vec<(String, SocketAddr)>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;

    let probe = codec::encode_datagram(&Message::DiscoveryProbe)?;
    socket
        .send_to(&probe, (Ipv4Addr::BROADCAST, udp_port))
        .await?;
    debug!("Discovery probe broadcast to port {}", udp_port);

    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let mut servers: Vec<(String, SocketAddr)> = Vec::new();
    let mut buffer = [0u8; 2048];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match timeout(remaining, socket.recv_from(&mut buffer)).await {
            Ok(Ok((len, addr))) => {
                match codec::decode_datagram(&buffer[0..len]) {
                    Some(Message::DiscoveryReply { name }) => {
                        if servers.iter().all(|(_, a)| *a != addr) {
                            info!("Discovered '{}' at {}", name, addr);
                            servers.push((name, addr));
                        }
                    }
                    _ => debug!("Ignoring non-reply datagram from {}", addr),
                }
            }
            Ok(Err(e)) => {
                debug!("Discovery receive error: {}", e);
            }
            // Window elapsed; return whatever arrived.
            Err(_) => break,
        }
    }

    Ok(servers)
}
