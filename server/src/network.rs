//! Network layer: TCP accept loop, per-connection reader/writer tasks, the
//! shared UDP socket, and the main event loop that owns the protocol engine.

use crate::registry::ConnectionCommand;
use crate::session::Engine;
use crate::store::PlayerStore;
use log::{debug, error, info, warn};
use shared::codec::{self, read_frame, write_frame};
use shared::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Events delivered to the main loop by the socket tasks.
#[derive(Debug)]
enum ServerEvent {
    Connected {
        conn_id: u64,
        peer: SocketAddr,
        writer: UnboundedSender<ConnectionCommand>,
    },
    Frame {
        conn_id: u64,
        msg: Message,
    },
    Disconnected {
        conn_id: u64,
    },
    Datagram {
        addr: SocketAddr,
        msg: Message,
    },
}

/// The positioning server: accepts reliable connections, answers discovery,
/// and drives the session engine from a single event loop.
pub struct Server {
    engine: Engine,
    listener: TcpListener,
    udp: Arc<UdpSocket>,
}

impl Server {
    pub async fn bind(
        host: &str,
        tcp_port: u16,
        udp_port: u16,
        server_name: String,
        store: Box<dyn PlayerStore>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind((host, tcp_port)).await?;
        let udp = Arc::new(UdpSocket::bind((host, udp_port)).await?);
        info!(
            "Server '{}' listening on {} (tcp) / {} (udp)",
            server_name,
            listener.local_addr()?,
            udp.local_addr()?
        );

        Ok(Server {
            engine: Engine::new(server_name, store),
            listener,
            udp,
        })
    }

    pub fn local_tcp_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn local_udp_addr(&self) -> std::io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    /// Main loop: accepts connections, receives datagrams, and feeds every
    /// event through the engine. Connection failures stay isolated; the
    /// loop itself only ends with the process.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        spawn_udp_receiver(Arc::clone(&self.udp), event_tx.clone());

        let mut next_conn_id: u64 = 1;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let conn_id = next_conn_id;
                            next_conn_id += 1;
                            spawn_connection(conn_id, stream, peer, event_tx.clone());
                        }
                        Err(e) => warn!("Accept failed: {}", e),
                    }
                },

                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    self.handle_event(event).await;
                },
            }
        }

        Ok(())
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        let datagrams = match event {
            ServerEvent::Connected {
                conn_id,
                peer,
                writer,
            } => {
                self.engine.handle_connect(conn_id, peer.ip(), writer);
                Vec::new()
            }
            ServerEvent::Frame { conn_id, msg } => self.engine.handle_frame(conn_id, msg),
            ServerEvent::Disconnected { conn_id } => {
                self.engine.handle_disconnect(conn_id);
                Vec::new()
            }
            ServerEvent::Datagram { addr, msg } => self.engine.handle_datagram(addr, msg),
        };

        for (addr, msg) in datagrams {
            match codec::encode_datagram(&msg) {
                Ok(bytes) => {
                    if let Err(e) = self.udp.send_to(&bytes, addr).await {
                        debug!("UDP send to {} failed: {}", addr, e);
                    }
                }
                Err(e) => error!("Failed to encode datagram: {}", e),
            }
        }
    }
}

/// Spawns the reader and writer tasks for one accepted connection.
fn spawn_connection(
    conn_id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    event_tx: UnboundedSender<ServerEvent>,
) {
    let (read_half, write_half) = stream.into_split();
    let (writer_tx, writer_rx) = mpsc::unbounded_channel();

    if event_tx
        .send(ServerEvent::Connected {
            conn_id,
            peer,
            writer: writer_tx,
        })
        .is_err()
    {
        return;
    }

    tokio::spawn(connection_reader(conn_id, read_half, event_tx));
    tokio::spawn(connection_writer(conn_id, write_half, writer_rx));
}

async fn connection_reader(
    conn_id: u64,
    read_half: OwnedReadHalf,
    event_tx: UnboundedSender<ServerEvent>,
) {
    let mut reader = BufReader::new(read_half);

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(msg)) => {
                if event_tx.send(ServerEvent::Frame { conn_id, msg }).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Connection {} read error: {}", conn_id, e);
                break;
            }
        }
    }

    let _ = event_tx.send(ServerEvent::Disconnected { conn_id });
}

async fn connection_writer(
    conn_id: u64,
    write_half: OwnedWriteHalf,
    mut writer_rx: UnboundedReceiver<ConnectionCommand>,
) {
    let mut writer = BufWriter::new(write_half);

    while let Some(command) = writer_rx.recv().await {
        match command {
            ConnectionCommand::Deliver(msg) => {
                if let Err(e) = write_frame(&mut writer, &msg).await {
                    debug!("Connection {} write error: {}", conn_id, e);
                    break;
                }
            }
            ConnectionCommand::Close => {
                debug!("Closing connection {}", conn_id);
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
}

/// Receives datagrams on the shared socket: live moves from clients and
/// discovery probes, which are answered before any connection exists.
fn spawn_udp_receiver(udp: Arc<UdpSocket>, event_tx: UnboundedSender<ServerEvent>) {
    tokio::spawn(async move {
        let mut buffer = [0u8; 2048];

        loop {
            match udp.recv_from(&mut buffer).await {
                Ok((len, addr)) => {
                    if let Some(msg) = codec::decode_datagram(&buffer[0..len]) {
                        if event_tx.send(ServerEvent::Datagram { addr, msg }).is_err() {
                            return;
                        }
                    } else {
                        debug!("Undecodable datagram from {}", addr);
                    }
                }
                Err(e) => {
                    error!("Error receiving datagram: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
            }
        }
    });
}
