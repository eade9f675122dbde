//! Client session controller: handshake, mirror upkeep, and the two send
//! paths for move intents.

use crate::game::Mirror;
use crate::presentation::{MoveIntent, Presentation};
use log::{debug, error, info, warn};
use shared::codec::{self, read_frame, write_frame};
use shared::{now_millis, Message};
use std::net::SocketAddr;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc::UnboundedReceiver;

/// What the controller decided after applying one server message.
#[derive(Debug, PartialEq)]
enum Reaction {
    Continue,
    SendRegister,
    GameOver,
}

/// Drives the client side of the protocol: connects, logs in (registering
/// on demand), mirrors every entity, and runs the collision rule.
pub struct Controller<P: Presentation> {
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    name: String,
    mirror: Mirror,
    presentation: P,
    intents: UnboundedReceiver<MoveIntent>,
}

impl<P: Presentation> Controller<P> {
    /// `tcp_addr` is the chosen server's reliable endpoint; the unreliable
    /// endpoint is the same host on `udp_port`.
    pub fn new(
        tcp_addr: SocketAddr,
        udp_port: u16,
        name: &str,
        presentation: P,
        intents: UnboundedReceiver<MoveIntent>,
    ) -> Self {
        Self {
            tcp_addr,
            udp_addr: SocketAddr::new(tcp_addr.ip(), udp_port),
            name: name.trim().to_string(),
            mirror: Mirror::new(name),
            presentation,
            intents,
        }
    }

    /// Connects and runs until the server closes the connection or the
    /// collision rule ends the session. Both are terminal for the client.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(self.tcp_addr).await?;
        info!("Connected to {}", self.tcp_addr);
        let (read_half, write_half) = stream.into_split();
        let mut writer = BufWriter::new(write_half);

        // Frames are pulled on a dedicated task; a frame read is not safe
        // to cancel halfway through from a select! arm.
        let mut frames = spawn_frame_reader(read_half);
        let mut intents =
            std::mem::replace(&mut self.intents, tokio::sync::mpsc::unbounded_channel().1);

        let udp = UdpSocket::bind("0.0.0.0:0").await?;
        let udp_port = udp.local_addr()?.port();

        write_frame(&mut writer, &Message::Hello { udp_port }).await?;
        write_frame(
            &mut writer,
            &Message::Login {
                name: self.name.clone(),
            },
        )
        .await?;

        let mut buffer = [0u8; 2048];

        loop {
            tokio::select! {
                frame = frames.recv() => {
                    match frame {
                        Some(msg) => {
                            match self.apply(msg, now_millis()) {
                                Reaction::Continue => {}
                                Reaction::SendRegister => {
                                    info!("Registering as {}", self.name);
                                    write_frame(&mut writer, &Message::Register {
                                        name: self.name.clone(),
                                    }).await?;
                                }
                                Reaction::GameOver => break,
                            }
                        }
                        None => {
                            info!("Disconnected by server");
                            break;
                        }
                    }
                },

                received = udp.recv_from(&mut buffer) => {
                    match received {
                        Ok((len, _)) => {
                            if let Some(msg) = codec::decode_datagram(&buffer[0..len]) {
                                if self.apply(msg, now_millis()) == Reaction::GameOver {
                                    break;
                                }
                            }
                        }
                        Err(e) => error!("Error receiving datagram: {}", e),
                    }
                },

                intent = intents.recv() => {
                    let Some(intent) = intent else {
                        debug!("Input channel closed");
                        break;
                    };
                    self.send_intent(intent, &mut writer, &udp).await?;
                },
            }
        }

        let _ = writer.shutdown().await;
        Ok(())
    }

    /// Applies one server message to the mirror and presentation. Malformed
    /// or out-of-state messages are ignored, never fatal.
    fn apply(&mut self, msg: Message, now: u64) -> Reaction {
        match msg {
            Message::RegistrationRequired => Reaction::SendRegister,
            Message::AddCharacter { player } => {
                self.presentation.on_add(&player);
                self.mirror.add(player);
                Reaction::Continue
            }
            Message::UpdateCharacter { id, x, y } => {
                if self.mirror.update(id, x, y) {
                    self.presentation.on_update(id, x, y);
                }
                if let Some(me_id) = self.mirror.check_collision(now) {
                    self.presentation.on_game_over(me_id);
                    return Reaction::GameOver;
                }
                Reaction::Continue
            }
            Message::RemoveCharacter { id } => {
                if self.mirror.remove(id).is_some() {
                    self.presentation.on_remove(id);
                }
                Reaction::Continue
            }
            other => {
                warn!("Unexpected message from server: {:?}", other);
                Reaction::Continue
            }
        }
    }

    async fn send_intent(
        &mut self,
        intent: MoveIntent,
        writer: &mut BufWriter<OwnedWriteHalf>,
        udp: &UdpSocket,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if intent.finished {
            write_frame(
                writer,
                &Message::MoveFinishedCharacter {
                    dx: intent.dx,
                    dy: intent.dy,
                },
            )
            .await?;
        } else {
            let bytes = codec::encode_datagram(&Message::MoveCharacter {
                dx: intent.dx,
                dy: intent.dy,
            })?;
            udp.send_to(&bytes, self.udp_addr).await?;
        }
        Ok(())
    }
}

/// Reads frames off the reliable channel until EOF or error; the channel
/// closing is the disconnect signal for the run loop.
fn spawn_frame_reader(read_half: OwnedReadHalf) -> UnboundedReceiver<Message> {
    let (frame_tx, frame_rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(msg)) => {
                    if frame_tx.send(msg).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Read error on reliable channel: {}", e);
                    break;
                }
            }
        }
    });

    frame_rx
}
