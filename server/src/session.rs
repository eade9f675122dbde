//! Per-connection protocol state machine and the join/move/disconnect rules.
//!
//! The `Engine` owns every piece of protocol state and no sockets. The
//! network layer feeds it connection, frame, datagram, and disconnect
//! events from a single event loop, which makes each handler a critical
//! section: the duplicate-name check and the registry insert can never
//! interleave with another connection's login.

use crate::registry::{ConnectionCommand, Registry};
use crate::store::PlayerStore;
use log::{debug, info, warn};
use shared::{now_millis, valid_move, valid_name, Message, Player};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use tokio::sync::mpsc::UnboundedSender;

/// Connection lifecycle: a connection authenticates at most once and is
/// closed by the server only on a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Unauthenticated,
    Authenticated,
    Closed,
}

/// Per-connection context attached when the transport reports a new
/// connection, before any player is associated.
struct Session {
    reliable: UnboundedSender<ConnectionCommand>,
    peer_ip: IpAddr,
    udp_addr: Option<SocketAddr>,
    stage: Stage,
}

/// The authoritative protocol engine.
pub struct Engine {
    server_name: String,
    sessions: HashMap<u64, Session>,
    registry: Registry,
    store: Box<dyn PlayerStore>,
}

impl Engine {
    pub fn new(server_name: String, store: Box<dyn PlayerStore>) -> Self {
        Self {
            server_name,
            sessions: HashMap::new(),
            registry: Registry::new(),
            store,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &dyn PlayerStore {
        &*self.store
    }

    /// Registers a freshly accepted connection.
    pub fn handle_connect(
        &mut self,
        conn_id: u64,
        peer_ip: IpAddr,
        reliable: UnboundedSender<ConnectionCommand>,
    ) {
        debug!("Connection {} from {}", conn_id, peer_ip);
        self.sessions.insert(
            conn_id,
            Session {
                reliable,
                peer_ip,
                udp_addr: None,
                stage: Stage::Unauthenticated,
            },
        );
    }

    /// Handles one reliable-channel message. Returns datagrams for the
    /// caller to transmit on the shared UDP socket.
    pub fn handle_frame(&mut self, conn_id: u64, msg: Message) -> Vec<(SocketAddr, Message)> {
        let Some(session) = self.sessions.get_mut(&conn_id) else {
            return Vec::new();
        };
        if session.stage == Stage::Closed {
            return Vec::new();
        }

        match msg {
            Message::Hello { udp_port } => {
                let addr = SocketAddr::new(session.peer_ip, udp_port);
                session.udp_addr = Some(addr);
                // A re-announced port after login must reach the registry
                // too, or the return path goes stale.
                self.registry.set_udp_addr(conn_id, addr);
                Vec::new()
            }
            Message::Login { name } => {
                self.login(conn_id, &name);
                Vec::new()
            }
            Message::Register { name } => {
                self.register(conn_id, &name);
                Vec::new()
            }
            Message::MoveCharacter { dx, dy } => self.apply_move(conn_id, dx, dy, false),
            Message::MoveFinishedCharacter { dx, dy } => self.apply_move(conn_id, dx, dy, true),
            other => {
                debug!("Ignoring out-of-state frame from {}: {:?}", conn_id, other);
                Vec::new()
            }
        }
    }

    /// Handles one datagram. Discovery probes are answered without any
    /// session; moves are resolved by their source address.
    pub fn handle_datagram(&mut self, addr: SocketAddr, msg: Message) -> Vec<(SocketAddr, Message)> {
        match msg {
            Message::DiscoveryProbe => vec![(
                addr,
                Message::DiscoveryReply {
                    name: self.server_name.clone(),
                },
            )],
            Message::MoveCharacter { dx, dy } => {
                match self.registry.find_by_udp_addr(addr) {
                    Some(conn_id) => self.apply_move(conn_id, dx, dy, false),
                    None => {
                        debug!("Move from unknown address {}", addr);
                        Vec::new()
                    }
                }
            }
            other => {
                debug!("Ignoring datagram from {}: {:?}", addr, other);
                Vec::new()
            }
        }
    }

    /// Evicts a disconnected connection; normal at any point, idempotent.
    pub fn handle_disconnect(&mut self, conn_id: u64) {
        self.sessions.remove(&conn_id);
        if let Some(player) = self.registry.remove(conn_id) {
            info!("{} disconnected", player.name);
            self.registry
                .broadcast_reliable(&Message::RemoveCharacter { id: player.id }, None);
        }
    }

    fn login(&mut self, conn_id: u64, name: &str) {
        // Ignore if already logged in.
        if self.stage(conn_id) != Stage::Unauthenticated {
            return;
        }

        if !valid_name(name) {
            warn!("Rejecting login with invalid name");
            self.close(conn_id);
            return;
        }
        if self.registry.contains_name(name) {
            warn!("Rejecting login: {} is already logged in", name.trim());
            self.close(conn_id);
            return;
        }

        match self.store.load(name) {
            Some(player) => self.logged_in(conn_id, player),
            None => {
                self.send_reliable(conn_id, Message::RegistrationRequired);
            }
        }
    }

    fn register(&mut self, conn_id: u64, name: &str) {
        // Ignore if already logged in.
        if self.stage(conn_id) != Stage::Unauthenticated {
            return;
        }

        if !valid_name(name) {
            warn!("Rejecting registration with invalid name");
            self.close(conn_id);
            return;
        }
        if self.store.load(name).is_some() {
            warn!("Rejecting registration: {} already exists", name.trim());
            self.close(conn_id);
            return;
        }

        let mut player = Player::new(name.trim());
        player.color = random_color();
        if !self.store.save(&mut player) {
            warn!("Failed to save new player {}", player.name);
            self.close(conn_id);
            return;
        }

        self.logged_in(conn_id, player);
    }

    /// The join sequence: seed the joiner from a pre-insertion snapshot,
    /// register the pairing, then announce the newcomer to everyone. The
    /// joiner receives its own record too; that echo is how the client
    /// learns which entity is "me".
    fn logged_in(&mut self, conn_id: u64, mut player: Player) {
        player.started = now_millis();

        let Some(session) = self.sessions.get_mut(&conn_id) else {
            return;
        };

        for other in self.registry.snapshot() {
            let _ = session
                .reliable
                .send(ConnectionCommand::Deliver(Message::AddCharacter {
                    player: other,
                }));
        }

        info!("{} logged in with id {}", player.name, player.id);
        session.stage = Stage::Authenticated;
        self.registry.insert(
            conn_id,
            player.clone(),
            session.reliable.clone(),
            session.udp_addr,
        );
        self.registry
            .broadcast_reliable(&Message::AddCharacter { player }, None);
    }

    fn apply_move(
        &mut self,
        conn_id: u64,
        dx: i32,
        dy: i32,
        persist: bool,
    ) -> Vec<(SocketAddr, Message)> {
        // Ignore if not logged in.
        if self.stage(conn_id) != Stage::Authenticated {
            return Vec::new();
        }
        // Ignore if invalid move.
        if !valid_move(dx, dy) {
            debug!("Ignoring invalid move ({}, {}) from {}", dx, dy, conn_id);
            return Vec::new();
        }

        let Some(player) = self.registry.player_mut(conn_id) else {
            return Vec::new();
        };
        player.x += dx;
        player.y += dy;
        let update = Message::UpdateCharacter {
            id: player.id,
            x: player.x,
            y: player.y,
        };

        if persist {
            let mut record = player.clone();
            if !self.store.save(&mut record) {
                warn!("Failed to persist move for {}", record.name);
            }
            self.registry.broadcast_reliable(&update, None);
            Vec::new()
        } else {
            self.registry
                .udp_targets()
                .into_iter()
                .map(|addr| (addr, update.clone()))
                .collect()
        }
    }

    fn stage(&self, conn_id: u64) -> Stage {
        self.sessions
            .get(&conn_id)
            .map(|s| s.stage)
            .unwrap_or(Stage::Closed)
    }

    fn send_reliable(&self, conn_id: u64, msg: Message) {
        if let Some(session) = self.sessions.get(&conn_id) {
            let _ = session.reliable.send(ConnectionCommand::Deliver(msg));
        }
    }

    fn close(&mut self, conn_id: u64) {
        if let Some(session) = self.sessions.get_mut(&conn_id) {
            session.stage = Stage::Closed;
            let _ = session.reliable.send(ConnectionCommand::Close);
        }
    }
}

/// Registration-time display color: a random fully-saturated hue, packed as
/// 0xRRGGBB.
fn random_color() -> u32 {
    let hue: f32 = rand::random::<f32>() * 6.0;
    let x = 1.0 - (hue % 2.0 - 1.0).abs();
    let (r, g, b) = match hue as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    ((r * 255.0) as u32) << 16 | ((g * 255.0) as u32) << 8 | (b * 255.0) as u32
}
