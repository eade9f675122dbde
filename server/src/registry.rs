//! Server-side bookkeeping of authenticated connections.
//!
//! The registry is the only record of who is logged in: membership drives
//! broadcast fan-out and duplicate-name rejection. Entries exist from a
//! successful login/registration until disconnect.

use log::debug;
use shared::Message;
use shared::Player;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc::UnboundedSender;

/// Commands accepted by a connection's writer task.
#[derive(Debug)]
pub enum ConnectionCommand {
    /// Deliver a message over the reliable channel.
    Deliver(Message),
    /// Shut the connection down from the server side.
    Close,
}

/// One authenticated (connection, player) pairing.
pub struct RegistryEntry {
    pub player: Player,
    reliable: UnboundedSender<ConnectionCommand>,
    pub udp_addr: Option<SocketAddr>,
}

/// The set of currently-authenticated connections.
///
/// Owned by the server's single event loop, so the duplicate-name check and
/// the insert that follows it always execute as one critical section.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<u64, RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        conn_id: u64,
        player: Player,
        reliable: UnboundedSender<ConnectionCommand>,
        udp_addr: Option<SocketAddr>,
    ) {
        self.entries.insert(
            conn_id,
            RegistryEntry {
                player,
                reliable,
                udp_addr,
            },
        );
    }

    /// Drops the pairing if present, returning the evicted player.
    pub fn remove(&mut self, conn_id: u64) -> Option<Player> {
        self.entries.remove(&conn_id).map(|e| e.player)
    }

    /// Whether any logged-in player already uses `name` (case-insensitive).
    pub fn contains_name(&self, name: &str) -> bool {
        let name = name.trim();
        self.entries
            .values()
            .any(|e| e.player.name.eq_ignore_ascii_case(name))
    }

    pub fn player(&self, conn_id: u64) -> Option<&Player> {
        self.entries.get(&conn_id).map(|e| &e.player)
    }

    pub fn player_mut(&mut self, conn_id: u64) -> Option<&mut Player> {
        self.entries.get_mut(&conn_id).map(|e| &mut e.player)
    }

    /// Rewrites a connection's unreliable return path; no-op for
    /// connections that are not registered.
    pub fn set_udp_addr(&mut self, conn_id: u64, addr: SocketAddr) {
        if let Some(entry) = self.entries.get_mut(&conn_id) {
            entry.udp_addr = Some(addr);
        }
    }

    /// Resolves the connection whose unreliable return path is `addr`.
    pub fn find_by_udp_addr(&self, addr: SocketAddr) -> Option<u64> {
        self.entries
            .iter()
            .find(|(_, e)| e.udp_addr == Some(addr))
            .map(|(id, _)| *id)
    }

    /// Fans a reliable message out to every registered connection.
    /// Per-recipient failures never abort the loop.
    pub fn broadcast_reliable(&self, msg: &Message, exclude: Option<u64>) {
        for (conn_id, entry) in &self.entries {
            if Some(*conn_id) == exclude {
                continue;
            }
            if entry
                .reliable
                .send(ConnectionCommand::Deliver(msg.clone()))
                .is_err()
            {
                debug!("Dropping broadcast to dead connection {}", conn_id);
            }
        }
    }

    /// Return-path addresses for unreliable fan-out, performed by the
    /// network layer on the shared UDP socket.
    pub fn udp_targets(&self) -> Vec<SocketAddr> {
        self.entries.values().filter_map(|e| e.udp_addr).collect()
    }

    /// The players currently logged in; used to seed a joining client.
    pub fn snapshot(&self) -> Vec<Player> {
        self.entries.values().map(|e| e.player.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn entry_channel() -> (
        UnboundedSender<ConnectionCommand>,
        mpsc::UnboundedReceiver<ConnectionCommand>,
    ) {
        mpsc::unbounded_channel()
    }

    fn player(id: u32, name: &str) -> Player {
        let mut p = Player::new(name);
        p.id = id;
        p
    }

    #[test]
    fn test_insert_and_snapshot() {
        let mut registry = Registry::new();
        let (tx, _rx) = entry_channel();

        registry.insert(1, player(1, "alice"), tx, None);

        assert_eq!(registry.len(), 1);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "alice");
    }

    #[test]
    fn test_remove_returns_player() {
        let mut registry = Registry::new();
        let (tx, _rx) = entry_channel();
        registry.insert(1, player(1, "alice"), tx, None);

        let evicted = registry.remove(1).unwrap();
        assert_eq!(evicted.id, 1);
        assert!(registry.is_empty());

        // Removing again is a no-op.
        assert!(registry.remove(1).is_none());
    }

    #[test]
    fn test_contains_name_is_case_insensitive() {
        let mut registry = Registry::new();
        let (tx, _rx) = entry_channel();
        registry.insert(1, player(1, "Alice"), tx, None);

        assert!(registry.contains_name("alice"));
        assert!(registry.contains_name("ALICE"));
        assert!(registry.contains_name(" alice "));
        assert!(!registry.contains_name("bob"));
    }

    #[test]
    fn test_broadcast_reaches_all_but_excluded() {
        let mut registry = Registry::new();
        let (tx1, mut rx1) = entry_channel();
        let (tx2, mut rx2) = entry_channel();
        registry.insert(1, player(1, "alice"), tx1, None);
        registry.insert(2, player(2, "bob"), tx2, None);

        registry.broadcast_reliable(&Message::RemoveCharacter { id: 9 }, Some(1));

        assert!(rx1.try_recv().is_err());
        match rx2.try_recv().unwrap() {
            ConnectionCommand::Deliver(Message::RemoveCharacter { id }) => assert_eq!(id, 9),
            other => panic!("Unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_survives_dead_recipient() {
        let mut registry = Registry::new();
        let (tx1, rx1) = entry_channel();
        let (tx2, mut rx2) = entry_channel();
        registry.insert(1, player(1, "alice"), tx1, None);
        registry.insert(2, player(2, "bob"), tx2, None);

        // Simulate a connection whose writer task already exited.
        drop(rx1);

        registry.broadcast_reliable(&Message::RegistrationRequired, None);
        assert!(matches!(
            rx2.try_recv().unwrap(),
            ConnectionCommand::Deliver(Message::RegistrationRequired)
        ));
    }

    #[test]
    fn test_find_by_udp_addr() {
        let mut registry = Registry::new();
        let (tx, _rx) = entry_channel();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        registry.insert(1, player(1, "alice"), tx, Some(addr));

        assert_eq!(registry.find_by_udp_addr(addr), Some(1));
        let other: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        assert_eq!(registry.find_by_udp_addr(other), None);
    }

    #[test]
    fn test_set_udp_addr_rewrites_return_path() {
        let mut registry = Registry::new();
        let (tx, _rx) = entry_channel();
        let old: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let new: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        registry.insert(1, player(1, "alice"), tx, Some(old));

        registry.set_udp_addr(1, new);

        assert_eq!(registry.find_by_udp_addr(new), Some(1));
        assert_eq!(registry.find_by_udp_addr(old), None);
        assert_eq!(registry.udp_targets(), vec![new]);

        // Unknown connections are left alone.
        registry.set_udp_addr(7, old);
        assert_eq!(registry.udp_targets(), vec![new]);
    }

    #[test]
    fn test_udp_targets_skip_unpaired_connections() {
        let mut registry = Registry::new();
        let (tx1, _rx1) = entry_channel();
        let (tx2, _rx2) = entry_channel();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        registry.insert(1, player(1, "alice"), tx1, Some(addr));
        registry.insert(2, player(2, "bob"), tx2, None);

        assert_eq!(registry.udp_targets(), vec![addr]);
    }
}
