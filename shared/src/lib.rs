pub mod codec;

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Fixed endpoint for the reliable (TCP) channel.
pub const TCP_PORT: u16 = 54555;
/// Fixed endpoint for the unreliable channel; also answers discovery probes.
pub const UDP_PORT: u16 = 54777;
/// Side of the square every entity occupies on the grid.
pub const PLAYER_SIZE: i32 = 60;
/// Seconds after `started` during which an entity ignores collisions.
pub const IMMUNITY_SECS: u64 = 10;
/// Default window for collecting discovery replies.
pub const DISCOVERY_TIMEOUT_MS: u64 = 5000;

/// The closed set of messages exchanged between client and server.
///
/// `DiscoveryProbe`/`DiscoveryReply` and `MoveCharacter`/`UpdateCharacter`
/// travel as single UDP datagrams; everything else rides the framed TCP
/// stream. `Hello` is the first frame on a new connection and announces the
/// client's UDP port so the server can pair the unreliable return path.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Message {
    DiscoveryProbe,
    DiscoveryReply { name: String },
    Hello { udp_port: u16 },
    Login { name: String },
    RegistrationRequired,
    Register { name: String },
    AddCharacter { player: Player },
    UpdateCharacter { id: u32, x: i32, y: i32 },
    RemoveCharacter { id: u32 },
    MoveCharacter { dx: i32, dy: i32 },
    MoveFinishedCharacter { dx: i32, dy: i32 },
}

/// A named, positioned, colored actor tracked by the server and mirrored by
/// clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Player {
    /// Stable identity assigned by the player store on first save; 0 means
    /// "not yet assigned".
    pub id: u32,
    /// Unique (case-insensitive) handle, also the persistence key.
    pub name: String,
    pub x: i32,
    pub y: i32,
    /// Packed 0xRRGGBB display color chosen at registration.
    pub color: u32,
    /// Milliseconds since epoch when this player's immunity window last began.
    pub started: u64,
}

impl Player {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            x: 0,
            y: 0,
            color: 0,
            started: 0,
        }
    }
}

/// Validates a movement delta.
///
/// A move is rejected iff `dx.abs() != 1 && dy.abs() != 1`. This is the
/// historical boundary: it accepts deltas like `(2, 1)` because one axis is a
/// unit step. Tightening it would change behavior existing clients rely on.
pub fn valid_move(dx: i32, dy: i32) -> bool {
    !(dx.abs() != 1 && dy.abs() != 1)
}

/// A name is acceptable when it is non-empty after trimming.
pub fn valid_name(name: &str) -> bool {
    !name.trim().is_empty()
}

/// Closed-interval overlap test for the squares occupied by two entities.
///
/// Touching edges count as overlap. An entity never overlaps itself.
pub fn overlaps(a: &Player, b: &Player) -> bool {
    if a.id == b.id {
        return false;
    }
    a.x + PLAYER_SIZE >= b.x
        && b.x + PLAYER_SIZE >= a.x
        && a.y + PLAYER_SIZE >= b.y
        && b.y + PLAYER_SIZE >= a.y
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player_at(id: u32, x: i32, y: i32) -> Player {
        Player {
            id,
            name: format!("p{}", id),
            x,
            y,
            color: 0,
            started: 0,
        }
    }

    #[test]
    fn test_unit_moves_are_valid() {
        for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1), (1, 1), (-1, 1)] {
            assert!(valid_move(dx, dy), "({}, {}) should pass", dx, dy);
        }
    }

    #[test]
    fn test_zero_and_large_moves_are_rejected() {
        assert!(!valid_move(0, 0));
        assert!(!valid_move(2, 0));
        assert!(!valid_move(0, -3));
        assert!(!valid_move(5, 5));
    }

    #[test]
    fn test_move_guard_keeps_historical_boundary() {
        // One unit axis is enough for the historical guard, even if the other
        // axis is out of range.
        assert!(valid_move(2, 1));
        assert!(valid_move(-1, 7));
    }

    #[test]
    fn test_name_validation() {
        assert!(valid_name("alice"));
        assert!(valid_name("  bob  "));
        assert!(!valid_name(""));
        assert!(!valid_name("   "));
    }

    #[test]
    fn test_overlap_within_size() {
        let a = player_at(1, 0, 0);
        let b = player_at(2, 50, 50);
        assert!(overlaps(&a, &b));
        assert!(overlaps(&b, &a));
    }

    #[test]
    fn test_no_overlap_beyond_size() {
        let a = player_at(1, 0, 0);
        let b = player_at(2, 61, 0);
        assert!(!overlaps(&a, &b));
        assert!(!overlaps(&b, &a));
    }

    #[test]
    fn test_touching_edges_count_as_overlap() {
        let a = player_at(1, 0, 0);
        let b = player_at(2, PLAYER_SIZE, 0);
        assert!(overlaps(&a, &b));
    }

    #[test]
    fn test_entity_never_overlaps_itself() {
        let a = player_at(1, 0, 0);
        let same = player_at(1, 10, 10);
        assert!(!overlaps(&a, &same));
    }

    #[test]
    fn test_message_serialization_login() {
        let msg = Message::Login {
            name: "alice".to_string(),
        };
        let bytes = bincode::serialize(&msg).unwrap();
        let back: Message = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_message_serialization_add_character() {
        let msg = Message::AddCharacter {
            player: Player {
                id: 3,
                name: "carol".to_string(),
                x: -4,
                y: 9,
                color: 0x00ff7f,
                started: 1234567890,
            },
        };
        let bytes = bincode::serialize(&msg).unwrap();
        let back: Message = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_message_serialization_moves() {
        for msg in [
            Message::MoveCharacter { dx: 1, dy: 0 },
            Message::MoveFinishedCharacter { dx: -1, dy: 1 },
            Message::UpdateCharacter { id: 2, x: 7, y: -7 },
            Message::RemoveCharacter { id: 2 },
        ] {
            let bytes = bincode::serialize(&msg).unwrap();
            let back: Message = bincode::deserialize(&bytes).unwrap();
            assert_eq!(back, msg);
        }
    }

    #[test]
    fn test_now_millis_advances() {
        let a = now_millis();
        std::thread::sleep(Duration::from_millis(2));
        let b = now_millis();
        assert!(b > a);
    }
}
