//! Client-side mirror of all known entities and the collision/respawn rule.
//!
//! The mirror is rebuilt incrementally from server messages and is never
//! mutated by local input; input only produces move intents, and position
//! changes arrive back as `UpdateCharacter`.

use log::info;
use shared::{overlaps, Player, IMMUNITY_SECS};
use std::collections::HashMap;

/// Client-local `id -> Player` mapping plus the identity of the local
/// player, captured by name match when its `AddCharacter` echo arrives.
pub struct Mirror {
    characters: HashMap<u32, Player>,
    local_name: String,
    me: Option<u32>,
}

impl Mirror {
    pub fn new(local_name: &str) -> Self {
        Self {
            characters: HashMap::new(),
            local_name: local_name.trim().to_string(),
            me: None,
        }
    }

    /// Inserts an entity announced by the server. Returns true when the
    /// entity is the local player.
    pub fn add(&mut self, player: Player) -> bool {
        let is_me = player.name == self.local_name;
        if is_me {
            self.me = Some(player.id);
        }
        info!(
            "{} added at {}, {}",
            player.name, player.x, player.y
        );
        self.characters.insert(player.id, player);
        is_me
    }

    /// Applies an authoritative position change. Unknown ids are ignored.
    pub fn update(&mut self, id: u32, x: i32, y: i32) -> bool {
        match self.characters.get_mut(&id) {
            Some(player) => {
                player.x = x;
                player.y = y;
                info!("{} moved to {}, {}", player.name, x, y);
                true
            }
            None => false,
        }
    }

    /// Removes an entity that left. No-op for unknown ids.
    pub fn remove(&mut self, id: u32) -> Option<Player> {
        let removed = self.characters.remove(&id);
        if let Some(ref player) = removed {
            info!("{} removed", player.name);
        }
        if self.me == Some(id) {
            self.me = None;
        }
        removed
    }

    pub fn me(&self) -> Option<&Player> {
        self.me.and_then(|id| self.characters.get(&id))
    }

    pub fn get(&self, id: u32) -> Option<&Player> {
        self.characters.get(&id)
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    /// Runs the collision/respawn rule against a single sampled `now`
    /// (milliseconds since epoch).
    ///
    /// Fires when the local player and some other entity are both past
    /// their 10-second immunity windows and their squares overlap. On a
    /// hit, the local player's window restarts and its id is returned so
    /// the caller can signal game-over. The server is never told; collision
    /// is purely a presentation rule layered on synchronized positions.
    pub fn check_collision(&mut self, now: u64) -> Option<u32> {
        let me_id = self.me?;
        let me = self.characters.get(&me_id)?;

        if now.saturating_sub(me.started) / 1000 <= IMMUNITY_SECS {
            return None;
        }

        let hit = self.characters.values().any(|other| {
            now.saturating_sub(other.started) / 1000 > IMMUNITY_SECS && overlaps(me, other)
        });

        if hit {
            if let Some(me) = self.characters.get_mut(&me_id) {
                me.started = now;
            }
            return Some(me_id);
        }
        None
    }
}
