//! Durable player records keyed by lower-cased name.
//!
//! The on-disk layout is four big-endian i32s in order `id, x, y, color`,
//! one file per player, name implicit from the file name. Existing
//! deployments read these files, so the format is fixed.

use log::{info, warn};
use shared::Player;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::PathBuf;

/// Backing medium for player persistence. Implementations return `None` on
/// a missing record and `false` on a failed save; neither is a panic.
pub trait PlayerStore: Send {
    /// Loads the record for `name`, if one exists.
    fn load(&self, name: &str) -> Option<Player>;

    /// Persists the player. On first save (`id == 0`) assigns
    /// `id = existing record count + 1` and writes it back into `player`.
    ///
    /// Id assignment is not safe under concurrent first-saves; callers must
    /// serialize saves (the server's single event loop does).
    fn save(&mut self, player: &mut Player) -> bool;

    /// Number of records currently stored.
    fn count(&self) -> usize;
}

/// File-per-player store, byte-compatible with the original deployment.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name.trim().to_lowercase())
    }
}

impl PlayerStore for FileStore {
    fn load(&self, name: &str) -> Option<Player> {
        let path = self.path_for(name);
        let mut file = fs::File::open(&path).ok()?;

        let mut buf = [0u8; 16];
        if let Err(e) = file.read_exact(&mut buf) {
            warn!("Unreadable record {}: {}", path.display(), e);
            return None;
        }

        let field = |i: usize| i32::from_be_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        Some(Player {
            id: field(0) as u32,
            name: name.trim().to_string(),
            x: field(1),
            y: field(2),
            color: field(3) as u32,
            started: 0,
        })
    }

    fn save(&mut self, player: &mut Player) -> bool {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Cannot create store directory {}: {}", self.dir.display(), e);
            return false;
        }

        if player.id == 0 {
            // Id assignment needs the record count; an unreadable directory
            // must fail the save rather than hand out a colliding id.
            match fs::read_dir(&self.dir) {
                Ok(entries) => player.id = entries.filter_map(|e| e.ok()).count() as u32 + 1,
                Err(e) => {
                    warn!(
                        "Cannot enumerate {} for id assignment: {}",
                        self.dir.display(),
                        e
                    );
                    return false;
                }
            }
        }

        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(&(player.id as i32).to_be_bytes());
        buf.extend_from_slice(&player.x.to_be_bytes());
        buf.extend_from_slice(&player.y.to_be_bytes());
        buf.extend_from_slice(&(player.color as i32).to_be_bytes());

        let path = self.path_for(&player.name);
        match fs::write(&path, &buf) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to save {}: {}", path.display(), e);
                false
            }
        }
    }

    fn count(&self) -> usize {
        match fs::read_dir(&self.dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).count(),
            Err(_) => 0,
        }
    }
}

/// In-memory store with the same id-assignment rule, for tests and
/// embedding.
#[derive(Default)]
pub struct MemoryStore {
    records: HashMap<String, Player>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlayerStore for MemoryStore {
    fn load(&self, name: &str) -> Option<Player> {
        self.records.get(&name.trim().to_lowercase()).cloned()
    }

    fn save(&mut self, player: &mut Player) -> bool {
        if player.id == 0 {
            player.id = self.records.len() as u32 + 1;
            info!("Assigned id {} to {}", player.id, player.name);
        }
        self.records
            .insert(player.name.trim().to_lowercase(), player.clone());
        true
    }

    fn count(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> FileStore {
        let dir = std::env::temp_dir().join(format!(
            "gridsync-store-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = fs::remove_dir_all(&dir);
        FileStore::new(dir)
    }

    #[test]
    fn test_memory_store_assigns_sequential_ids() {
        let mut store = MemoryStore::new();

        let mut a = Player::new("alice");
        let mut b = Player::new("bob");
        assert!(store.save(&mut a));
        assert!(store.save(&mut b));

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn test_memory_store_resave_keeps_id() {
        let mut store = MemoryStore::new();

        let mut a = Player::new("alice");
        store.save(&mut a);
        let id = a.id;

        a.x = 5;
        store.save(&mut a);
        assert_eq!(a.id, id);
        assert_eq!(store.load("alice").unwrap().x, 5);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_memory_store_lookup_is_case_insensitive() {
        let mut store = MemoryStore::new();
        let mut a = Player::new("Alice");
        store.save(&mut a);

        assert!(store.load("alice").is_some());
        assert!(store.load("ALICE").is_some());
        assert!(store.load("bob").is_none());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let mut store = temp_store();

        let mut p = Player::new("carol");
        p.x = -12;
        p.y = 34;
        p.color = 0x123456;
        assert!(store.save(&mut p));
        assert_eq!(p.id, 1);

        let loaded = store.load("carol").unwrap();
        assert_eq!(loaded.id, 1);
        assert_eq!(loaded.name, "carol");
        assert_eq!(loaded.x, -12);
        assert_eq!(loaded.y, 34);
        assert_eq!(loaded.color, 0x123456);
    }

    #[test]
    fn test_file_store_missing_record() {
        let store = temp_store();
        assert!(store.load("nobody").is_none());
    }

    #[test]
    fn test_file_store_record_layout() {
        let mut store = temp_store();

        let mut p = Player::new("dave");
        p.x = 1;
        p.y = 2;
        p.color = 3;
        store.save(&mut p);

        // Four big-endian i32s: id, x, y, color.
        let bytes = fs::read(store.path_for("dave")).unwrap();
        assert_eq!(
            bytes,
            vec![0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]
        );
    }

    #[test]
    fn test_file_store_save_fails_without_usable_directory() {
        // A regular file where the store directory should be makes both
        // directory creation and enumeration impossible.
        let blocker = std::env::temp_dir().join(format!(
            "gridsync-blocker-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        fs::write(&blocker, b"not a directory").unwrap();
        let mut store = FileStore::new(blocker.join("records"));

        let mut p = Player::new("gina");
        assert!(!store.save(&mut p));
        // No id was fabricated for the failed save.
        assert_eq!(p.id, 0);

        let _ = fs::remove_file(&blocker);
    }

    #[test]
    fn test_file_store_id_counts_existing_records() {
        let mut store = temp_store();

        let mut a = Player::new("erin");
        let mut b = Player::new("frank");
        store.save(&mut a);
        store.save(&mut b);

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);

        // Re-saving an existing record never reassigns.
        let mut again = store.load("erin").unwrap();
        store.save(&mut again);
        assert_eq!(again.id, 1);
    }
}
