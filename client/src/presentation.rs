//! The narrow seam between the session controller and whatever renders the
//! grid. The controller never draws; it reports entity changes through this
//! trait and receives move intents through a channel.

use log::info;
use shared::Player;

/// Directional move intent captured from local input. `finished` marks a
/// confirmed move that the server must persist (sent on the reliable
/// channel); live moves ride the unreliable channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveIntent {
    pub dx: i32,
    pub dy: i32,
    pub finished: bool,
}

/// Callbacks the session controller invokes as the mirror changes.
pub trait Presentation: Send {
    fn on_add(&mut self, player: &Player);
    fn on_update(&mut self, id: u32, x: i32, y: i32);
    fn on_remove(&mut self, id: u32);
    /// Terminal signal for the local player; the session ends after this.
    fn on_game_over(&mut self, id: u32);
}

/// Presentation that narrates the grid to the log. Stands in for a real
/// surface; rendering is outside this crate's scope.
#[derive(Default)]
pub struct ConsolePresentation;

impl Presentation for ConsolePresentation {
    fn on_add(&mut self, player: &Player) {
        info!(
            "+ {} (id {}) at ({}, {}) color #{:06x}",
            player.name, player.id, player.x, player.y, player.color
        );
    }

    fn on_update(&mut self, id: u32, x: i32, y: i32) {
        info!("~ id {} -> ({}, {})", id, x, y);
    }

    fn on_remove(&mut self, id: u32) {
        info!("- id {}", id);
    }

    fn on_game_over(&mut self, id: u32) {
        info!("Game over for id {}!", id);
        println!("Ooops!!!");
    }
}

#[cfg(test)]
pub mod recording {
    //! Test double that records every callback in order.

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Add(u32),
        Update(u32, i32, i32),
        Remove(u32),
        GameOver(u32),
    }

    #[derive(Default)]
    pub struct RecordingPresentation {
        pub calls: Vec<Call>,
    }

    impl Presentation for RecordingPresentation {
        fn on_add(&mut self, player: &Player) {
            self.calls.push(Call::Add(player.id));
        }

        fn on_update(&mut self, id: u32, x: i32, y: i32) {
            self.calls.push(Call::Update(id, x, y));
        }

        fn on_remove(&mut self, id: u32) {
            self.calls.push(Call::Remove(id));
        }

        fn on_game_over(&mut self, id: u32) {
            self.calls.push(Call::GameOver(id));
        }
    }
}
