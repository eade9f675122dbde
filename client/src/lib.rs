//! Client for the authoritative positioning server.
//!
//! The client discovers hosts by UDP broadcast, connects over the reliable
//! channel, logs in (registering on first contact), and then keeps a local
//! mirror of every entity from the server's add/update/remove stream. The
//! only game rule that runs locally is the collision/respawn check; every
//! position is owned by the server.
//!
//! - [`discovery`] — broadcast probe / reply collection.
//! - [`game`] — the entity mirror and collision rule.
//! - [`network`] — the session controller and its run loop.
//! - [`presentation`] — the seam to whatever renders the grid.

pub mod discovery;
pub mod game;
pub mod network;
pub mod presentation;
