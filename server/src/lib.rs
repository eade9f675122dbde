//! Authoritative positioning server.
//!
//! The server is the single source of truth for every token's position on
//! the grid. Clients log in (or register) over the reliable channel, send
//! movement deltas, and receive broadcasts for every add, update, and
//! remove. Player records persist across sessions keyed by name.
//!
//! Module layout:
//! - [`store`] — durable player records (file-backed or in-memory).
//! - [`registry`] — the set of authenticated connections and broadcast
//!   fan-out.
//! - [`session`] — the per-connection protocol state machine.
//! - [`network`] — sockets, connection tasks, and the main event loop.
//!
//! All protocol state is owned by a single event loop; socket tasks only
//! move bytes. That keeps every login/move/disconnect handler a critical
//! section without explicit locking.

pub mod network;
pub mod registry;
pub mod session;
pub mod store;
