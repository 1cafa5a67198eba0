//! `arena_server`
//!
//! Server-side systems:
//! - Fixed timestep simulation loop over the canonical world
//! - Login handshake and connection lifecycle
//! - Reliable entity creation/removal announcements
//! - UDP ship snapshots every 8th tick
//!
//! Networking model:
//! - TCP: handshake, intent, entity lifecycle (reliable plane)
//! - UDP: ship snapshots and vitals (lossy plane)

pub mod server;

pub use server::GameServer;
