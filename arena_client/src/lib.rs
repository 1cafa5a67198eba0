//! `arena_client`
//!
//! Client-side systems:
//! - Connection management (reliable + unreliable channels)
//! - Session state machine (connect, load, play, base menu, quit)
//! - Mirrored world fed exclusively by server messages
//! - Edge-triggered input bitmask forwarding

pub mod client;

pub use client::{GameClient, SessionState};
