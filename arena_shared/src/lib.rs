//! `arena_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (world, entities, weapons, net, config).
//! - The same simulation code drives the authoritative world and the
//!   mirrored one; an `is_server` flag gates authority-only behavior.
//! - No `unsafe`.

pub mod config;
pub mod entity;
pub mod mask;
pub mod math;
pub mod net;
pub mod registry;
pub mod ship;
pub mod weapon;
pub mod world;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::entity::*;
    pub use crate::mask::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::registry::*;
    pub use crate::ship::*;
    pub use crate::weapon::*;
    pub use crate::world::*;
}
