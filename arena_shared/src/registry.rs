//! Type registry: wire tags for entity kinds and the selectable weapon
//! roster.
//!
//! Built once at startup and passed by reference wherever kind↔index
//! mapping is needed, so several worlds (tests, listen servers) can
//! coexist. The server filters the roster by the map's disallow list; the
//! client rebuilds the same roster, in the same order, from the names in
//! `MapInfo`.

use anyhow::{bail, Context};

use crate::entity::{Entity, EntityKind, NetPolicy};
use crate::net::ObjectSpawn;
use crate::weapon::{Weapon, WeaponKind};

/// Entity kinds that can cross the wire in an `AddObject` message. The
/// tag transmitted is the index into the registry's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    Bullet,
    CannonBall,
    Grenade,
}

/// Kind↔index tables for guns, specials, and wire-visible entity kinds.
#[derive(Debug, Clone)]
pub struct Registry {
    guns: Vec<WeaponKind>,
    specials: Vec<WeaponKind>,
    objects: Vec<WireKind>,
}

impl Registry {
    /// Full standard roster.
    pub fn standard() -> Self {
        Self {
            guns: vec![
                WeaponKind::MachineGun,
                WeaponKind::DualMachineGun,
                WeaponKind::FbMachineGun,
                WeaponKind::WavyMachineGun,
            ],
            specials: vec![
                WeaponKind::Cannon,
                WeaponKind::GrenadeLauncher,
                WeaponKind::Afterburner,
            ],
            objects: vec![WireKind::Bullet, WireKind::CannonBall, WireKind::Grenade],
        }
    }

    /// Standard roster minus a map's disallowed weapon names.
    pub fn standard_without(disallow: &[String]) -> anyhow::Result<Self> {
        let mut reg = Self::standard();
        reg.guns.retain(|k| !disallow.iter().any(|d| d == k.name()));
        reg.specials.retain(|k| !disallow.iter().any(|d| d == k.name()));
        if reg.guns.is_empty() || reg.specials.is_empty() {
            bail!("disallow list leaves no selectable weapons");
        }
        Ok(reg)
    }

    /// Client-side roster from the server's `MapInfo` name lists. Unknown
    /// names are a protocol violation.
    pub fn from_names(guns: &[String], specials: &[String]) -> anyhow::Result<Self> {
        let resolve = |names: &[String]| -> anyhow::Result<Vec<WeaponKind>> {
            names
                .iter()
                .map(|n| {
                    WeaponKind::from_name(n).with_context(|| format!("unknown weapon kind '{}'", n))
                })
                .collect()
        };
        Ok(Self {
            guns: resolve(guns)?,
            specials: resolve(specials)?,
            objects: Self::standard().objects,
        })
    }

    pub fn gun_names(&self) -> Vec<String> {
        self.guns.iter().map(|k| k.name().to_string()).collect()
    }

    pub fn special_names(&self) -> Vec<String> {
        self.specials.iter().map(|k| k.name().to_string()).collect()
    }

    pub fn gun_count(&self) -> usize {
        self.guns.len()
    }

    pub fn special_count(&self) -> usize {
        self.specials.len()
    }

    pub fn gun_kind(&self, index: usize) -> Option<WeaponKind> {
        self.guns.get(index).copied()
    }

    pub fn special_kind(&self, index: usize) -> Option<WeaponKind> {
        self.specials.get(index).copied()
    }

    pub fn make_gun(&self, index: usize) -> anyhow::Result<Weapon> {
        let kind = *self.guns.get(index).context("gun index out of range")?;
        Ok(Weapon::new(kind))
    }

    pub fn make_special(&self, index: usize) -> anyhow::Result<Weapon> {
        let kind = *self.specials.get(index).context("special index out of range")?;
        Ok(Weapon::new(kind))
    }

    pub fn gun_index(&self, kind: WeaponKind) -> Option<u8> {
        self.guns.iter().position(|k| *k == kind).map(|i| i as u8)
    }

    pub fn special_index(&self, kind: WeaponKind) -> Option<u8> {
        self.specials.iter().position(|k| *k == kind).map(|i| i as u8)
    }

    fn wire_kind(kind: &EntityKind) -> Option<WireKind> {
        match kind {
            EntityKind::Bullet { .. } => Some(WireKind::Bullet),
            EntityKind::CannonBall => Some(WireKind::CannonBall),
            EntityKind::Grenade => Some(WireKind::Grenade),
            _ => None,
        }
    }

    /// Builds the creation record for a replicated entity. Returns `None`
    /// for entities whose policy or kind never crosses the wire.
    pub fn wire_spawn(&self, entity: &Entity) -> Option<ObjectSpawn> {
        if !entity.policy.replicated() {
            return None;
        }
        let wire = Self::wire_kind(&entity.kind)?;
        let tag = self.objects.iter().position(|k| *k == wire)? as u8;
        let color = match entity.kind {
            EntityKind::Bullet { color } => color,
            _ => crate::entity::Rgb::WHITE,
        };
        Some(ObjectSpawn {
            kind: tag,
            id: entity.id,
            angle: entity.angle,
            pos: entity.pos,
            vel: entity.vel,
            owner: entity.owner.unwrap_or(crate::entity::EntityId(0)),
            color,
        })
    }

    /// Reconstructs an entity from a creation record. An unknown tag is an
    /// invariant violation, not a recoverable condition.
    pub fn make_entity(&self, spawn: &ObjectSpawn) -> anyhow::Result<Entity> {
        let wire = *self
            .objects
            .get(spawn.kind as usize)
            .with_context(|| format!("unknown object kind tag {}", spawn.kind))?;
        let mut entity = match wire {
            WireKind::Bullet => Entity::bullet(
                spawn.owner,
                spawn.pos,
                spawn.vel,
                spawn.color,
                NetPolicy::RemoteAdd,
            ),
            WireKind::CannonBall => Entity::cannon_ball(spawn.owner, spawn.pos, spawn.vel),
            WireKind::Grenade => Entity::grenade(spawn.owner, spawn.pos, spawn.vel),
        };
        entity.id = spawn.id;
        entity.angle = spawn.angle;
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityId, Rgb};
    use crate::math::Vec2;

    #[test]
    fn weapon_indices_are_stable() {
        let reg = Registry::standard();
        assert_eq!(reg.gun_index(WeaponKind::MachineGun), Some(0));
        assert_eq!(reg.special_index(WeaponKind::Afterburner), Some(2));
        assert_eq!(reg.gun_index(WeaponKind::Cannon), None);
    }

    #[test]
    fn disallow_filters_roster() {
        let reg =
            Registry::standard_without(&["Wavy Gun".to_string(), "Cannon".to_string()]).unwrap();
        assert_eq!(reg.gun_count(), 3);
        assert_eq!(reg.special_index(WeaponKind::GrenadeLauncher), Some(0));
    }

    #[test]
    fn roster_roundtrips_through_names() {
        let server = Registry::standard_without(&["Dual Gun".to_string()]).unwrap();
        let client = Registry::from_names(&server.gun_names(), &server.special_names()).unwrap();
        assert_eq!(client.gun_names(), server.gun_names());
        assert!(Registry::from_names(&["Phaser".to_string()], &[]).is_err());
    }

    #[test]
    fn local_entities_never_get_a_wire_spawn() {
        let reg = Registry::standard();
        let spark = Entity::spark(Vec2::ZERO, Vec2::ZERO, 10, Rgb::WHITE);
        assert!(reg.wire_spawn(&spark).is_none());
        let flame = Entity::afterburner_flame(EntityId(1), Vec2::ZERO);
        assert!(reg.wire_spawn(&flame).is_none());
        // Proxy bullets (explosion shrapnel) stay local too.
        let shrapnel = Entity::bullet(
            EntityId(1),
            Vec2::ZERO,
            Vec2::ZERO,
            Rgb::WHITE,
            NetPolicy::LocalProxy,
        );
        assert!(reg.wire_spawn(&shrapnel).is_none());
    }

    #[test]
    fn wire_spawn_roundtrips_a_cannonball() {
        let reg = Registry::standard();
        let mut ball = Entity::cannon_ball(EntityId(7), Vec2::new(3.0, 4.0), Vec2::new(1.0, 0.0));
        ball.id = EntityId(42);
        let spawn = reg.wire_spawn(&ball).unwrap();
        let back = reg.make_entity(&spawn).unwrap();
        assert_eq!(back.id, EntityId(42));
        assert_eq!(back.owner, Some(EntityId(7)));
        assert_eq!(back.kind, EntityKind::CannonBall);
        assert_eq!(back.policy, NetPolicy::RemoteAll);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let reg = Registry::standard();
        let spawn = ObjectSpawn {
            kind: 9,
            id: EntityId(1),
            angle: 0,
            pos: Vec2::ZERO,
            vel: Vec2::ZERO,
            owner: EntityId(1),
            color: Rgb::WHITE,
        };
        assert!(reg.make_entity(&spawn).is_err());
    }
}
