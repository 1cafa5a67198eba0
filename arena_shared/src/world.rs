//! World simulation.
//!
//! One `World` instance per side: the server's is canonical, each client's
//! is a mirror fed by messages. `advance()` performs exactly one fixed
//! tick; everything else is bookkeeping around the entity set and player
//! roster.
//!
//! Determinism notes:
//! - Entities iterate in insertion order; entities appended mid-pass are
//!   picked up by the same pass.
//! - The RNG is owned by the world and seedable, so tests can pin it.
//! - No wall-clock access; the tick counter is the only clock.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::{
    shapes_intersect, Entity, EntityId, EntityKind, NetPolicy, Rgb, Shape, EXPLODER_CLASSES,
};
use crate::mask::CollisionMask;
use crate::math::{dir, Vec2};
use crate::net::ShipUpdate;
use crate::ship::{InputKeys, Player, Ship, ACCEL_MULT, CONTACT_DAMPING};
use crate::weapon::WeaponKind;

/// Default simulation rate.
pub const DEFAULT_TPS: u32 = 30;

/// Ticks between garbage-collection sweeps (power of two).
const GC_INTERVAL_MASK: u32 = 0x1f;

/// First identifier a mirror world hands out for its own proxy entities.
/// Server-assigned ids grow from 1 and never reach this range within a
/// session, so a received id can never collide with a mirror-minted one.
const PROXY_ID_BASE: u32 = 0x8000_0000;

/// Explosion tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Explosion {
    Tiny,
    Small,
    Medium,
    Large,
    Huge,
    Armageddon,
}

/// Per-tier randomized spawn counts: `[low, high)` for shrapnel and the
/// three exploder classes, plus the shrapnel scatter radius.
struct ExplosionSpec {
    lows: [i32; 4],
    highs: [i32; 4],
    radius: i32,
}

const EXPLOSIONS: [ExplosionSpec; 6] = [
    ExplosionSpec { lows: [0, 1, 0, 0], highs: [2, 1, 1, 0], radius: 4 },
    ExplosionSpec { lows: [3, 1, 1, 0], highs: [6, 3, 3, 0], radius: 10 },
    ExplosionSpec { lows: [10, 4, 2, 1], highs: [18, 6, 5, 2], radius: 20 },
    ExplosionSpec { lows: [18, 7, 4, 2], highs: [25, 11, 8, 5], radius: 14 },
    ExplosionSpec { lows: [25, 10, 8, 4], highs: [40, 18, 14, 8], radius: 50 },
    ExplosionSpec { lows: [50, 20, 16, 8], highs: [150, 36, 28, 16], radius: 70 },
];

/// Replication event for the server shell to drain after each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldEvent {
    /// A replicated entity was created and must be announced.
    ObjectAdded(EntityId),
    /// A RemoteAll entity was swept; peers must drop it too.
    ObjectRemoved(EntityId),
}

/// Weapon slot selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Gun,
    Special,
}

/// The aggregate simulation state for one side.
pub struct World {
    tick: u32,
    tps: u32,
    pub gravity: Vec2,
    is_server: bool,
    next_id: u32,
    entities: Vec<Entity>,
    players: Vec<Player>,
    mask: CollisionMask,
    spawn_points: Vec<Vec2>,
    outbox: Vec<WorldEvent>,
    rng: StdRng,
}

impl World {
    pub fn new(mask: CollisionMask, gravity: Vec2, is_server: bool) -> Self {
        let spawn_points = mask.spawn_points();
        Self {
            tick: 0,
            tps: DEFAULT_TPS,
            gravity,
            is_server,
            next_id: if is_server { 1 } else { PROXY_ID_BASE },
            entities: Vec::new(),
            players: Vec::new(),
            mask,
            spawn_points,
            outbox: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Pins the RNG, for deterministic tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn tps(&self) -> u32 {
        self.tps
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    pub fn mask(&self) -> &CollisionMask {
        &self.mask
    }

    pub fn mask_mut(&mut self) -> &mut CollisionMask {
        &mut self.mask
    }

    /// Reserves the next identifier. Server-side this is the sole source
    /// of ids for ships and entities alike.
    pub fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Adds an entity under a fresh id. Replicated entities are queued for
    /// announcement when this is the authoritative side.
    pub fn add_object(&mut self, mut entity: Entity) -> EntityId {
        let id = self.allocate_id();
        entity.id = id;
        if self.is_server && entity.policy.replicated() {
            self.outbox.push(WorldEvent::ObjectAdded(id));
        }
        self.entities.push(entity);
        id
    }

    /// Binds a received entity to its transmitted id (mirror side).
    /// Idempotent: a creation for an id this world already holds is
    /// dropped, so a redelivered `AddObject` cannot duplicate an entity.
    pub fn add_object_with_id(&mut self, mut entity: Entity, id: EntityId) {
        if self.contains_object(id) {
            return;
        }
        entity.id = id;
        if id.0 >= self.next_id {
            self.next_id = id.0 + 1;
        }
        self.entities.push(entity);
    }

    pub fn contains_object(&self, id: EntityId) -> bool {
        self.entities.iter().any(|e| e.id == id)
    }

    pub fn find_object(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn find_object_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| e.id == id)
    }

    /// Physically deletes an entity (authorized removal path).
    pub fn remove_object(&mut self, id: EntityId) {
        self.entities.retain(|e| e.id != id);
    }

    pub fn objects(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn add_player(&mut self, player: Player) {
        self.players.push(player);
    }

    pub fn remove_player(&mut self, ship: EntityId) -> Option<Player> {
        let idx = self.players.iter().position(|p| p.ship.id == ship)?;
        Some(self.players.remove(idx))
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn players_mut(&mut self) -> &mut [Player] {
        &mut self.players
    }

    pub fn find_ship(&self, id: EntityId) -> Option<&Ship> {
        self.players.iter().map(|p| &p.ship).find(|s| s.id == id)
    }

    pub fn find_ship_mut(&mut self, id: EntityId) -> Option<&mut Ship> {
        self.players.iter_mut().map(|p| &mut p.ship).find(|s| s.id == id)
    }

    pub fn player_by_ship_mut(&mut self, id: EntityId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.ship.id == id)
    }

    /// Picks a random spawn cell. `None` only for masks without spawn
    /// cells, which map validation rejects before a server ever runs.
    pub fn find_spawn_point(&mut self) -> Option<Vec2> {
        if self.spawn_points.is_empty() {
            return None;
        }
        let i = self.rng.gen_range(0..self.spawn_points.len());
        Some(self.spawn_points[i])
    }

    /// Takes the replication events accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Applies one slice of a ship snapshot. Returns false when the ship
    /// is not (yet) known; snapshots are state, so the next one heals it.
    pub fn apply_ship_update(&mut self, update: &ShipUpdate) -> bool {
        match self.players.iter_mut().find(|p| p.ship.id == update.ship) {
            Some(player) => {
                player.ship.pos = update.pos;
                player.ship.vel = update.vel;
                player.ship.angle = update.angle;
                player.inputs = InputKeys::from_bits_truncate(update.keys);
                true
            }
            None => false,
        }
    }

    /// Advances the simulation by exactly one tick.
    pub fn advance(&mut self) {
        // Pass 1: think, forces, motion, aging.
        let mut i = 0;
        while i < self.entities.len() {
            if !self.entities[i].remove {
                self.entity_think(i);
                let gravity = self.gravity;
                let e = &mut self.entities[i];
                if !e.no_grav {
                    e.vel += gravity;
                }
                e.pos += e.vel;
                e.age += 1;
            }
            i += 1;
        }

        // Ships: input, think, motion, terrain response.
        for pi in 0..self.players.len() {
            self.ship_apply_keys(pi);
            self.ship_think(pi);
            if !self.players[pi].ship.dead {
                let gravity = self.gravity;
                let ship = &mut self.players[pi].ship;
                ship.vel += gravity;
                ship.pos += ship.vel;
                let hit = self.players[pi].ship.on_blocked(&self.mask);
                if hit {
                    self.ship_hit_map(pi);
                }
            }
        }

        // Pass 2: collision responses.
        let mut i = 0;
        while i < self.entities.len() {
            if self.entities[i].remove {
                i += 1;
                continue;
            }
            if self.entities[i].on_blocked(&self.mask) {
                self.entity_hit_map(i);
            }
            if self.entities[i].can_hit_objects {
                let mut j = 0;
                while j < self.entities.len() {
                    if j != i
                        && !self.entities[j].remove
                        && self.entities[i].intersects(&self.entities[j])
                    {
                        self.entity_hit_object(i, j);
                    }
                    j += 1;
                }
            }
            if self.entities[i].remove {
                i += 1;
                continue;
            }
            for pi in 0..self.players.len() {
                let touching = {
                    let e = &self.entities[i];
                    let ship = &self.players[pi].ship;
                    ship.health > 0
                        && e.collidable()
                        && shapes_intersect(e.pos, e.shape, ship.pos, ship.shape)
                };
                if touching {
                    self.entity_hit_ship(i, pi);
                }
            }
            i += 1;
        }

        // Periodic sweep. RemoteAll entities only leave through the
        // network-visible removal path, keeping peer id spaces converged.
        if self.tick & GC_INTERVAL_MASK == 0 {
            let is_server = self.is_server;
            let mut authorized = Vec::new();
            self.entities.retain(|e| {
                if !e.remove {
                    return true;
                }
                if e.policy == NetPolicy::RemoteAll {
                    if is_server {
                        authorized.push(e.id);
                        return false;
                    }
                    return true;
                }
                false
            });
            for id in authorized {
                self.outbox.push(WorldEvent::ObjectRemoved(id));
            }
        }

        self.tick += 1;
    }

    // ─── Entity behavior ───

    fn entity_think(&mut self, i: usize) {
        let tps = self.tps;
        let is_server = self.is_server;

        // Attachments track their ship before anything else.
        if matches!(self.entities[i].kind, EntityKind::AfterburnerFlame) {
            if let Some(owner) = self.entities[i].owner {
                if let Some(pos) = self.find_ship(owner).map(|s| s.pos) {
                    self.entities[i].pos = pos;
                }
            }
            return;
        }

        let mut crater: Option<(i32, i32, i32)> = None;
        let mut burst: Option<(EntityId, Vec2, Vec2)> = None;

        let e = &mut self.entities[i];
        match e.kind {
            EntityKind::Spark { life, .. } => {
                if e.age > life {
                    e.remove = true;
                }
            }
            EntityKind::FlameSpark { ref mut life, ref mut color } => {
                *life -= 1;
                if *life == 0 {
                    e.remove = true;
                } else if *life < 7 && *color == Rgb::LT_GREY {
                    *color = Rgb::DK_GREY;
                } else if *life < 9 && *color == Rgb::DK_BLUE {
                    *color = Rgb::YELLOW;
                } else if *life < 6 && *color == Rgb::YELLOW {
                    *color = Rgb::ORANGE;
                } else if *life < 4 && *color == Rgb::ORANGE {
                    *color = Rgb::RED;
                }
            }
            EntityKind::Exploder { class, ref mut stage, ref mut activate, ref mut hit_delay } => {
                if (e.age as i32) < *activate {
                    return;
                }
                if *activate >= 0 {
                    e.age = 0;
                    *activate = -1;
                }
                if *hit_delay > 0 {
                    *hit_delay -= 1;
                }
                let ages = EXPLODER_CLASSES[class].stage_ages;
                if *stage < ages.len() && e.age == ages[*stage] {
                    *stage += 1;
                }
                if *stage == ages.len() {
                    e.remove = true;
                    let (x, y) = e.pos.rounded();
                    if let Shape::Sphere { radius, .. } = e.shape {
                        crater = Some((x, y, radius));
                    }
                }
            }
            EntityKind::Grenade => {
                if e.age > tps / 2 {
                    e.remove = true;
                    if is_server {
                        if let Some(owner) = e.owner {
                            burst = Some((owner, e.pos, e.vel));
                        }
                    }
                }
            }
            EntityKind::Bullet { .. } | EntityKind::CannonBall => {}
            EntityKind::AfterburnerFlame => unreachable!("handled above"),
        }

        if let Some((x, y, r)) = crater {
            self.mask.clear_disc(x, y, r);
        }
        if let Some((owner, pos, vel)) = burst {
            self.grenade_burst(owner, pos, vel);
        }
    }

    /// Grenade fuse end: a ring of owner-colored bullets, server-side.
    fn grenade_burst(&mut self, owner: EntityId, pos: Vec2, vel: Vec2) {
        let colors = self
            .find_ship(owner)
            .map(|s| s.color_map)
            .unwrap_or([Rgb::WHITE; 3]);
        let mut a: i32 = 0;
        while a < 256 {
            let v = dir(a as u8);
            for _ in 0..2 {
                let ci = self.rng.gen_range(0..3usize);
                let p = pos + v * (self.rng.gen::<f32>() * 4.0);
                let bv = vel + v * (self.rng.gen::<f32>() / 2.0);
                self.add_object(Entity::bullet(owner, p, bv, colors[ci], NetPolicy::RemoteAdd));
            }
            a += self.rng.gen_range(0..8);
        }
    }

    fn entity_hit_map(&mut self, i: usize) {
        match self.entities[i].kind {
            EntityKind::CannonBall | EntityKind::Grenade => {
                let (owner, pos) = {
                    let e = &self.entities[i];
                    (e.owner, e.pos)
                };
                if let Some(owner) = owner {
                    self.explode(owner, Explosion::Tiny, pos);
                }
                self.entities[i].remove = true;
            }
            EntityKind::Exploder { .. } => {
                // Craters the terrain and stops dead; detonation continues.
                let (x, y) = self.entities[i].pos.rounded();
                if let Shape::Sphere { radius, .. } = self.entities[i].shape {
                    self.mask.clear_disc(x, y, radius);
                }
                self.entities[i].vel = Vec2::ZERO;
            }
            _ => {
                self.entities[i].remove = true;
            }
        }
    }

    fn entity_hit_object(&mut self, _i: usize, _j: usize) {
        // No current kind reacts to entity-entity contact; the hook is
        // driven by the `can_hit_objects` flag.
    }

    fn entity_hit_ship(&mut self, i: usize, pi: usize) {
        match self.entities[i].kind {
            EntityKind::Spark { .. }
            | EntityKind::FlameSpark { .. }
            | EntityKind::AfterburnerFlame => {}
            EntityKind::Exploder { class, activate, hit_delay, .. } => {
                if hit_delay == 0 && activate <= 0 {
                    self.impact_ship(i, pi, EXPLODER_CLASSES[class].damage);
                    let gate = self.tps / 2;
                    if let EntityKind::Exploder { ref mut hit_delay, .. } = self.entities[i].kind {
                        *hit_delay = gate;
                    }
                }
            }
            EntityKind::CannonBall => {
                let (owner, pos) = {
                    let e = &self.entities[i];
                    (e.owner, e.pos)
                };
                if let Some(owner) = owner {
                    self.explode(owner, Explosion::Tiny, pos);
                }
                self.impact_ship(i, pi, 0);
                self.entities[i].remove = true;
            }
            EntityKind::Bullet { .. } | EntityKind::Grenade => {
                self.impact_ship(i, pi, 0);
                self.entities[i].remove = true;
            }
        }
    }

    /// Transfers impulse and damage from entity `i` into ship `pi`.
    fn impact_ship(&mut self, i: usize, pi: usize, damage_add: i32) {
        let (vel_rel, weight, raw) = {
            let e = &self.entities[i];
            let ship = &self.players[pi].ship;
            let vel_rel = e.vel - ship.vel;
            (vel_rel, e.weight, e.impact_damage(vel_rel))
        };
        self.players[pi]
            .ship
            .take_impact(vel_rel, weight, raw, damage_add, false, false);
    }

    // ─── Ship behavior ───

    fn ship_apply_keys(&mut self, pi: usize) {
        let keys = self.players[pi].inputs;
        self.players[pi].ship.apply_turn(keys);
        if keys.contains(InputKeys::ACCEL) {
            self.ship_accelerate(pi);
        }
        if keys.contains(InputKeys::FIRE) {
            self.fire_weapon(pi, Slot::Gun);
        }
        if keys.contains(InputKeys::SPECIAL) {
            self.fire_weapon(pi, Slot::Special);
        }
    }

    fn ship_accelerate(&mut self, pi: usize) {
        if !self.players[pi].ship.burn_for_thrust() {
            return;
        }
        if !self.is_server {
            self.spawn_engine_flame(pi);
        }
        let ship = &mut self.players[pi].ship;
        let thrust = ship.facing() * ACCEL_MULT;
        ship.vel += thrust;
        ship.resting = false;
        ship.on_base = false;
    }

    /// Exhaust spark behind the nozzle; presentation side only.
    fn spawn_engine_flame(&mut self, pi: usize) {
        let (pos, vel, angle, size, dim) = {
            let s = &self.players[pi].ship;
            (s.pos, s.vel, s.angle, s.size, s.health < s.max_health / 4)
        };
        let jitter: i8 = self.rng.gen_range(-64..=64);
        let spark_vel = vel - dir(angle.wrapping_add_signed(jitter)) * 0.1;
        let life = self.rng.gen_range(9..13);
        let color = if dim { Rgb::LT_GREY } else { Rgb::DK_BLUE };
        let spark_pos = pos - dir(angle) * (size as f32 / 2.0 - 3.0);
        self.add_object(Entity::flame_spark(spark_pos, spark_vel, life, color));
    }

    fn ship_think(&mut self, pi: usize) {
        if self.players[pi].ship.dead {
            return;
        }
        let grace = -(self.tps as i32) * 3;
        if self.players[pi].ship.health < grace {
            let (id, pos, tier) = {
                let s = &self.players[pi].ship;
                let tier = if s.on_base { Explosion::Medium } else { Explosion::Huge };
                (s.id, s.pos, tier)
            };
            self.explode(id, tier, pos);
            self.players[pi].ship.dead = true;
            debug!(ship = id.0, "ship destroyed");
        }

        self.weapon_think(pi, Slot::Gun);
        self.weapon_think(pi, Slot::Special);

        let tick = self.tick;
        let is_server = self.is_server;
        let ship = &mut self.players[pi].ship;
        if ship.flash > 0 {
            ship.flash -= 1;
        }
        if ship.health <= 0 {
            ship.health -= 1;
        } else if ship.on_base && is_server {
            if ship.resting {
                // Right the hull toward upright while parked.
                let signed = ship.angle as i8;
                if signed < 0 {
                    ship.angle = ship.angle.wrapping_add(1);
                } else if signed > 0 {
                    ship.angle = ship.angle.wrapping_sub(1);
                }
            }
            ship.health = (ship.health + 1).min(ship.max_health);
            ship.gun.refill(tick);
            ship.special.refill(tick);
            ship.fuel = (ship.fuel + 2).min(ship.max_fuel);
        }
        ship.old_pos = ship.pos;
    }

    /// Terrain contact: self damage from retained momentum, damped bounce,
    /// snap back to the last clear position.
    fn ship_hit_map(&mut self, pi: usize) {
        let (momentum, on_base_cell) = {
            let s = &self.players[pi].ship;
            (s.momentum(), s.on_base_cell(&self.mask))
        };
        let ship = &mut self.players[pi].ship;
        let damage = (momentum / CONTACT_DAMPING + 0.5).floor() as i32;
        if damage > 0 {
            ship.health -= damage;
            ship.flash = 2;
        } else if !ship.resting {
            ship.resting = true;
            ship.on_base = on_base_cell;
        }
        ship.vel = -ship.vel / 5.0;
        if ship.vel.x.abs() < 0.1 {
            ship.vel.x = 0.0;
        }
        if ship.vel.y.abs() < 0.1 {
            ship.vel.y = 0.0;
        }
        ship.pos = ship.old_pos;
    }

    // ─── Weapons ───

    fn weapon(&self, pi: usize, slot: Slot) -> &crate::weapon::Weapon {
        match slot {
            Slot::Gun => &self.players[pi].ship.gun,
            Slot::Special => &self.players[pi].ship.special,
        }
    }

    fn weapon_mut(&mut self, pi: usize, slot: Slot) -> &mut crate::weapon::Weapon {
        match slot {
            Slot::Gun => &mut self.players[pi].ship.gun,
            Slot::Special => &mut self.players[pi].ship.special,
        }
    }

    fn weapon_think(&mut self, pi: usize, slot: Slot) {
        let tick = self.tick;
        let (kind, held_now, flame, was_firing) = {
            let w = self.weapon(pi, slot);
            (w.kind, w.ammo > 0 && w.fired_tick == tick, w.flame, w.firing)
        };
        if kind == WeaponKind::Afterburner && held_now != was_firing {
            if held_now {
                let (ship_id, pos) = {
                    let s = &self.players[pi].ship;
                    (s.id, s.pos)
                };
                let id = self.add_object(Entity::afterburner_flame(ship_id, pos));
                self.weapon_mut(pi, slot).flame = Some(id);
            } else if let Some(fid) = flame {
                if let Some(e) = self.find_object_mut(fid) {
                    e.remove = true;
                }
                self.weapon_mut(pi, slot).flame = None;
            }
            self.weapon_mut(pi, slot).firing = held_now;
        }
        self.weapon_mut(pi, slot).think();
    }

    /// Trigger pull for one slot. No-op unless off cooldown with ammo,
    /// except the afterburner, which is continuous.
    fn fire_weapon(&mut self, pi: usize, slot: Slot) {
        let kind = self.weapon(pi, slot).kind;

        if kind == WeaponKind::Afterburner {
            let tick = self.tick;
            let ship = &mut self.players[pi].ship;
            let facing = ship.facing();
            let w = match slot {
                Slot::Gun => &mut ship.gun,
                Slot::Special => &mut ship.special,
            };
            let burn = w.ammo > 0;
            if burn {
                w.ammo -= 1;
            }
            w.fired_tick = tick;
            if burn {
                ship.vel += facing * 0.5;
                ship.resting = false;
                ship.on_base = false;
            }
            return;
        }

        if !self.weapon(pi, slot).can_fire() {
            return;
        }
        let (ship_id, pos, vel, angle, size) = {
            let s = &self.players[pi].ship;
            (s.id, s.pos, s.vel, s.angle, s.size)
        };
        let facing = dir(angle);
        let half = size as f32 / 2.0;
        let is_server = self.is_server;

        match kind {
            WeaponKind::MachineGun => {
                if is_server {
                    self.add_object(Entity::bullet(
                        ship_id,
                        pos + facing * (half + 1.0),
                        vel + facing * 3.0,
                        Rgb::WHITE,
                        NetPolicy::RemoteAdd,
                    ));
                }
                let w = self.weapon_mut(pi, slot);
                w.ammo -= 1;
                w.reload = kind.reload_ticks();
            }
            WeaponKind::DualMachineGun => {
                if is_server {
                    let muzzle_vel = vel + facing * 3.0;
                    let wing = Vec2::new(facing.x * (half - 3.0), facing.y * (-half - 1.0));
                    self.add_object(Entity::bullet(
                        ship_id,
                        pos + Vec2::new(-wing.x, wing.y),
                        muzzle_vel,
                        Rgb::WHITE,
                        NetPolicy::RemoteAdd,
                    ));
                    self.add_object(Entity::bullet(
                        ship_id,
                        pos + wing,
                        muzzle_vel,
                        Rgb::WHITE,
                        NetPolicy::RemoteAdd,
                    ));
                }
                let w = self.weapon_mut(pi, slot);
                w.ammo = (w.ammo - 2).max(0);
                w.reload = kind.reload_ticks();
            }
            WeaponKind::FbMachineGun => {
                if is_server {
                    let muzzle_vel = facing * 2.5;
                    let offset = facing * (half + 1.0);
                    self.add_object(Entity::bullet(
                        ship_id,
                        pos + offset,
                        vel + muzzle_vel,
                        Rgb::WHITE,
                        NetPolicy::RemoteAdd,
                    ));
                    self.add_object(Entity::bullet(
                        ship_id,
                        pos - offset,
                        vel - muzzle_vel,
                        Rgb::WHITE,
                        NetPolicy::RemoteAdd,
                    ));
                }
                let w = self.weapon_mut(pi, slot);
                w.ammo = (w.ammo - 2).max(0);
                w.reload = kind.reload_ticks();
            }
            WeaponKind::WavyMachineGun => {
                let phase = {
                    let w = self.weapon_mut(pi, slot);
                    let p = w.phase;
                    w.phase += 1;
                    p
                };
                if is_server {
                    const SWEEP: f32 = 0.7854;
                    let muzzle = Vec2::new(
                        facing.x * half * (phase as f32 * SWEEP).sin(),
                        facing.y * (-half - 1.0),
                    );
                    self.add_object(Entity::bullet(
                        ship_id,
                        pos + muzzle,
                        vel + facing * 3.0,
                        Rgb::WHITE,
                        NetPolicy::RemoteAdd,
                    ));
                }
                let w = self.weapon_mut(pi, slot);
                w.ammo -= 1;
                w.reload = kind.reload_ticks();
            }
            WeaponKind::Cannon => {
                if is_server {
                    self.add_object(Entity::cannon_ball(
                        ship_id,
                        pos + facing * (half + 1.0),
                        vel + facing * 3.0,
                    ));
                }
                let w = self.weapon_mut(pi, slot);
                w.ammo -= 1;
                w.reload = kind.reload_ticks();
                // Recoil.
                self.players[pi].ship.vel -= facing * 0.6;
            }
            WeaponKind::GrenadeLauncher => {
                if is_server {
                    self.add_object(Entity::grenade(
                        ship_id,
                        pos + facing * (half + 1.0),
                        vel + facing * 2.0,
                    ));
                }
                let w = self.weapon_mut(pi, slot);
                w.ammo -= 1;
                w.reload = kind.reload_ticks();
            }
            WeaponKind::Afterburner => unreachable!("handled above"),
        }
    }

    // ─── Explosions ───

    /// Spawns the randomized debris of an explosion tier: directionless
    /// shrapnel bullets plus staged exploder fragments. Everything here is
    /// a local proxy; both sides generate their own debris from the synced
    /// cause.
    pub fn explode(&mut self, owner: EntityId, tier: Explosion, pos: Vec2) {
        let spec = &EXPLOSIONS[tier as usize];
        let color = self
            .find_ship(owner)
            .map(|s| s.color())
            .unwrap_or(Rgb::WHITE);

        let mut num = [0i32; 4];
        for i in 0..4 {
            let span = spec.highs[i] - spec.lows[i];
            num[i] = spec.lows[i] + if span > 0 { self.rng.gen_range(0..span) } else { 0 };
        }

        for _ in 0..num[0] {
            let ang = dir(self.rng.gen::<u8>());
            let scatter = if spec.radius > 0 {
                self.rng.gen_range(0..spec.radius)
            } else {
                0
            };
            self.add_object(Entity::bullet(
                owner,
                pos + ang * scatter as f32,
                ang,
                color,
                NetPolicy::LocalProxy,
            ));
        }

        let mut stagger = 0;
        for class in 0..3 {
            for _ in 0..num[class + 1] {
                let mut frag = Entity::exploder(class, pos);
                if tier != Explosion::Tiny {
                    let ang = dir(self.rng.gen::<u8>());
                    frag.pos = pos + ang * self.rng.gen_range(0..8) as f32;
                    frag.vel = ang * (self.rng.gen_range(0..=tier as i32) as f32 * 0.5);
                    let delay = if stagger > 0 { self.rng.gen_range(0..stagger * 2) } else { 0 };
                    if let EntityKind::Exploder { ref mut activate, .. } = frag.kind {
                        *activate = delay;
                    }
                    stagger += 1;
                }
                self.add_object(frag);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::{CollisionMask, CELL_BASE, CELL_IMPASSABLE, CELL_PASSABLE};
    use crate::ship::Team;

    fn open_mask() -> CollisionMask {
        CollisionMask::filled(200, 200, CELL_PASSABLE)
    }

    fn server_world() -> World {
        World::new(open_mask(), Vec2::ZERO, true).with_seed(7)
    }

    fn add_player(world: &mut World, name: &str) -> EntityId {
        let mut player = Player::new(name, Team::Green);
        let id = world.allocate_id();
        player.ship.id = id;
        player.ship.spawn(Vec2::new(100.0, 100.0));
        player.logged_in = true;
        world.add_player(player);
        id
    }

    #[test]
    fn ids_are_monotone_and_unique() {
        let mut world = server_world();
        let ship = world.allocate_id();
        let a = world.add_object(Entity::spark(Vec2::ZERO, Vec2::ZERO, 5, Rgb::WHITE));
        let b = world.add_object(Entity::spark(Vec2::ZERO, Vec2::ZERO, 5, Rgb::WHITE));
        assert!(ship < a && a < b);
        // Removal does not recycle ids.
        world.remove_object(a);
        let c = world.add_object(Entity::spark(Vec2::ZERO, Vec2::ZERO, 5, Rgb::WHITE));
        assert!(b < c);
    }

    #[test]
    fn mirror_proxy_ids_never_collide_with_server_ids() {
        let mut world = World::new(open_mask(), Vec2::ZERO, false);
        // Mirror-minted proxies live in their own id range, so a server id
        // arriving later can never land on one.
        let local = world.add_object(Entity::spark(Vec2::ZERO, Vec2::ZERO, 5, Rgb::WHITE));
        let e = Entity::cannon_ball(EntityId(1), Vec2::ZERO, Vec2::ZERO);
        world.add_object_with_id(e, EntityId(40));
        assert_ne!(local, EntityId(40));
        assert!(world.contains_object(EntityId(40)));
        assert!(world.contains_object(local));
    }

    #[test]
    fn duplicate_remote_creation_is_ignored() {
        let mut world = World::new(open_mask(), Vec2::ZERO, false);
        let ball = Entity::cannon_ball(EntityId(1), Vec2::new(5.0, 5.0), Vec2::ZERO);
        world.add_object_with_id(ball.clone(), EntityId(9));
        let mut dup = ball;
        dup.pos = Vec2::new(90.0, 90.0);
        world.add_object_with_id(dup, EntityId(9));
        assert_eq!(world.objects().filter(|e| e.id == EntityId(9)).count(), 1);
        // The first receipt wins.
        assert_eq!(world.find_object(EntityId(9)).unwrap().pos, Vec2::new(5.0, 5.0));
    }

    #[test]
    fn gc_spares_remote_all_on_the_mirror() {
        let mut world = World::new(open_mask(), Vec2::ZERO, false);
        let mut ball = Entity::cannon_ball(EntityId(1), Vec2::new(50.0, 50.0), Vec2::ZERO);
        ball.remove = true;
        world.add_object_with_id(ball, EntityId(9));
        let mut spark = Entity::spark(Vec2::new(50.0, 50.0), Vec2::ZERO, 100, Rgb::WHITE);
        spark.remove = true;
        world.add_object(spark);

        world.advance(); // tick 0 sweeps
        assert!(world.contains_object(EntityId(9)), "RemoteAll survives local GC");
        assert_eq!(world.objects().count(), 1);
    }

    #[test]
    fn gc_on_server_authorizes_remote_all_removal() {
        let mut world = server_world();
        let id = world.add_object(Entity::cannon_ball(EntityId(1), Vec2::new(50.0, 50.0), Vec2::ZERO));
        world.drain_events();
        world.find_object_mut(id).unwrap().remove = true;
        world.advance();
        assert!(!world.contains_object(id));
        assert_eq!(world.drain_events(), vec![WorldEvent::ObjectRemoved(id)]);
    }

    #[test]
    fn replicated_adds_are_queued_only_on_the_server() {
        let mut world = server_world();
        let id = world.add_object(Entity::grenade(EntityId(1), Vec2::ZERO, Vec2::ZERO));
        world.add_object(Entity::spark(Vec2::ZERO, Vec2::ZERO, 5, Rgb::WHITE));
        assert_eq!(world.drain_events(), vec![WorldEvent::ObjectAdded(id)]);

        let mut mirror = World::new(open_mask(), Vec2::ZERO, false);
        mirror.add_object(Entity::grenade(EntityId(1), Vec2::ZERO, Vec2::ZERO));
        assert!(mirror.drain_events().is_empty());
    }

    #[test]
    fn cannon_fire_consumes_ammo_and_recoils() {
        let mut world = server_world();
        let pi = {
            add_player(&mut world, "gunner");
            0
        };
        world.fire_weapon(pi, Slot::Special);

        let ship = &world.players()[pi].ship;
        assert_eq!(ship.special.ammo, 11);
        assert_eq!(ship.special.reload, 30);
        // Recoil pushes against the facing (angle 0 faces up).
        assert!((ship.vel.y - 0.6).abs() < 1e-6);
        let ball = world.objects().find(|e| e.kind == EntityKind::CannonBall).unwrap();
        assert_eq!(ball.owner, Some(EntityId(1)));
        assert_eq!(world.drain_events().len(), 1);

        // Trigger held again immediately: still reloading, nothing fires.
        world.fire_weapon(pi, Slot::Special);
        assert_eq!(world.players()[pi].ship.special.ammo, 11);
    }

    #[test]
    fn reload_gates_the_next_shot_for_exactly_its_tick_count() {
        let mut world = server_world();
        add_player(&mut world, "gunner");
        world.player_by_ship_mut(EntityId(1)).unwrap().inputs = InputKeys::SPECIAL;

        world.advance(); // fires on tick 0
        let shots = |w: &World| {
            w.objects().filter(|e| e.kind == EntityKind::CannonBall).count()
        };
        assert_eq!(shots(&world), 1);
        for _ in 0..29 {
            world.advance();
            assert_eq!(shots(&world), 1, "fired again during cooldown");
        }
        world.advance(); // tick 30: reload hit zero, fires again
        assert_eq!(shots(&world), 2);
    }

    #[test]
    fn bullet_hit_damages_and_flashes() {
        let mut world = server_world();
        add_player(&mut world, "target");
        // Lands exactly on the ship center after one move step; relative
        // speed 27.5 at weight 1 plus the 2.5 bullet bonus rounds to 30.
        world.add_object(Entity::bullet(
            EntityId(99),
            Vec2::new(100.0 - 27.5, 100.0),
            Vec2::new(27.5, 0.0),
            Rgb::WHITE,
            NetPolicy::LocalProxy,
        ));
        world.advance();

        let ship = &world.players()[0].ship;
        assert_eq!(ship.health, 470);
        assert_eq!(ship.flash, 2);
        // The spent bullet was flagged and swept by the tick-0 GC pass.
        assert!(!world.objects().any(|e| matches!(e.kind, EntityKind::Bullet { .. })));
    }

    #[test]
    fn tiny_explosion_spawns_only_instant_fragments() {
        let mut world = server_world();
        add_player(&mut world, "victim");
        world.explode(EntityId(1), Explosion::Tiny, Vec2::new(60.0, 60.0));

        let mut fragments = 0;
        for e in world.objects() {
            match e.kind {
                EntityKind::Exploder { activate, .. } => {
                    fragments += 1;
                    assert!(activate <= 0, "tiny fragments must be instantly active");
                    assert_eq!(e.pos, Vec2::new(60.0, 60.0));
                }
                EntityKind::Bullet { .. } => {
                    assert_eq!(e.policy, NetPolicy::LocalProxy);
                }
                _ => panic!("unexpected debris {:?}", e.kind),
            }
        }
        assert_eq!(fragments, 1); // tiny tier always has exactly one
    }

    #[test]
    fn bigger_explosions_stagger_fragments() {
        let mut world = server_world();
        world.explode(EntityId(1), Explosion::Huge, Vec2::new(60.0, 60.0));
        let fragments = world
            .objects()
            .filter(|e| matches!(e.kind, EntityKind::Exploder { .. }))
            .count();
        assert!(fragments >= 22, "huge tier spawns at least the low fragment counts");
    }

    #[test]
    fn grenade_bursts_into_replicated_bullets_at_fuse_end() {
        let mut world = server_world();
        add_player(&mut world, "lobber");
        let id = world.add_object(Entity::grenade(EntityId(1), Vec2::new(60.0, 60.0), Vec2::ZERO));
        world.drain_events();

        // Fuse pops once age exceeds tps/2.
        for _ in 0..world.tps() / 2 + 2 {
            world.advance();
        }
        assert!(world.find_object(id).map(|e| e.remove).unwrap_or(true));
        let bullets = world
            .objects()
            .filter(|e| matches!(e.kind, EntityKind::Bullet { .. }))
            .count();
        assert!(bullets > 30, "burst ring should be dense, got {}", bullets);
        // Burst bullets replicate: one AddObject event each.
        let adds = world
            .drain_events()
            .iter()
            .filter(|e| matches!(e, WorldEvent::ObjectAdded(_)))
            .count();
        assert_eq!(adds, bullets);
    }

    #[test]
    fn ship_lands_on_base_and_regenerates() {
        let mut mask = open_mask();
        for x in 0..200 {
            mask.set_cell(x, 120, CELL_BASE);
            for y in 121..200 {
                mask.set_cell(x, y, CELL_IMPASSABLE);
            }
        }
        let mut world = World::new(mask, Vec2::new(0.0, 1.0 / 30.0), true).with_seed(3);
        add_player(&mut world, "lander");
        {
            let ship = world.find_ship_mut(EntityId(1)).unwrap();
            ship.pos = Vec2::new(100.0, 112.0);
            ship.old_pos = ship.pos;
            ship.fuel = 100;
            ship.health = 400;
        }
        for _ in 0..200 {
            world.advance();
        }
        let ship = &world.players()[0].ship;
        assert!(ship.resting, "gravity should settle the ship onto the base");
        assert!(ship.on_base);
        assert!(ship.health > 400, "base contact regenerates hull");
        assert!(ship.fuel > 100, "base contact refuels");
    }

    #[test]
    fn hull_exhaustion_past_grace_explodes_the_ship() {
        let mut world = server_world();
        add_player(&mut world, "doomed");
        world.find_ship_mut(EntityId(1)).unwrap().health = -(world.tps() as i32) * 3 - 1;
        world.advance();
        let ship = &world.players()[0].ship;
        assert!(ship.dead);
        assert!(world.objects().count() > 0, "death spawns debris");
        // Dead ships stop simulating.
        let pos = world.players()[0].ship.pos;
        world.advance();
        assert_eq!(world.players()[0].ship.pos, pos);
    }

    #[test]
    fn afterburner_toggles_its_flame_on_edges() {
        let mut world = server_world();
        add_player(&mut world, "burner");
        world.find_ship_mut(EntityId(1)).unwrap().special =
            crate::weapon::Weapon::new(WeaponKind::Afterburner);
        world.player_by_ship_mut(EntityId(1)).unwrap().inputs = InputKeys::SPECIAL;
        world.advance();

        let flame: Vec<_> = world
            .objects()
            .filter(|e| e.kind == EntityKind::AfterburnerFlame)
            .collect();
        assert_eq!(flame.len(), 1);
        assert_eq!(flame[0].policy, NetPolicy::LocalProxy);
        let flame_id = flame[0].id;
        assert!(world.players()[0].ship.special.ammo < 250);

        world.player_by_ship_mut(EntityId(1)).unwrap().inputs = InputKeys::empty();
        world.advance();
        assert!(world.find_object(flame_id).unwrap().remove, "released trigger removes flame");
    }

    #[test]
    fn exploder_craters_terrain_on_contact() {
        let mut mask = open_mask();
        for y in 100..200 {
            for x in 0..200 {
                mask.set_cell(x, y, CELL_IMPASSABLE);
            }
        }
        let mut world = World::new(mask, Vec2::ZERO, true).with_seed(5);
        world.add_object(Entity::exploder(2, Vec2::new(50.0, 101.0)));
        assert!(world.mask().blocked(50, 101));
        world.advance();
        assert!(!world.mask().blocked(50, 101), "contact clears a disc");
    }
}
