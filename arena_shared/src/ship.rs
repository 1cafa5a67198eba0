//! Ships, players, teams, and the input bitmask.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::entity::{shape_on, EntityId, Rgb, Shape};
use crate::mask::CollisionMask;
use crate::math::{dir, Vec2};
use crate::weapon::{Weapon, WeaponKind};

bitflags! {
    /// Player intent for one tick. Transmitted as the raw byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputKeys: u8 {
        const LEFT = 1;
        const RIGHT = 2;
        const ACCEL = 4;
        const FIRE = 8;
        const SPECIAL = 16;
        /// Either turn direction.
        const TURN = Self::LEFT.bits() | Self::RIGHT.bits();
    }
}

/// Player team. Determines the ship color triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Team {
    #[default]
    Unspecified,
    Green,
    Blue,
    Red,
}

impl Team {
    /// Dark/mid/bright triple; index 2 is the ship's primary color.
    pub fn color_map(self) -> [Rgb; 3] {
        match self {
            Team::Blue => [Rgb::DK_BLUE, Rgb::BLUE, Rgb::LT_BLUE],
            Team::Red => [Rgb::DK_RED, Rgb::RED, Rgb::LT_RED],
            _ => [Rgb::DK_GREEN, Rgb::GREEN, Rgb::LT_GREEN],
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Team::Unspecified => "Unspecified",
            Team::Green => "Green",
            Team::Blue => "Blue",
            Team::Red => "Red",
        };
        write!(f, "{}", name)
    }
}

pub const SHIP_WEIGHT: i32 = 20;
pub const SHIP_SIZE: i32 = 16;
pub const SHIP_RADIUS: i32 = 6;
pub const MAX_HEALTH: i32 = 500;
pub const MAX_FUEL: i32 = 1500;
pub const MAX_TURN: u8 = 3;
/// Thrust applied per accelerating tick.
pub const ACCEL_MULT: f32 = 0.084;
/// Divisor turning retained momentum into terrain-impact self damage.
pub const CONTACT_DAMPING: f32 = 10.0;

/// A player's avatar. Lives as long as the owning player is connected;
/// death only flags it until the next spawn.
#[derive(Debug, Clone, PartialEq)]
pub struct Ship {
    pub id: EntityId,
    pub pos: Vec2,
    pub vel: Vec2,
    /// Last position that did not overlap terrain.
    pub old_pos: Vec2,
    pub angle: u8,
    pub weight: i32,
    pub shape: Shape,
    pub size: i32,
    pub health: i32,
    pub fuel: i32,
    pub max_health: i32,
    pub max_fuel: i32,
    /// Render hint: ticks of damage flash remaining.
    pub flash: u32,
    pub turn_acc: u8,
    pub max_turn: u8,
    pub resting: bool,
    pub on_base: bool,
    pub dead: bool,
    pub color_map: [Rgb; 3],
    pub gun: Weapon,
    pub special: Weapon,
}

impl Ship {
    pub fn new(team: Team) -> Self {
        let mut ship = Self {
            id: EntityId(0),
            pos: Vec2::ZERO,
            vel: Vec2::ZERO,
            old_pos: Vec2::ZERO,
            angle: 0,
            weight: SHIP_WEIGHT,
            shape: Shape::sphere(SHIP_RADIUS),
            size: SHIP_SIZE,
            health: MAX_HEALTH,
            fuel: MAX_FUEL,
            max_health: MAX_HEALTH,
            max_fuel: MAX_FUEL,
            flash: 0,
            turn_acc: 0,
            max_turn: MAX_TURN,
            resting: false,
            on_base: false,
            dead: false,
            color_map: team.color_map(),
            gun: Weapon::new(WeaponKind::MachineGun),
            special: Weapon::new(WeaponKind::Cannon),
        };
        ship.init();
        ship
    }

    /// Resets flight stats. Weapon instances are kept; the server resets
    /// those separately on respawn.
    fn init(&mut self) {
        self.angle = 0;
        self.fuel = MAX_FUEL;
        self.max_fuel = MAX_FUEL;
        self.health = MAX_HEALTH;
        self.max_health = MAX_HEALTH;
        self.weight = SHIP_WEIGHT;
        self.max_turn = MAX_TURN;
        self.turn_acc = 0;
        self.size = SHIP_SIZE;
        self.shape = Shape::sphere(SHIP_RADIUS);
        self.flash = 0;
        self.resting = false;
        self.on_base = false;
        self.dead = false;
    }

    /// Places the ship back into play at a spawn point.
    pub fn spawn(&mut self, pos: Vec2) {
        self.init();
        self.pos = pos;
        self.old_pos = pos;
        self.vel = Vec2::ZERO;
    }

    /// Unit vector of the current facing.
    pub fn facing(&self) -> Vec2 {
        dir(self.angle)
    }

    /// Primary team color.
    pub fn color(&self) -> Rgb {
        self.color_map[2]
    }

    pub fn momentum(&self) -> f32 {
        self.vel.len_sq() * self.weight as f32
    }

    /// Turn handling: the turn rate accumulates while either turn key is
    /// held, capped at `max_turn`, and resets when both are released.
    pub fn apply_turn(&mut self, keys: InputKeys) {
        if keys.intersects(InputKeys::TURN) {
            self.turn_acc = (self.turn_acc + 1).min(self.max_turn);
            if keys.contains(InputKeys::LEFT) {
                self.angle = self.angle.wrapping_sub(self.turn_acc);
            }
            if keys.contains(InputKeys::RIGHT) {
                self.angle = self.angle.wrapping_add(self.turn_acc);
            }
        } else {
            self.turn_acc = 0;
        }
    }

    /// Spends one unit of fuel, falling back to hull, for a thrust tick.
    /// Returns false once both are exhausted.
    pub fn burn_for_thrust(&mut self) -> bool {
        if self.fuel > 0 {
            self.fuel -= 1;
        } else if self.health > 0 {
            self.health -= 1;
        } else {
            return false;
        }
        true
    }

    /// Applies an impact from a projectile moving at `vel_rel` relative to
    /// this ship. `raw_damage` is the unrounded damage, `damage_add` a flat
    /// bonus (exploders). Non-positive damage on a landing contact sets the
    /// resting flags instead of harming the hull.
    pub fn take_impact(
        &mut self,
        vel_rel: Vec2,
        weight: i32,
        raw_damage: f32,
        damage_add: i32,
        land: bool,
        on_base_cell: bool,
    ) {
        let damage = (raw_damage + 0.5).floor() as i32 + damage_add;
        self.vel += vel_rel * (weight as f32 / self.weight as f32);
        if damage > 0 {
            self.health -= damage;
            self.flash = 2;
        } else if land && !self.resting {
            self.resting = true;
            self.on_base = on_base_cell;
        }
    }

    pub fn on_blocked(&self, mask: &CollisionMask) -> bool {
        shape_on(self.pos, self.shape, |x, y| mask.blocked(x, y))
    }

    pub fn on_base_cell(&self, mask: &CollisionMask) -> bool {
        shape_on(self.pos, self.shape, |x, y| mask.base(x, y))
    }
}

/// Identity wrapper: one connected player and their ship.
#[derive(Debug, Clone)]
pub struct Player {
    pub name: String,
    pub team: Team,
    pub ship: Ship,
    /// Last input bitmask received (server) or replicated (client).
    pub inputs: InputKeys,
    pub logged_in: bool,
}

impl Player {
    pub fn new(name: impl Into<String>, team: Team) -> Self {
        Self {
            name: name.into(),
            team,
            ship: Ship::new(team),
            inputs: InputKeys::empty(),
            logged_in: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_rate_accumulates_and_caps() {
        let mut ship = Ship::new(Team::Green);
        for _ in 0..5 {
            ship.apply_turn(InputKeys::RIGHT);
        }
        // 1 + 2 + 3 + 3 + 3
        assert_eq!(ship.angle, 12);
        assert_eq!(ship.turn_acc, MAX_TURN);
        ship.apply_turn(InputKeys::empty());
        assert_eq!(ship.turn_acc, 0);
    }

    #[test]
    fn turning_left_wraps_the_angle() {
        let mut ship = Ship::new(Team::Green);
        ship.apply_turn(InputKeys::LEFT);
        assert_eq!(ship.angle, 255);
    }

    #[test]
    fn thrust_burns_fuel_then_hull() {
        let mut ship = Ship::new(Team::Green);
        ship.fuel = 1;
        assert!(ship.burn_for_thrust());
        assert_eq!(ship.fuel, 0);
        assert!(ship.burn_for_thrust());
        assert_eq!(ship.health, MAX_HEALTH - 1);
        ship.health = 0;
        assert!(!ship.burn_for_thrust());
    }

    #[test]
    fn damage_hit_sets_flash() {
        let mut ship = Ship::new(Team::Green);
        // A 30-damage hit: rel speed 27.5 at weight 1 plus the 2.5 bullet
        // bonus rounds to 30.
        ship.take_impact(Vec2::new(27.5, 0.0), 1, 27.5 + 2.5, 0, false, false);
        assert_eq!(ship.health, 470);
        assert_eq!(ship.flash, 2);
    }

    #[test]
    fn gentle_landing_sets_resting_instead_of_damage() {
        let mut ship = Ship::new(Team::Green);
        ship.take_impact(Vec2::ZERO, 0, 0.0, 0, true, true);
        assert_eq!(ship.health, MAX_HEALTH);
        assert!(ship.resting);
        assert!(ship.on_base);
    }

    #[test]
    fn spawn_resets_flight_state() {
        let mut ship = Ship::new(Team::Blue);
        ship.health = -50;
        ship.dead = true;
        ship.vel = Vec2::new(3.0, 1.0);
        ship.spawn(Vec2::new(10.0, 20.0));
        assert_eq!(ship.health, MAX_HEALTH);
        assert!(!ship.dead);
        assert_eq!(ship.vel, Vec2::ZERO);
        assert_eq!(ship.pos, Vec2::new(10.0, 20.0));
    }
}
