//! Entity model.
//!
//! One `Entity` struct covers every simulated object apart from ships:
//! projectiles, sparks, explosion fragments, ship attachments. Per-kind
//! state lives in the `EntityKind` variant; per-kind behavior is dispatched
//! in the world stepper. Collision geometry is a `Shape`, replication is a
//! `NetPolicy`.

use serde::{Deserialize, Serialize};

use crate::mask::CollisionMask;
use crate::math::Vec2;

/// Simulation-wide object identifier.
///
/// Assigned monotonically by the owning world and never reused within a
/// session. Ship ids share this space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

/// Replication policy for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetPolicy {
    /// Lives only on the side that created it; never transmitted.
    Local,
    /// Recreated independently on each side from synced causes; never
    /// synced by identity.
    LocalProxy,
    /// Creation is sent once, then the entity is simulated locally.
    RemoteAdd,
    /// Creation is sent once and removal must also be network-visible:
    /// exempt from local garbage collection until an explicit removal.
    RemoteAll,
}

impl NetPolicy {
    /// Whether creation of this entity crosses the network boundary.
    pub fn replicated(self) -> bool {
        matches!(self, NetPolicy::RemoteAdd | NetPolicy::RemoteAll)
    }
}

/// Collision shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// Single pixel.
    Point,
    /// Disc with a cached squared radius. The cache may be tuned
    /// independently of the radius (the grenade does).
    Sphere { radius: i32, radius_sq: i32 },
}

impl Shape {
    pub fn sphere(radius: i32) -> Self {
        Shape::Sphere {
            radius,
            radius_sq: radius * radius,
        }
    }
}

/// 8-bit color triple, carried for the renderer and on the wire for
/// owner-colored projectiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const DK_GREY: Rgb = Rgb::new(96, 96, 96);
    pub const LT_GREY: Rgb = Rgb::new(128, 128, 128);
    pub const DK_RED: Rgb = Rgb::new(128, 0, 0);
    pub const RED: Rgb = Rgb::new(192, 0, 0);
    pub const LT_RED: Rgb = Rgb::new(255, 0, 0);
    pub const DK_GREEN: Rgb = Rgb::new(0, 128, 0);
    pub const GREEN: Rgb = Rgb::new(0, 192, 0);
    pub const LT_GREEN: Rgb = Rgb::new(0, 255, 0);
    pub const DK_BLUE: Rgb = Rgb::new(0, 0, 192);
    pub const BLUE: Rgb = Rgb::new(0, 64, 192);
    pub const LT_BLUE: Rgb = Rgb::new(0, 128, 255);
    pub const YELLOW: Rgb = Rgb::new(255, 255, 0);
    pub const ORANGE: Rgb = Rgb::new(255, 128, 0);
}

/// Explosion-fragment class parameters.
pub struct ExploderClass {
    pub radius: i32,
    pub weight: i32,
    pub damage: i32,
    /// Age at which each visual stage ends; past the last stage the
    /// fragment detonates and is removed.
    pub stage_ages: &'static [u32],
}

pub const EXPLODER_CLASSES: [ExploderClass; 3] = [
    ExploderClass { radius: 3, weight: 5, damage: 25, stage_ages: &[3, 6] },
    ExploderClass { radius: 4, weight: 10, damage: 40, stage_ages: &[3, 6, 12] },
    ExploderClass { radius: 5, weight: 20, damage: 60, stage_ages: &[3, 6, 10, 16, 25] },
];

/// Per-kind entity state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    /// Fast point projectile.
    Bullet { color: Rgb },
    /// Heavy sphere projectile; detonates a tiny explosion on any hit.
    CannonBall,
    /// Timed sphere projectile; fragments into a bullet ring at fuse end.
    Grenade,
    /// Decorative point with a lifetime.
    Spark { life: u32, color: Rgb },
    /// Engine-exhaust spark; burns through a color ramp as it dies.
    FlameSpark { life: u32, color: Rgb },
    /// Staged explosion fragment.
    Exploder {
        class: usize,
        stage: usize,
        /// Ticks until the fragment becomes active; negative once armed.
        activate: i32,
        /// Re-hit gate after damaging a ship.
        hit_delay: u32,
    },
    /// Visual thrust attachment that follows its owner ship.
    AfterburnerFlame,
}

impl EntityKind {
    /// Damage added on top of the impact formula for this projectile kind.
    pub fn damage_bonus(&self) -> f32 {
        match self {
            EntityKind::Bullet { .. } => 2.5,
            EntityKind::CannonBall => 10.0,
            EntityKind::Grenade => 20.0,
            _ => 0.0,
        }
    }
}

/// A simulated object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub policy: NetPolicy,
    pub shape: Shape,
    pub pos: Vec2,
    pub vel: Vec2,
    pub angle: u8,
    pub weight: i32,
    pub age: u32,
    pub remove: bool,
    pub no_grav: bool,
    pub can_hit_objects: bool,
    /// Owning ship, for projectiles and attachments.
    pub owner: Option<EntityId>,
}

impl Entity {
    fn base(kind: EntityKind, policy: NetPolicy, shape: Shape, pos: Vec2, vel: Vec2) -> Self {
        Self {
            id: EntityId(0),
            kind,
            policy,
            shape,
            pos,
            vel,
            angle: 0,
            weight: 0,
            age: 0,
            remove: false,
            no_grav: false,
            can_hit_objects: false,
            owner: None,
        }
    }

    pub fn bullet(owner: EntityId, pos: Vec2, vel: Vec2, color: Rgb, policy: NetPolicy) -> Self {
        let mut e = Self::base(EntityKind::Bullet { color }, policy, Shape::Point, pos, vel);
        e.weight = 1;
        e.owner = Some(owner);
        e
    }

    pub fn cannon_ball(owner: EntityId, pos: Vec2, vel: Vec2) -> Self {
        let mut e = Self::base(
            EntityKind::CannonBall,
            NetPolicy::RemoteAll,
            Shape::sphere(3),
            pos,
            vel,
        );
        e.weight = 25;
        e.owner = Some(owner);
        e
    }

    pub fn grenade(owner: EntityId, pos: Vec2, vel: Vec2) -> Self {
        let mut e = Self::base(
            EntityKind::Grenade,
            NetPolicy::RemoteAdd,
            // Cached squared radius deliberately looser than 2*2.
            Shape::Sphere { radius: 2, radius_sq: 8 },
            pos,
            vel,
        );
        e.weight = 5;
        e.owner = Some(owner);
        e
    }

    pub fn spark(pos: Vec2, vel: Vec2, life: u32, color: Rgb) -> Self {
        Self::base(
            EntityKind::Spark { life, color },
            NetPolicy::Local,
            Shape::Point,
            pos,
            vel,
        )
    }

    pub fn flame_spark(pos: Vec2, vel: Vec2, life: u32, color: Rgb) -> Self {
        Self::base(
            EntityKind::FlameSpark { life, color },
            NetPolicy::Local,
            Shape::Point,
            pos,
            vel,
        )
    }

    pub fn exploder(class: usize, pos: Vec2) -> Self {
        let data = &EXPLODER_CLASSES[class];
        let mut e = Self::base(
            EntityKind::Exploder { class, stage: 0, activate: 0, hit_delay: 0 },
            NetPolicy::LocalProxy,
            Shape::sphere(data.radius),
            pos,
            Vec2::ZERO,
        );
        e.weight = data.weight;
        e.no_grav = true;
        e
    }

    pub fn afterburner_flame(owner: EntityId, pos: Vec2) -> Self {
        let mut e = Self::base(
            EntityKind::AfterburnerFlame,
            NetPolicy::LocalProxy,
            Shape::Point,
            pos,
            Vec2::ZERO,
        );
        e.no_grav = true;
        e.owner = Some(owner);
        e
    }

    /// Squared speed times weight.
    pub fn momentum(&self) -> f32 {
        self.vel.len_sq() * self.weight as f32
    }

    /// Impact damage before rounding: relative speed times weight plus the
    /// kind's bonus.
    pub fn impact_damage(&self, vel_rel: Vec2) -> f32 {
        vel_rel.len() * self.weight as f32 + self.kind.damage_bonus()
    }

    /// Whether this entity participates in collisions at all.
    pub fn collidable(&self) -> bool {
        !matches!(self.kind, EntityKind::AfterburnerFlame)
    }

    pub fn intersects(&self, other: &Entity) -> bool {
        if !self.collidable() || !other.collidable() {
            return false;
        }
        shapes_intersect(self.pos, self.shape, other.pos, other.shape)
    }

    /// Terrain overlap for this entity's shape.
    pub fn on_blocked(&self, mask: &CollisionMask) -> bool {
        self.collidable() && shape_on(self.pos, self.shape, |x, y| mask.blocked(x, y))
    }

    /// Base overlap for this entity's shape.
    pub fn on_base(&self, mask: &CollisionMask) -> bool {
        self.collidable() && shape_on(self.pos, self.shape, |x, y| mask.base(x, y))
    }
}

/// Shape intersection.
///
/// Point-point compares rounded pixels exactly; point-sphere compares the
/// squared distance against the sphere's cached squared radius; two spheres
/// compare against the sum of the squared radii. No fuzz tolerance.
pub fn shapes_intersect(pos_a: Vec2, a: Shape, pos_b: Vec2, b: Shape) -> bool {
    match (a, b) {
        (Shape::Point, Shape::Point) => pos_a.rounded() == pos_b.rounded(),
        (Shape::Point, Shape::Sphere { radius_sq, .. })
        | (Shape::Sphere { radius_sq, .. }, Shape::Point) => {
            (pos_b - pos_a).len_sq() <= radius_sq as f32
        }
        (Shape::Sphere { radius_sq: a_sq, .. }, Shape::Sphere { radius_sq: b_sq, .. }) => {
            (pos_b - pos_a).len_sq() <= (a_sq + b_sq) as f32
        }
    }
}

/// Samples a predicate under a shape: the rounded center for a point, the
/// center plus four compass probes at radius-1 for a sphere.
pub fn shape_on(pos: Vec2, shape: Shape, pred: impl Fn(i32, i32) -> bool) -> bool {
    let (x, y) = pos.rounded();
    match shape {
        Shape::Point => pred(x, y),
        Shape::Sphere { radius, .. } => {
            let r = radius - 1;
            pred(x, y) || pred(x - r, y) || pred(x + r, y) || pred(x, y - r) || pred(x, y + r)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_point_requires_same_pixel() {
        let a = Shape::Point;
        assert!(shapes_intersect(Vec2::new(1.4, 2.4), a, Vec2::new(0.6, 1.6), a));
        assert!(!shapes_intersect(Vec2::new(1.6, 2.0), a, Vec2::new(0.6, 2.0), a));
    }

    #[test]
    fn point_sphere_uses_cached_radius() {
        let sphere = Shape::Sphere { radius: 2, radius_sq: 8 };
        assert!(shapes_intersect(Vec2::new(2.0, 2.0), Shape::Point, Vec2::ZERO, sphere));
        assert!(!shapes_intersect(Vec2::new(3.0, 0.0), Shape::Point, Vec2::ZERO, sphere));
    }

    #[test]
    fn sphere_sphere_uses_sum_of_squared_radii() {
        let a = Shape::sphere(3);
        let b = Shape::sphere(4);
        // 3^2 + 4^2 = 25, so centers five apart still touch.
        assert!(shapes_intersect(Vec2::ZERO, a, Vec2::new(5.0, 0.0), b));
        assert!(!shapes_intersect(Vec2::ZERO, a, Vec2::new(5.1, 0.0), b));
    }

    #[test]
    fn afterburner_flame_never_collides() {
        let flame = Entity::afterburner_flame(EntityId(1), Vec2::ZERO);
        let bullet = Entity::bullet(EntityId(1), Vec2::ZERO, Vec2::ZERO, Rgb::WHITE, NetPolicy::RemoteAdd);
        assert!(!flame.intersects(&bullet));
        assert!(!bullet.intersects(&flame));
    }

    #[test]
    fn damage_bonus_per_kind() {
        assert_eq!(EntityKind::CannonBall.damage_bonus(), 10.0);
        assert_eq!(EntityKind::Grenade.damage_bonus(), 20.0);
        assert_eq!(EntityKind::AfterburnerFlame.damage_bonus(), 0.0);
    }
}
