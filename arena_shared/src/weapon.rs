//! Weapon subsystem.
//!
//! A weapon is a small state machine: idle until fired, then counting a
//! reload timer back to zero. Firing itself (projectile spawning, recoil,
//! afterburner thrust) is driven from the world stepper, which is the only
//! place with access to the entity set; this module owns the per-instance
//! state and the stat tables.

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// Every selectable weapon kind, guns and specials alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeaponKind {
    MachineGun,
    DualMachineGun,
    FbMachineGun,
    WavyMachineGun,
    Cannon,
    GrenadeLauncher,
    Afterburner,
}

impl WeaponKind {
    /// Display name, also used as the wire identifier in `MapInfo`.
    pub fn name(self) -> &'static str {
        match self {
            WeaponKind::MachineGun => "Machine Gun",
            WeaponKind::DualMachineGun => "Dual Gun",
            WeaponKind::FbMachineGun => "2-Way Gun",
            WeaponKind::WavyMachineGun => "Wavy Gun",
            WeaponKind::Cannon => "Cannon",
            WeaponKind::GrenadeLauncher => "Grenade Launcher",
            WeaponKind::Afterburner => "Afterburner",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            WeaponKind::MachineGun,
            WeaponKind::DualMachineGun,
            WeaponKind::FbMachineGun,
            WeaponKind::WavyMachineGun,
            WeaponKind::Cannon,
            WeaponKind::GrenadeLauncher,
            WeaponKind::Afterburner,
        ]
        .into_iter()
        .find(|k| k.name() == name)
    }

    /// Reload ticks charged on a successful shot.
    pub fn reload_ticks(self) -> u32 {
        match self {
            WeaponKind::MachineGun => 2,
            WeaponKind::DualMachineGun => 3,
            WeaponKind::FbMachineGun => 2,
            WeaponKind::WavyMachineGun => 2,
            WeaponKind::Cannon => 30,
            WeaponKind::GrenadeLauncher => 40,
            WeaponKind::Afterburner => 0,
        }
    }

    /// (max ammo, passive fill delay, passive fill count).
    fn stats(self) -> (i32, u32, i32) {
        match self {
            WeaponKind::MachineGun => (400, 0, 2),
            WeaponKind::DualMachineGun => (400, 0, 2),
            WeaponKind::FbMachineGun => (400, 0, 2),
            WeaponKind::WavyMachineGun => (300, 0, 2),
            WeaponKind::Cannon => (12, 18, 1),
            WeaponKind::GrenadeLauncher => (8, 25, 1),
            WeaponKind::Afterburner => (250, 2, 7),
        }
    }
}

/// Per-ship armament instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Weapon {
    pub kind: WeaponKind,
    pub ammo: i32,
    pub max_ammo: i32,
    /// Ticks until the next shot is allowed.
    pub reload: u32,
    pub fill_delay: u32,
    pub fill_count: i32,
    /// Wavy-gun sweep counter; advances per shot on both sides.
    pub phase: u32,
    /// Afterburner: last tick the trigger was held.
    pub fired_tick: u32,
    /// Afterburner: whether the flame attachment is live.
    pub firing: bool,
    /// Afterburner: the flame attachment entity, if spawned.
    pub flame: Option<EntityId>,
}

impl Weapon {
    pub fn new(kind: WeaponKind) -> Self {
        let (max_ammo, fill_delay, fill_count) = kind.stats();
        Self {
            kind,
            ammo: max_ammo,
            max_ammo,
            reload: 0,
            fill_delay,
            fill_count,
            phase: 0,
            fired_tick: u32::MAX,
            firing: false,
            flame: None,
        }
    }

    /// Ticks the reload countdown. Runs unconditionally every tick.
    pub fn think(&mut self) {
        if self.reload > 0 {
            self.reload -= 1;
        }
    }

    pub fn can_fire(&self) -> bool {
        self.reload == 0 && self.ammo > 0
    }

    /// Passive refill while the ship rests on its home base, gated to
    /// every `fill_delay + 1` ticks.
    pub fn refill(&mut self, tick: u32) {
        if self.ammo < self.max_ammo && (self.fill_delay == 0 || tick % (self.fill_delay + 1) == 0) {
            self.ammo = (self.ammo + self.fill_count).min(self.max_ammo);
        }
    }

    /// Replacement instance for a base-menu swap, carrying ammo over
    /// proportionally: `new_max * old_ammo / (old_max * 2)`.
    pub fn swapped_to(&self, kind: WeaponKind) -> Weapon {
        let mut next = Weapon::new(kind);
        next.ammo = next.max_ammo * self.ammo / (self.max_ammo * 2);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn think_counts_reload_to_zero_and_stays() {
        let mut w = Weapon::new(WeaponKind::Cannon);
        w.reload = w.kind.reload_ticks();
        for _ in 0..30 {
            assert!(!w.can_fire());
            w.think();
        }
        assert_eq!(w.reload, 0);
        assert!(w.can_fire());
        w.think();
        assert_eq!(w.reload, 0);
    }

    #[test]
    fn swap_preserves_ammo_bounds() {
        for kind in [
            WeaponKind::MachineGun,
            WeaponKind::WavyMachineGun,
            WeaponKind::Cannon,
            WeaponKind::GrenadeLauncher,
            WeaponKind::Afterburner,
        ] {
            for ammo in [0, 1, 7, 399] {
                let mut old = Weapon::new(WeaponKind::MachineGun);
                old.ammo = ammo.min(old.max_ammo);
                let next = old.swapped_to(kind);
                assert!(next.ammo >= 0, "swap to {:?} from {} went negative", kind, ammo);
                assert!(next.ammo <= next.max_ammo);
            }
        }
    }

    #[test]
    fn swap_at_full_ammo_yields_half() {
        let old = Weapon::new(WeaponKind::Cannon); // 12/12
        let next = old.swapped_to(WeaponKind::GrenadeLauncher); // max 8
        assert_eq!(next.ammo, 4);
    }

    #[test]
    fn refill_respects_delay_gate() {
        let mut w = Weapon::new(WeaponKind::Cannon); // fill_delay 18, count 1
        w.ammo = 0;
        for tick in 0..19 {
            w.refill(tick);
        }
        // Only tick 0 passes the `tick % 19 == 0` gate in that window.
        assert_eq!(w.ammo, 1);
        w.refill(19);
        assert_eq!(w.ammo, 2);
    }

    #[test]
    fn refill_clamps_at_max() {
        let mut w = Weapon::new(WeaponKind::Afterburner); // fill 7 every 3 ticks
        w.ammo = w.max_ammo - 2;
        w.refill(3);
        assert_eq!(w.ammo, w.max_ammo);
    }

    #[test]
    fn kind_names_roundtrip() {
        for kind in [
            WeaponKind::MachineGun,
            WeaponKind::DualMachineGun,
            WeaponKind::FbMachineGun,
            WeaponKind::WavyMachineGun,
            WeaponKind::Cannon,
            WeaponKind::GrenadeLauncher,
            WeaponKind::Afterburner,
        ] {
            assert_eq!(WeaponKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(WeaponKind::from_name("Phaser"), None);
    }
}
