//! Terrain collision mask and map files.
//!
//! A map is a per-pixel classification grid. Entities query two predicates
//! (impassable, home base) and explosions carve discs out of the grid; a
//! carve is visible to the very next query.
//!
//! # Cell codes
//! - `0` passable, drawn in front
//! - `1` passable, drawn behind
//! - `2` impassable
//! - `6` impassable, home base
//! - `8` spawn point
//!
//! On disk a map is JSON: name, gravity, player cap, disallowed weapon
//! names, and the mask as one string of code digits per row.
//!
//! # Usage
//! ```ignore
//! let map = ArenaMap::load("maps/canyon.json")?;
//! let mask = map.mask()?;
//! assert!(mask.blocked(-1, 0)); // out of bounds is solid
//! ```

use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::math::Vec2;

pub const CELL_PASSABLE: u8 = 0;
pub const CELL_PASSABLE_BACK: u8 = 1;
pub const CELL_IMPASSABLE: u8 = 2;
pub const CELL_BASE: u8 = 6;
pub const CELL_SPAWN: u8 = 8;

const BLOCKED_BIT: u8 = 2;
const BASE_BIT: u8 = 4;
const SPAWN_BIT: u8 = 8;

/// Per-pixel terrain classification surface.
#[derive(Debug, Clone)]
pub struct CollisionMask {
    width: i32,
    height: i32,
    cells: Vec<u8>,
}

impl CollisionMask {
    /// Uniform mask, mostly useful for tests and generated maps.
    pub fn filled(width: u32, height: u32, code: u8) -> Self {
        Self {
            width: width as i32,
            height: height as i32,
            cells: vec![code; (width * height) as usize],
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn cell(&self, x: i32, y: i32) -> Option<u8> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            None
        } else {
            Some(self.cells[(y * self.width + x) as usize])
        }
    }

    pub fn set_cell(&mut self, x: i32, y: i32, code: u8) {
        if x >= 0 && y >= 0 && x < self.width && y < self.height {
            self.cells[(y * self.width + x) as usize] = code;
        }
    }

    /// Impassable query. Out-of-bounds coordinates are solid.
    pub fn blocked(&self, x: i32, y: i32) -> bool {
        match self.cell(x, y) {
            Some(code) => code & BLOCKED_BIT != 0,
            None => true,
        }
    }

    /// Home-base query. Out-of-bounds coordinates are not base.
    pub fn base(&self, x: i32, y: i32) -> bool {
        matches!(self.cell(x, y), Some(code) if code & BASE_BIT != 0)
    }

    /// Clears a disc of terrain down to passable. Subsequent queries see
    /// the change immediately.
    pub fn clear_disc(&mut self, cx: i32, cy: i32, radius: i32) {
        let r_sq = radius * radius;
        for y in cy - radius..=cy + radius {
            for x in cx - radius..=cx + radius {
                let (dx, dy) = (x - cx, y - cy);
                if dx * dx + dy * dy <= r_sq {
                    self.set_cell(x, y, CELL_PASSABLE);
                }
            }
        }
    }

    /// All spawn-point cells, in row-major order.
    pub fn spawn_points(&self) -> Vec<Vec2> {
        let mut points = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                if self.cells[(y * self.width + x) as usize] & SPAWN_BIT != 0 {
                    points.push(Vec2::new(x as f32, y as f32));
                }
            }
        }
        points
    }
}

fn default_max_players() -> u32 {
    8
}

/// On-disk map description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaMap {
    pub name: String,
    /// Per-tick gravity acceleration.
    pub gravity: Vec2,
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    /// Weapon kind names this map forbids.
    #[serde(default)]
    pub disallow: Vec<String>,
    /// One string of cell-code digits per row.
    pub rows: Vec<String>,
}

impl ArenaMap {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read map {}", path.display()))?;
        let map: ArenaMap = serde_json::from_str(&text).context("parse map")?;
        map.validate()?;
        Ok(map)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(self).context("serialize map")?;
        std::fs::write(path, text).with_context(|| format!("write map {}", path.display()))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.rows.is_empty() || self.rows[0].is_empty() {
            bail!("map '{}' has an empty mask", self.name);
        }
        let width = self.rows[0].len();
        for (y, row) in self.rows.iter().enumerate() {
            if row.len() != width {
                bail!("map '{}': row {} width {} != {}", self.name, y, row.len(), width);
            }
        }
        Ok(())
    }

    /// Builds the queryable mask. Fails on malformed digits or a map with
    /// no spawn cells (a ship could never enter play).
    pub fn mask(&self) -> anyhow::Result<CollisionMask> {
        self.validate()?;
        let width = self.rows[0].len() as u32;
        let mut mask = CollisionMask::filled(width, self.rows.len() as u32, CELL_PASSABLE);
        for (y, row) in self.rows.iter().enumerate() {
            for (x, ch) in row.chars().enumerate() {
                let code = ch
                    .to_digit(10)
                    .with_context(|| format!("map '{}': bad cell '{}' at {},{}", self.name, ch, x, y))?;
                mask.set_cell(x as i32, y as i32, code as u8);
            }
        }
        if mask.spawn_points().is_empty() {
            bail!("map '{}' has no spawn points", self.name);
        }
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_map() -> ArenaMap {
        ArenaMap {
            name: "test".into(),
            gravity: Vec2::new(0.0, 1.0 / 30.0),
            max_players: 8,
            disallow: Vec::new(),
            rows: vec![
                "22222".into(),
                "20002".into(),
                "20802".into(),
                "26662".into(),
                "22222".into(),
            ],
        }
    }

    #[test]
    fn out_of_bounds_is_blocked_not_base() {
        let mask = small_map().mask().unwrap();
        assert!(mask.blocked(-1, 2));
        assert!(mask.blocked(2, 99));
        assert!(!mask.base(-1, 2));
        assert!(!mask.base(2, 99));
    }

    #[test]
    fn base_and_spawn_cells() {
        let mask = small_map().mask().unwrap();
        assert!(mask.base(1, 3));
        assert!(mask.blocked(1, 3)); // base cells are also solid
        assert!(!mask.base(1, 1));
        assert_eq!(mask.spawn_points(), vec![Vec2::new(2.0, 2.0)]);
    }

    #[test]
    fn clear_disc_is_immediately_visible() {
        let mut mask = small_map().mask().unwrap();
        assert!(mask.blocked(0, 0));
        mask.clear_disc(0, 0, 1);
        assert!(!mask.blocked(0, 0));
        assert!(!mask.blocked(1, 0));
        assert!(mask.blocked(2, 0)); // outside the disc
    }

    #[test]
    fn map_without_spawn_is_rejected() {
        let mut map = small_map();
        map.rows[2] = "20002".into();
        assert!(map.mask().is_err());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let mut map = small_map();
        map.rows[1] = "202".into();
        assert!(map.mask().is_err());
    }
}
