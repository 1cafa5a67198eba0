//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics.

use serde::{Deserialize, Serialize};

/// 2D vector. Screen coordinates: +x right, +y down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn len(self) -> f32 {
        self.len_sq().sqrt()
    }

    /// Nearest-pixel coordinates.
    pub fn rounded(self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl std::ops::Div<f32> for Vec2 {
    type Output = Vec2;
    fn div(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x / rhs, self.y / rhs)
    }
}

impl std::ops::Neg for Vec2 {
    type Output = Vec2;
    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

impl std::ops::AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Vec2) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

/// Unit vector for a facing angle on the 256-step circle.
///
/// Angle 0 points straight up; increasing angles rotate clockwise
/// (screen coordinates, +y down). Angle 64 points right.
pub fn dir(angle: u8) -> Vec2 {
    let t = angle as f32 * (std::f32::consts::TAU / 256.0);
    Vec2::new(t.sin(), -t.cos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_cardinal_points() {
        let up = dir(0);
        assert!(up.x.abs() < 1e-6 && (up.y + 1.0).abs() < 1e-6);

        let right = dir(64);
        assert!((right.x - 1.0).abs() < 1e-6 && right.y.abs() < 1e-6);

        let down = dir(128);
        assert!(down.x.abs() < 1e-5 && (down.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn dir_is_unit_length() {
        for a in [0u8, 17, 100, 200, 255] {
            assert!((dir(a).len() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn rounded_uses_nearest_pixel() {
        assert_eq!(Vec2::new(1.5, -0.4).rounded(), (2, 0));
        assert_eq!(Vec2::new(-1.6, 3.49).rounded(), (-2, 3));
    }
}
