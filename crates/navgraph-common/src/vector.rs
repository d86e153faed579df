//! Fixed-point integer vectors

use glam::Vec3;
use std::fmt;
use std::ops::{Add, AddAssign, Index, IndexMut, Mul, Neg, Sub, SubAssign};

/// Number of integer units per world unit
pub const PRECISION: i32 = 1000;

/// [`PRECISION`] as a float
pub const FLOAT_PRECISION: f32 = 1000.0;

/// Multiply by this to convert integer coordinates to world units
pub const PRECISION_FACTOR: f32 = 0.001;

/// Integer 3D vector in fixed-point space (1 world unit = 1000 units)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct Int3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Int3 {
    pub const ZERO: Int3 = Int3 { x: 0, y: 0, z: 0 };

    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Converts a world-space position, rounding each axis to the nearest unit
    #[inline]
    pub fn from_vec3(v: Vec3) -> Self {
        Self {
            x: (v.x * FLOAT_PRECISION).round() as i32,
            y: (v.y * FLOAT_PRECISION).round() as i32,
            z: (v.z * FLOAT_PRECISION).round() as i32,
        }
    }

    /// Converts back to world units
    #[inline]
    pub fn to_vec3(self) -> Vec3 {
        Vec3::new(
            self.x as f32 * PRECISION_FACTOR,
            self.y as f32 * PRECISION_FACTOR,
            self.z as f32 * PRECISION_FACTOR,
        )
    }

    /// The raw integer components as a float vector, without rescaling
    #[inline]
    pub fn to_raw_vec3(self) -> Vec3 {
        Vec3::new(self.x as f32, self.y as f32, self.z as f32)
    }

    /// Length in integer units
    #[inline]
    pub fn magnitude(self) -> f64 {
        (self.sqr_magnitude_long() as f64).sqrt()
    }

    /// Length rounded to the nearest integer, the unit used for connection costs
    #[inline]
    pub fn cost_magnitude(self) -> i32 {
        self.magnitude().round() as i32
    }

    #[inline]
    pub fn sqr_magnitude_long(self) -> i64 {
        let (x, y, z) = (self.x as i64, self.y as i64, self.z as i64);
        x * x + y * y + z * z
    }

    #[inline]
    pub fn dot_long(self, other: Int3) -> i64 {
        self.x as i64 * other.x as i64 + self.y as i64 * other.y as i64 + self.z as i64 * other.z as i64
    }

    /// Drops the y axis
    #[inline]
    pub fn xz(self) -> Int2 {
        Int2::new(self.x, self.z)
    }

    #[inline]
    pub fn min(self, other: Int3) -> Int3 {
        Int3::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    #[inline]
    pub fn max(self, other: Int3) -> Int3 {
        Int3::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }
}

impl From<Vec3> for Int3 {
    fn from(v: Vec3) -> Self {
        Int3::from_vec3(v)
    }
}

impl From<Int3> for Vec3 {
    fn from(v: Int3) -> Self {
        v.to_vec3()
    }
}

impl Add for Int3 {
    type Output = Int3;
    #[inline]
    fn add(self, rhs: Int3) -> Int3 {
        Int3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Int3 {
    #[inline]
    fn add_assign(&mut self, rhs: Int3) {
        *self = *self + rhs;
    }
}

impl Sub for Int3 {
    type Output = Int3;
    #[inline]
    fn sub(self, rhs: Int3) -> Int3 {
        Int3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for Int3 {
    #[inline]
    fn sub_assign(&mut self, rhs: Int3) {
        *self = *self - rhs;
    }
}

impl Neg for Int3 {
    type Output = Int3;
    #[inline]
    fn neg(self) -> Int3 {
        Int3::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<i32> for Int3 {
    type Output = Int3;
    #[inline]
    fn mul(self, rhs: i32) -> Int3 {
        Int3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Mul<f32> for Int3 {
    type Output = Int3;
    #[inline]
    fn mul(self, rhs: f32) -> Int3 {
        Int3::new(
            (self.x as f32 * rhs).round() as i32,
            (self.y as f32 * rhs).round() as i32,
            (self.z as f32 * rhs).round() as i32,
        )
    }
}

impl Index<usize> for Int3 {
    type Output = i32;

    fn index(&self, axis: usize) -> &i32 {
        match axis {
            0 => &self.x,
            1 => &self.y,
            2 => &self.z,
            _ => panic!("Int3 axis out of range: {axis}"),
        }
    }
}

impl IndexMut<usize> for Int3 {
    fn index_mut(&mut self, axis: usize) -> &mut i32 {
        match axis {
            0 => &mut self.x,
            1 => &mut self.y,
            2 => &mut self.z,
            _ => panic!("Int3 axis out of range: {axis}"),
        }
    }
}

impl fmt::Display for Int3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Integer 2D vector, usually the XZ projection of an [`Int3`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct Int2 {
    pub x: i32,
    pub y: i32,
}

impl Int2 {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn sqr_magnitude_long(self) -> i64 {
        self.x as i64 * self.x as i64 + self.y as i64 * self.y as i64
    }

    #[inline]
    pub fn dot_long(self, other: Int2) -> i64 {
        self.x as i64 * other.x as i64 + self.y as i64 * other.y as i64
    }

    /// Rotates by a multiple of 90 degrees
    pub fn rotate(self, quarter_turns: i32) -> Int2 {
        match quarter_turns.rem_euclid(4) {
            0 => self,
            1 => Int2::new(self.y, -self.x),
            2 => Int2::new(-self.x, -self.y),
            _ => Int2::new(-self.y, self.x),
        }
    }
}

impl Add for Int2 {
    type Output = Int2;
    #[inline]
    fn add(self, rhs: Int2) -> Int2 {
        Int2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Int2 {
    type Output = Int2;
    #[inline]
    fn sub(self, rhs: Int2) -> Int2 {
        Int2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl fmt::Display for Int2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_conversion_rounds_to_nearest() {
        let v = Int3::from_vec3(Vec3::new(1.0004, -2.0007, 0.0006));
        assert_eq!(v, Int3::new(1000, -2001, 1));

        let back = Int3::new(1500, 0, -250).to_vec3();
        assert!((back.x - 1.5).abs() < 1e-6);
        assert!((back.z + 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_cost_magnitude() {
        assert_eq!(Int3::new(3000, 0, 4000).cost_magnitude(), 5000);
        assert_eq!(Int3::new(1, 1, 0).cost_magnitude(), 1);
        assert_eq!(Int3::ZERO.cost_magnitude(), 0);
    }

    #[test]
    fn test_large_coordinates_do_not_overflow() {
        let v = Int3::new(2_000_000_000, 0, 2_000_000_000);
        assert_eq!(v.sqr_magnitude_long(), 8_000_000_000_000_000_000);
    }

    #[test]
    fn test_int2_rotation() {
        let v = Int2::new(1, 2);
        assert_eq!(v.rotate(4), v);
        assert_eq!(v.rotate(2), Int2::new(-1, -2));
        assert_eq!(v.rotate(1).rotate(3), v);
    }
}
