//! Orientation predicates and closest-point math
//!
//! The integer predicates work on the XZ plane and widen to `i64` before
//! multiplying, so they are exact for any coordinate representable in an
//! [`Int3`]. The float variants are used where results are only consumed as
//! output positions.

use crate::Int3;
use glam::{Vec2, Vec3};

/// Which side of a directed line a point lies on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    Colinear = 0,
    Left = 1,
    Right = 2,
}

impl Side {
    /// Two-bit code used by lookup tables
    #[inline]
    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// Twice the signed area of the triangle `abc` projected on XZ.
/// Negative for clockwise triangles.
#[inline]
pub fn signed_triangle_area_times2_xz(a: Int3, b: Int3, c: Int3) -> i64 {
    (b.x as i64 - a.x as i64) * (c.z as i64 - a.z as i64)
        - (c.x as i64 - a.x as i64) * (b.z as i64 - a.z as i64)
}

/// Side of the line `a -> b` that `p` lies on, seen from above
#[inline]
pub fn side_xz(a: Int3, b: Int3, p: Int3) -> Side {
    let s = signed_triangle_area_times2_xz(a, b, p);
    if s > 0 {
        Side::Left
    } else if s < 0 {
        Side::Right
    } else {
        Side::Colinear
    }
}

#[inline]
pub fn right_xz(a: Int3, b: Int3, p: Int3) -> bool {
    signed_triangle_area_times2_xz(a, b, p) < 0
}

#[inline]
pub fn right_or_colinear_xz(a: Int3, b: Int3, p: Int3) -> bool {
    signed_triangle_area_times2_xz(a, b, p) <= 0
}

/// True if `a, b, c` wind clockwise in the XZ plane
#[inline]
pub fn is_clockwise_xz(a: Int3, b: Int3, c: Int3) -> bool {
    right_xz(a, b, c)
}

#[inline]
pub fn is_clockwise_or_colinear_xz(a: Int3, b: Int3, c: Int3) -> bool {
    right_or_colinear_xz(a, b, c)
}

#[inline]
pub fn is_colinear_xz(a: Int3, b: Int3, c: Int3) -> bool {
    signed_triangle_area_times2_xz(a, b, c) == 0
}

/// Float version of [`signed_triangle_area_times2_xz`]
#[inline]
pub fn signed_triangle_area_times2_xz_f(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    (b.x - a.x) * (c.z - a.z) - (c.x - a.x) * (b.z - a.z)
}

/// Intersection of the infinite lines `start1 -> end1` and `start2 -> end2` on XZ.
///
/// Returns `start1` if the lines are parallel. The y coordinate is interpolated
/// along the first line.
pub fn line_intersection_point_xz(start1: Vec3, end1: Vec3, start2: Vec3, end2: Vec3) -> Vec3 {
    let dir1 = end1 - start1;
    let dir2 = end2 - start2;
    let den = dir2.z * dir1.x - dir2.x * dir1.z;
    if den == 0.0 {
        return start1;
    }
    let nom = dir2.x * (start1.z - start2.z) - dir2.z * (start1.x - start2.x);
    let u = nom / den;
    start1 + dir1 * u
}

/// Parameters along both segments where the infinite lines through them cross.
///
/// Returns `None` for parallel lines. A factor in `[0, 1]` lies on the segment.
pub fn line_intersection_factor_xz(
    start1: Int3,
    end1: Int3,
    start2: Int3,
    end2: Int3,
) -> Option<(f32, f32)> {
    let dir1 = end1 - start1;
    let dir2 = end2 - start2;
    let den = dir2.z as i64 * dir1.x as i64 - dir2.x as i64 * dir1.z as i64;
    if den == 0 {
        return None;
    }
    let nom1 = dir2.x as i64 * (start1.z as i64 - start2.z as i64)
        - dir2.z as i64 * (start1.x as i64 - start2.x as i64);
    let nom2 = dir1.x as i64 * (start1.z as i64 - start2.z as i64)
        - dir1.z as i64 * (start1.x as i64 - start2.x as i64);
    Some((nom1 as f32 / den as f32, nom2 as f32 / den as f32))
}

/// True if the segments `a1 -> b1` and `a2 -> b2` intersect on XZ, endpoints included
pub fn segments_intersect_xz(a1: Int3, b1: Int3, a2: Int3, b2: Int3) -> bool {
    let d1 = side_xz(a2, b2, a1);
    let d2 = side_xz(a2, b2, b1);
    let d3 = side_xz(a1, b1, a2);
    let d4 = side_xz(a1, b1, b2);
    let on_segment = |a: Int3, b: Int3, p: Int3| {
        is_colinear_xz(a, b, p)
            && p.x >= a.x.min(b.x)
            && p.x <= a.x.max(b.x)
            && p.z >= a.z.min(b.z)
            && p.z <= a.z.max(b.z)
    };
    let proper = d1 != Side::Colinear
        && d2 != Side::Colinear
        && d3 != Side::Colinear
        && d4 != Side::Colinear
        && d1 != d2
        && d3 != d4;
    proper
        || on_segment(a2, b2, a1)
        || on_segment(a2, b2, b1)
        || on_segment(a1, b1, a2)
        || on_segment(a1, b1, b2)
}

/// Squared distance between the segments `s1 -> e1` and `s2 -> e2`
pub fn sqr_distance_segment_segment(s1: Vec3, e1: Vec3, s2: Vec3, e2: Vec3) -> f32 {
    let u = e1 - s1;
    let v = e2 - s2;
    let w = s1 - s2;
    let a = u.dot(u);
    let b = u.dot(v);
    let c = v.dot(v);
    let d = u.dot(w);
    let e = v.dot(w);
    let big_d = a * c - b * b;

    let (mut s_n, mut s_d, mut t_n, t_d) = if big_d < 0.000001 {
        // Parallel segments
        (0.0f32, 1.0f32, e, c)
    } else {
        let s_n = b * e - c * d;
        let t_n = a * e - b * d;
        if s_n < 0.0 {
            (0.0, big_d, e, c)
        } else if s_n > big_d {
            (big_d, big_d, e + b, c)
        } else {
            (s_n, big_d, t_n, big_d)
        }
    };

    if t_n < 0.0 {
        t_n = 0.0;
        if -d < 0.0 {
            s_n = 0.0;
        } else if -d > a {
            s_n = s_d;
        } else {
            s_n = -d;
            s_d = a;
        }
    } else if t_n > t_d {
        t_n = t_d;
        if (-d + b) < 0.0 {
            s_n = 0.0;
        } else if (-d + b) > a {
            s_n = s_d;
        } else {
            s_n = -d + b;
            s_d = a;
        }
    }

    let sc = if s_n.abs() < 0.000001 { 0.0 } else { s_n / s_d };
    let tc = if t_n.abs() < 0.000001 { 0.0 } else { t_n / t_d };

    let dp = w + (u * sc) - (v * tc);
    dp.length_squared()
}

/// Closest point to `p` on the segment `a -> b`
pub fn closest_point_on_segment(a: Vec3, b: Vec3, p: Vec3) -> Vec3 {
    let dir = b - a;
    let sqr_len = dir.length_squared();
    if sqr_len <= 0.000001 {
        return a;
    }
    let factor = ((p - a).dot(dir) / sqr_len).clamp(0.0, 1.0);
    a + dir * factor
}

/// Factor along `a -> b` of the point closest to `p`, projected on XZ, unclamped
pub fn closest_point_on_line_factor_xz(a: Vec3, b: Vec3, p: Vec3) -> f32 {
    let dir = Vec2::new(b.x - a.x, b.z - a.z);
    let sqr_len = dir.length_squared();
    if sqr_len <= 0.000001 {
        return 0.0;
    }
    Vec2::new(p.x - a.x, p.z - a.z).dot(dir) / sqr_len
}

/// Closest point to `p` on the triangle `abc`, in 3D
pub fn closest_point_on_triangle(a: Vec3, b: Vec3, c: Vec3, p: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if d1 >= 0.0 && d3 <= 0.0 && vc <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if d2 >= 0.0 && d6 <= 0.0 && vb <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 && va <= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Closest point to `p` on the triangle `abc` measured on XZ only.
///
/// A point inside the triangle keeps its x and z, with y interpolated on the
/// triangle surface. Outside points snap to the closest edge or vertex.
pub fn closest_point_on_triangle_xz(a: Vec3, b: Vec3, c: Vec3, p: Vec3) -> Vec3 {
    let ab = Vec2::new(b.x - a.x, b.z - a.z);
    let ac = Vec2::new(c.x - a.x, c.z - a.z);
    let ap = Vec2::new(p.x - a.x, p.z - a.z);

    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = Vec2::new(p.x - b.x, p.z - b.z);
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if d1 >= 0.0 && d3 <= 0.0 && vc <= 0.0 {
        let v = d1 / (d1 - d3);
        return a.lerp(b, v);
    }

    let cp = Vec2::new(p.x - c.x, p.z - c.z);
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if d2 >= 0.0 && d6 <= 0.0 && vb <= 0.0 {
        let w = d2 / (d2 - d6);
        return a.lerp(c, w);
    }

    let va = d3 * d6 - d5 * d4;
    if (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 && va <= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b.lerp(c, w);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    // Keep the query's xz exactly, only the height comes from the surface
    Vec3::new(p.x, (a + (b - a) * v + (c - a) * w).y, p.z)
}

/// Squared distance on the XZ plane
#[inline]
pub fn sqr_distance_xz(a: Vec3, b: Vec3) -> f32 {
    let dx = a.x - b.x;
    let dz = a.z - b.z;
    dx * dx + dz * dz
}

/// Get the next power of 2 greater than or equal to x
#[inline]
pub fn next_pow2(x: usize) -> usize {
    x.max(1).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_xz() {
        let a = Int3::new(0, 0, 0);
        let b = Int3::new(0, 0, 1000);
        assert_eq!(side_xz(a, b, Int3::new(-1000, 0, 500)), Side::Left);
        assert_eq!(side_xz(a, b, Int3::new(1000, 0, 500)), Side::Right);
        assert_eq!(side_xz(a, b, Int3::new(0, 5000, 3000)), Side::Colinear);
    }

    #[test]
    fn test_clockwise_winding() {
        let a = Int3::new(0, 0, 0);
        let b = Int3::new(0, 0, 1000);
        let c = Int3::new(1000, 0, 0);
        assert!(is_clockwise_xz(a, b, c));
        assert!(!is_clockwise_xz(a, c, b));
        assert!(signed_triangle_area_times2_xz(a, b, c) < 0);
    }

    #[test]
    fn test_line_intersection_point() {
        let p = line_intersection_point_xz(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 2.0, 0.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, 1.0),
        );
        assert!((p - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-5);

        // Parallel lines return the first start point
        let parallel = line_intersection_point_xz(
            Vec3::ZERO,
            Vec3::X,
            Vec3::Z,
            Vec3::new(1.0, 0.0, 1.0),
        );
        assert_eq!(parallel, Vec3::ZERO);
    }

    #[test]
    fn test_line_intersection_factor() {
        let f = line_intersection_factor_xz(
            Int3::new(0, 0, 0),
            Int3::new(2000, 0, 0),
            Int3::new(500, 0, -1000),
            Int3::new(500, 0, 1000),
        );
        let (a, b) = f.unwrap();
        assert!((a - 0.25).abs() < 1e-6);
        assert!((b - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_segment_distance() {
        let d = sqr_distance_segment_segment(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.5),
            Vec3::new(1.0, 1.0, 0.5),
        );
        assert!((d - 1.25).abs() < 1e-5);

        let crossing = sqr_distance_segment_segment(
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::new(0.0, 0.0, 1.0),
        );
        assert!(crossing.abs() < 1e-6);
    }

    #[test]
    fn test_closest_point_on_triangle_regions() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(0.0, 0.0, 1.0);
        let c = Vec3::new(1.0, 0.0, 0.0);

        // Vertex region
        assert_eq!(closest_point_on_triangle(a, b, c, Vec3::new(-1.0, 0.0, -1.0)), a);
        // Inside, projected onto the plane
        let inside = closest_point_on_triangle(a, b, c, Vec3::new(0.2, 3.0, 0.2));
        assert!((inside - Vec3::new(0.2, 0.0, 0.2)).length() < 1e-5);
        // Edge region
        let edge = closest_point_on_triangle(a, b, c, Vec3::new(-1.0, 0.0, 0.5));
        assert!((edge - Vec3::new(0.0, 0.0, 0.5)).length() < 1e-5);
    }

    #[test]
    fn test_closest_point_on_triangle_xz_keeps_inside_xz() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(0.0, 1.0, 2.0);
        let c = Vec3::new(2.0, 0.0, 0.0);
        let p = Vec3::new(0.5, 10.0, 0.5);
        let q = closest_point_on_triangle_xz(a, b, c, p);
        assert_eq!(q.x, 0.5);
        assert_eq!(q.z, 0.5);
        assert!((q.y - 0.25).abs() < 1e-5);
    }
}
