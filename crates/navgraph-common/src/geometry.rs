//! Triangle and polygon containment on the XZ plane

use crate::{is_clockwise_or_colinear_xz, signed_triangle_area_times2_xz_f, Int3};
use glam::Vec3;

/// True if `p` lies inside or on the border of the clockwise triangle `abc`
#[inline]
pub fn contains_point_xz(a: Int3, b: Int3, c: Int3, p: Int3) -> bool {
    is_clockwise_or_colinear_xz(a, b, p)
        && is_clockwise_or_colinear_xz(b, c, p)
        && is_clockwise_or_colinear_xz(c, a, p)
}

/// Float variant of [`contains_point_xz`] with a small tolerance on each edge
pub fn contains_point_xz_f(a: Vec3, b: Vec3, c: Vec3, p: Vec3) -> bool {
    const MARGIN: f32 = 0.000001;
    signed_triangle_area_times2_xz_f(a, b, p) <= MARGIN
        && signed_triangle_area_times2_xz_f(b, c, p) <= MARGIN
        && signed_triangle_area_times2_xz_f(c, a, p) <= MARGIN
}

/// Even-odd containment test for an arbitrary polygon on XZ
pub fn polygon_contains_point_xz(polygon: &[Vec3], p: Vec3) -> bool {
    let mut inside = false;
    let mut j = polygon.len().wrapping_sub(1);
    for i in 0..polygon.len() {
        let (vi, vj) = (polygon[i], polygon[j]);
        if ((vi.z <= p.z && p.z < vj.z) || (vj.z <= p.z && p.z < vi.z))
            && p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Area of the triangle in XZ, in world units squared
pub fn triangle_area_xz(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    signed_triangle_area_times2_xz_f(a, b, c).abs() * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_point_clockwise_triangle() {
        let a = Int3::new(0, 0, 0);
        let b = Int3::new(0, 0, 1000);
        let c = Int3::new(1000, 0, 0);
        assert!(contains_point_xz(a, b, c, Int3::new(200, 0, 200)));
        assert!(contains_point_xz(a, b, c, Int3::new(0, 0, 500)));
        assert!(!contains_point_xz(a, b, c, Int3::new(800, 0, 800)));
        // Counter-clockwise winding contains nothing
        assert!(!contains_point_xz(a, c, b, Int3::new(200, 0, 200)));
    }

    #[test]
    fn test_polygon_contains_point() {
        let square = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 2.0),
            Vec3::new(2.0, 0.0, 2.0),
            Vec3::new(2.0, 0.0, 0.0),
        ];
        assert!(polygon_contains_point_xz(&square, Vec3::new(1.0, 5.0, 1.0)));
        assert!(!polygon_contains_point_xz(&square, Vec3::new(3.0, 0.0, 1.0)));
    }

    #[test]
    fn test_triangle_area() {
        let area = triangle_area_xz(Vec3::ZERO, Vec3::new(0.0, 0.0, 2.0), Vec3::new(2.0, 0.0, 0.0));
        assert!((area - 2.0).abs() < 1e-6);
    }
}
