//! Transform between graph space and world space

use glam::{Mat4, Quat, Vec3};
use navgraph_common::Int3;

/// Affine transform from graph space to world space
///
/// Graph space is the local frame in which a graph's tiles form an axis
/// aligned grid starting at the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphTransform {
    matrix: Mat4,
    inverse: Mat4,
    only_translational: bool,
    translation: Vec3,
}

impl GraphTransform {
    pub fn new(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        let only_translational = scale.abs_diff_eq(Vec3::ONE, 1e-6)
            && rotation.abs_diff_eq(Quat::IDENTITY, 1e-6);
        Self {
            matrix,
            inverse: matrix.inverse(),
            only_translational,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Mat4::IDENTITY)
    }

    /// Graph origin placed at `origin`, rotated around the y axis
    pub fn from_origin_rotation(origin: Vec3, rotation_y_degrees: f32) -> Self {
        Self::new(Mat4::from_rotation_translation(
            Quat::from_rotation_y(rotation_y_degrees.to_radians()),
            origin,
        ))
    }

    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    pub fn is_identity(&self) -> bool {
        self.only_translational && self.translation == Vec3::ZERO
    }

    /// Graph space to world space
    pub fn transform(&self, point: Vec3) -> Vec3 {
        if self.only_translational {
            point + self.translation
        } else {
            self.matrix.transform_point3(point)
        }
    }

    /// World space to graph space
    pub fn inverse_transform(&self, point: Vec3) -> Vec3 {
        if self.only_translational {
            point - self.translation
        } else {
            self.inverse.transform_point3(point)
        }
    }

    pub fn transform_int3(&self, point: Int3) -> Int3 {
        if self.only_translational {
            point + Int3::from_vec3(self.translation)
        } else {
            Int3::from_vec3(self.transform(point.to_vec3()))
        }
    }

    pub fn inverse_transform_int3(&self, point: Int3) -> Int3 {
        if self.only_translational {
            point - Int3::from_vec3(self.translation)
        } else {
            Int3::from_vec3(self.inverse_transform(point.to_vec3()))
        }
    }

    /// Transforms a direction, ignoring translation
    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        self.matrix.transform_vector3(vector)
    }
}

impl Default for GraphTransform {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_round_trip_is_exact_in_int_space() {
        let t = GraphTransform::new(Mat4::from_translation(Vec3::new(1.5, 0.0, -2.0)));
        let p = Int3::new(1234, 5, -678);
        assert_eq!(t.inverse_transform_int3(t.transform_int3(p)), p);
        assert_eq!(t.transform_int3(p), Int3::new(2734, 5, -2678));
    }

    #[test]
    fn test_rotation() {
        let t = GraphTransform::from_origin_rotation(Vec3::ZERO, 90.0);
        let world = t.transform(Vec3::new(1.0, 0.0, 0.0));
        // Rotating +x by 90 degrees around y gives -z
        assert!((world - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5);
        let back = t.inverse_transform(world);
        assert!((back - Vec3::X).length() < 1e-5);
    }
}
