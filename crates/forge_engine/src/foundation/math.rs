//! Math types and helpers built on nalgebra
//!
//! The engine standardizes on `f32` vectors and column-major 4x4 matrices.
//! Everything here is a thin veneer over nalgebra so the rest of the code
//! can speak in engine terms (`Vec3`, `Mat4`) rather than generic ones.

use nalgebra as na;

/// 2D vector of f32.
pub type Vec2 = na::Vector2<f32>;
/// 3D vector of f32.
pub type Vec3 = na::Vector3<f32>;
/// 4D vector of f32.
pub type Vec4 = na::Vector4<f32>;
/// Column-major 4x4 matrix of f32.
pub type Mat4 = na::Matrix4<f32>;

/// Converts degrees to radians.
#[inline]
pub fn deg_to_rad(degrees: f32) -> f32 {
    degrees * (std::f32::consts::PI / 180.0)
}

/// Extension helpers on [`Mat4`] for the transforms the renderer needs.
pub trait Mat4Ext {
    /// Right-handed perspective projection.
    fn perspective(fov_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4;

    /// Orthographic projection.
    fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4;

    /// Translation matrix.
    fn translation(position: Vec3) -> Mat4;

    /// Rotation matrix from Euler angles applied in x, y, z order
    /// (pitch, yaw, roll).
    fn euler_xyz(x_radians: f32, y_radians: f32, z_radians: f32) -> Mat4;

    /// Inverse of the matrix, or identity when the matrix is singular.
    fn inverse_or_identity(&self) -> Mat4;
}

impl Mat4Ext for Mat4 {
    fn perspective(fov_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        na::Perspective3::new(aspect, fov_radians, near, far).to_homogeneous()
    }

    fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
        na::Orthographic3::new(left, right, bottom, top, near, far).to_homogeneous()
    }

    fn translation(position: Vec3) -> Mat4 {
        na::Translation3::from(position).to_homogeneous()
    }

    fn euler_xyz(x_radians: f32, y_radians: f32, z_radians: f32) -> Mat4 {
        let rx = na::Rotation3::from_axis_angle(&Vec3::x_axis(), x_radians);
        let ry = na::Rotation3::from_axis_angle(&Vec3::y_axis(), y_radians);
        let rz = na::Rotation3::from_axis_angle(&Vec3::z_axis(), z_radians);
        (rx * ry * rz).to_homogeneous()
    }

    fn inverse_or_identity(&self) -> Mat4 {
        self.try_inverse().unwrap_or_else(Mat4::identity)
    }
}

/// Forward direction (-Z) for the given Euler rotation.
pub fn forward_from_euler(rotation: Vec3) -> Vec3 {
    let m = Mat4::euler_xyz(rotation.x, rotation.y, rotation.z);
    // third column is the local Z axis; forward looks down -Z
    -Vec3::new(m[(0, 2)], m[(1, 2)], m[(2, 2)]).normalize()
}

/// Backward direction (+Z) for the given Euler rotation.
pub fn backward_from_euler(rotation: Vec3) -> Vec3 {
    -forward_from_euler(rotation)
}

/// Left direction (-X) for the given Euler rotation.
pub fn left_from_euler(rotation: Vec3) -> Vec3 {
    let m = Mat4::euler_xyz(rotation.x, rotation.y, rotation.z);
    -Vec3::new(m[(0, 0)], m[(1, 0)], m[(2, 0)]).normalize()
}

/// Right direction (+X) for the given Euler rotation.
pub fn right_from_euler(rotation: Vec3) -> Vec3 {
    -left_from_euler(rotation)
}

/// Up direction (+Y) for the given Euler rotation.
pub fn up_from_euler(rotation: Vec3) -> Vec3 {
    let m = Mat4::euler_xyz(rotation.x, rotation.y, rotation.z);
    Vec3::new(m[(0, 1)], m[(1, 1)], m[(2, 1)]).normalize()
}

/// An `(offset, size)` window,
/// used for push-constant layout bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Range {
    /// Offset in bytes.
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
}

/// Returns `operand` rounded up to the next multiple of `granularity`.
/// `granularity` must be a power of two.
#[inline]
pub fn get_aligned(operand: u64, granularity: u64) -> u64 {
    (operand + (granularity - 1)) & !(granularity - 1)
}

/// Returns a [`Range`] whose offset and size are both aligned to
/// `granularity`.
#[inline]
pub fn get_aligned_range(offset: u64, size: u64, granularity: u64) -> Range {
    Range {
        offset: get_aligned(offset, granularity),
        size: get_aligned(size, granularity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_deg_to_rad() {
        assert_relative_eq!(deg_to_rad(180.0), std::f32::consts::PI);
        assert_relative_eq!(deg_to_rad(90.0), std::f32::consts::FRAC_PI_2);
    }

    #[test]
    fn test_translation_moves_points() {
        let m = Mat4::translation(Vec3::new(1.0, 2.0, 3.0));
        let p = m.transform_point(&nalgebra::Point3::origin());
        assert_relative_eq!(p.x, 1.0);
        assert_relative_eq!(p.y, 2.0);
        assert_relative_eq!(p.z, 3.0);
    }

    #[test]
    fn test_identity_euler_directions() {
        let zero = Vec3::zeros();
        let fwd = forward_from_euler(zero);
        assert_relative_eq!(fwd.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(fwd.z, -1.0, epsilon = 1e-6);

        // left/right live on the X axis, distinct from forward/backward
        let left = left_from_euler(zero);
        assert_relative_eq!(left.x, -1.0, epsilon = 1e-6);
        let right = right_from_euler(zero);
        assert_relative_eq!(right.x, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_yaw_rotates_forward() {
        // yaw 90 degrees turns -Z into -X
        let fwd = forward_from_euler(Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0));
        assert_relative_eq!(fwd.x, -1.0, epsilon = 1e-5);
        assert_relative_eq!(fwd.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_get_aligned() {
        assert_eq!(get_aligned(0, 4), 0);
        assert_eq!(get_aligned(1, 4), 4);
        assert_eq!(get_aligned(4, 4), 4);
        assert_eq!(get_aligned(5, 4), 8);
        assert_eq!(get_aligned(100, 256), 256);
    }

    #[test]
    fn test_get_aligned_range() {
        let r = get_aligned_range(3, 6, 4);
        assert_eq!(r.offset, 4);
        assert_eq!(r.size, 8);
    }

    #[test]
    fn test_inverse_or_identity_on_singular() {
        let singular = Mat4::zeros();
        assert_eq!(singular.inverse_or_identity(), Mat4::identity());
    }
}
