//! Camera system
//!
//! Cameras hold a position and Euler rotation and rebuild their view
//! matrix lazily on access. The system stores reference-counted named
//! cameras; a process-wide `default` camera always exists and is never
//! released.

use std::collections::HashMap;

use crate::foundation::math::{
    backward_from_euler, forward_from_euler, left_from_euler, right_from_euler, Mat4, Mat4Ext,
    Vec3,
};
use crate::INVALID_ID_U16;

/// Name of the default camera.
pub const DEFAULT_CAMERA_NAME: &str = "default";

/// A camera with lazy view-matrix rebuild.
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    euler_rotation: Vec3,
    is_dirty: bool,
    view: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

impl Camera {
    /// Creates a camera at the origin with identity view.
    pub fn new() -> Self {
        Self {
            position: Vec3::zeros(),
            euler_rotation: Vec3::zeros(),
            is_dirty: false,
            view: Mat4::identity(),
        }
    }

    /// Resets position and rotation to zero and the view to identity.
    pub fn reset(&mut self) {
        self.position = Vec3::zeros();
        self.euler_rotation = Vec3::zeros();
        self.is_dirty = false;
        self.view = Mat4::identity();
    }

    /// The camera position.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Sets the camera position.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.is_dirty = true;
    }

    /// The Euler rotation (pitch, yaw, roll) in radians.
    pub fn rotation_euler(&self) -> Vec3 {
        self.euler_rotation
    }

    /// Sets the Euler rotation (pitch, yaw, roll) in radians.
    pub fn set_rotation_euler(&mut self, rotation: Vec3) {
        self.euler_rotation = rotation;
        self.is_dirty = true;
    }

    /// The view matrix, rebuilt if position or rotation changed:
    /// the camera's world transform (rotation composed with translation),
    /// inverted.
    pub fn view(&mut self) -> Mat4 {
        if self.is_dirty {
            let rotation = Mat4::euler_xyz(
                self.euler_rotation.x,
                self.euler_rotation.y,
                self.euler_rotation.z,
            );
            let translation = Mat4::translation(self.position);
            self.view = (translation * rotation).inverse_or_identity();
            self.is_dirty = false;
        }
        self.view
    }

    /// The camera's forward direction.
    pub fn forward(&self) -> Vec3 {
        forward_from_euler(self.euler_rotation)
    }

    /// The camera's backward direction.
    pub fn backward(&self) -> Vec3 {
        backward_from_euler(self.euler_rotation)
    }

    /// The camera's left direction.
    pub fn left(&self) -> Vec3 {
        left_from_euler(self.euler_rotation)
    }

    /// The camera's right direction.
    pub fn right(&self) -> Vec3 {
        right_from_euler(self.euler_rotation)
    }

    /// Moves along the forward direction.
    pub fn move_forward(&mut self, amount: f32) {
        self.position += self.forward() * amount;
        self.is_dirty = true;
    }

    /// Moves along the backward direction.
    pub fn move_backward(&mut self, amount: f32) {
        self.position += self.backward() * amount;
        self.is_dirty = true;
    }

    /// Moves along the left direction.
    pub fn move_left(&mut self, amount: f32) {
        self.position += self.left() * amount;
        self.is_dirty = true;
    }

    /// Moves along the right direction.
    pub fn move_right(&mut self, amount: f32) {
        self.position += self.right() * amount;
        self.is_dirty = true;
    }

    /// Moves straight up the world Y axis.
    pub fn move_up(&mut self, amount: f32) {
        self.position += Vec3::y() * amount;
        self.is_dirty = true;
    }

    /// Moves straight down the world Y axis.
    pub fn move_down(&mut self, amount: f32) {
        self.position -= Vec3::y() * amount;
        self.is_dirty = true;
    }

    /// Adjusts the yaw by `amount` radians.
    pub fn yaw(&mut self, amount: f32) {
        self.euler_rotation.y += amount;
        self.is_dirty = true;
    }

    /// Adjusts the pitch by `amount` radians, clamped to avoid gimbal
    /// lock.
    pub fn pitch(&mut self, amount: f32) {
        self.euler_rotation.x += amount;

        let limit = 89.0f32.to_radians();
        self.euler_rotation.x = self.euler_rotation.x.clamp(-limit, limit);
        self.is_dirty = true;
    }
}

/// Camera system configuration.
#[derive(Debug, Clone)]
pub struct CameraSystemConfig {
    /// Maximum number of registered cameras.
    pub max_camera_count: u16,
}

impl Default for CameraSystemConfig {
    fn default() -> Self {
        Self {
            max_camera_count: 61,
        }
    }
}

struct CameraLookup {
    id: u16,
    reference_count: u16,
    camera: Camera,
}

/// Reference-counted named camera storage.
pub struct CameraSystem {
    cameras: Vec<CameraLookup>,
    lookup: HashMap<String, u16>,
    default_camera: Camera,
}

impl CameraSystem {
    /// Creates the system with the always-present default camera.
    pub fn new(config: CameraSystemConfig) -> Self {
        assert!(config.max_camera_count > 0, "max_camera_count must be > 0");
        let cameras = (0..config.max_camera_count)
            .map(|_| CameraLookup {
                id: INVALID_ID_U16,
                reference_count: 0,
                camera: Camera::new(),
            })
            .collect();
        Self {
            cameras,
            lookup: HashMap::new(),
            default_camera: Camera::new(),
        }
    }

    /// Returns the named camera, creating and registering it on first
    /// use. `"default"` always resolves without reference counting.
    pub fn acquire(&mut self, name: &str) -> Option<&mut Camera> {
        if name.eq_ignore_ascii_case(DEFAULT_CAMERA_NAME) {
            return Some(&mut self.default_camera);
        }

        let id = match self.lookup.get(name).copied() {
            Some(id) => id,
            None => {
                let Some(slot) = self.cameras.iter().position(|c| c.id == INVALID_ID_U16) else {
                    log::error!(
                        "CameraSystem::acquire failed to acquire a new slot. Adjust the camera system config to allow more. Nothing returned."
                    );
                    return None;
                };
                let id = slot as u16;
                log::trace!("Creating new camera named '{name}'...");
                self.cameras[slot].camera = Camera::new();
                self.cameras[slot].id = id;
                self.lookup.insert(name.to_string(), id);
                id
            }
        };

        self.cameras[id as usize].reference_count += 1;
        Some(&mut self.cameras[id as usize].camera)
    }

    /// Releases one reference to the named camera; at zero references the
    /// camera is reset and its slot freed. Releasing `"default"` does
    /// nothing.
    pub fn release(&mut self, name: &str) {
        if name.eq_ignore_ascii_case(DEFAULT_CAMERA_NAME) {
            log::trace!("Cannot release the default camera. Nothing was done.");
            return;
        }
        let Some(id) = self.lookup.get(name).copied() else {
            log::warn!("CameraSystem::release failed lookup of '{name}'. Nothing was done.");
            return;
        };

        let entry = &mut self.cameras[id as usize];
        if entry.reference_count > 0 {
            entry.reference_count -= 1;
        }
        if entry.reference_count == 0 {
            entry.camera.reset();
            entry.id = INVALID_ID_U16;
            self.lookup.remove(name);
        }
    }

    /// The always-present default camera.
    pub fn default_camera(&mut self) -> &mut Camera {
        &mut self.default_camera
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fresh_camera_view_is_identity() {
        let mut camera = Camera::new();
        assert_eq!(camera.view(), Mat4::identity());
    }

    #[test]
    fn test_view_rebuilds_lazily() {
        let mut camera = Camera::new();
        camera.set_position(Vec3::new(0.0, 0.0, 5.0));
        let view = camera.view();
        // a camera at +5z maps that point back to the origin
        let p = view.transform_point(&nalgebra::Point3::new(0.0, 0.0, 5.0));
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(p.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_reset_restores_identity() {
        let mut camera = Camera::new();
        camera.set_position(Vec3::new(1.0, 2.0, 3.0));
        camera.yaw(0.5);
        let _ = camera.view();

        camera.reset();
        assert_eq!(camera.view(), Mat4::identity());
        assert_eq!(camera.position(), Vec3::zeros());
    }

    #[test]
    fn test_movement_follows_yaw() {
        let mut camera = Camera::new();
        camera.move_forward(2.0);
        // default forward is -Z
        assert_relative_eq!(camera.position().z, -2.0, epsilon = 1e-5);

        camera.reset();
        camera.yaw(std::f32::consts::FRAC_PI_2);
        camera.move_forward(2.0);
        assert_relative_eq!(camera.position().x, -2.0, epsilon = 1e-4);
        assert_relative_eq!(camera.position().z, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_pitch_clamps() {
        let mut camera = Camera::new();
        camera.pitch(10.0);
        assert!(camera.rotation_euler().x <= 89.0f32.to_radians() + 1e-6);
        camera.pitch(-100.0);
        assert!(camera.rotation_euler().x >= -(89.0f32.to_radians() + 1e-6));
    }

    #[test]
    fn test_system_refcounts_and_resets() {
        let mut system = CameraSystem::new(CameraSystemConfig { max_camera_count: 4 });

        let camera = system.acquire("player").unwrap();
        camera.set_position(Vec3::new(9.0, 0.0, 0.0));
        let _ = system.acquire("player").unwrap();

        system.release("player");
        // one reference remains; state is preserved
        assert_relative_eq!(system.acquire("player").unwrap().position().x, 9.0);
        system.release("player");
        system.release("player");

        // fully released: the next acquire returns a fresh camera
        let camera = system.acquire("player").unwrap();
        assert_eq!(camera.position(), Vec3::zeros());
    }

    #[test]
    fn test_default_camera_not_refcounted() {
        let mut system = CameraSystem::new(CameraSystemConfig { max_camera_count: 2 });
        system.default_camera().set_position(Vec3::new(0.0, 1.0, 0.0));
        system.release(DEFAULT_CAMERA_NAME);
        // still there, untouched
        assert_relative_eq!(system.acquire("default").unwrap().position().y, 1.0);
    }
}
