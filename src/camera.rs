//! Fly camera and the uniform block the compute stages read.

use bytemuck::{Pod, Zeroable};

use crate::util::{UVec2, Vec2, Vec3};

/// Pose handed in by the input collaborator. Basis vectors are unit length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub position: Vec3,
    pub front: Vec3,
    pub up: Vec3,
    pub right: Vec3,
}

impl CameraState {
    /// Pose at `position` looking at `target`, world up +Y.
    pub fn look_at(position: Vec3, target: Vec3) -> Self {
        let front = (target - position).normalize_or(Vec3::NEG_Z);
        let right = front.cross(Vec3::Y).normalize_or(Vec3::X);
        let up = right.cross(front).normalize();
        Self {
            position,
            front,
            up,
            right,
        }
    }
}

impl Default for CameraState {
    fn default() -> Self {
        Self::look_at(Vec3::new(0.0, 5.0, 18.0), Vec3::new(0.0, 5.0, 0.0))
    }
}

/// Movement keys, one bit each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveInput {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
    pub down: bool,
    pub up: bool,
    /// Triple speed.
    pub fast: bool,
    /// Third speed.
    pub slow: bool,
}

/// Yaw/pitch fly camera.
///
/// `updated` goes true whenever the pose changes and stays true until the
/// frame loop takes it with [`FlyCamera::take_updated`]; that is what
/// triggers an accumulation reset.
#[derive(Debug, Clone)]
pub struct FlyCamera {
    position: Vec3,
    /// Degrees.
    yaw: f32,
    /// Degrees, clamped to [-89, 89].
    pitch: f32,
    pub move_speed: f32,
    pub sensitivity: f32,
    state: CameraState,
    updated: bool,
}

impl FlyCamera {
    pub const PITCH_LIMIT: f32 = 89.0;
    const SPEED_MULTIPLIER: f32 = 3.0;

    pub fn new(position: Vec3, yaw: f32, pitch: f32) -> Self {
        let mut cam = Self {
            position,
            yaw,
            pitch: 0.0,
            move_speed: 0.004,
            sensitivity: 0.15,
            state: CameraState::default(),
            updated: true,
        };
        cam.set_angles(yaw, pitch);
        cam
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn angles(&self) -> (f32, f32) {
        (self.yaw, self.pitch)
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.state.position = position;
        self.updated = true;
    }

    pub fn set_angles(&mut self, yaw: f32, pitch: f32) {
        self.yaw = yaw;
        self.pitch = pitch.clamp(-Self::PITCH_LIMIT, Self::PITCH_LIMIT);
        let (y, p) = (self.yaw.to_radians(), self.pitch.to_radians());
        let front = Vec3::new(y.cos() * p.cos(), p.sin(), y.sin() * p.cos()).normalize();
        let right = front.cross(Vec3::Y).normalize();
        let up = right.cross(front).normalize();
        self.state = CameraState {
            position: self.position,
            front,
            up,
            right,
        };
        self.updated = true;
    }

    /// Mouse look; deltas in pixels.
    pub fn rotate(&mut self, dx: f32, dy: f32) {
        if dx == 0.0 && dy == 0.0 {
            return;
        }
        self.set_angles(
            self.yaw - dx * self.sensitivity,
            self.pitch - dy * self.sensitivity,
        );
    }

    /// Keyboard movement over `dt_ms` milliseconds.
    pub fn advance(&mut self, input: MoveInput, dt_ms: f32) {
        let s = &self.state;
        let mut dir = Vec3::ZERO;
        if input.forward {
            dir += s.front;
        }
        if input.back {
            dir -= s.front;
        }
        if input.right {
            dir += s.right;
        }
        if input.left {
            dir -= s.right;
        }
        if input.up {
            dir += s.up;
        }
        if input.down {
            dir -= s.up;
        }
        if dir == Vec3::ZERO {
            return;
        }

        let mut speed = self.move_speed * dt_ms;
        if input.fast {
            speed *= Self::SPEED_MULTIPLIER;
        }
        if input.slow {
            speed /= Self::SPEED_MULTIPLIER;
        }
        let pos = self.position + dir.normalize_or_zero() * speed;
        self.set_position(pos);
    }

    /// Return and clear the dirty flag.
    pub fn take_updated(&mut self) -> bool {
        std::mem::take(&mut self.updated)
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }
}

impl Default for FlyCamera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 5.0, 18.0), -90.0, 0.0)
    }
}

/// Camera block in the frame bind group (96 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub position: [f32; 3],
    pub ray_depth: u32,
    pub front: [f32; 3],
    pub samples_per_frame: u32,
    pub up: [f32; 3],
    pub _pad0: u32,
    pub right: [f32; 3],
    pub _pad1: u32,
    pub resolution: [f32; 2],
    /// World-space size of one pixel on the image plane at distance 1.
    pub pixel_length: [f32; 2],
    pub background: [f32; 3],
    pub _pad2: u32,
}

impl CameraUniform {
    /// `fov_y_degrees` is the full vertical field of view.
    pub fn new(
        state: &CameraState,
        resolution: UVec2,
        fov_y_degrees: f32,
        ray_depth: u32,
        samples_per_frame: u32,
        background: Vec3,
    ) -> Self {
        let res = resolution.as_vec2().max(Vec2::ONE);
        let y_scaled = (fov_y_degrees.to_radians() * 0.5).tan();
        let x_scaled = y_scaled * res.x / res.y;
        Self {
            position: state.position.to_array(),
            ray_depth,
            front: state.front.to_array(),
            samples_per_frame,
            up: state.up.to_array(),
            _pad0: 0,
            right: state.right.to_array(),
            _pad1: 0,
            resolution: res.to_array(),
            pixel_length: [2.0 * x_scaled / res.x, 2.0 * y_scaled / res.y],
            background: background.to_array(),
            _pad2: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn test_pitch_clamped() {
        let mut cam = FlyCamera::default();
        cam.rotate(0.0, -10_000.0);
        assert_eq!(cam.angles().1, 89.0);
        cam.rotate(0.0, 20_000.0);
        assert_eq!(cam.angles().1, -89.0);
        let s = cam.state();
        assert!(s.front.is_normalized() && s.up.is_normalized() && s.right.is_normalized());
    }

    #[test]
    fn test_default_looks_down_neg_z() {
        let cam = FlyCamera::default();
        let s = cam.state();
        assert!(close(s.front, Vec3::NEG_Z));
        assert!(close(s.right, Vec3::X));
        assert!(close(s.up, Vec3::Y));
        assert!(close(CameraState::default().front, Vec3::NEG_Z));
    }

    #[test]
    fn test_dirty_flag() {
        let mut cam = FlyCamera::default();
        assert!(cam.take_updated());
        assert!(!cam.take_updated());

        cam.advance(MoveInput::default(), 16.0);
        assert!(!cam.is_updated());

        cam.advance(
            MoveInput {
                forward: true,
                ..Default::default()
            },
            100.0,
        );
        assert!(cam.take_updated());
        assert!(close(cam.position(), Vec3::new(0.0, 5.0, 17.6)));

        cam.rotate(0.0, 0.0);
        assert!(!cam.is_updated());
    }

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 96);
        let u = CameraUniform::new(
            &CameraState::default(),
            UVec2::new(200, 100),
            90.0,
            8,
            1,
            Vec3::ZERO,
        );
        // tan(45 deg) = 1: image plane spans [-2, 2] x [-1, 1]
        assert!((u.pixel_length[0] - 0.02).abs() < 1e-6);
        assert!((u.pixel_length[1] - 0.02).abs() < 1e-6);
        assert_eq!(u.ray_depth, 8);
    }
}
