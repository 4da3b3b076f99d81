use glam::{Affine3A, Mat3, Quat, Vec2, Vec3, Vec4};

/// Pinhole camera. View space looks down +Z with +X right and +Y down, so
/// projected coordinates are already in pixel orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// Local to world.
    pub rotation: Quat,
    pub fov_x: f64,
    pub fov_y: f64,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(position: Vec3, rotation: Quat, fov_x: f64, fov_y: f64) -> Self {
        Self {
            position,
            rotation,
            fov_x,
            fov_y,
            near: 0.01,
            far: 1000.0,
        }
    }

    /// Camera at `eye` looking at `target`, with `up` pointing up on screen.
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, fov_x: f64, fov_y: f64) -> Self {
        let forward = (target - eye).normalize();
        let right = forward.cross(up).normalize();
        let down = forward.cross(right);
        let rotation = Quat::from_mat3(&Mat3::from_cols(right, down, forward));
        Self::new(eye, rotation, fov_x, fov_y)
    }

    /// Clip planes in view space depth. Splats at `z <= near` are culled, so
    /// `near` must stay positive for depth keys to sort.
    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        assert!(
            near > 0.0 && far > near,
            "Invalid clip planes: near {near}, far {far}"
        );
        self.near = near;
        self.far = far;
        self
    }

    pub fn local_to_world(&self) -> Affine3A {
        Affine3A::from_rotation_translation(self.rotation, self.position)
    }

    pub fn world_to_local(&self) -> Affine3A {
        self.local_to_world().inverse()
    }

    pub fn focal(&self, img_size: glam::UVec2) -> Vec2 {
        glam::vec2(
            fov_to_focal(self.fov_x, img_size.x) as f32,
            fov_to_focal(self.fov_y, img_size.y) as f32,
        )
    }

    pub fn center(&self, img_size: glam::UVec2) -> Vec2 {
        img_size.as_vec2() * 0.5
    }

    pub fn tan_half_fov(&self) -> Vec2 {
        glam::vec2((self.fov_x * 0.5).tan() as f32, (self.fov_y * 0.5).tan() as f32)
    }
}

// Converts field of view to focal length
pub fn fov_to_focal(fov_rad: f64, pixels: u32) -> f64 {
    0.5 * (pixels as f64) / (fov_rad * 0.5).tan()
}

// Converts focal length to field of view
pub fn focal_to_fov(focal: f64, pixels: u32) -> f64 {
    2.0 * f64::atan((pixels as f64) / (2.0 * focal))
}

/// Everything a frame reads from the outside world, captured once before
/// submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    pub camera: Camera,
    /// Applied to the whole scene before the view transform.
    pub scene_rotation: Quat,
    /// Straight RGBA, composited behind the splats.
    pub background: Vec4,
}

impl FrameState {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            scene_rotation: Quat::IDENTITY,
            background: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }

    pub fn with_background(mut self, background: Vec4) -> Self {
        self.background = background;
        self
    }

    pub fn with_scene_rotation(mut self, rotation: Quat) -> Self {
        self.scene_rotation = rotation;
        self
    }

    /// Splat space to view space.
    pub fn view_matrix(&self) -> glam::Mat4 {
        glam::Mat4::from(self.camera.world_to_local()) * glam::Mat4::from_quat(self.scene_rotation)
    }

    /// Camera position expressed in splat space.
    pub fn camera_in_scene(&self) -> Vec3 {
        self.scene_rotation.inverse() * self.camera.position
    }
}

/// Turntable rotation of the scene about the world Z axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoRotate {
    pub enabled: bool,
    pub degrees_per_frame: f32,
    angle: f32,
}

impl AutoRotate {
    pub fn new(degrees_per_frame: f32) -> Self {
        Self {
            enabled: degrees_per_frame != 0.0,
            degrees_per_frame,
            angle: 0.0,
        }
    }

    pub fn toggle(&mut self) {
        self.enabled = !self.enabled;
    }

    pub fn rotation(&self) -> Quat {
        Quat::from_rotation_z(self.angle.to_radians())
    }

    /// Snapshot for the next frame, then advances the angle.
    pub fn next_frame(&mut self, camera: Camera, background: Vec4) -> FrameState {
        let state = FrameState {
            camera,
            scene_rotation: self.rotation(),
            background,
        };
        if self.enabled {
            self.angle = (self.angle + self.degrees_per_frame) % 360.0;
        }
        state
    }
}
