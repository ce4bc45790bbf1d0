use cgmath::{
    ortho, perspective, Deg, InnerSpace, Matrix4, Point3, Quaternion, Rad, Rotation, Rotation3,
    Vector3,
};
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};

pub const PERSPECTIVE_NEAR: f32 = 0.1;
pub const PERSPECTIVE_FAR: f32 = 2000.0;
pub const ORTHO_NEAR: f32 = -1000.0;
pub const ORTHO_FAR: f32 = 1000.0;

/// Orbit stops once the view direction is this close to the up axis.
const ORBIT_POLE_LIMIT: f32 = 0.99;
const MIN_DISTANCE: f32 = 0.5;
const MAX_DISTANCE: f32 = 1500.0;

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Orbit camera. `fovy == 0` selects the orthographic projection.
#[derive(Clone, Debug)]
pub struct Camera {
    pub target: Point3<f32>,
    pub eye: Point3<f32>,
    pub up: Vector3<f32>,
    /// Vertical field of view in degrees.
    pub fovy: f32,
    /// Pixels per world unit in orthographic mode.
    pub ortho_scale: f32,
    perspective_fovy: f32,
}

impl Camera {
    pub fn new(target: Point3<f32>, eye: Point3<f32>, fovy: f32) -> Self {
        Self {
            target,
            eye,
            up: Vector3::unit_y(),
            fovy,
            ortho_scale: 40.0,
            perspective_fovy: if fovy > 0.0 { fovy } else { 45.0 },
        }
    }

    pub fn direction(&self) -> Vector3<f32> {
        (self.target - self.eye).normalize()
    }

    pub fn right(&self) -> Vector3<f32> {
        self.direction().cross(self.up).normalize()
    }

    pub fn view_up(&self) -> Vector3<f32> {
        self.right().cross(self.direction())
    }

    pub fn distance(&self) -> f32 {
        (self.target - self.eye).magnitude()
    }

    pub fn is_orthographic(&self) -> bool {
        self.fovy <= 0.0
    }

    pub fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(self.eye, self.target, self.up)
    }

    /// Rotates the eye around the target, keeping the distance.
    pub fn orbit(&mut self, yaw: Rad<f32>, pitch: Rad<f32>) {
        let offset = self.eye - self.target;
        let offset = Quaternion::from_axis_angle(self.up, -yaw).rotate_vector(offset);

        let right = (-offset).cross(self.up);
        let offset = if right.magnitude2() > f32::EPSILON {
            let pitched =
                Quaternion::from_axis_angle(right.normalize(), pitch).rotate_vector(offset);
            if (-pitched).normalize().dot(self.up).abs() <= ORBIT_POLE_LIMIT {
                pitched
            } else {
                offset
            }
        } else {
            offset
        };

        self.eye = self.target + offset;
    }

    /// Moves eye and target together in the view plane.
    pub fn pan(&mut self, dx: f32, dy: f32) {
        let delta = self.right() * dx + self.view_up() * dy;
        self.eye += delta;
        self.target += delta;
    }

    /// Scales the eye-to-target distance by `factor`.
    pub fn zoom(&mut self, factor: f32) {
        if !(factor.is_finite() && factor > 0.0) {
            return;
        }
        let distance = (self.distance() * factor).clamp(MIN_DISTANCE, MAX_DISTANCE);
        self.eye = self.target - self.direction() * distance;
        self.ortho_scale = (self.ortho_scale / factor).clamp(0.5, 5000.0);
    }

    pub fn toggle_projection(&mut self) {
        if self.is_orthographic() {
            self.fovy = self.perspective_fovy;
        } else {
            self.perspective_fovy = self.fovy;
            self.fovy = 0.0;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    width: u32,
    height: u32,
}

impl Projection {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    pub fn viewport(&self) -> [u32; 2] {
        [self.width, self.height]
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// Perspective or orthographic matrix, whichever the camera selects.
    pub fn build_matrix(&self, camera: &Camera) -> Matrix4<f32> {
        let matrix = if camera.is_orthographic() {
            let half_w = self.width as f32 * 0.5 / camera.ortho_scale;
            let half_h = self.height as f32 * 0.5 / camera.ortho_scale;
            ortho(-half_w, half_w, -half_h, half_h, ORTHO_NEAR, ORTHO_FAR)
        } else {
            perspective(Deg(camera.fovy), self.aspect(), PERSPECTIVE_NEAR, PERSPECTIVE_FAR)
        };
        OPENGL_TO_WGPU_MATRIX * matrix
    }

    pub fn view_proj(&self, camera: &Camera) -> Matrix4<f32> {
        self.build_matrix(camera) * camera.view_matrix()
    }
}

/// Narrows clip space to a `width` x `height` pixel window centred at
/// `(center_x, center_y)` in bottom-left-origin viewport coordinates.
pub fn pick_matrix(
    center_x: f32,
    center_y: f32,
    width: f32,
    height: f32,
    viewport: [u32; 2],
) -> Matrix4<f32> {
    let vw = viewport[0] as f32;
    let vh = viewport[1] as f32;
    let tx = (vw - 2.0 * center_x) / width;
    let ty = (vh - 2.0 * center_y) / height;
    Matrix4::from_translation(Vector3::new(tx, ty, 0.0))
        * Matrix4::from_nonuniform_scale(vw / width, vh / height, 1.0)
}

/// Mouse-driven orbit (right button), pan (middle button) and wheel zoom.
pub struct CameraController {
    orbit_sensitivity: f32,
    pan_sensitivity: f32,
    zoom_step: f32,
    orbiting: bool,
    panning: bool,
    last_cursor: Option<(f64, f64)>,
}

impl CameraController {
    pub fn new(orbit_sensitivity: f32, pan_sensitivity: f32, zoom_step: f32) -> Self {
        Self {
            orbit_sensitivity,
            pan_sensitivity,
            zoom_step,
            orbiting: false,
            panning: false,
            last_cursor: None,
        }
    }

    pub fn process_events(&mut self, event: &WindowEvent, camera: &mut Camera) -> bool {
        match event {
            WindowEvent::MouseInput { state, button, .. } => {
                self.button(*button, *state == ElementState::Pressed)
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor_moved(position.x, position.y, camera)
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let steps = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 * 0.02,
                };
                camera.zoom((1.0 - self.zoom_step).powf(steps));
                true
            }
            _ => false,
        }
    }

    /// Right button orbits, middle button pans. Other buttons are not consumed.
    pub fn button(&mut self, button: MouseButton, pressed: bool) -> bool {
        match button {
            MouseButton::Right => self.orbiting = pressed,
            MouseButton::Middle => self.panning = pressed,
            _ => return false,
        }
        true
    }

    /// Must see every cursor position, even ones consumed elsewhere, so the
    /// next orbit or pan delta starts from where the cursor really is.
    pub fn cursor_moved(&mut self, x: f64, y: f64, camera: &mut Camera) -> bool {
        let current = (x, y);
        let Some(previous) = self.last_cursor.replace(current) else {
            return false;
        };
        let dx = (current.0 - previous.0) as f32;
        let dy = (current.1 - previous.1) as f32;
        if self.orbiting {
            camera.orbit(
                Rad(dx * self.orbit_sensitivity),
                Rad(-dy * self.orbit_sensitivity),
            );
            true
        } else if self.panning {
            let scale = self.pan_sensitivity * camera.distance().max(1.0);
            camera.pan(-dx * scale, dy * scale);
            true
        } else {
            false
        }
    }
}
