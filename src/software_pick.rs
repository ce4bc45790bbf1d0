use cgmath::{Matrix4, Vector4};

use crate::error::PickError;
use crate::picking::{reduce_pixels, HitRecord, PickBackend, PickWindow, BACKGROUND_NAME};
use crate::scene::Drawable;

/// CPU pick backend. Rasterises the pick window with the same matrices and
/// depth convention as the GPU pass, so it can stand in for it headless.
#[derive(Default)]
pub struct SoftwarePicker {
    pass: Option<RasterPass>,
}

struct RasterPass {
    capacity: usize,
    width: usize,
    height: usize,
    matrix: Matrix4<f32>,
    names: Vec<u32>,
    depths: Vec<f32>,
}

impl SoftwarePicker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PickBackend for SoftwarePicker {
    fn enter_pick_mode(
        &mut self,
        capacity: usize,
        window: PickWindow,
        view_proj: Matrix4<f32>,
    ) -> Result<(), PickError> {
        if window.viewport[0] == 0 || window.viewport[1] == 0 {
            return Err(PickError::ResourceUnavailable(
                "viewport has zero size".to_string(),
            ));
        }
        let (width, height) = window.pixel_size();
        let (width, height) = (width as usize, height as usize);
        self.pass = Some(RasterPass {
            capacity,
            width,
            height,
            matrix: window.matrix() * view_proj,
            names: vec![BACKGROUND_NAME; width * height],
            depths: vec![1.0; width * height],
        });
        Ok(())
    }

    fn draw(&mut self, name: u32, drawable: &Drawable<'_>) -> Result<(), PickError> {
        let pass = self.pass.as_mut().ok_or_else(|| {
            PickError::ResourceUnavailable("draw outside of a pick pass".to_string())
        })?;
        for index in 0..drawable.mesh.triangles.len() {
            pass.rasterize(name, drawable.mesh.triangle(index));
        }
        Ok(())
    }

    fn exit_pick_mode(&mut self) -> Result<Vec<HitRecord>, PickError> {
        let pass = self.pass.take().ok_or_else(|| {
            PickError::ResourceUnavailable("no pick pass in progress".to_string())
        })?;
        reduce_pixels(&pass.names, &pass.depths, pass.capacity)
    }
}

impl RasterPass {
    fn rasterize(&mut self, name: u32, triangle: [[f32; 3]; 3]) {
        let clip = triangle.map(|p| self.matrix * Vector4::new(p[0], p[1], p[2], 1.0));
        let polygon = clip_near(&clip);
        if polygon.len() < 3 {
            return;
        }

        let (w, h) = (self.width as f32, self.height as f32);
        let screen: Vec<[f32; 3]> = polygon
            .iter()
            .map(|c| {
                let inv = 1.0 / c.w;
                [
                    (c.x * inv + 1.0) * 0.5 * w,
                    (1.0 - c.y * inv) * 0.5 * h,
                    c.z * inv,
                ]
            })
            .collect();
        for k in 1..screen.len() - 1 {
            self.fill(name, screen[0], screen[k], screen[k + 1]);
        }
    }

    fn fill(&mut self, name: u32, a: [f32; 3], b: [f32; 3], c: [f32; 3]) {
        let area = edge(a, b, [c[0], c[1]]);
        if !area.is_finite() || area.abs() < 1e-12 {
            return;
        }

        let min_x = a[0].min(b[0]).min(c[0]).floor().max(0.0) as usize;
        let max_x = (a[0].max(b[0]).max(c[0]).ceil().max(0.0) as usize).min(self.width);
        let min_y = a[1].min(b[1]).min(c[1]).floor().max(0.0) as usize;
        let max_y = (a[1].max(b[1]).max(c[1]).ceil().max(0.0) as usize).min(self.height);

        for py in min_y..max_y {
            for px in min_x..max_x {
                let p = [px as f32 + 0.5, py as f32 + 0.5];
                let w0 = edge(b, c, p) / area;
                let w1 = edge(c, a, p) / area;
                let w2 = edge(a, b, p) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let depth = w0 * a[2] + w1 * b[2] + w2 * c[2];
                if !(0.0..=1.0).contains(&depth) {
                    continue;
                }
                let index = py * self.width + px;
                if depth < self.depths[index] {
                    self.depths[index] = depth;
                    self.names[index] = name;
                }
            }
        }
    }
}

fn edge(a: [f32; 3], b: [f32; 3], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

/// Clips a clip-space triangle against the near plane (`z >= 0`).
fn clip_near(triangle: &[Vector4<f32>; 3]) -> Vec<Vector4<f32>> {
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let current = triangle[i];
        let next = triangle[(i + 1) % 3];
        let current_in = current.z >= 0.0;
        let next_in = next.z >= 0.0;
        if current_in {
            out.push(current);
        }
        if current_in != next_in {
            let t = current.z / (current.z - next.z);
            out.push(current + (next - current) * t);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshData;
    use crate::registry::Registry;
    use cgmath::SquareMatrix;

    fn full_window(size: u32) -> PickWindow {
        PickWindow {
            center_x: size as f32 * 0.5,
            center_y: size as f32 * 0.5,
            width: size as f32,
            height: size as f32,
            viewport: [size, size],
        }
    }

    fn quad(z: f32, half: f32) -> MeshData {
        let mut mesh = MeshData::new();
        mesh.positions = vec![[-half, -half, z], [half, -half, z], [half, half, z], [-half, half, z]];
        mesh.triangles = vec![[0, 1, 2], [0, 2, 3]];
        mesh.compute_flat_normals();
        mesh
    }

    #[test]
    fn nearer_surface_wins_the_depth_test() {
        let mut registry = Registry::new();
        let (far, near) = (registry.insert(()), registry.insert(()));
        let far_mesh = quad(0.8, 1.0);
        let near_mesh = quad(0.2, 0.5);

        let mut picker = SoftwarePicker::new();
        picker
            .enter_pick_mode(8, full_window(8), Matrix4::identity())
            .unwrap();
        picker
            .draw(1, &Drawable { handle: far, mesh: &far_mesh, color: [1.0; 3] })
            .unwrap();
        picker
            .draw(2, &Drawable { handle: near, mesh: &near_mesh, color: [1.0; 3] })
            .unwrap();
        let records = picker.exit_pick_mode().unwrap();

        assert_eq!(records.len(), 2);
        assert!((records[0].near_depth - 0.8).abs() < 1e-5);
        assert!((records[1].near_depth - 0.2).abs() < 1e-5);
    }

    #[test]
    fn geometry_behind_the_near_plane_is_clipped() {
        let mut registry = Registry::new();
        let handle = registry.insert(());
        let mesh = quad(-0.5, 1.0);
        let mut picker = SoftwarePicker::new();
        picker
            .enter_pick_mode(8, full_window(4), Matrix4::identity())
            .unwrap();
        picker
            .draw(1, &Drawable { handle, mesh: &mesh, color: [1.0; 3] })
            .unwrap();
        assert!(picker.exit_pick_mode().unwrap().is_empty());
    }

    #[test]
    fn clip_near_splits_straddling_triangle() {
        let triangle = [
            Vector4::new(0.0, 0.0, 1.0, 1.0),
            Vector4::new(1.0, 0.0, -1.0, 1.0),
            Vector4::new(0.0, 1.0, -1.0, 1.0),
        ];
        let clipped = clip_near(&triangle);
        assert_eq!(clipped.len(), 3);
        assert!(clipped.iter().all(|v| v.z >= -1e-6));
    }

    #[test]
    fn draw_outside_a_pass_is_an_error() {
        let mut registry = Registry::new();
        let handle = registry.insert(());
        let mesh = quad(0.5, 1.0);
        let mut picker = SoftwarePicker::new();
        assert!(picker
            .draw(1, &Drawable { handle, mesh: &mesh, color: [1.0; 3] })
            .is_err());
        assert!(picker.exit_pick_mode().is_err());
    }
}
