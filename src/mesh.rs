use cgmath::{InnerSpace, Matrix4, Point3, Transform, Vector3};

use crate::error::GeometryError;
use crate::section::{validate_nodes, Curvature, Node, SectionProfile};

/// Samples on the full reference ring; each fillet covers one quadrant.
pub const RING_SAMPLES: usize = 24;
pub const FILLET_SAMPLES: usize = RING_SAMPLES / 4;

// Ring sample indices (15 degree steps) of the two fillets on the +x side.
const BOTTOM_FILLET_START: usize = RING_SAMPLES * 3 / 4;
const TOP_FILLET_START: usize = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
}

/// Triangle-list geometry. `normals` holds one face normal per triangle
/// corner, so `normals.len() == 3 * triangles.len()`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
    pub normals: Vec<[f32; 3]>,
}

impl MeshData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn triangle(&self, index: usize) -> [[f32; 3]; 3] {
        let [a, b, c] = self.triangles[index];
        [
            self.positions[a as usize],
            self.positions[b as usize],
            self.positions[c as usize],
        ]
    }

    fn push_quad(&mut self, a: u32, b: u32, c: u32, d: u32) {
        self.triangles.push([a, b, c]);
        self.triangles.push([a, c, d]);
    }

    /// Recomputes the flat normals from the current triangles.
    pub fn compute_flat_normals(&mut self) {
        self.normals.clear();
        self.normals.reserve(self.triangles.len() * 3);
        for index in 0..self.triangles.len() {
            let normal = face_normal(self.triangle(index));
            self.normals.extend_from_slice(&[normal, normal, normal]);
        }
    }

    pub fn transformed(&self, matrix: Matrix4<f32>) -> MeshData {
        let positions = self
            .positions
            .iter()
            .map(|p| {
                let q = matrix.transform_point(Point3::new(p[0], p[1], p[2]));
                [q.x, q.y, q.z]
            })
            .collect();
        let mut mesh = MeshData {
            positions,
            triangles: self.triangles.clone(),
            normals: Vec::new(),
        };
        mesh.compute_flat_normals();
        mesh
    }

    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let first = *self.positions.first()?;
        let mut min = first;
        let mut max = first;
        for p in &self.positions[1..] {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        Some((min, max))
    }

    /// Expands into unshared vertices so every corner carries its face normal.
    pub fn flat_vertices(&self, color: [f32; 3]) -> (Vec<Vertex>, Vec<u32>) {
        let mut vertices = Vec::with_capacity(self.triangles.len() * 3);
        for (index, triangle) in self.triangles.iter().enumerate() {
            for (corner, &vertex) in triangle.iter().enumerate() {
                vertices.push(Vertex {
                    position: self.positions[vertex as usize],
                    normal: self.normals[index * 3 + corner],
                    color,
                });
            }
        }
        let indices = (0..vertices.len() as u32).collect();
        (vertices, indices)
    }

    /// Axis-aligned box centred on the origin, outward winding.
    pub fn cuboid(half: [f32; 3]) -> Self {
        let [hx, hy, hz] = half;
        let mut mesh = MeshData::new();
        mesh.positions = vec![
            [-hx, -hy, -hz],
            [hx, -hy, -hz],
            [hx, hy, -hz],
            [-hx, hy, -hz],
            [-hx, -hy, hz],
            [hx, -hy, hz],
            [hx, hy, hz],
            [-hx, hy, hz],
        ];
        mesh.push_quad(4, 5, 6, 7); // +z
        mesh.push_quad(1, 0, 3, 2); // -z
        mesh.push_quad(5, 1, 2, 6); // +x
        mesh.push_quad(0, 4, 7, 3); // -x
        mesh.push_quad(7, 6, 2, 3); // +y
        mesh.push_quad(0, 1, 5, 4); // -y
        mesh.compute_flat_normals();
        mesh
    }
}

pub fn face_normal(triangle: [[f32; 3]; 3]) -> [f32; 3] {
    let a = Vector3::from(triangle[0]);
    let b = Vector3::from(triangle[1]);
    let c = Vector3::from(triangle[2]);
    let normal = (b - a).cross(c - a);
    let length = normal.magnitude();
    if length > f32::EPSILON {
        (normal / length).into()
    } else {
        [0.0; 3]
    }
}

/// Direction of reference ring sample `k`, exact on the four axes.
fn ring_direction(k: usize) -> [f32; 2] {
    let k = k % RING_SAMPLES;
    if k % FILLET_SAMPLES == 0 {
        return match k / FILLET_SAMPLES {
            0 => [1.0, 0.0],
            1 => [0.0, 1.0],
            2 => [-1.0, 0.0],
            _ => [0.0, -1.0],
        };
    }
    let angle = (k as f32) * std::f32::consts::TAU / RING_SAMPLES as f32;
    let (sin, cos) = angle.sin_cos();
    [cos, sin]
}

pub fn circle_sample(k: usize) -> [f32; 2] {
    ring_direction(k)
}

/// The circle sample pushed out along its ray onto the unit square.
pub fn square_sample(k: usize) -> [f32; 2] {
    let [x, y] = ring_direction(k);
    let extent = x.abs().max(y.abs());
    [x / extent, y / extent]
}

/// `0` gives the circular arc, `1` the squared-off corner.
pub fn fillet_sample(k: usize, curvature: f32) -> [f32; 2] {
    let c = circle_sample(k);
    let s = square_sample(k);
    [
        c[0] + (s[0] - c[0]) * curvature,
        c[1] + (s[1] - c[1]) * curvature,
    ]
}

/// Ring steps from keel to deck (`H`); the half profile holds `H + 1` points.
pub fn half_ring_len(node_count: usize) -> usize {
    2 * FILLET_SAMPLES - 1 + node_count.saturating_sub(2)
}

pub fn segment_triangle_count(node_count: usize) -> usize {
    8 * half_ring_len(node_count) - 2
}

/// Keel-to-deck half profile on the +x side: `half_ring_len + 1` points.
pub fn half_profile(nodes: &[Node], curvature: Curvature) -> Vec<[f32; 2]> {
    let last = nodes.len() - 1;
    let bottom = nodes[0];
    let top = nodes[last];
    let (wall_bottom, wall_top) = if last == 1 {
        let wall = [bottom[0].max(top[0]), (bottom[1] + top[1]) * 0.5];
        (wall, wall)
    } else {
        (nodes[1], nodes[last - 1])
    };

    let mut points = Vec::with_capacity(half_ring_len(nodes.len()) + 1);

    let bottom_rise = wall_bottom[1] - bottom[1];
    for k in BOTTOM_FILLET_START..BOTTOM_FILLET_START + FILLET_SAMPLES {
        let s = fillet_sample(k, curvature.bottom);
        points.push([wall_bottom[0] * s[0], wall_bottom[1] + bottom_rise * s[1]]);
    }

    points.extend(nodes[1..last].iter().copied());

    let top_rise = top[1] - wall_top[1];
    for k in TOP_FILLET_START..TOP_FILLET_START + FILLET_SAMPLES {
        let s = fillet_sample(k, curvature.top);
        points.push([wall_top[0] * s[0], wall_top[1] + top_rise * s[1]]);
    }

    points
}

/// Closed ring: keel, +x side up to the deck, mirrored side back down, keel.
pub fn ring(nodes: &[Node], curvature: Curvature) -> Vec<[f32; 2]> {
    let half = half_profile(nodes, curvature);
    let h = half.len() - 1;
    let mut ring = Vec::with_capacity(2 * h + 1);
    ring.extend_from_slice(&half);
    ring.extend(half[1..h].iter().rev().map(|p| [-p[0], p[1]]));
    ring.push(half[0]);
    ring
}

/// Closed surface joining two cross-sections; `front.z` must exceed `back.z`.
pub fn build_segment(
    front: SectionProfile<'_>,
    back: SectionProfile<'_>,
    curvature: Curvature,
) -> Result<MeshData, GeometryError> {
    validate_nodes(front.nodes)?;
    validate_nodes(back.nodes)?;
    if front.nodes.len() != back.nodes.len() {
        return Err(GeometryError::NodeCountMismatch {
            front: front.nodes.len(),
            back: back.nodes.len(),
        });
    }
    let span = front.z - back.z;
    if span.abs() <= f32::EPSILON {
        return Err(GeometryError::ZeroLengthSegment {
            front: front.z,
            back: back.z,
        });
    }
    if span < 0.0 {
        return Err(GeometryError::InvertedSegment {
            front: front.z,
            back: back.z,
        });
    }

    let front_ring = ring(front.nodes, curvature);
    let back_ring = ring(back.nodes, curvature);
    let count = front_ring.len() as u32;
    let h = half_ring_len(front.nodes.len()) as u32;

    let mut mesh = MeshData::new();
    mesh.positions.reserve(front_ring.len() * 2);
    mesh.positions
        .extend(front_ring.iter().map(|p| [p[0], p[1], front.z]));
    mesh.positions
        .extend(back_ring.iter().map(|p| [p[0], p[1], back.z]));
    mesh.triangles
        .reserve(segment_triangle_count(front.nodes.len()));

    let f = |i: u32| i;
    let b = |i: u32| count + i;

    for i in 0..2 * h {
        mesh.triangles.push([f(i), b(i), f(i + 1)]);
        mesh.triangles.push([f(i + 1), b(i), b(i + 1)]);
    }
    for i in 1..2 * h {
        mesh.triangles.push([f(0), f(i), f(i + 1)]);
    }
    for i in 1..2 * h {
        mesh.triangles.push([b(0), b(i + 1), b(i)]);
    }

    mesh.compute_flat_normals();
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const EPS: f32 = 1e-4;

    fn scenario_nodes() -> Vec<Node> {
        vec![[0.0, -3.0], [4.0, 0.0], [0.0, 3.0]]
    }

    fn scenario_mesh(top: f32, bottom: f32) -> MeshData {
        let nodes = scenario_nodes();
        build_segment(
            SectionProfile { z: 3.0, nodes: &nodes },
            SectionProfile { z: -3.0, nodes: &nodes },
            Curvature::new(top, bottom),
        )
        .unwrap()
    }

    fn key(p: [f32; 3]) -> [i64; 3] {
        [
            (p[0] * 1e4).round() as i64,
            (p[1] * 1e4).round() as i64,
            (p[2] * 1e4).round() as i64,
        ]
    }

    fn area2(t: [[f32; 3]; 3]) -> f32 {
        let a = Vector3::from(t[0]);
        (Vector3::from(t[1]) - a).cross(Vector3::from(t[2]) - a).magnitude()
    }

    #[test]
    fn scenario_a_has_94_triangles() {
        let mesh = scenario_mesh(0.0, 1.0);
        assert!(!mesh.positions.is_empty());
        assert_eq!(half_ring_len(3), 12);
        assert_eq!(mesh.triangles.len(), 94);
        assert_eq!(mesh.triangles.len(), segment_triangle_count(3));
    }

    #[test]
    fn triangle_count_follows_half_ring_formula() {
        for node_count in 2..8 {
            let nodes: Vec<Node> = (0..node_count)
                .map(|i| [1.0 + i as f32 * 0.1, i as f32])
                .collect();
            let mesh = build_segment(
                SectionProfile { z: 1.0, nodes: &nodes },
                SectionProfile { z: 0.0, nodes: &nodes },
                Curvature::new(0.3, 0.7),
            )
            .unwrap();
            let h = 11 + node_count - 2;
            assert_eq!(mesh.triangles.len(), 8 * h - 2);
            assert_eq!(mesh.positions.len(), 2 * (2 * h + 1));
            assert_eq!(mesh.normals.len(), mesh.triangles.len() * 3);
        }
    }

    #[test]
    fn welded_surface_is_closed() {
        let mesh = scenario_mesh(0.4, 0.8);
        let mut edges: HashMap<([i64; 3], [i64; 3]), usize> = HashMap::new();
        for index in 0..mesh.triangles.len() {
            let t = mesh.triangle(index);
            if area2(t) <= EPS {
                continue;
            }
            for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
                let (ka, kb) = (key(a), key(b));
                let edge = if ka <= kb { (ka, kb) } else { (kb, ka) };
                *edges.entry(edge).or_default() += 1;
            }
        }
        assert!(!edges.is_empty());
        for (edge, count) in edges {
            assert_eq!(count, 2, "edge {edge:?} used {count} times");
        }
    }

    /// Index of the mirrored counterpart of ring vertex `index`.
    fn mirrored_index(index: usize, node_count: usize) -> usize {
        let h = half_ring_len(node_count);
        match index {
            0 => 2 * h,
            i if i == 2 * h => 0,
            i if i == h => h,
            i => 2 * h - i,
        }
    }

    #[test]
    fn ring_is_mirror_symmetric() {
        let nodes = vec![[0.0, -2.0], [3.0, -1.0], [3.5, 1.0], [0.5, 2.0]];
        let ring = ring(&nodes, Curvature::new(0.25, 0.6));
        assert_eq!(ring.len(), 2 * half_ring_len(nodes.len()) + 1);
        for (index, point) in ring.iter().enumerate() {
            let mirror = ring[mirrored_index(index, nodes.len())];
            assert!((point[0] + mirror[0]).abs() < EPS, "index {index}");
            assert!((point[1] - mirror[1]).abs() < EPS, "index {index}");
        }
    }

    #[test]
    fn ring_starts_at_keel_and_passes_through_deck() {
        let nodes = scenario_nodes();
        let ring = ring(&nodes, Curvature::new(0.0, 0.0));
        let h = half_ring_len(nodes.len());
        assert_eq!(ring[0], [0.0, -3.0]);
        assert_eq!(ring[h], [0.0, 3.0]);
        assert_eq!(ring[2 * h], ring[0]);
        assert_eq!(ring[FILLET_SAMPLES], [4.0, 0.0]);
    }

    #[test]
    fn zero_curvature_lies_on_the_ellipse() {
        let nodes = scenario_nodes();
        let half = half_profile(&nodes, Curvature::new(0.0, 0.0));
        // Both fillets are centred at (0, 0) with radii (4, 3).
        for p in half.iter().take(FILLET_SAMPLES).chain(half.iter().skip(FILLET_SAMPLES + 1)) {
            let r = (p[0] / 4.0).powi(2) + (p[1] / 3.0).powi(2);
            assert!((r - 1.0).abs() < EPS, "{p:?} off the arc");
        }
    }

    #[test]
    fn full_curvature_lies_on_the_bounding_box() {
        let nodes = scenario_nodes();
        let half = half_profile(&nodes, Curvature::new(1.0, 1.0));
        for p in half.iter() {
            let on_side = (p[0] - 4.0).abs() < EPS || p[0].abs() < EPS;
            let on_cap = (p[1].abs() - 3.0).abs() < EPS;
            assert!(on_side || on_cap, "{p:?} off the box");
        }
        let near = |q: [f32; 2]| half.iter().any(|p| (p[0] - q[0]).abs() < EPS && (p[1] - q[1]).abs() < EPS);
        assert!(near([4.0, -3.0]));
        assert!(near([4.0, 3.0]));
    }

    #[test]
    fn normals_are_flat_and_perpendicular() {
        let mesh = scenario_mesh(0.2, 0.9);
        for index in 0..mesh.triangles.len() {
            let n = &mesh.normals[index * 3..index * 3 + 3];
            assert_eq!(n[0], n[1]);
            assert_eq!(n[1], n[2]);
            let t = mesh.triangle(index);
            let normal = Vector3::from(n[0]);
            let e1 = Vector3::from(t[1]) - Vector3::from(t[0]);
            let e2 = Vector3::from(t[2]) - Vector3::from(t[0]);
            assert!(normal.dot(e1).abs() < EPS);
            assert!(normal.dot(e2).abs() < EPS);
        }
    }

    #[test]
    fn caps_face_outward() {
        let mesh = scenario_mesh(0.5, 0.5);
        let h = half_ring_len(3);
        let side_triangles = 4 * h;
        let front_cap = mesh.normals[side_triangles * 3];
        let back_cap = mesh.normals[(side_triangles + 2 * h - 1) * 3];
        assert!(front_cap[2] > 0.99);
        assert!(back_cap[2] < -0.99);
        // First side triangle sits under the keel.
        assert!(mesh.normals[0][1] < 0.0);
    }

    #[test]
    fn invalid_segments_are_rejected() {
        let nodes = scenario_nodes();
        let short = vec![[0.0, 0.0]];
        let curvature = Curvature::new(0.5, 0.5);
        fn at(z: f32, nodes: &[Node]) -> SectionProfile<'_> {
            SectionProfile { z, nodes }
        }

        assert_eq!(
            build_segment(at(1.0, &nodes), at(1.0, &nodes), curvature),
            Err(GeometryError::ZeroLengthSegment { front: 1.0, back: 1.0 })
        );
        assert_eq!(
            build_segment(at(-1.0, &nodes), at(1.0, &nodes), curvature),
            Err(GeometryError::InvertedSegment { front: -1.0, back: 1.0 })
        );
        assert_eq!(
            build_segment(at(1.0, &short), at(0.0, &nodes), curvature),
            Err(GeometryError::TooFewNodes { found: 1 })
        );
        assert_eq!(
            build_segment(at(1.0, &nodes), at(0.0, &nodes[..2]), curvature),
            Err(GeometryError::NodeCountMismatch { front: 3, back: 2 })
        );
    }

    #[test]
    fn two_node_sections_share_a_virtual_wall() {
        let nodes = vec![[1.0, -1.0], [2.0, 1.0]];
        let half = half_profile(&nodes, Curvature::new(0.0, 0.0));
        assert_eq!(half.len(), half_ring_len(2) + 1);
        assert_eq!(half[0], [0.0, -1.0]);
        assert_eq!(*half.last().unwrap(), [0.0, 1.0]);
    }

    #[test]
    fn cuboid_normals_point_away_from_centre() {
        let mesh = MeshData::cuboid([1.0, 2.0, 3.0]);
        assert_eq!(mesh.triangles.len(), 12);
        for index in 0..mesh.triangles.len() {
            let t = mesh.triangle(index);
            let centroid = (Vector3::from(t[0]) + Vector3::from(t[1]) + Vector3::from(t[2])) / 3.0;
            assert!(Vector3::from(mesh.normals[index * 3]).dot(centroid) > 0.0);
        }
    }

    #[test]
    fn flat_vertices_duplicate_per_corner() {
        let mesh = MeshData::cuboid([1.0, 1.0, 1.0]);
        let (vertices, indices) = mesh.flat_vertices([1.0, 0.0, 0.0]);
        assert_eq!(vertices.len(), 36);
        assert_eq!(indices.len(), 36);
        assert_eq!(vertices[0].normal, vertices[2].normal);
    }
}
