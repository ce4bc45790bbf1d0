use cgmath::{Deg, Euler, Matrix4, Vector3};

use crate::error::{EditError, GeometryError};
use crate::registry::Handle;

/// Half-profile point `(x, y)`; `x >= 0`, mirrored at mesh-build time.
pub type Node = [f32; 2];

pub const MIN_SECTION_NODES: usize = 2;
pub const MIN_GROUP_SECTIONS: usize = 2;

/// One cross-section of the hull at a fixed position along the length axis.
#[derive(Clone, Debug, PartialEq)]
pub struct Section {
    pub group: Handle,
    pub z: f32,
    pub nodes: Vec<Node>,
    pub color: [f32; 3],
    pub armor: f32,
}

impl Section {
    pub fn new(group: Handle, z: f32, nodes: Vec<Node>) -> Self {
        Self {
            group,
            z,
            nodes,
            color: DEFAULT_HULL_COLOR,
            armor: 0.0,
        }
    }

    pub fn profile(&self) -> SectionProfile<'_> {
        SectionProfile {
            z: self.z,
            nodes: &self.nodes,
        }
    }

    pub fn move_node(&mut self, index: usize, node: Node) -> Result<(), EditError> {
        if index >= self.nodes.len() {
            return Err(EditError::NodeOutOfRange(index));
        }
        let previous = self.nodes[index];
        self.nodes[index] = [node[0].max(0.0), node[1]];
        if let Err(err) = validate_nodes(&self.nodes) {
            self.nodes[index] = previous;
            return Err(err.into());
        }
        Ok(())
    }

    /// Inserts a node halfway between `index - 1` and `index`.
    pub(crate) fn insert_node_before(&mut self, index: usize) -> Result<(), EditError> {
        if index == 0 || index >= self.nodes.len() {
            return Err(EditError::NodeOutOfRange(index));
        }
        let a = self.nodes[index - 1];
        let b = self.nodes[index];
        self.nodes
            .insert(index, [(a[0] + b[0]) * 0.5, (a[1] + b[1]) * 0.5]);
        Ok(())
    }

    pub(crate) fn can_remove_node(&self, index: usize) -> bool {
        self.nodes.len() > MIN_SECTION_NODES && index > 0 && index + 1 < self.nodes.len()
    }

    pub(crate) fn remove_node(&mut self, index: usize) -> Result<(), EditError> {
        if !self.can_remove_node(index) {
            return Err(EditError::NodeNotRemovable { index });
        }
        self.nodes.remove(index);
        Ok(())
    }
}

pub const DEFAULT_HULL_COLOR: [f32; 3] = [0.62, 0.66, 0.72];

/// Borrowed input of the mesh builder: exactly `z` and `nodes` of a section.
#[derive(Clone, Copy, Debug)]
pub struct SectionProfile<'a> {
    pub z: f32,
    pub nodes: &'a [Node],
}

pub fn validate_nodes(nodes: &[Node]) -> Result<(), GeometryError> {
    if nodes.len() < MIN_SECTION_NODES {
        return Err(GeometryError::TooFewNodes { found: nodes.len() });
    }
    if let Some(index) = nodes.iter().position(|node| node[0] < 0.0) {
        return Err(GeometryError::NegativeX { index });
    }
    for (index, pair) in nodes.windows(2).enumerate() {
        if pair[0][1] >= pair[1][1] {
            return Err(GeometryError::UnsortedNodes { index: index + 1 });
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Curvature {
    pub top: f32,
    pub bottom: f32,
}

impl Curvature {
    pub fn new(top: f32, bottom: f32) -> Self {
        Self {
            top: top.clamp(0.0, 1.0),
            bottom: bottom.clamp(0.0, 1.0),
        }
    }
}

/// Sections sharing one frame and curvature. `sections` is sorted by
/// ascending z, so the back-most section comes first.
#[derive(Clone, Debug)]
pub struct SectionGroup {
    pub name: String,
    pub center: Vector3<f32>,
    /// Euler angles in degrees.
    pub rotation: Vector3<f32>,
    pub curvature: Curvature,
    sections: Vec<Handle>,
}

impl SectionGroup {
    pub fn new(name: impl Into<String>, center: Vector3<f32>, rotation: Vector3<f32>) -> Self {
        Self {
            name: name.into(),
            center,
            rotation,
            curvature: Curvature::new(0.5, 0.5),
            sections: Vec::new(),
        }
    }

    pub fn transform(&self) -> Matrix4<f32> {
        frame_matrix(self.center, self.rotation)
    }

    pub fn sections(&self) -> &[Handle] {
        &self.sections
    }

    pub fn front_most(&self) -> Option<Handle> {
        self.sections.last().copied()
    }

    pub fn back_most(&self) -> Option<Handle> {
        self.sections.first().copied()
    }

    /// Neighbour with the next larger z.
    pub fn front_of(&self, section: Handle) -> Option<Handle> {
        let position = self.position(section)?;
        self.sections.get(position + 1).copied()
    }

    /// Neighbour with the next smaller z.
    pub fn back_of(&self, section: Handle) -> Option<Handle> {
        let position = self.position(section)?;
        position.checked_sub(1).map(|i| self.sections[i])
    }

    fn position(&self, section: Handle) -> Option<usize> {
        self.sections.iter().position(|&h| h == section)
    }

    pub(crate) fn insert_sorted(
        &mut self,
        section: Handle,
        z: f32,
        z_of: impl Fn(Handle) -> Option<f32>,
    ) -> Result<(), EditError> {
        if self
            .sections
            .iter()
            .any(|&h| z_of(h).is_some_and(|other| (other - z).abs() <= f32::EPSILON))
        {
            return Err(EditError::DuplicateZ(z));
        }
        let position = self
            .sections
            .iter()
            .position(|&h| z_of(h).is_some_and(|other| other > z))
            .unwrap_or(self.sections.len());
        self.sections.insert(position, section);
        Ok(())
    }

    pub(crate) fn detach(&mut self, section: Handle) -> Result<(), EditError> {
        let position = self.position(section).ok_or(EditError::StaleHandle)?;
        if self.sections.len() <= MIN_GROUP_SECTIONS {
            return Err(EditError::TooFewSections(MIN_GROUP_SECTIONS));
        }
        self.sections.remove(position);
        Ok(())
    }

    pub(crate) fn resort(&mut self, z_of: impl Fn(Handle) -> Option<f32>) {
        self.sections.sort_by(|a, b| {
            let za = z_of(*a).unwrap_or(f32::MIN);
            let zb = z_of(*b).unwrap_or(f32::MIN);
            za.total_cmp(&zb)
        });
    }
}

pub fn frame_matrix(center: Vector3<f32>, rotation: Vector3<f32>) -> Matrix4<f32> {
    let euler = Euler::new(Deg(rotation.x), Deg(rotation.y), Deg(rotation.z));
    Matrix4::from_translation(center) * Matrix4::from(euler)
}
