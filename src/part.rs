use cgmath::Vector3;

use crate::mesh::MeshData;
use crate::registry::Handle;
use crate::section::{frame_matrix, Section, SectionGroup};

/// Everything the scene registry can hold.
#[derive(Clone, Debug)]
pub enum Part {
    Group(SectionGroup),
    Section(Section),
    Solid(Solid),
}

impl Part {
    pub fn as_group(&self) -> Option<&SectionGroup> {
        match self {
            Part::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut SectionGroup> {
        match self {
            Part::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn as_section(&self) -> Option<&Section> {
        match self {
            Part::Section(section) => Some(section),
            _ => None,
        }
    }

    pub fn as_section_mut(&mut self) -> Option<&mut Section> {
        match self {
            Part::Section(section) => Some(section),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Part::Group(_) => "section group",
            Part::Section(_) => "section",
            Part::Solid(_) => "solid",
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Part::Group(group) => group.name(),
            Part::Section(_) => "section",
            Part::Solid(solid) => solid.name(),
        }
    }
}

/// Free-standing box in world space (deck fittings, imported model stand-ins).
#[derive(Clone, Debug)]
pub struct Solid {
    pub name: String,
    pub center: Vector3<f32>,
    /// Euler angles in degrees.
    pub rotation: Vector3<f32>,
    pub half_extents: Vector3<f32>,
    pub color: [f32; 3],
}

impl Solid {
    pub fn cuboid(name: impl Into<String>, center: Vector3<f32>, half_extents: Vector3<f32>) -> Self {
        Self {
            name: name.into(),
            center,
            rotation: Vector3::new(0.0, 0.0, 0.0),
            half_extents,
            color: [0.78, 0.55, 0.32],
        }
    }

    pub fn world_mesh(&self) -> MeshData {
        let half = [self.half_extents.x, self.half_extents.y, self.half_extents.z];
        MeshData::cuboid(half).transformed(frame_matrix(self.center, self.rotation))
    }
}

pub trait Positionable {
    fn position(&self) -> Vector3<f32>;
    fn set_position(&mut self, position: Vector3<f32>);
}

/// Euler rotation in degrees.
pub trait Rotatable {
    fn rotation(&self) -> Vector3<f32>;
    fn set_rotation(&mut self, rotation: Vector3<f32>);
}

pub trait Nameable {
    fn name(&self) -> &str;
    fn set_name(&mut self, name: String);
}

pub trait Deletable {
    /// Parts removed together with this one.
    fn dependents(&self) -> Vec<Handle> {
        Vec::new()
    }
}

impl Positionable for SectionGroup {
    fn position(&self) -> Vector3<f32> {
        self.center
    }

    fn set_position(&mut self, position: Vector3<f32>) {
        self.center = position;
    }
}

impl Rotatable for SectionGroup {
    fn rotation(&self) -> Vector3<f32> {
        self.rotation
    }

    fn set_rotation(&mut self, rotation: Vector3<f32>) {
        self.rotation = rotation;
    }
}

impl Nameable for SectionGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

impl Deletable for SectionGroup {
    fn dependents(&self) -> Vec<Handle> {
        self.sections().to_vec()
    }
}

impl Deletable for Section {}

impl Positionable for Solid {
    fn position(&self) -> Vector3<f32> {
        self.center
    }

    fn set_position(&mut self, position: Vector3<f32>) {
        self.center = position;
    }
}

impl Rotatable for Solid {
    fn rotation(&self) -> Vector3<f32> {
        self.rotation
    }

    fn set_rotation(&mut self, rotation: Vector3<f32>) {
        self.rotation = rotation;
    }
}

impl Nameable for Solid {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

impl Deletable for Solid {}

/// Edit operations available on a part, selected by the capabilities it
/// implements.
pub struct EditablePart<'a, T> {
    part: &'a mut T,
}

impl<'a, T> EditablePart<'a, T> {
    pub fn new(part: &'a mut T) -> Self {
        Self { part }
    }
}

impl<T: Positionable> EditablePart<'_, T> {
    pub fn translate(&mut self, delta: Vector3<f32>) {
        let position = self.part.position();
        self.part.set_position(position + delta);
    }
}

impl<T: Rotatable> EditablePart<'_, T> {
    /// Adds `delta` degrees, wrapping each angle into `(-180, 180]`.
    pub fn rotate(&mut self, delta: Vector3<f32>) {
        let r = self.part.rotation() + delta;
        self.part
            .set_rotation(Vector3::new(wrap_degrees(r.x), wrap_degrees(r.y), wrap_degrees(r.z)));
    }
}

impl<T: Nameable> EditablePart<'_, T> {
    /// Blank names are rejected.
    pub fn rename(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.part.set_name(name.to_owned());
        true
    }
}

impl<T: Deletable> EditablePart<'_, T> {
    pub fn dependents(&self) -> Vec<Handle> {
        self.part.dependents()
    }
}

fn wrap_degrees(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid() -> Solid {
        Solid::cuboid("turret", Vector3::new(1.0, 2.0, 3.0), Vector3::new(0.5, 0.5, 0.5))
    }

    #[test]
    fn translate_and_rotate_through_capabilities() {
        let mut solid = solid();
        let mut edit = EditablePart::new(&mut solid);
        edit.translate(Vector3::new(1.0, 0.0, -1.0));
        edit.rotate(Vector3::new(190.0, -200.0, 45.0));

        assert_eq!(solid.center, Vector3::new(2.0, 2.0, 2.0));
        assert!((solid.rotation.x + 170.0).abs() < 1e-4);
        assert!((solid.rotation.y - 160.0).abs() < 1e-4);
        assert!((solid.rotation.z - 45.0).abs() < 1e-4);
    }

    #[test]
    fn rename_rejects_blank_names() {
        let mut solid = solid();
        let mut edit = EditablePart::new(&mut solid);
        assert!(!edit.rename("   "));
        assert!(edit.rename("  mast "));
        assert_eq!(solid.name, "mast");
    }

    #[test]
    fn world_mesh_is_centred_on_the_solid() {
        let (min, max) = solid().world_mesh().bounds().unwrap();
        assert!((min[0] - 0.5).abs() < 1e-5 && (max[0] - 1.5).abs() < 1e-5);
        assert!((min[2] - 2.5).abs() < 1e-5 && (max[2] - 3.5).abs() < 1e-5);
    }

    #[test]
    fn part_accessors_match_variant() {
        let part = Part::Solid(solid());
        assert!(part.as_section().is_none());
        assert!(part.as_group().is_none());
        assert_eq!(part.kind(), "solid");
        assert_eq!(part.label(), "turret");
    }
}
