use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use cgmath::Vector3;
use serde_json::{Map, Value};

use crate::error::{EditError, GeometryError, ProjectError};
use crate::events::EventBus;
use crate::mesh::{build_segment, MeshData};
use crate::part::{Deletable, EditablePart, Part, Solid};
use crate::project::{ProjectDocument, SectionGroupRecord, SectionRecord, SolidRecord};
use crate::registry::{Handle, Registry};
use crate::section::{validate_nodes, Curvature, Node, Section, SectionGroup, MIN_GROUP_SECTIONS};

/// One pickable, renderable world-space mesh.
#[derive(Clone, Copy, Debug)]
pub struct Drawable<'a> {
    pub handle: Handle,
    pub mesh: &'a MeshData,
    pub color: [f32; 3],
}

/// Outcome of [`Scene::rebuild_dirty`], consumed by the renderer.
#[derive(Debug, Default)]
pub struct RebuildReport {
    pub rebuilt: Vec<Handle>,
    pub removed: Vec<Handle>,
    pub errors: Vec<(Handle, GeometryError)>,
}

/// Owns every part, the world-space mesh of each section segment and solid,
/// and the set of meshes waiting to be regenerated.
pub struct Scene {
    parts: Registry<Part>,
    meshes: BTreeMap<Handle, MeshData>,
    dirty: BTreeSet<Handle>,
    removed: Vec<Handle>,
    events: Rc<EventBus>,
    extra_categories: Map<String, Value>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            parts: Registry::new(),
            meshes: BTreeMap::new(),
            dirty: BTreeSet::new(),
            removed: Vec::new(),
            events: Rc::new(EventBus::new()),
            extra_categories: Map::new(),
        }
    }

    pub fn events(&self) -> &Rc<EventBus> {
        &self.events
    }

    pub fn get(&self, handle: Handle) -> Option<&Part> {
        self.parts.get(handle)
    }

    pub fn parts(&self) -> impl Iterator<Item = (Handle, &Part)> {
        self.parts.iter()
    }

    pub fn group(&self, handle: Handle) -> Option<&SectionGroup> {
        self.parts.get(handle).and_then(Part::as_group)
    }

    pub fn section(&self, handle: Handle) -> Option<&Section> {
        self.parts.get(handle).and_then(Part::as_section)
    }

    pub fn groups(&self) -> impl Iterator<Item = (Handle, &SectionGroup)> {
        self.parts
            .iter()
            .filter_map(|(handle, part)| part.as_group().map(|group| (handle, group)))
    }

    /// The group a section belongs to; groups and solids map to themselves.
    pub fn owner_of(&self, handle: Handle) -> Option<Handle> {
        match self.parts.get(handle)? {
            Part::Section(section) => Some(section.group),
            _ => Some(handle),
        }
    }

    pub fn mesh(&self, handle: Handle) -> Option<&MeshData> {
        self.meshes.get(&handle)
    }

    pub fn has_pending_rebuild(&self) -> bool {
        !self.dirty.is_empty() || !self.removed.is_empty()
    }

    pub fn drawables(&self) -> impl Iterator<Item = Drawable<'_>> {
        self.meshes
            .iter()
            .filter(|(_, mesh)| !mesh.is_empty())
            .map(|(&handle, mesh)| Drawable {
                handle,
                mesh,
                color: self.color_of(handle),
            })
    }

    pub fn color_of(&self, handle: Handle) -> [f32; 3] {
        match self.parts.get(handle) {
            Some(Part::Section(section)) => section.color,
            Some(Part::Solid(solid)) => solid.color,
            _ => [1.0, 1.0, 1.0],
        }
    }

    /// Adds a group with at least two sections given as `(z, nodes)`.
    /// Returns the group handle and the section handles in input order.
    pub fn add_group(
        &mut self,
        group: SectionGroup,
        profiles: Vec<(f32, Vec<Node>)>,
    ) -> Result<(Handle, Vec<Handle>), EditError> {
        if profiles.len() < MIN_GROUP_SECTIONS {
            return Err(EditError::TooFewSections(MIN_GROUP_SECTIONS));
        }
        let node_count = profiles[0].1.len();
        for (i, (z, nodes)) in profiles.iter().enumerate() {
            validate_nodes(nodes)?;
            if nodes.len() != node_count {
                return Err(GeometryError::NodeCountMismatch {
                    front: node_count,
                    back: nodes.len(),
                }
                .into());
            }
            if profiles[..i]
                .iter()
                .any(|(other, _)| (other - z).abs() <= f32::EPSILON)
            {
                return Err(EditError::DuplicateZ(*z));
            }
        }

        let mut group = group;
        let group_handle = self.parts.insert(Part::Group(group.clone()));
        let mut placed = Vec::with_capacity(profiles.len());
        for (z, nodes) in profiles {
            let handle = self
                .parts
                .insert(Part::Section(Section::new(group_handle, z, nodes)));
            placed.push((handle, z));
        }
        for &(handle, z) in &placed {
            group.insert_sorted(handle, z, |h| z_in(&placed, h))?;
        }
        if let Some(slot) = self.parts.get_mut(group_handle) {
            *slot = Part::Group(group);
        }

        self.mark_group(group_handle);
        tracing::debug!(sections = placed.len(), "added section group");
        Ok((group_handle, placed.into_iter().map(|(h, _)| h).collect()))
    }

    pub fn add_section(&mut self, group: Handle, z: f32, nodes: Vec<Node>) -> Result<Handle, EditError> {
        validate_nodes(&nodes)?;
        let existing = self.section_zs(group)?;
        if let Some(first) = existing.first().and_then(|&(h, _)| self.section(h)) {
            if first.nodes.len() != nodes.len() {
                return Err(GeometryError::NodeCountMismatch {
                    front: first.nodes.len(),
                    back: nodes.len(),
                }
                .into());
            }
        }
        if existing.iter().any(|(_, other)| (other - z).abs() <= f32::EPSILON) {
            return Err(EditError::DuplicateZ(z));
        }

        let handle = self.parts.insert(Part::Section(Section::new(group, z, nodes)));
        let group_ref = self.group_mut(group)?;
        group_ref.insert_sorted(handle, z, |h| {
            if h == handle {
                Some(z)
            } else {
                z_in(&existing, h)
            }
        })?;
        self.mark_group(group);
        Ok(handle)
    }

    pub fn remove_section(&mut self, section: Handle) -> Result<(), EditError> {
        let group = self.section(section).ok_or(EditError::StaleHandle)?.group;
        self.group_mut(group)?.detach(section)?;
        self.discard(section);
        self.mark_group(group);
        Ok(())
    }

    pub fn set_section_z(&mut self, section: Handle, z: f32) -> Result<(), EditError> {
        let group = self.section(section).ok_or(EditError::StaleHandle)?.group;
        let existing = self.section_zs(group)?;
        if existing
            .iter()
            .any(|&(h, other)| h != section && (other - z).abs() <= f32::EPSILON)
        {
            return Err(EditError::DuplicateZ(z));
        }
        if let Some(target) = self.parts.get_mut(section).and_then(Part::as_section_mut) {
            target.z = z;
        }
        self.group_mut(group)?.resort(|h| {
            if h == section {
                Some(z)
            } else {
                z_in(&existing, h)
            }
        });
        self.mark_group(group);
        Ok(())
    }

    pub fn move_node(&mut self, section: Handle, index: usize, node: Node) -> Result<(), EditError> {
        let target = self
            .parts
            .get_mut(section)
            .and_then(Part::as_section_mut)
            .ok_or(EditError::StaleHandle)?;
        target.move_node(index, node)?;
        let group = target.group;
        self.dirty.insert(section);
        if let Some(front) = self.group(group).and_then(|g| g.front_of(section)) {
            self.dirty.insert(front);
        }
        Ok(())
    }

    /// Inserts a midpoint node before `index` on every section of the group.
    pub fn insert_node(&mut self, group: Handle, index: usize) -> Result<(), EditError> {
        let sections = self.group(group).ok_or(EditError::StaleHandle)?.sections().to_vec();
        for &handle in &sections {
            let len = self.section(handle).map_or(0, |s| s.nodes.len());
            if index == 0 || index >= len {
                return Err(EditError::NodeOutOfRange(index));
            }
        }
        for &handle in &sections {
            if let Some(section) = self.parts.get_mut(handle).and_then(Part::as_section_mut) {
                section.insert_node_before(index)?;
            }
        }
        self.mark_group(group);
        Ok(())
    }

    /// Removes interior node `index` from every section of the group.
    pub fn remove_node(&mut self, group: Handle, index: usize) -> Result<(), EditError> {
        let sections = self.group(group).ok_or(EditError::StaleHandle)?.sections().to_vec();
        if !sections
            .iter()
            .all(|&h| self.section(h).is_some_and(|s| s.can_remove_node(index)))
        {
            return Err(EditError::NodeNotRemovable { index });
        }
        for &handle in &sections {
            if let Some(section) = self.parts.get_mut(handle).and_then(Part::as_section_mut) {
                section.remove_node(index)?;
            }
        }
        self.mark_group(group);
        Ok(())
    }

    pub fn set_curvature(&mut self, group: Handle, top: f32, bottom: f32) -> Result<(), EditError> {
        self.group_mut(group)?.curvature = Curvature::new(top, bottom);
        self.mark_group(group);
        Ok(())
    }

    pub fn add_solid(&mut self, solid: Solid) -> Handle {
        let handle = self.parts.insert(Part::Solid(solid));
        self.dirty.insert(handle);
        handle
    }

    /// Moves a group or solid; a section moves its whole group.
    pub fn translate(&mut self, handle: Handle, delta: Vector3<f32>) -> Result<(), EditError> {
        let owner = self.owner_of(handle).ok_or(EditError::StaleHandle)?;
        match self.parts.get_mut(owner) {
            Some(Part::Group(group)) => EditablePart::new(group).translate(delta),
            Some(Part::Solid(solid)) => EditablePart::new(solid).translate(delta),
            _ => return Err(EditError::StaleHandle),
        }
        self.mark_owner(owner);
        Ok(())
    }

    pub fn rotate(&mut self, handle: Handle, delta: Vector3<f32>) -> Result<(), EditError> {
        let owner = self.owner_of(handle).ok_or(EditError::StaleHandle)?;
        match self.parts.get_mut(owner) {
            Some(Part::Group(group)) => EditablePart::new(group).rotate(delta),
            Some(Part::Solid(solid)) => EditablePart::new(solid).rotate(delta),
            _ => return Err(EditError::StaleHandle),
        }
        self.mark_owner(owner);
        Ok(())
    }

    pub fn rename(&mut self, handle: Handle, name: &str) -> Result<bool, EditError> {
        let owner = self.owner_of(handle).ok_or(EditError::StaleHandle)?;
        match self.parts.get_mut(owner) {
            Some(Part::Group(group)) => Ok(EditablePart::new(group).rename(name)),
            Some(Part::Solid(solid)) => Ok(EditablePart::new(solid).rename(name)),
            _ => Err(EditError::StaleHandle),
        }
    }

    /// Deletes a part and its dependents. Returns every removed handle.
    pub fn delete(&mut self, handle: Handle) -> Result<Vec<Handle>, EditError> {
        let dependents = match self.parts.get_mut(handle) {
            Some(Part::Group(group)) => EditablePart::new(group).dependents(),
            Some(Part::Section(section)) => EditablePart::new(section).dependents(),
            Some(Part::Solid(solid)) => EditablePart::new(solid).dependents(),
            None => return Err(EditError::StaleHandle),
        };
        if self.section(handle).is_some() {
            self.remove_section(handle)?;
            return Ok(vec![handle]);
        }
        let mut removed = dependents;
        for &dependent in &removed {
            self.discard(dependent);
        }
        self.discard(handle);
        removed.push(handle);
        Ok(removed)
    }

    /// Regenerates every dirty mesh. A failed rebuild keeps the previous mesh.
    pub fn rebuild_dirty(&mut self) -> RebuildReport {
        let mut report = RebuildReport {
            removed: std::mem::take(&mut self.removed),
            ..RebuildReport::default()
        };
        for handle in std::mem::take(&mut self.dirty) {
            match self.build_mesh(handle) {
                Ok(Some(mesh)) => {
                    self.meshes.insert(handle, mesh);
                    report.rebuilt.push(handle);
                    self.events.emit_mesh_invalidated(handle);
                }
                Ok(None) => {
                    if self.meshes.remove(&handle).is_some() {
                        report.removed.push(handle);
                        self.events.emit_mesh_invalidated(handle);
                    }
                }
                Err(err) => {
                    tracing::warn!(?handle, "mesh rebuild failed: {err}");
                    report.errors.push((handle, err));
                }
            }
        }
        report
    }

    fn build_mesh(&self, handle: Handle) -> Result<Option<MeshData>, GeometryError> {
        match self.parts.get(handle) {
            Some(Part::Solid(solid)) => Ok(Some(solid.world_mesh())),
            Some(Part::Section(section)) => {
                let Some(group) = self.group(section.group) else {
                    return Ok(None);
                };
                let Some(back) = group.back_of(handle).and_then(|h| self.section(h)) else {
                    return Ok(None);
                };
                let local = build_segment(section.profile(), back.profile(), group.curvature)?;
                Ok(Some(local.transformed(group.transform())))
            }
            Some(Part::Group(_)) | None => Ok(None),
        }
    }

    fn group_mut(&mut self, handle: Handle) -> Result<&mut SectionGroup, EditError> {
        self.parts
            .get_mut(handle)
            .and_then(Part::as_group_mut)
            .ok_or(EditError::StaleHandle)
    }

    fn section_zs(&self, group: Handle) -> Result<Vec<(Handle, f32)>, EditError> {
        let group = self.group(group).ok_or(EditError::StaleHandle)?;
        Ok(group
            .sections()
            .iter()
            .filter_map(|&h| self.section(h).map(|s| (h, s.z)))
            .collect())
    }

    fn mark_group(&mut self, group: Handle) {
        if let Some(group) = self.parts.get(group).and_then(Part::as_group) {
            self.dirty.extend(group.sections().iter().copied());
        }
    }

    fn mark_owner(&mut self, owner: Handle) {
        if self.group(owner).is_some() {
            self.mark_group(owner);
        } else {
            self.dirty.insert(owner);
        }
    }

    fn discard(&mut self, handle: Handle) {
        if self.parts.remove(handle).is_some() {
            self.dirty.remove(&handle);
            self.meshes.remove(&handle);
            self.removed.push(handle);
        }
    }

    pub fn from_project(document: &ProjectDocument) -> Result<Self, ProjectError> {
        let mut scene = Scene::new();
        for (index, record) in document.hull_section_groups.iter().enumerate() {
            let name = if record.name.is_empty() {
                format!("Hull {}", index + 1)
            } else {
                record.name.clone()
            };
            let mut group = SectionGroup::new(name, record.center.into(), record.rot.into());
            group.curvature = Curvature::new(record.top_cur, record.bot_cur);
            let profiles = record
                .sections
                .iter()
                .map(|s| (s.z, s.nodes.clone()))
                .collect();
            let (_, sections) = scene
                .add_group(group, profiles)
                .map_err(|source| ProjectError::InvalidGroup { group: index, source })?;
            for (handle, section_record) in sections.into_iter().zip(&record.sections) {
                if let Some(section) = scene.parts.get_mut(handle).and_then(Part::as_section_mut) {
                    section.color = section_record.col;
                    section.armor = section_record.armor;
                }
            }
        }
        for record in &document.boxes {
            let half = Vector3::from(record.size) * 0.5;
            let mut solid = Solid::cuboid(record.name.clone(), record.center.into(), half);
            solid.rotation = record.rot.into();
            solid.color = record.col;
            scene.add_solid(solid);
        }
        scene.extra_categories = document.other.clone();
        Ok(scene)
    }

    pub fn to_project(&self) -> ProjectDocument {
        let mut document = ProjectDocument {
            other: self.extra_categories.clone(),
            ..ProjectDocument::default()
        };
        for (_, part) in self.parts.iter() {
            match part {
                Part::Group(group) => {
                    let sections = group
                        .sections()
                        .iter()
                        .rev()
                        .filter_map(|&h| self.section(h))
                        .map(|s| SectionRecord {
                            z: s.z,
                            nodes: s.nodes.clone(),
                            col: s.color,
                            armor: s.armor,
                        })
                        .collect();
                    document.hull_section_groups.push(SectionGroupRecord {
                        name: group.name.clone(),
                        center: group.center.into(),
                        rot: group.rotation.into(),
                        top_cur: group.curvature.top,
                        bot_cur: group.curvature.bottom,
                        sections,
                    });
                }
                Part::Solid(solid) => document.boxes.push(SolidRecord {
                    name: solid.name.clone(),
                    center: solid.center.into(),
                    rot: solid.rotation.into(),
                    size: (solid.half_extents * 2.0).into(),
                    col: solid.color,
                }),
                Part::Section(_) => {}
            }
        }
        document
    }
}

fn z_in(zs: &[(Handle, f32)], handle: Handle) -> Option<f32> {
    zs.iter().find(|(h, _)| *h == handle).map(|&(_, z)| z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::segment_triangle_count;
    use std::cell::RefCell;

    fn profile() -> Vec<Node> {
        vec![[0.0, -3.0], [4.0, 0.0], [0.0, 3.0]]
    }

    fn hull(scene: &mut Scene, zs: &[f32]) -> (Handle, Vec<Handle>) {
        let group = SectionGroup::new("hull", Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.0));
        let profiles = zs.iter().map(|&z| (z, profile())).collect();
        scene.add_group(group, profiles).unwrap()
    }

    #[test]
    fn back_most_section_owns_no_segment() {
        let mut scene = Scene::new();
        let (group, sections) = hull(&mut scene, &[3.0, -3.0, 0.0]);
        let report = scene.rebuild_dirty();
        assert!(report.errors.is_empty());

        let ordered = scene.group(group).unwrap().sections().to_vec();
        assert_eq!(ordered, vec![sections[1], sections[2], sections[0]]);
        assert!(scene.mesh(sections[1]).is_none());
        assert_eq!(
            scene.mesh(sections[0]).unwrap().triangles.len(),
            segment_triangle_count(3)
        );
        assert_eq!(scene.drawables().count(), 2);
    }

    #[test]
    fn scenario_a_builds_ninety_four_triangles() {
        let mut scene = Scene::new();
        let group = SectionGroup::new("hull", Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.0));
        let (group, sections) = scene
            .add_group(group, vec![(3.0, profile()), (-3.0, profile())])
            .unwrap();
        scene.set_curvature(group, 0.0, 1.0).unwrap();
        scene.rebuild_dirty();
        let mesh = scene.mesh(sections[0]).unwrap();
        assert!(!mesh.positions.is_empty());
        assert_eq!(mesh.triangles.len(), 94);
    }

    #[test]
    fn add_group_validates_input() {
        let mut scene = Scene::new();
        let group = || SectionGroup::new("g", Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(
            scene.add_group(group(), vec![(1.0, profile())]).unwrap_err(),
            EditError::TooFewSections(2)
        );
        assert_eq!(
            scene
                .add_group(group(), vec![(1.0, profile()), (1.0, profile())])
                .unwrap_err(),
            EditError::DuplicateZ(1.0)
        );
        assert!(matches!(
            scene.add_group(group(), vec![(1.0, profile()), (0.0, vec![[0.0, 0.0], [0.0, 1.0]])]),
            Err(EditError::Geometry(GeometryError::NodeCountMismatch { front: 3, back: 2 }))
        ));
        assert!(scene.parts().next().is_none());
    }

    #[test]
    fn failed_rebuild_keeps_previous_mesh() {
        let mut scene = Scene::new();
        let (_, sections) = hull(&mut scene, &[3.0, -3.0]);
        scene.rebuild_dirty();
        let before = scene.mesh(sections[0]).unwrap().clone();

        if let Some(Part::Section(section)) = scene.parts.get_mut(sections[0]) {
            section.nodes[1][1] = 5.0;
        }
        scene.dirty.insert(sections[0]);
        let report = scene.rebuild_dirty();

        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0].1, GeometryError::UnsortedNodes { .. }));
        assert_eq!(scene.mesh(sections[0]), Some(&before));
    }

    #[test]
    fn node_edits_apply_to_every_section() {
        let mut scene = Scene::new();
        let (group, sections) = hull(&mut scene, &[3.0, 0.0, -3.0]);
        scene.insert_node(group, 1).unwrap();
        for &handle in &sections {
            assert_eq!(scene.section(handle).unwrap().nodes.len(), 4);
        }
        scene.remove_node(group, 2).unwrap();
        scene.remove_node(group, 1).unwrap();
        assert_eq!(
            scene.remove_node(group, 1),
            Err(EditError::NodeNotRemovable { index: 1 })
        );
        assert_eq!(scene.insert_node(group, 0), Err(EditError::NodeOutOfRange(0)));

        scene.rebuild_dirty();
        assert_eq!(
            scene.mesh(sections[0]).unwrap().triangles.len(),
            segment_triangle_count(2)
        );
    }

    #[test]
    fn moving_a_section_past_its_neighbour_reorders_segments() {
        let mut scene = Scene::new();
        let (group, sections) = hull(&mut scene, &[3.0, 0.0, -3.0]);
        scene.rebuild_dirty();

        assert_eq!(scene.set_section_z(sections[1], 3.0), Err(EditError::DuplicateZ(3.0)));
        scene.set_section_z(sections[1], 5.0).unwrap();
        scene.rebuild_dirty();

        let g = scene.group(group).unwrap();
        assert_eq!(g.front_most(), Some(sections[1]));
        assert_eq!(g.back_of(sections[1]), Some(sections[0]));
        assert!(scene.mesh(sections[2]).is_none());
        let (min, max) = scene.mesh(sections[1]).unwrap().bounds().unwrap();
        assert!((min[2] - 3.0).abs() < 1e-5 && (max[2] - 5.0).abs() < 1e-5);
    }

    #[test]
    fn section_removal_keeps_two_and_reports_removed_mesh() {
        let mut scene = Scene::new();
        let (group, sections) = hull(&mut scene, &[3.0, 0.0, -3.0]);
        scene.rebuild_dirty();

        scene.remove_section(sections[1]).unwrap();
        let report = scene.rebuild_dirty();
        assert!(report.removed.contains(&sections[1]));
        assert_eq!(scene.group(group).unwrap().back_of(sections[0]), Some(sections[2]));
        assert_eq!(
            scene.remove_section(sections[0]),
            Err(EditError::TooFewSections(2))
        );
    }

    #[test]
    fn translating_a_section_moves_its_group() {
        let mut scene = Scene::new();
        let (group, sections) = hull(&mut scene, &[3.0, -3.0]);
        scene.rebuild_dirty();
        scene.translate(sections[0], Vector3::new(10.0, 0.0, 0.0)).unwrap();
        assert!(scene.has_pending_rebuild());
        scene.rebuild_dirty();

        assert_eq!(scene.group(group).unwrap().center.x, 10.0);
        let (min, max) = scene.mesh(sections[0]).unwrap().bounds().unwrap();
        assert!((min[0] - 6.0).abs() < 1e-4 && (max[0] - 14.0).abs() < 1e-4);
    }

    #[test]
    fn deleting_a_group_removes_its_sections() {
        let mut scene = Scene::new();
        let (group, sections) = hull(&mut scene, &[3.0, -3.0]);
        let solid = scene.add_solid(Solid::cuboid("crate", Vector3::new(0.0, 10.0, 0.0), Vector3::new(1.0, 1.0, 1.0)));
        scene.rebuild_dirty();

        let removed = scene.delete(group).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(scene.get(sections[0]).is_none());
        let report = scene.rebuild_dirty();
        assert!(report.removed.contains(&sections[0]));
        assert_eq!(scene.drawables().map(|d| d.handle).collect::<Vec<_>>(), vec![solid]);
    }

    #[test]
    fn rebuild_notifies_mesh_listeners() {
        let mut scene = Scene::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        scene.events().on_mesh_invalidated(move |h| sink.borrow_mut().push(h));

        let (_, sections) = hull(&mut scene, &[3.0, -3.0]);
        scene.rebuild_dirty();
        assert_eq!(*seen.borrow(), vec![sections[0]]);
    }

    #[test]
    fn project_round_trip_preserves_groups_solids_and_extra_categories() {
        let json = r#"{
            "hull_section_groups": [{
                "center": [1, 2, 3], "rot": [0, 0, 0], "top_cur": 0.25, "bot_cur": 0.75,
                "sections": [
                    {"z": 3, "nodes": [[0, -3], [4, 0], [0, 3]], "armor": 12},
                    {"z": -3, "nodes": [[0, -3], [4, 0], [0, 3]]}
                ]
            }],
            "boxes": [{"name": "bridge", "center": [0, 5, 0], "size": [2, 2, 2]}],
            "guns": [1, 2, 3]
        }"#;
        let document: ProjectDocument = serde_json::from_str(json).unwrap();
        let mut scene = Scene::from_project(&document).unwrap();
        scene.rebuild_dirty();
        assert_eq!(scene.drawables().count(), 2);

        let written = scene.to_project();
        assert_eq!(written.hull_section_groups.len(), 1);
        let group = &written.hull_section_groups[0];
        assert_eq!(group.center, [1.0, 2.0, 3.0]);
        assert_eq!(group.top_cur, 0.25);
        assert_eq!(group.sections[0].z, 3.0);
        assert_eq!(group.sections[0].armor, 12.0);
        assert_eq!(written.boxes[0].size, [2.0, 2.0, 2.0]);
        assert!(written.other.contains_key("guns"));
    }

    #[test]
    fn moving_a_middle_node_rebuilds_both_adjoining_segments() {
        let mut scene = Scene::new();
        let (_, sections) = hull(&mut scene, &[3.0, 0.0, -3.0]);
        scene.rebuild_dirty();
        let front_before = scene.mesh(sections[0]).unwrap().bounds().unwrap();
        let back_before = scene.mesh(sections[1]).unwrap().bounds().unwrap();

        scene.move_node(sections[1], 1, [6.0, 0.0]).unwrap();
        let report = scene.rebuild_dirty();

        assert_eq!(report.rebuilt.len(), 2);
        assert!(report.rebuilt.contains(&sections[0]));
        assert!(report.rebuilt.contains(&sections[1]));
        let front_after = scene.mesh(sections[0]).unwrap().bounds().unwrap();
        let back_after = scene.mesh(sections[1]).unwrap().bounds().unwrap();
        assert!(front_after.1[0] > front_before.1[0] + 1.0);
        assert!(back_after.1[0] > back_before.1[0] + 1.0);
        assert!(scene.mesh(sections[2]).is_none());
    }

    #[test]
    fn invalid_node_move_is_rejected_without_dirtying() {
        let mut scene = Scene::new();
        let (_, sections) = hull(&mut scene, &[3.0, 0.0, -3.0]);
        scene.rebuild_dirty();
        assert_eq!(
            scene.move_node(sections[1], 1, [4.0, 5.0]),
            Err(EditError::Geometry(GeometryError::UnsortedNodes { index: 2 }))
        );
        assert!(!scene.has_pending_rebuild());
        assert_eq!(scene.section(sections[1]).unwrap().nodes[1], [4.0, 0.0]);
    }

    #[test]
    fn added_section_is_inserted_in_z_order() {
        let mut scene = Scene::new();
        let (group, sections) = hull(&mut scene, &[3.0, -3.0]);
        scene.rebuild_dirty();

        let middle = scene.add_section(group, 0.0, profile()).unwrap();
        assert_eq!(
            scene.group(group).unwrap().sections(),
            &[sections[1], middle, sections[0]]
        );
        assert_eq!(
            scene.add_section(group, 1.0, vec![[0.0, 0.0], [0.0, 1.0]]),
            Err(EditError::Geometry(GeometryError::NodeCountMismatch { front: 3, back: 2 }))
        );
        assert_eq!(scene.add_section(group, 3.0, profile()), Err(EditError::DuplicateZ(3.0)));

        scene.rebuild_dirty();
        let (min, max) = scene.mesh(sections[0]).unwrap().bounds().unwrap();
        assert!(min[2].abs() < 1e-5 && (max[2] - 3.0).abs() < 1e-5);
        assert!(scene.mesh(middle).is_some());
    }

    #[test]
    fn rotating_a_section_turns_its_group() {
        let mut scene = Scene::new();
        let (group, sections) = hull(&mut scene, &[3.0, -3.0]);
        scene.rebuild_dirty();
        scene.rotate(sections[1], Vector3::new(0.0, 90.0, 0.0)).unwrap();
        scene.rebuild_dirty();

        assert!((scene.group(group).unwrap().rotation.y - 90.0).abs() < 1e-5);
        let (min, max) = scene.mesh(sections[0]).unwrap().bounds().unwrap();
        assert!((max[0] - 3.0).abs() < 1e-3 && (min[0] + 3.0).abs() < 1e-3);
        assert!((max[2] - 4.0).abs() < 1e-3 && (min[2] + 4.0).abs() < 1e-3);
    }

    #[test]
    fn renaming_a_section_renames_its_group() {
        let mut scene = Scene::new();
        let (group, sections) = hull(&mut scene, &[3.0, -3.0]);
        assert_eq!(scene.rename(sections[0], "  Bow  "), Ok(true));
        assert_eq!(scene.group(group).unwrap().name, "Bow");
        assert_eq!(scene.rename(group, "   "), Ok(false));
        assert_eq!(scene.group(group).unwrap().name, "Bow");

        scene.delete(group).unwrap();
        assert_eq!(scene.rename(group, "Stern"), Err(EditError::StaleHandle));
    }

    #[test]
    fn project_with_mirrored_node_is_rejected() {
        let json = r#"{"hull_section_groups": [{
            "center": [0, 0, 0], "rot": [0, 0, 0],
            "sections": [
                {"z": 3, "nodes": [[0, -3], [-4, 0], [0, 3]]},
                {"z": -3, "nodes": [[0, -3], [4, 0], [0, 3]]}
            ]
        }]}"#;
        let document: ProjectDocument = serde_json::from_str(json).unwrap();
        match Scene::from_project(&document) {
            Err(ProjectError::InvalidGroup { group, source }) => {
                assert_eq!(group, 0);
                assert_eq!(
                    source,
                    EditError::Geometry(GeometryError::NegativeX { index: 1 })
                );
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn invalid_project_group_reports_its_index() {
        let json = r#"{"hull_section_groups": [{
            "center": [0, 0, 0], "rot": [0, 0, 0],
            "sections": [{"z": 0, "nodes": [[0, 0], [0, 1]]}]
        }]}"#;
        let document: ProjectDocument = serde_json::from_str(json).unwrap();
        match Scene::from_project(&document) {
            Err(ProjectError::InvalidGroup { group, source }) => {
                assert_eq!(group, 0);
                assert_eq!(source, EditError::TooFewSections(2));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
