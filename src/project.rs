//! Project documents (`*.json`): one array per part category.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProjectError;
use crate::section::{Node, DEFAULT_HULL_COLOR};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectDocument {
    #[serde(default)]
    pub hull_section_groups: Vec<SectionGroupRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boxes: Vec<SolidRecord>,
    /// Categories this editor does not model, written back untouched.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionGroupRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub center: [f32; 3],
    pub rot: [f32; 3],
    #[serde(default = "default_curvature")]
    pub top_cur: f32,
    #[serde(default = "default_curvature")]
    pub bot_cur: f32,
    pub sections: Vec<SectionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub z: f32,
    pub nodes: Vec<Node>,
    #[serde(default = "default_color")]
    pub col: [f32; 3],
    #[serde(default)]
    pub armor: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolidRecord {
    pub name: String,
    pub center: [f32; 3],
    #[serde(default)]
    pub rot: [f32; 3],
    pub size: [f32; 3],
    #[serde(default = "default_color")]
    pub col: [f32; 3],
}

fn default_curvature() -> f32 {
    0.5
}

fn default_color() -> [f32; 3] {
    DEFAULT_HULL_COLOR
}

pub fn load(path: &Path) -> Result<ProjectDocument, ProjectError> {
    let content = std::fs::read_to_string(path).map_err(|source| ProjectError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ProjectError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save(path: &Path, document: &ProjectDocument) -> Result<(), ProjectError> {
    let content = serde_json::to_string_pretty(document).map_err(|source| ProjectError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, content).map_err(|source| ProjectError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "hull_section_groups": [{
            "center": [0, 0, 0],
            "rot": [0, 90, 0],
            "top_cur": 0.0,
            "bot_cur": 1.0,
            "sections": [
                {"z": 3, "nodes": [[0, -3], [4, 0], [0, 3]], "col": [0.5, 0.5, 0.5], "armor": 20},
                {"z": -3, "nodes": [[0, -3], [4, 0], [0, 3]]}
            ]
        }],
        "turrets": [{"caliber": 152}]
    }"#;

    #[test]
    fn parses_groups_and_keeps_unknown_categories() {
        let doc: ProjectDocument = serde_json::from_str(SAMPLE).unwrap();
        let group = &doc.hull_section_groups[0];
        assert_eq!(group.rot, [0.0, 90.0, 0.0]);
        assert_eq!(group.sections[0].armor, 20.0);
        assert_eq!(group.sections[1].col, DEFAULT_HULL_COLOR);
        assert!(doc.other.contains_key("turrets"));

        let written = serde_json::to_value(&doc).unwrap();
        assert_eq!(written["turrets"][0]["caliber"], 152);
        assert!(written.get("boxes").is_none());
    }

    #[test]
    fn save_then_load_from_disk() {
        let doc: ProjectDocument = serde_json::from_str(SAMPLE).unwrap();
        let path = std::env::temp_dir().join(format!("hullforge-{}.json", std::process::id()));
        save(&path, &doc).unwrap();
        let loaded = load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn reports_path_on_failure() {
        let path = Path::new("/definitely/not/here.json");
        let err = load(path).unwrap_err();
        assert!(matches!(err, ProjectError::Io { .. }));
        assert!(err.to_string().contains("here.json"));
    }
}
