//! Editor settings (`<config dir>/hullforge/config.toml`)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditorConfig {
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub picking: PickingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_fovy")]
    pub fovy: f32,
    #[serde(default)]
    pub start_orthographic: bool,
    #[serde(default = "default_ortho_scale")]
    pub ortho_scale: f32,
    #[serde(default = "default_background")]
    pub background: [f32; 3],
    #[serde(default = "default_true")]
    pub vsync: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_orbit_sensitivity")]
    pub orbit_sensitivity: f32,
    #[serde(default = "default_pan_sensitivity")]
    pub pan_sensitivity: f32,
    #[serde(default = "default_zoom_step")]
    pub zoom_step: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickingConfig {
    /// Pixels the cursor must travel before a press becomes a box drag.
    #[serde(default = "default_drag_threshold")]
    pub drag_threshold: f32,
    #[serde(default = "default_record_capacity")]
    pub record_capacity: usize,
}

fn default_true() -> bool {
    true
}
fn default_fovy() -> f32 {
    45.0
}
fn default_ortho_scale() -> f32 {
    40.0
}
fn default_background() -> [f32; 3] {
    [0.16, 0.18, 0.21]
}
fn default_orbit_sensitivity() -> f32 {
    0.008
}
fn default_pan_sensitivity() -> f32 {
    0.0015
}
fn default_zoom_step() -> f32 {
    0.1
}
fn default_drag_threshold() -> f32 {
    3.0
}
fn default_record_capacity() -> usize {
    4096
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            fovy: default_fovy(),
            start_orthographic: false,
            ortho_scale: default_ortho_scale(),
            background: default_background(),
            vsync: true,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            orbit_sensitivity: default_orbit_sensitivity(),
            pan_sensitivity: default_pan_sensitivity(),
            zoom_step: default_zoom_step(),
        }
    }
}

impl Default for PickingConfig {
    fn default() -> Self {
        Self {
            drag_threshold: default_drag_threshold(),
            record_capacity: default_record_capacity(),
        }
    }
}

pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "hullforge", "hullforge")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn load() -> EditorConfig {
    let Some(path) = config_dir().map(|dir| dir.join("config.toml")) else {
        return EditorConfig::default();
    };
    let Ok(content) = std::fs::read_to_string(&path) else {
        return EditorConfig::default();
    };
    match toml::from_str(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("ignoring malformed {}: {err}", path.display());
            EditorConfig::default()
        }
    }
}

pub fn save(config: &EditorConfig) -> anyhow::Result<()> {
    if let Some(dir) = config_dir() {
        std::fs::create_dir_all(&dir)?;
        let content = toml::to_string_pretty(config)?;
        std::fs::write(dir.join("config.toml"), content)?;
    }
    Ok(())
}
