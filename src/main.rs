mod camera;
mod config;
mod error;
mod events;
mod mesh;
mod part;
mod picking;
mod project;
mod registry;
mod renderer;
mod scene;
mod section;
mod selection;
#[cfg(test)]
mod software_pick;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use camera::{Camera, CameraController, Projection};
use cgmath::{point3, Vector3};
use config::EditorConfig;
use part::Solid;
use picking::PickingPipeline;
use registry::Handle;
use renderer::Renderer;
use scene::Scene;
use section::{Node, SectionGroup};
use selection::{DragSelect, OverlayGeometry, SelectionSet, DASH_COLOR};
use tracing_subscriber::EnvFilter;
use winit::{
    event::*,
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowBuilder},
};

const WINDOW_TITLE: &str = "Hullforge";
const DEFAULT_PROJECT_FILE: &str = "hull.json";
const MOVE_STEP: f32 = 1.0;
const ROTATE_STEP_DEG: f32 = 15.0;
const CURVATURE_STEP: f32 = 0.1;
const NEW_SECTION_SPACING: f32 = 4.0;
const Z_STEP: f32 = 0.5;
const NODE_STEP: f32 = 0.25;
const MAX_NAME_LEN: usize = 32;

/// Shared with the event bus listeners; drained into the window title.
#[derive(Default)]
struct StatusLine {
    selected: usize,
    rebuilt: u64,
    message: Option<String>,
    changed: bool,
}

/// Name being typed for a part. Committed on Enter.
struct RenameEdit {
    target: Handle,
    buffer: String,
}

impl RenameEdit {
    fn push_text(&mut self, text: &str) {
        for ch in text.chars().filter(|ch| !ch.is_control()) {
            if self.buffer.chars().count() >= MAX_NAME_LEN {
                break;
            }
            self.buffer.push(ch);
        }
    }
}

struct State<'window> {
    window: &'window Window,
    renderer: Renderer<'window>,
    scene: Scene,
    camera: Camera,
    projection: Projection,
    controller: CameraController,
    picking: PickingPipeline,
    drag: DragSelect,
    selection: SelectionSet,
    modifiers: Modifiers,
    cursor: [f32; 2],
    rename: Option<RenameEdit>,
    status: Rc<RefCell<StatusLine>>,
    project_path: PathBuf,
    config: EditorConfig,
}

impl<'window> State<'window> {
    fn new(
        window: &'window Window,
        config: EditorConfig,
        scene: Scene,
        project_path: PathBuf,
    ) -> anyhow::Result<Self> {
        let mut renderer = Renderer::new(window, config.view.vsync)?;
        renderer.set_clear_color(config.view.background);

        let size = window.inner_size();
        let projection = Projection::new(size.width, size.height);
        let mut camera = Camera::new(
            point3(0.0, 0.0, 0.0),
            point3(18.0, 10.0, 24.0),
            config.view.fovy,
        );
        camera.ortho_scale = config.view.ortho_scale;
        if config.view.start_orthographic {
            camera.toggle_projection();
        }
        let controller = CameraController::new(
            config.input.orbit_sensitivity,
            config.input.pan_sensitivity,
            config.input.zoom_step,
        );

        let status = Rc::new(RefCell::new(StatusLine {
            changed: true,
            ..StatusLine::default()
        }));
        {
            let status = Rc::clone(&status);
            scene.events().on_selection_changed(move |handles| {
                let mut status = status.borrow_mut();
                status.selected = handles.len();
                status.changed = true;
            });
        }
        {
            let status = Rc::clone(&status);
            scene.events().on_mesh_invalidated(move |_| {
                let mut status = status.borrow_mut();
                status.rebuilt += 1;
                status.changed = true;
            });
        }

        let mut state = Self {
            window,
            renderer,
            scene,
            camera,
            projection,
            controller,
            picking: PickingPipeline::new(
                config.picking.record_capacity,
                config.picking.drag_threshold,
            ),
            drag: DragSelect::new(config.picking.drag_threshold),
            selection: SelectionSet::new(),
            modifiers: Modifiers::default(),
            cursor: [0.0, 0.0],
            rename: None,
            status,
            project_path,
            config,
        };
        let report = state.scene.rebuild_dirty();
        for (handle, err) in &report.errors {
            tracing::warn!(?handle, "initial mesh build failed: {err}");
        }
        state.renderer.upload_scene(&state.scene);
        Ok(state)
    }

    fn window(&self) -> &Window {
        self.window
    }

    fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        self.renderer.resize(new_size, &mut self.projection);
        self.cancel_drag();
    }

    fn input(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::ModifiersChanged(mods) => {
                self.modifiers = *mods;
                return false;
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = [position.x as f32, position.y as f32];
                let (dragged, camera_moved) = track_cursor(
                    &mut self.controller,
                    &mut self.camera,
                    &mut self.drag,
                    self.cursor,
                );
                if dragged {
                    self.refresh_overlay();
                }
                return dragged || camera_moved;
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                match state {
                    ElementState::Pressed => self.drag.press(self.cursor),
                    ElementState::Released => self.finish_drag(),
                }
                return true;
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed {
                    if self.rename.is_some() {
                        self.rename_key(event);
                        return true;
                    }
                    if let PhysicalKey::Code(key) = event.physical_key {
                        return self.handle_key(key);
                    }
                }
                return false;
            }
            _ => {}
        }

        self.controller.process_events(event, &mut self.camera)
    }

    fn finish_drag(&mut self) {
        let Some(request) = self.drag.release(self.cursor) else {
            return;
        };
        self.refresh_overlay();

        let view_proj = self.projection.view_proj(&self.camera);
        let hits = self.picking.pick(
            &mut self.renderer,
            self.scene.drawables(),
            view_proj,
            self.projection.viewport(),
            request,
        );
        let state = self.modifiers.state();
        let additive = state.shift_key() || state.control_key();
        if self.selection.apply(&request, &hits, additive) {
            self.selection_changed();
        }
    }

    fn selection_changed(&mut self) {
        let handles = self.selection.handles();
        self.renderer.set_selection(&handles);
        self.scene.events().emit_selection_changed(&handles);
        if let [only] = handles.as_slice() {
            if let Some(part) = self.scene.get(*only) {
                let message = format!("{} '{}'", part.kind(), part.label());
                self.set_message(message);
            }
        }
    }

    fn refresh_overlay(&mut self) {
        let overlay = drag_overlay(&self.drag, self.projection.viewport());
        self.renderer
            .update_overlay(&overlay.vertices, &overlay.indices);
    }

    /// Abandons a box drag and clears its rectangle from the overlay.
    fn cancel_drag(&mut self) {
        self.drag.cancel();
        self.refresh_overlay();
    }

    fn handle_key(&mut self, key: KeyCode) -> bool {
        let mods = self.modifiers.state();
        match key {
            KeyCode::Escape => {
                if self.drag.is_dragging() {
                    self.cancel_drag();
                } else if self.selection.clear() {
                    self.selection_changed();
                }
            }
            KeyCode::KeyP => {
                self.camera.toggle_projection();
                self.config.view.start_orthographic = self.camera.is_orthographic();
                let mode = if self.camera.is_orthographic() {
                    "orthographic"
                } else {
                    "perspective"
                };
                self.set_message(format!("{mode} view"));
            }
            KeyCode::KeyS if mods.control_key() => self.save_project(),
            KeyCode::Delete | KeyCode::Backspace => self.delete_selection(),
            KeyCode::ArrowLeft => self.translate_selection(Vector3::new(-MOVE_STEP, 0.0, 0.0)),
            KeyCode::ArrowRight => self.translate_selection(Vector3::new(MOVE_STEP, 0.0, 0.0)),
            KeyCode::ArrowUp if mods.shift_key() => {
                self.translate_selection(Vector3::new(0.0, MOVE_STEP, 0.0))
            }
            KeyCode::ArrowDown if mods.shift_key() => {
                self.translate_selection(Vector3::new(0.0, -MOVE_STEP, 0.0))
            }
            KeyCode::ArrowUp => self.translate_selection(Vector3::new(0.0, 0.0, -MOVE_STEP)),
            KeyCode::ArrowDown => self.translate_selection(Vector3::new(0.0, 0.0, MOVE_STEP)),
            KeyCode::KeyR => {
                let step = if mods.shift_key() {
                    -ROTATE_STEP_DEG
                } else {
                    ROTATE_STEP_DEG
                };
                self.rotate_selection(Vector3::new(0.0, step, 0.0));
            }
            KeyCode::BracketLeft => self.adjust_curvature(-CURVATURE_STEP, mods.shift_key()),
            KeyCode::BracketRight => self.adjust_curvature(CURVATURE_STEP, mods.shift_key()),
            KeyCode::Insert | KeyCode::Equal => self.edit_nodes(true),
            KeyCode::Minus => self.edit_nodes(false),
            KeyCode::KeyN if mods.shift_key() => self.prepend_section(),
            KeyCode::KeyN => self.append_section(),
            KeyCode::PageUp => self.nudge_section_z(Z_STEP),
            KeyCode::PageDown => self.nudge_section_z(-Z_STEP),
            KeyCode::Comma => self.nudge_node(-NODE_STEP, mods.shift_key()),
            KeyCode::Period => self.nudge_node(NODE_STEP, mods.shift_key()),
            KeyCode::F2 => self.begin_rename(),
            _ => return false,
        }
        true
    }

    /// Groups and solids owning the current selection, each once.
    fn selected_owners(&self) -> Vec<Handle> {
        let mut owners = Vec::new();
        for handle in self.selection.handles() {
            if let Some(owner) = self.scene.owner_of(handle) {
                if !owners.contains(&owner) {
                    owners.push(owner);
                }
            }
        }
        owners
    }

    fn selected_sections(&self) -> Vec<Handle> {
        self.selection
            .handles()
            .into_iter()
            .filter(|&h| self.scene.section(h).is_some())
            .collect()
    }

    fn selected_groups(&self) -> Vec<Handle> {
        self.selected_owners()
            .into_iter()
            .filter(|&h| self.scene.group(h).is_some())
            .collect()
    }

    fn translate_selection(&mut self, delta: Vector3<f32>) {
        for owner in self.selected_owners() {
            if let Err(err) = self.scene.translate(owner, delta) {
                self.set_message(format!("move failed: {err}"));
            }
        }
    }

    fn rotate_selection(&mut self, delta: Vector3<f32>) {
        for owner in self.selected_owners() {
            if let Err(err) = self.scene.rotate(owner, delta) {
                self.set_message(format!("rotate failed: {err}"));
            }
        }
    }

    fn adjust_curvature(&mut self, delta: f32, bottom: bool) {
        for group in self.selected_groups() {
            let Some(current) = self.scene.group(group).map(|g| g.curvature) else {
                continue;
            };
            let (top, bot) = if bottom {
                (current.top, current.bottom + delta)
            } else {
                (current.top + delta, current.bottom)
            };
            if let Err(err) = self.scene.set_curvature(group, top, bot) {
                self.set_message(format!("curvature failed: {err}"));
            }
        }
    }

    /// Inserts or removes the first interior node on every selected group.
    fn edit_nodes(&mut self, insert: bool) {
        for group in self.selected_groups() {
            let result = if insert {
                self.scene.insert_node(group, 1)
            } else {
                self.scene.remove_node(group, 1)
            };
            if let Err(err) = result {
                self.set_message(err.to_string());
            }
        }
    }

    /// Copies the back-most section of each selected group further back.
    fn append_section(&mut self) {
        for group in self.selected_groups() {
            let Some(back) = self
                .scene
                .group(group)
                .and_then(|g| g.back_most())
                .and_then(|h| self.scene.section(h))
            else {
                continue;
            };
            let z = back.z - NEW_SECTION_SPACING;
            let nodes: Vec<Node> = back.nodes.clone();
            if let Err(err) = self.scene.add_section(group, z, nodes) {
                self.set_message(format!("add section failed: {err}"));
            }
        }
    }

    /// Copies the front-most section of each selected group further forward.
    fn prepend_section(&mut self) {
        for group in self.selected_groups() {
            let Some(front) = self
                .scene
                .group(group)
                .and_then(|g| g.front_most())
                .and_then(|h| self.scene.section(h))
            else {
                continue;
            };
            let z = front.z + NEW_SECTION_SPACING;
            let nodes: Vec<Node> = front.nodes.clone();
            if let Err(err) = self.scene.add_section(group, z, nodes) {
                self.set_message(format!("add section failed: {err}"));
            }
        }
    }

    fn nudge_section_z(&mut self, delta: f32) {
        for section in self.selected_sections() {
            let Some(z) = self.scene.section(section).map(|s| s.z) else {
                continue;
            };
            if let Err(err) = self.scene.set_section_z(section, z + delta) {
                self.set_message(format!("move section failed: {err}"));
            }
        }
    }

    /// Moves the first interior node of every selected section, along x or y.
    fn nudge_node(&mut self, delta: f32, vertical: bool) {
        for section in self.selected_sections() {
            let Some(node) = self.scene.section(section).and_then(|s| s.nodes.get(1).copied())
            else {
                continue;
            };
            let moved = if vertical {
                [node[0], node[1] + delta]
            } else {
                [node[0] + delta, node[1]]
            };
            if let Err(err) = self.scene.move_node(section, 1, moved) {
                self.set_message(format!("move node failed: {err}"));
            }
        }
    }

    fn begin_rename(&mut self) {
        let owners = self.selected_owners();
        let &[target] = owners.as_slice() else {
            self.set_message("select one part to rename".to_string());
            return;
        };
        let Some(part) = self.scene.get(target) else {
            return;
        };
        self.rename = Some(RenameEdit {
            target,
            buffer: part.label().to_string(),
        });
        self.show_rename();
    }

    fn rename_key(&mut self, event: &KeyEvent) {
        let Some(mut edit) = self.rename.take() else {
            return;
        };
        match event.physical_key {
            PhysicalKey::Code(KeyCode::Escape) => {
                self.set_message("rename cancelled".to_string());
                return;
            }
            PhysicalKey::Code(KeyCode::Enter | KeyCode::NumpadEnter) => {
                match self.scene.rename(edit.target, &edit.buffer) {
                    Ok(true) => {
                        let message = format!("renamed to '{}'", edit.buffer.trim());
                        self.set_message(message);
                    }
                    Ok(false) => self.set_message("name must not be blank".to_string()),
                    Err(err) => self.set_message(format!("rename failed: {err}")),
                }
                return;
            }
            PhysicalKey::Code(KeyCode::Backspace) => {
                edit.buffer.pop();
            }
            _ => {
                if let Some(text) = &event.text {
                    edit.push_text(text);
                }
            }
        }
        self.rename = Some(edit);
        self.show_rename();
    }

    fn show_rename(&mut self) {
        if let Some(edit) = &self.rename {
            let message = format!("rename: {}_", edit.buffer);
            self.set_message(message);
        }
    }

    fn delete_selection(&mut self) {
        for handle in self.selection.handles() {
            if self.scene.get(handle).is_none() {
                continue;
            }
            match self.scene.delete(handle) {
                Ok(removed) => tracing::debug!(count = removed.len(), "deleted parts"),
                Err(err) => self.set_message(format!("delete failed: {err}")),
            }
        }
        let scene = &self.scene;
        if self.selection.retain(|h| scene.get(h).is_some()) {
            self.selection_changed();
        }
    }

    fn save_project(&mut self) {
        let document = self.scene.to_project();
        match project::save(&self.project_path, &document) {
            Ok(()) => {
                tracing::info!(path = %self.project_path.display(), "project saved");
                let message = format!("saved {}", self.project_path.display());
                self.set_message(message);
            }
            Err(err) => {
                tracing::error!("save failed: {err}");
                self.set_message(format!("save failed: {err}"));
            }
        }
    }

    /// Persists view preferences changed during the session.
    fn save_config(&self) {
        if let Err(err) = config::save(&self.config) {
            tracing::warn!("failed to save config: {err:#}");
        }
    }

    fn set_message(&mut self, message: String) {
        let mut status = self.status.borrow_mut();
        status.message = Some(message);
        status.changed = true;
    }

    fn rebuild_meshes(&mut self) {
        if !self.scene.has_pending_rebuild() {
            return;
        }
        let report = self.scene.rebuild_dirty();
        if let Some((_, err)) = report.errors.first() {
            self.set_message(format!("mesh not updated: {err}"));
        }
        self.renderer.sync_scene(&self.scene, &report);
    }

    fn update(&mut self) {
        self.rebuild_meshes();
        self.renderer.update_camera(&self.camera, &self.projection);

        let mut status = self.status.borrow_mut();
        if status.changed {
            status.changed = false;
            let mut title = format!(
                "{WINDOW_TITLE} - {} selected - {} rebuilds",
                status.selected, status.rebuilt
            );
            if let Some(message) = &status.message {
                title.push_str(" - ");
                title.push_str(message);
            }
            self.window.set_title(&title);
        }
    }

    fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        self.renderer.render()
    }
}

/// Feeds the cursor to both the camera controller and the drag tracker.
/// Returns whether the drag rectangle changed and whether the camera moved.
fn track_cursor(
    controller: &mut CameraController,
    camera: &mut Camera,
    drag: &mut DragSelect,
    cursor: [f32; 2],
) -> (bool, bool) {
    let camera_moved = controller.cursor_moved(cursor[0] as f64, cursor[1] as f64, camera);
    let dragged = drag.drag(cursor);
    (dragged, camera_moved)
}

fn drag_overlay(drag: &DragSelect, viewport: [u32; 2]) -> OverlayGeometry {
    let mut overlay = OverlayGeometry::new(viewport);
    if let Some((start, end)) = drag.rectangle() {
        overlay.add_dashed_rect(start, end, DASH_COLOR);
    }
    overlay
}

fn hull_profile(beam: f32, draft: f32, freeboard: f32) -> Vec<Node> {
    vec![
        [0.0, -draft],
        [beam * 0.75, -draft * 0.7],
        [beam, 0.0],
        [beam * 0.95, freeboard],
    ]
}

fn demo_scene() -> anyhow::Result<Scene> {
    let mut scene = Scene::new();
    let group = SectionGroup::new(
        "Main hull",
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(0.0, 0.0, 0.0),
    );
    let profiles = vec![
        (12.0, hull_profile(1.2, 2.0, 2.6)),
        (6.0, hull_profile(3.2, 3.0, 2.2)),
        (-4.0, hull_profile(3.6, 3.2, 2.0)),
        (-12.0, hull_profile(2.6, 2.6, 2.0)),
    ];
    scene
        .add_group(group, profiles)
        .context("demo hull is invalid")?;
    scene.add_solid(Solid::cuboid(
        "Bridge",
        Vector3::new(0.0, 4.0, -2.0),
        Vector3::new(1.5, 1.5, 2.5),
    ));
    Ok(scene)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hullforge=info")),
        )
        .init();

    let config = config::load();

    let (scene, project_path) = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => {
            let document = project::load(&path)?;
            let scene = Scene::from_project(&document)
                .with_context(|| format!("failed to build scene from {}", path.display()))?;
            tracing::info!(path = %path.display(), "project loaded");
            (scene, path)
        }
        None => (demo_scene()?, PathBuf::from(DEFAULT_PROJECT_FILE)),
    };

    let event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title(WINDOW_TITLE)
        .with_inner_size(winit::dpi::LogicalSize::new(1280.0, 720.0))
        .build(&event_loop)?;

    let mut state = State::new(&window, config, scene, project_path)?;

    event_loop.run(move |event, target| match event {
        Event::WindowEvent {
            ref event,
            window_id,
        } if window_id == state.window().id() => {
            if !state.input(event) {
                match event {
                    WindowEvent::CloseRequested => {
                        state.save_config();
                        target.exit();
                    }
                    WindowEvent::Resized(physical_size) => state.resize(*physical_size),
                    WindowEvent::ScaleFactorChanged { .. } => {
                        let new_size = state.window().inner_size();
                        state.resize(new_size)
                    }
                    WindowEvent::RedrawRequested => match state.render() {
                        Ok(_) => {}
                        Err(wgpu::SurfaceError::Lost) => {
                            let size = state.window().inner_size();
                            state.resize(size);
                        }
                        Err(wgpu::SurfaceError::OutOfMemory) => target.exit(),
                        Err(e) => tracing::error!("render error: {e:?}"),
                    },
                    WindowEvent::Focused(false) => state.cancel_drag(),
                    _ => {}
                }
            }
        }
        Event::AboutToWait => {
            state.update();
            state.window().request_redraw();
        }
        _ => {}
    })?;

    Ok(())
}
