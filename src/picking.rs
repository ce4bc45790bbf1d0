//! Hit-testing by rendering: every drawable is drawn with a unique name into
//! a narrowed pick window, and the names that survive the depth test come
//! back as [`HitRecord`]s.

use std::collections::{BTreeMap, BTreeSet};

use cgmath::Matrix4;

use crate::camera::pick_matrix;
use crate::error::PickError;
use crate::registry::Handle;
use crate::scene::Drawable;

/// Name written by the cleared background; never assigned to a drawable.
pub const BACKGROUND_NAME: u32 = 0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HitRecord {
    pub name: u32,
    pub near_depth: f32,
    pub far_depth: f32,
}

/// Pick region in bottom-left-origin viewport pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PickWindow {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    pub viewport: [u32; 2],
}

impl PickWindow {
    pub fn matrix(&self) -> Matrix4<f32> {
        pick_matrix(
            self.center_x,
            self.center_y,
            self.width,
            self.height,
            self.viewport,
        )
    }

    /// Size of the offscreen target; one texel per viewport pixel.
    pub fn pixel_size(&self) -> (u32, u32) {
        (
            self.width.round().max(1.0) as u32,
            self.height.round().max(1.0) as u32,
        )
    }
}

/// Renderer side of a pick pass.
pub trait PickBackend {
    /// Starts a pass. `view_proj` is the active camera matrix; the backend
    /// composes the pick window on top of it.
    fn enter_pick_mode(
        &mut self,
        capacity: usize,
        window: PickWindow,
        view_proj: Matrix4<f32>,
    ) -> Result<(), PickError>;

    fn draw(&mut self, name: u32, drawable: &Drawable<'_>) -> Result<(), PickError>;

    fn exit_pick_mode(&mut self) -> Result<Vec<HitRecord>, PickError>;
}

/// Pick names handed out during one pass, starting at 1.
#[derive(Debug, Default)]
pub struct NameTable {
    handles: Vec<Handle>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, handle: Handle) -> u32 {
        self.handles.push(handle);
        self.handles.len() as u32
    }

    pub fn resolve(&self, name: u32) -> Option<Handle> {
        let index = name.checked_sub(1)?;
        self.handles.get(index as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }
}

/// Collapses per-pixel names and depths into one record per name.
pub fn reduce_pixels(
    names: &[u32],
    depths: &[f32],
    capacity: usize,
) -> Result<Vec<HitRecord>, PickError> {
    let mut records: BTreeMap<u32, HitRecord> = BTreeMap::new();
    for (&name, &depth) in names.iter().zip(depths) {
        if name == BACKGROUND_NAME {
            continue;
        }
        records
            .entry(name)
            .and_modify(|record| {
                record.near_depth = record.near_depth.min(depth);
                record.far_depth = record.far_depth.max(depth);
            })
            .or_insert(HitRecord {
                name,
                near_depth: depth,
                far_depth: depth,
            });
    }
    if records.len() > capacity {
        return Err(PickError::Overflow {
            hits: records.len(),
            capacity,
        });
    }
    Ok(records.into_values().collect())
}

/// Screen positions are top-left-origin pixels, as winit reports them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PickRequest {
    Click { x: f32, y: f32 },
    Box { start: [f32; 2], end: [f32; 2] },
}

/// 1x1 window over the pixel under the cursor.
pub fn click_window(x: f32, y: f32, viewport: [u32; 2]) -> Option<PickWindow> {
    let vw = viewport[0] as f32;
    let vh = viewport[1] as f32;
    if !(x >= 0.0 && y >= 0.0 && x < vw && y < vh) {
        return None;
    }
    Some(PickWindow {
        center_x: x.floor() + 0.5,
        center_y: vh - (y.floor() + 0.5),
        width: 1.0,
        height: 1.0,
        viewport,
    })
}

/// Box window snapped outward to whole pixels. Boxes below `threshold`
/// pixels in either axis yield `None`.
pub fn box_window(
    start: [f32; 2],
    end: [f32; 2],
    viewport: [u32; 2],
    threshold: f32,
) -> Option<PickWindow> {
    let (min_x, max_x) = (start[0].min(end[0]), start[0].max(end[0]));
    let (min_y, max_y) = (start[1].min(end[1]), start[1].max(end[1]));
    if max_x - min_x < threshold || max_y - min_y < threshold {
        return None;
    }

    let vw = viewport[0] as f32;
    let vh = viewport[1] as f32;
    let x0 = min_x.floor().max(0.0);
    let x1 = max_x.ceil().min(vw);
    let y0 = min_y.floor().max(0.0);
    let y1 = max_y.ceil().min(vh);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(PickWindow {
        center_x: (x0 + x1) * 0.5,
        center_y: vh - (y0 + y1) * 0.5,
        width: x1 - x0,
        height: y1 - y0,
        viewport,
    })
}

/// Nearest named record.
pub fn nearest_hit(names: &NameTable, records: &[HitRecord]) -> Option<Handle> {
    records
        .iter()
        .filter_map(|record| names.resolve(record.name).map(|h| (record.near_depth, h)))
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, handle)| handle)
}

/// Every named record once, in name order.
pub fn all_hits(names: &NameTable, records: &[HitRecord]) -> Vec<Handle> {
    let by_name: BTreeSet<u32> = records.iter().map(|record| record.name).collect();
    let mut seen = BTreeSet::new();
    by_name
        .into_iter()
        .filter_map(|name| names.resolve(name))
        .filter(|handle| seen.insert(*handle))
        .collect()
}

/// Turns click and box requests into selected handles. Picking is best
/// effort: backend failures are logged and yield an empty result.
#[derive(Clone, Debug)]
pub struct PickingPipeline {
    capacity: usize,
    box_threshold: f32,
}

impl PickingPipeline {
    pub fn new(capacity: usize, box_threshold: f32) -> Self {
        Self {
            capacity,
            box_threshold,
        }
    }

    pub fn pick<'a, B: PickBackend>(
        &self,
        backend: &mut B,
        drawables: impl IntoIterator<Item = Drawable<'a>>,
        view_proj: Matrix4<f32>,
        viewport: [u32; 2],
        request: PickRequest,
    ) -> Vec<Handle> {
        match request {
            PickRequest::Click { x, y } => self
                .click(backend, drawables, view_proj, viewport, x, y)
                .into_iter()
                .collect(),
            PickRequest::Box { start, end } => {
                self.pick_box(backend, drawables, view_proj, viewport, start, end)
            }
        }
    }

    pub fn click<'a, B: PickBackend>(
        &self,
        backend: &mut B,
        drawables: impl IntoIterator<Item = Drawable<'a>>,
        view_proj: Matrix4<f32>,
        viewport: [u32; 2],
        x: f32,
        y: f32,
    ) -> Option<Handle> {
        let window = click_window(x, y, viewport)?;
        match self.run(backend, drawables, window, view_proj) {
            Ok((names, records)) => nearest_hit(&names, &records),
            Err(err) => {
                tracing::warn!("click pick skipped: {err}");
                None
            }
        }
    }

    pub fn pick_box<'a, B: PickBackend>(
        &self,
        backend: &mut B,
        drawables: impl IntoIterator<Item = Drawable<'a>>,
        view_proj: Matrix4<f32>,
        viewport: [u32; 2],
        start: [f32; 2],
        end: [f32; 2],
    ) -> Vec<Handle> {
        let Some(window) = box_window(start, end, viewport, self.box_threshold) else {
            return Vec::new();
        };
        match self.run(backend, drawables, window, view_proj) {
            Ok((names, records)) => all_hits(&names, &records),
            Err(err) => {
                tracing::warn!("box pick skipped: {err}");
                Vec::new()
            }
        }
    }

    fn run<'a, B: PickBackend>(
        &self,
        backend: &mut B,
        drawables: impl IntoIterator<Item = Drawable<'a>>,
        window: PickWindow,
        view_proj: Matrix4<f32>,
    ) -> Result<(NameTable, Vec<HitRecord>), PickError> {
        backend.enter_pick_mode(self.capacity, window, view_proj)?;
        let mut names = NameTable::new();
        for drawable in drawables {
            let name = names.assign(drawable.handle);
            if let Err(err) = backend.draw(name, &drawable) {
                // Leave pick mode so the next pass starts clean.
                if let Err(exit_err) = backend.exit_pick_mode() {
                    tracing::debug!("exit after failed draw: {exit_err}");
                }
                return Err(err);
            }
        }
        let records = backend.exit_pick_mode()?;
        tracing::trace!(names = names.len(), hits = records.len(), "pick pass");
        Ok((names, records))
    }
}
