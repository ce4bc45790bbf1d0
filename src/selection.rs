use std::collections::BTreeSet;

use crate::picking::PickRequest;
use crate::registry::Handle;
use crate::renderer::OverlayVertex;

/// Currently selected parts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectionSet {
    handles: BTreeSet<Handle>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.handles.iter().copied().collect()
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.handles.is_empty();
        self.handles.clear();
        changed
    }

    /// Drops handles the predicate rejects (deleted parts).
    pub fn retain(&mut self, mut live: impl FnMut(Handle) -> bool) -> bool {
        let before = self.handles.len();
        self.handles.retain(|&h| live(h));
        before != self.handles.len()
    }

    /// Applies a pick result. A plain click replaces the selection, a click
    /// with `additive` toggles the hit, and a box always unions. Returns
    /// whether the selection changed.
    pub fn apply(&mut self, request: &PickRequest, hits: &[Handle], additive: bool) -> bool {
        let before = self.handles.clone();
        match request {
            PickRequest::Click { .. } => match (hits.first(), additive) {
                (Some(&hit), true) => {
                    if !self.handles.remove(&hit) {
                        self.handles.insert(hit);
                    }
                }
                (Some(&hit), false) => {
                    self.handles.clear();
                    self.handles.insert(hit);
                }
                (None, true) => {}
                (None, false) => self.handles.clear(),
            },
            PickRequest::Box { .. } => self.handles.extend(hits.iter().copied()),
        }
        before != self.handles
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum DragState {
    Idle,
    Dragging { start: [f32; 2], end: [f32; 2] },
}

/// Press/move/release tracking for the primary button.
#[derive(Clone, Debug)]
pub struct DragSelect {
    threshold: f32,
    state: DragState,
}

impl DragSelect {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            state: DragState::Idle,
        }
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    pub fn press(&mut self, position: [f32; 2]) {
        self.state = DragState::Dragging {
            start: position,
            end: position,
        };
    }

    /// Returns `true` when the rectangle changed and needs a repaint.
    pub fn drag(&mut self, position: [f32; 2]) -> bool {
        match &mut self.state {
            DragState::Dragging { end, .. } if *end != position => {
                *end = position;
                true
            }
            _ => false,
        }
    }

    /// Finishes the drag: below the threshold in both axes it is a click at
    /// the press point, otherwise a box.
    pub fn release(&mut self, position: [f32; 2]) -> Option<PickRequest> {
        let DragState::Dragging { start, .. } = std::mem::replace(&mut self.state, DragState::Idle)
        else {
            return None;
        };
        let dx = (position[0] - start[0]).abs();
        let dy = (position[1] - start[1]).abs();
        if dx < self.threshold && dy < self.threshold {
            Some(PickRequest::Click {
                x: start[0],
                y: start[1],
            })
        } else {
            Some(PickRequest::Box {
                start,
                end: position,
            })
        }
    }

    pub fn cancel(&mut self) {
        self.state = DragState::Idle;
    }

    /// Rectangle to draw while the drag is past the threshold.
    pub fn rectangle(&self) -> Option<([f32; 2], [f32; 2])> {
        match self.state {
            DragState::Dragging { start, end }
                if (end[0] - start[0]).abs() >= self.threshold
                    || (end[1] - start[1]).abs() >= self.threshold =>
            {
                Some((start, end))
            }
            _ => None,
        }
    }
}

pub const DASH_LENGTH: f32 = 6.0;
pub const DASH_GAP: f32 = 4.0;
pub const DASH_THICKNESS: f32 = 1.0;
pub const DASH_COLOR: [f32; 4] = [0.95, 0.95, 0.95, 0.9];

/// Screen-space quads in pixel coordinates, emitted in clip space.
pub struct OverlayGeometry {
    viewport: [f32; 2],
    pub vertices: Vec<OverlayVertex>,
    pub indices: Vec<u16>,
}

impl OverlayGeometry {
    pub fn new(viewport: [u32; 2]) -> Self {
        Self {
            viewport: [viewport[0].max(1) as f32, viewport[1].max(1) as f32],
            vertices: Vec::new(),
            indices: Vec::new(),
        }
    }

    pub fn add_rect(&mut self, min: [f32; 2], max: [f32; 2], color: [f32; 4]) {
        if max[0] <= min[0] || max[1] <= min[1] {
            return;
        }
        let base = self.vertices.len();
        if base > (u16::MAX as usize) - 4 {
            return;
        }
        let base_index = base as u16;

        let x0 = min[0] / self.viewport[0] * 2.0 - 1.0;
        let x1 = max[0] / self.viewport[0] * 2.0 - 1.0;
        let y0 = 1.0 - min[1] / self.viewport[1] * 2.0;
        let y1 = 1.0 - max[1] / self.viewport[1] * 2.0;
        for position in [[x0, y0], [x1, y0], [x1, y1], [x0, y1]] {
            self.vertices.push(OverlayVertex { position, color });
        }
        self.indices.extend_from_slice(&[
            base_index,
            base_index + 1,
            base_index + 2,
            base_index,
            base_index + 2,
            base_index + 3,
        ]);
    }

    /// Dashed outline of the rectangle spanned by two corners.
    pub fn add_dashed_rect(&mut self, a: [f32; 2], b: [f32; 2], color: [f32; 4]) {
        let (x0, x1) = (a[0].min(b[0]), a[0].max(b[0]));
        let (y0, y1) = (a[1].min(b[1]), a[1].max(b[1]));
        let t = DASH_THICKNESS;
        let step = DASH_LENGTH + DASH_GAP;

        let mut x = x0;
        while x < x1 {
            let end = (x + DASH_LENGTH).min(x1);
            self.add_rect([x, y0], [end, y0 + t], color);
            self.add_rect([x, y1 - t], [end, y1], color);
            x += step;
        }
        let mut y = y0;
        while y < y1 {
            let end = (y + DASH_LENGTH).min(y1);
            self.add_rect([x0, y], [x0 + t, end], color);
            self.add_rect([x1 - t, y], [x1, end], color);
            y += step;
        }
    }
}
