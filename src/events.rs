use std::cell::{Cell, RefCell};

use crate::registry::Handle;

type SelectionListener = Box<dyn FnMut(&[Handle])>;
type MeshListener = Box<dyn FnMut(Handle)>;

/// Plain callbacks between the editing core and whatever UI sits on top.
///
/// Emitting from inside a listener is dropped instead of recursing; the
/// `dispatching` flag guards both channels.
#[derive(Default)]
pub struct EventBus {
    selection_listeners: RefCell<Vec<SelectionListener>>,
    mesh_listeners: RefCell<Vec<MeshListener>>,
    dispatching: Cell<bool>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_selection_changed(&self, listener: impl FnMut(&[Handle]) + 'static) {
        match self.selection_listeners.try_borrow_mut() {
            Ok(mut listeners) => listeners.push(Box::new(listener)),
            Err(_) => tracing::warn!("selection listener registered during dispatch; ignored"),
        }
    }

    pub fn on_mesh_invalidated(&self, listener: impl FnMut(Handle) + 'static) {
        match self.mesh_listeners.try_borrow_mut() {
            Ok(mut listeners) => listeners.push(Box::new(listener)),
            Err(_) => tracing::warn!("mesh listener registered during dispatch; ignored"),
        }
    }

    /// Returns `false` when the event was dropped by the re-entrancy guard.
    pub fn emit_selection_changed(&self, handles: &[Handle]) -> bool {
        if !self.enter("selection_changed") {
            return false;
        }
        if let Ok(mut listeners) = self.selection_listeners.try_borrow_mut() {
            for listener in listeners.iter_mut() {
                listener(handles);
            }
        }
        self.dispatching.set(false);
        true
    }

    pub fn emit_mesh_invalidated(&self, handle: Handle) -> bool {
        if !self.enter("mesh_invalidated") {
            return false;
        }
        if let Ok(mut listeners) = self.mesh_listeners.try_borrow_mut() {
            for listener in listeners.iter_mut() {
                listener(handle);
            }
        }
        self.dispatching.set(false);
        true
    }

    fn enter(&self, event: &str) -> bool {
        if self.dispatching.replace(true) {
            tracing::debug!(event, "nested emission dropped");
            return false;
        }
        true
    }
}
