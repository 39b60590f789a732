//! Compositor-side window records
//!
//! One record per managed window, kept in stacking order (see `stacking`).
//! Records are tombstoned rather than removed so a destroy never shifts the
//! slots of the windows around it.

use crate::animator::Visual;
use crate::backing::BackingState;
use crate::clients::WindowId;
use crate::geometry::Rect;
use crate::gpu::ShapeHandle;

#[derive(Debug, Clone)]
pub struct Window {
    pub id: WindowId,
    pub exists: bool,

    // logical state
    pub visible: bool,
    pub rect: Rect,
    pub opacity: f32,
    pub maximized: bool,
    pub restore: Rect,

    /// Recency counter, 0 for the most recently focused window
    pub farness: u32,

    pub visual: Visual,

    pub shape: Option<ShapeHandle>,
    /// Size the current shape mesh was generated for
    pub shape_size: (f32, f32),
    pub backing: BackingState,
}

impl Window {
    fn new(id: WindowId) -> Self {
        Self {
            id,
            exists: true,
            visible: false,
            rect: Rect::default(),
            opacity: 1.0,
            maximized: false,
            restore: Rect::default(),
            farness: 0,
            visual: Visual::default(),
            shape: None,
            shape_size: (0.0, 0.0),
            backing: BackingState::Empty,
        }
    }

    pub fn is_drawable(&self) -> bool {
        self.exists && self.visible
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    pub(crate) windows: Vec<Window>,
    /// Slot of the focused window, always `exists && visible` when set
    pub(crate) focused: Option<usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a record for `id`, reusing the first tombstone
    pub fn create(&mut self, id: WindowId) -> usize {
        let window = Window::new(id);
        match self.windows.iter().position(|w| !w.exists) {
            Some(slot) => {
                self.windows[slot] = window;
                slot
            }
            None => {
                self.windows.push(window);
                self.windows.len() - 1
            }
        }
    }

    pub fn find(&self, id: WindowId) -> Option<usize> {
        self.windows.iter().position(|w| w.exists && w.id == id)
    }

    pub fn get(&self, slot: usize) -> Option<&Window> {
        self.windows.get(slot).filter(|w| w.exists)
    }

    /// Tombstone a record. Its GPU resources must already be released.
    pub fn destroy(&mut self, slot: usize) {
        let Some(window) = self.windows.get_mut(slot) else {
            return;
        };
        debug_assert!(window.shape.is_none() && window.backing.ready().is_none());

        window.exists = false;
        window.visible = false;
        if self.focused == Some(slot) {
            self.focused = None;
        }
    }

    pub fn focused(&self) -> Option<usize> {
        self.focused
    }

    pub fn focused_id(&self) -> Option<WindowId> {
        self.focused.map(|slot| self.windows[slot].id)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &Window> {
        self.windows.iter().filter(|w| w.exists)
    }
}
