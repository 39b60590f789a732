//! Window policy: focus on map, drag actions, maximize, key bindings
//!
//! The compositor is the shell the window manager reports to. It owns the
//! registry of window records and every GPU resource attached to them.

use anyhow::Result;
use tracing::{debug, info};

use crate::backing::BackingManager;
use crate::clients::WindowId;
use crate::config::Config;
use crate::geometry::{Mapper, Rect};
use crate::gpu::{GpuBackend, ShapeHandle};
use crate::registry::Registry;
use crate::server::{modifiers, WindowServer};
use crate::shape;
use crate::wm::{ButtonInput, KeyInput, PointerMotion, Shell, WindowManager};

pub mod keys {
    pub const F1: u8 = 67;
    pub const Q: u8 = 24;
    pub const K: u8 = 45;
    pub const F: u8 = 41;
    pub const V: u8 = 55;
}

/// Key combinations the compositor reacts to, grabbed on the root window
pub const GRABBED_KEYS: &[(u16, u8)] = &[
    (modifiers::SUPER, keys::F1),
    (modifiers::SUPER, keys::Q),
    (modifiers::SUPER, keys::K),
    (modifiers::SUPER, keys::F),
    (modifiers::SUPER | modifiers::ALT, keys::F),
    (modifiers::SUPER, keys::V),
];

/// Opacity of a window while it is being dragged
const DRAG_OPACITY: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    None,
    /// Offset from the pointer to the window centre at press time
    Move { id: WindowId, dx: f32, dy: f32 },
    Resize { id: WindowId },
}

pub struct Compositor<G> {
    pub(crate) gpu: G,
    pub(crate) registry: Registry,
    pub(crate) backings: BackingManager,
    pub(crate) shadow: ShapeHandle,
    pub(crate) mapper: Mapper,
    pub(crate) background: [f32; 3],
    action: Action,
    vsync: bool,
    running: bool,
}

impl<G: GpuBackend> Compositor<G> {
    pub fn new(mut gpu: G, mapper: Mapper, config: &Config) -> Result<Self> {
        let shadow = gpu.create_shape()?;
        let quad = shape::quad();
        gpu.upload_shape(shadow, &quad.vertices, &quad.indices)?;
        gpu.set_vsync(config.vsync);

        Ok(Self {
            gpu,
            registry: Registry::new(),
            backings: BackingManager::new(!config.vsync),
            shadow,
            mapper,
            background: config.background,
            action: Action::None,
            vsync: config.vsync,
            running: true,
        })
    }

    pub fn running(&self) -> bool {
        self.running
    }

    /// Raise in our own stack only. The server's input focus stays where
    /// it is, so menus and tooltips do not take it from their owner.
    fn raise(&mut self, slot: usize) {
        if let Some(slot) = self.registry.focus(slot) {
            debug!("raised window {}", self.registry.windows[slot].id.0);
        }
    }

    fn focus<S: WindowServer>(&mut self, wm: &mut WindowManager<S>, slot: usize) -> Result<()> {
        if let Some(slot) = self.registry.focus(slot) {
            let id = self.registry.windows[slot].id;
            debug!("focused window {}", id.0);
            wm.focus_window(id)?;
        }
        Ok(())
    }

    fn unfocus<S: WindowServer>(&mut self, wm: &mut WindowManager<S>) -> Result<()> {
        match self.registry.unfocus() {
            Some(id) => {
                debug!("focus fell back to window {}", id.0);
                wm.focus_window(id)
            }
            None => {
                debug!("no window left to focus");
                Ok(())
            }
        }
    }

    /// Toggle maximize. `single_monitor` fills the monitor under the window
    /// centre, otherwise the whole screen.
    pub fn maximize<S: WindowServer>(
        &mut self,
        wm: &mut WindowManager<S>,
        id: WindowId,
        single_monitor: bool,
    ) -> Result<()> {
        let Some(slot) = self.registry.find(id) else {
            return Ok(());
        };

        let monitors = if single_monitor { wm.monitors()? } else { Vec::new() };
        let window = &mut self.registry.windows[slot];

        if window.maximized {
            window.maximized = false;
            debug!("restoring window {}", id.0);
            return wm.move_window(id, window.restore);
        }

        window.restore = window.rect;
        window.maximized = true;

        let target = monitors
            .into_iter()
            .find(|m| m.contains(window.rect.x, window.rect.y))
            .unwrap_or(Rect::SCREEN);

        debug!("maximizing window {} to {target:?}", id.0);
        wm.move_window(id, target)
    }

    pub fn toggle_vsync(&mut self) {
        self.vsync = !self.vsync;
        info!("vsync {}", if self.vsync { "on" } else { "off" });
        self.gpu.set_vsync(self.vsync);
        self.backings.set_grab_server(!self.vsync);
    }
}

impl<S: WindowServer, G: GpuBackend> Shell<S> for Compositor<G> {
    fn create(&mut self, _wm: &mut WindowManager<S>, id: WindowId) -> Result<()> {
        let slot = self.registry.create(id);

        let shape = self.gpu.create_shape()?;
        let mesh = shape::rounded_rect(0.0, 0.0, &self.mapper);
        self.gpu.upload_shape(shape, &mesh.vertices, &mesh.indices)?;
        self.registry.windows[slot].shape = Some(shape);

        Ok(())
    }

    fn modify(&mut self, wm: &mut WindowManager<S>, id: WindowId, visible: bool, rect: Rect) -> Result<()> {
        let Some(slot) = self.registry.find(id) else {
            return Ok(());
        };
        let window = &mut self.registry.windows[slot];
        let was_visible = window.visible;

        window.visible = visible;
        window.rect = rect;

        if (rect.width, rect.height) != window.shape_size {
            if let Some(shape) = window.shape {
                let mesh = shape::rounded_rect(rect.width, rect.height, &self.mapper);
                self.gpu.upload_shape(shape, &mesh.vertices, &mesh.indices)?;
            }
            window.shape_size = (rect.width, rect.height);
        }

        // the server may have reallocated the window's pixels
        BackingManager::invalidate(wm.server_mut(), &mut self.gpu, &mut window.backing);

        if visible && !was_visible {
            window.opacity = 1.0;
            window.visual.appear(rect);
            self.raise(slot);
        } else if !visible && was_visible && self.registry.focused() == Some(slot) {
            self.unfocus(wm)?;
        }

        Ok(())
    }

    fn destroy(&mut self, wm: &mut WindowManager<S>, id: WindowId) -> Result<()> {
        let Some(slot) = self.registry.find(id) else {
            return Ok(());
        };

        match self.action {
            Action::Move { id: dragged, .. } | Action::Resize { id: dragged } if dragged == id => {
                self.action = Action::None;
            }
            _ => {}
        }

        let window = &mut self.registry.windows[slot];
        if let Some(shape) = window.shape.take() {
            self.gpu.destroy_shape(shape);
        }
        BackingManager::invalidate(wm.server_mut(), &mut self.gpu, &mut window.backing);
        window.visible = false;

        if self.registry.focused() == Some(slot) {
            self.unfocus(wm)?;
        }

        // unfocus may have reordered the stack
        if let Some(slot) = self.registry.find(id) {
            self.registry.destroy(slot);
        }
        Ok(())
    }

    fn damage(&mut self, _wm: &mut WindowManager<S>, id: WindowId) -> Result<()> {
        if let Some(slot) = self.registry.find(id) {
            BackingManager::mark_damaged(&mut self.registry.windows[slot].backing);
        }
        Ok(())
    }

    fn keyboard(&mut self, wm: &mut WindowManager<S>, input: KeyInput) -> Result<()> {
        if !input.press || input.modifiers & modifiers::SUPER == 0 {
            return Ok(());
        }
        let alt = input.modifiers & modifiers::ALT != 0;
        let focused = self.registry.focused_id();

        match (input.keycode, focused) {
            (keys::F1, _) => {
                info!("quit requested");
                self.running = false;
            }
            (keys::Q, Some(id)) => wm.close_window(id)?,
            (keys::K, Some(id)) => wm.kill_window(id)?,
            (keys::F, Some(id)) => self.maximize(wm, id, !alt)?,
            (keys::V, _) => self.toggle_vsync(),
            _ => {}
        }
        Ok(())
    }

    fn click(&mut self, wm: &mut WindowManager<S>, input: ButtonInput) -> Result<bool> {
        if !input.press {
            let dragged = match self.action {
                Action::None => return Ok(true),
                Action::Move { id, .. } | Action::Resize { id } => id,
            };
            self.action = Action::None;
            debug!("drag of window {} ended", dragged.0);

            if let Some(slot) = self.registry.find(dragged) {
                let window = &mut self.registry.windows[slot];
                window.opacity = 1.0;
                wm.move_window(dragged, window.rect)?;
            }
            return Ok(false);
        }

        let Some(id) = input.window else {
            return Ok(false);
        };
        let Some(slot) = self.registry.find(id) else {
            return Ok(false);
        };
        self.focus(wm, slot)?;

        if input.modifiers & modifiers::SUPER == 0 {
            return Ok(true);
        }

        let Some(slot) = self.registry.find(id) else {
            return Ok(false);
        };
        let window = &mut self.registry.windows[slot];
        self.action = match input.button {
            1 => Action::Move {
                id,
                dx: window.rect.x - input.x,
                dy: window.rect.y - input.y,
            },
            3 => Action::Resize { id },
            _ => Action::None,
        };
        if self.action != Action::None {
            debug!("drag of window {} started: {:?}", id.0, self.action);
            window.opacity = DRAG_OPACITY;
        }
        Ok(false)
    }

    fn motion(&mut self, wm: &mut WindowManager<S>, input: PointerMotion) -> Result<()> {
        let id = match self.action {
            Action::None => return Ok(()),
            Action::Move { id, .. } | Action::Resize { id } => id,
        };
        let Some(slot) = self.registry.find(id) else {
            return Ok(());
        };
        let window = &mut self.registry.windows[slot];
        if window.maximized {
            return Ok(());
        }

        match self.action {
            // committed on release
            Action::Move { dx, dy, .. } => {
                window.rect.x = input.x + dx;
                window.rect.y = input.y + dy;
            }
            Action::Resize { .. } => {
                window.rect.width = 2.0 * (input.x - window.rect.x).abs();
                window.rect.height = 2.0 * (input.y - window.rect.y).abs();
                wm.move_window(id, window.rect)?;
            }
            Action::None => {}
        }
        Ok(())
    }
}
