//! Window server seam
//!
//! Everything the window manager needs from the display server goes through
//! [`WindowServer`]. The x11 backend implements it over x11rb, tests use an
//! in-memory fake.

use anyhow::Result;

use crate::geometry::PixelRect;

/// Server-side window identifier
pub type Handle = u32;

/// Modifier bits as they appear in key and button state
pub mod modifiers {
    pub const ALT: u16 = 0x08;
    pub const SUPER: u16 = 0x40;
}

/// Authoritative window attributes, queried after every notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub visible: bool,
    pub rect: PixelRect,
    pub depth: u8,
}

/// Pointer position in root coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    pub x: i32,
    pub y: i32,
}

/// Off-screen pixel buffer exported for one window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelBuffer(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    Created(Handle),
    Reconfigured(Handle),
    Mapped(Handle),
    Unmapped(Handle),
    Destroyed(Handle),
    Damaged(Handle),
    Key {
        window: Handle,
        press: bool,
        modifiers: u16,
        keycode: u8,
    },
    Button {
        window: Handle,
        press: bool,
        modifiers: u16,
        button: u8,
        root_x: i32,
        root_y: i32,
    },
    Motion {
        subwindow: Handle,
        modifiers: u16,
        root_x: i32,
        root_y: i32,
    },
}

pub trait WindowServer {
    /// Move every event the server has already sent into the local queue,
    /// without blocking, and return the queue length
    fn pending(&mut self) -> Result<usize>;

    fn next_event(&mut self) -> Option<ServerEvent>;

    /// `Ok(None)` when the window no longer exists
    fn attributes(&mut self, window: Handle) -> Result<Option<Attributes>>;

    fn pointer(&mut self) -> Result<Pointer>;

    /// Monitor rectangles in root coordinates, at least one
    fn monitors(&mut self) -> Result<Vec<PixelRect>>;

    fn screen_size(&self) -> (u32, u32);

    fn root(&self) -> Handle;

    /// Windows owned by the compositor itself
    fn own_windows(&self) -> Vec<Handle>;

    fn configure(&mut self, window: Handle, rect: PixelRect) -> Result<()>;

    fn move_to(&mut self, window: Handle, x: i32, y: i32) -> Result<()>;

    /// Give input focus and raise above siblings
    fn focus(&mut self, window: Handle) -> Result<()>;

    /// Ask the client to close its window
    fn close(&mut self, window: Handle) -> Result<()>;

    /// Destroy the window without asking its client
    fn kill(&mut self, window: Handle) -> Result<()>;

    /// Release a synchronously grabbed pointer, replaying the event to the
    /// client when `replay` is set
    fn allow_events(&mut self, replay: bool) -> Result<()>;

    /// Start tracking a newly created window
    fn manage(&mut self, window: Handle) -> Result<()>;

    fn export_pixels(&mut self, window: Handle) -> Result<Option<PixelBuffer>>;

    /// Read the buffer as BGRA rows, `Ok(None)` if the window vanished
    fn read_pixels(&mut self, buffer: PixelBuffer, width: u32, height: u32) -> Result<Option<Vec<u8>>>;

    fn release_pixels(&mut self, buffer: PixelBuffer);

    fn grab(&mut self) -> Result<()>;

    fn ungrab(&mut self) -> Result<()>;
}
