//! Texture backing for window contents
//!
//! A backing wraps the window's off-screen pixel buffer and the texture
//! made from it. It is created lazily on the first bind, refreshed in place
//! after content damage, and destroyed whenever the server may have
//! reallocated the buffer (resize, map, unmap).

use anyhow::Result;
use tracing::{trace, warn};

use crate::gpu::{GpuBackend, PixelFormat, TextureFormat, TextureHandle};
use crate::server::{Handle, PixelBuffer, WindowServer};

#[derive(Debug, Clone, PartialEq)]
pub struct Backing {
    pub texture: TextureHandle,
    pub pixels: PixelBuffer,
    pub format: PixelFormat,
    pub size: (u32, u32),
    /// Contents changed since the texture was last filled
    pub stale: bool,
}

/// Backing slot of one window record
#[derive(Debug, Clone, Default, PartialEq)]
pub enum BackingState {
    /// Created on the next bind
    #[default]
    Empty,
    Ready(Backing),
    /// The window cannot be textured as it is (no format for its depth, too
    /// large). Stays that way until the next invalidate.
    Unsupported,
}

impl BackingState {
    pub fn ready(&self) -> Option<&Backing> {
        match self {
            BackingState::Ready(backing) => Some(backing),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct BackingManager {
    /// Hold a server grab from bind to unbind
    grab_server: bool,
    grabbed: bool,
}

impl BackingManager {
    pub fn new(grab_server: bool) -> Self {
        Self {
            grab_server,
            grabbed: false,
        }
    }

    pub fn set_grab_server(&mut self, grab_server: bool) {
        self.grab_server = grab_server;
    }

    /// Make the window's contents the active texture, creating or
    /// refreshing the backing as needed. Returns false when the window
    /// cannot be textured this frame; nothing is left bound or grabbed then.
    pub fn bind<S: WindowServer, G: GpuBackend>(
        &mut self,
        server: &mut S,
        gpu: &mut G,
        window: Handle,
        backing: &mut BackingState,
    ) -> Result<bool> {
        if *backing == BackingState::Unsupported {
            return Ok(false);
        }

        if self.grab_server {
            server.grab()?;
            self.grabbed = true;
        }

        let ready = match backing {
            BackingState::Empty => {
                *backing = create(server, gpu, window)?;
                matches!(backing, BackingState::Ready(_))
            }
            BackingState::Ready(current) if current.stale => refresh(server, gpu, current)?,
            BackingState::Ready(_) => true,
            BackingState::Unsupported => false,
        };

        match backing {
            BackingState::Ready(current) if ready => {
                gpu.bind_texture(current.texture);
                Ok(true)
            }
            _ => {
                self.release_grab(server)?;
                Ok(false)
            }
        }
    }

    /// Release the texture binding after the draw. The backing itself stays.
    pub fn unbind<S: WindowServer, G: GpuBackend>(
        &mut self,
        server: &mut S,
        gpu: &mut G,
        backing: &BackingState,
    ) -> Result<()> {
        if let BackingState::Ready(current) = backing {
            gpu.release_texture(current.texture);
        }
        self.release_grab(server)
    }

    /// Destroy the backing so the next bind starts from fresh pixels.
    /// No-op when there is none.
    pub fn invalidate<S: WindowServer, G: GpuBackend>(
        server: &mut S,
        gpu: &mut G,
        backing: &mut BackingState,
    ) {
        if let BackingState::Ready(old) = std::mem::take(backing) {
            gpu.destroy_texture(old.texture);
            server.release_pixels(old.pixels);
        }
    }

    pub fn mark_damaged(backing: &mut BackingState) {
        if let BackingState::Ready(current) = backing {
            current.stale = true;
        }
    }

    fn release_grab<S: WindowServer>(&mut self, server: &mut S) -> Result<()> {
        if self.grabbed {
            self.grabbed = false;
            server.ungrab()?;
        }
        Ok(())
    }
}

fn create<S: WindowServer, G: GpuBackend>(
    server: &mut S,
    gpu: &mut G,
    window: Handle,
) -> Result<BackingState> {
    let Some(attributes) = server.attributes(window)? else {
        trace!("window {window:#x} vanished before binding");
        return Ok(BackingState::Empty);
    };

    let Some((format, texture_format)) = select_format(gpu, attributes.depth) else {
        warn!(
            "no pixel format for depth {} of window {window:#x}, not drawing it",
            attributes.depth
        );
        return Ok(BackingState::Unsupported);
    };

    let (width, height) = (attributes.rect.width, attributes.rect.height);
    let max = gpu.max_texture_size();
    if width > max || height > max {
        warn!("window {window:#x} is {width}x{height}, larger than the {max} texture limit");
        return Ok(BackingState::Unsupported);
    }

    let Some(pixels) = server.export_pixels(window)? else {
        return Ok(BackingState::Empty);
    };

    let data = match server.read_pixels(pixels, width, height) {
        Ok(Some(data)) => data,
        Ok(None) => {
            server.release_pixels(pixels);
            return Ok(BackingState::Empty);
        }
        Err(e) => {
            server.release_pixels(pixels);
            return Err(e);
        }
    };

    let texture = match gpu.import_texture(texture_format, width, height, &data) {
        Ok(texture) => texture,
        Err(e) => {
            server.release_pixels(pixels);
            return Err(e);
        }
    };

    Ok(BackingState::Ready(Backing {
        texture,
        pixels,
        format,
        size: (width, height),
        stale: false,
    }))
}

/// Re-read damaged contents into the existing texture
fn refresh<S: WindowServer, G: GpuBackend>(
    server: &mut S,
    gpu: &mut G,
    backing: &mut Backing,
) -> Result<bool> {
    let (width, height) = backing.size;
    let Some(data) = server.read_pixels(backing.pixels, width, height)? else {
        return Ok(false);
    };

    gpu.update_texture(backing.texture, &data)?;
    backing.stale = false;
    Ok(true)
}

/// Pick a bindable format whose depth matches the window's. A failed alpha
/// query is not fatal, the depth alone then decides.
fn select_format<G: GpuBackend>(gpu: &G, depth: u8) -> Option<(PixelFormat, TextureFormat)> {
    let format = gpu.pixel_formats().into_iter().find(|f| f.depth == depth)?;

    let alpha = match gpu.format_has_alpha(format) {
        Ok(alpha) => alpha,
        Err(e) => {
            warn!("failed to query alpha of pixel format {}: {e:#}", format.index);
            depth == 32
        }
    };

    let texture_format = if alpha {
        TextureFormat::Rgba
    } else {
        TextureFormat::Rgb
    };
    Some((format, texture_format))
}
