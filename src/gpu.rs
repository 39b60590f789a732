//! GPU seam
//!
//! Handles are plain indices owned by whoever created them. Nothing is
//! reference counted; every create has exactly one matching destroy.

use std::time::Instant;

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

/// Candidate pixel format a window buffer can be imported with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub index: usize,
    pub depth: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgb,
    Rgba,
}

/// Shape vertex in local units, -0.5..0.5 on both axes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowDraw {
    pub depth: f32,
    pub position: [f32; 2],
    pub size: [f32; 2],
    pub opacity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowDraw {
    pub strength: f32,
    pub depth: f32,
    pub position: [f32; 2],
    pub size: [f32; 2],
    pub spread: [f32; 2],
    pub offset: f32,
}

pub trait GpuBackend {
    fn create_shape(&mut self) -> Result<ShapeHandle>;

    fn upload_shape(&mut self, shape: ShapeHandle, vertices: &[Vertex], indices: &[u16]) -> Result<()>;

    fn destroy_shape(&mut self, shape: ShapeHandle);

    /// Formats usable as sampled textures, in preference order
    fn pixel_formats(&self) -> Vec<PixelFormat>;

    /// Fails when the attribute cannot be queried
    fn format_has_alpha(&self, format: PixelFormat) -> Result<bool>;

    fn max_texture_size(&self) -> u32;

    fn import_texture(
        &mut self,
        format: TextureFormat,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<TextureHandle>;

    fn update_texture(&mut self, texture: TextureHandle, pixels: &[u8]) -> Result<()>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn bind_texture(&mut self, texture: TextureHandle);

    fn release_texture(&mut self, texture: TextureHandle);

    fn begin_frame(&mut self, clear: [f32; 3]);

    /// Draw a shape with the bound texture
    fn draw_window(&mut self, shape: ShapeHandle, params: WindowDraw);

    /// Draw a shadow behind a window using the given quad
    fn draw_shadow(&mut self, quad: ShapeHandle, params: ShadowDraw);

    fn set_vsync(&mut self, vsync: bool);

    /// Submit the frame and return the time presentation completed
    fn present(&mut self) -> Result<Instant>;
}
