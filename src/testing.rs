//! In-memory window server and GPU for unit tests

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use anyhow::{anyhow, Result};

use crate::geometry::PixelRect;
use crate::gpu::{
    GpuBackend, PixelFormat, ShadowDraw, ShapeHandle, TextureFormat, TextureHandle, Vertex,
    WindowDraw,
};
use crate::server::{Attributes, Handle, PixelBuffer, Pointer, ServerEvent, WindowServer};

pub const ROOT: Handle = 1;
pub const OVERLAY: Handle = 2;
pub const OUTPUT: Handle = 3;

/// Window server that behaves like X for the requests the window manager
/// makes: configure requests come back as notifications, kills destroy
/// only the window named.
#[derive(Debug)]
pub struct FakeServer {
    pub windows: HashMap<Handle, Attributes>,
    /// Sent by the server but not yet read by the client
    pub incoming: VecDeque<ServerEvent>,
    queue: VecDeque<ServerEvent>,

    pub size: (u32, u32),
    pub pointer: Pointer,
    pub monitors: Vec<PixelRect>,

    pub configured: Vec<(Handle, PixelRect)>,
    pub focused: Vec<Handle>,
    pub closed: Vec<Handle>,
    pub killed: Vec<Handle>,
    pub replays: Vec<bool>,
    pub managed: Vec<Handle>,
    /// Attribute round trips made
    pub queries: usize,

    buffers: HashMap<PixelBuffer, Handle>,
    next_buffer: u32,
    pub exports: Vec<Handle>,
    pub reads: usize,
    pub released: Vec<PixelBuffer>,
    pub grabs: usize,
    pub ungrabs: usize,
}

impl FakeServer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            windows: HashMap::new(),
            incoming: VecDeque::new(),
            queue: VecDeque::new(),
            size: (width, height),
            pointer: Pointer { x: 0, y: 0 },
            monitors: vec![PixelRect::new(0, 0, width, height)],
            configured: Vec::new(),
            focused: Vec::new(),
            closed: Vec::new(),
            killed: Vec::new(),
            replays: Vec::new(),
            managed: Vec::new(),
            queries: 0,
            buffers: HashMap::new(),
            next_buffer: 0x400,
            exports: Vec::new(),
            reads: 0,
            released: Vec::new(),
            grabs: 0,
            ungrabs: 0,
        }
    }

    pub fn add_window(&mut self, handle: Handle, rect: PixelRect, depth: u8) {
        self.windows.insert(
            handle,
            Attributes {
                visible: false,
                rect,
                depth,
            },
        );
        self.incoming.push_back(ServerEvent::Created(handle));
    }

    pub fn map(&mut self, handle: Handle) {
        if let Some(window) = self.windows.get_mut(&handle) {
            window.visible = true;
            self.incoming.push_back(ServerEvent::Mapped(handle));
        }
    }

    pub fn unmap(&mut self, handle: Handle) {
        if let Some(window) = self.windows.get_mut(&handle) {
            window.visible = false;
            self.incoming.push_back(ServerEvent::Unmapped(handle));
        }
    }

    pub fn destroy(&mut self, handle: Handle) {
        if self.windows.remove(&handle).is_some() {
            self.incoming.push_back(ServerEvent::Destroyed(handle));
        }
    }

    pub fn damage(&mut self, handle: Handle) {
        self.incoming.push_back(ServerEvent::Damaged(handle));
    }

    pub fn push(&mut self, event: ServerEvent) {
        self.incoming.push_back(event);
    }

    pub fn rect(&self, handle: Handle) -> Option<PixelRect> {
        self.windows.get(&handle).map(|a| a.rect)
    }
}

impl WindowServer for FakeServer {
    fn pending(&mut self) -> Result<usize> {
        self.queue.extend(self.incoming.drain(..));
        Ok(self.queue.len())
    }

    fn next_event(&mut self) -> Option<ServerEvent> {
        self.queue.pop_front()
    }

    fn attributes(&mut self, window: Handle) -> Result<Option<Attributes>> {
        self.queries += 1;
        Ok(self.windows.get(&window).copied())
    }

    fn pointer(&mut self) -> Result<Pointer> {
        Ok(self.pointer)
    }

    fn monitors(&mut self) -> Result<Vec<PixelRect>> {
        Ok(self.monitors.clone())
    }

    fn screen_size(&self) -> (u32, u32) {
        self.size
    }

    fn root(&self) -> Handle {
        ROOT
    }

    fn own_windows(&self) -> Vec<Handle> {
        vec![OVERLAY, OUTPUT]
    }

    fn configure(&mut self, window: Handle, rect: PixelRect) -> Result<()> {
        self.configured.push((window, rect));
        if let Some(attributes) = self.windows.get_mut(&window) {
            attributes.rect = rect;
            self.incoming.push_back(ServerEvent::Reconfigured(window));
        }
        Ok(())
    }

    fn move_to(&mut self, window: Handle, x: i32, y: i32) -> Result<()> {
        let Some(rect) = self.rect(window) else {
            return Ok(());
        };
        self.configure(window, PixelRect { x, y, ..rect })
    }

    fn focus(&mut self, window: Handle) -> Result<()> {
        self.focused.push(window);
        Ok(())
    }

    fn close(&mut self, window: Handle) -> Result<()> {
        self.closed.push(window);
        Ok(())
    }

    fn kill(&mut self, window: Handle) -> Result<()> {
        self.killed.push(window);
        self.destroy(window);
        Ok(())
    }

    fn allow_events(&mut self, replay: bool) -> Result<()> {
        self.replays.push(replay);
        Ok(())
    }

    fn manage(&mut self, window: Handle) -> Result<()> {
        self.managed.push(window);
        Ok(())
    }

    fn export_pixels(&mut self, window: Handle) -> Result<Option<PixelBuffer>> {
        if !self.windows.contains_key(&window) {
            return Ok(None);
        }
        self.exports.push(window);
        self.next_buffer += 1;
        let buffer = PixelBuffer(self.next_buffer);
        self.buffers.insert(buffer, window);
        Ok(Some(buffer))
    }

    fn read_pixels(&mut self, buffer: PixelBuffer, width: u32, height: u32) -> Result<Option<Vec<u8>>> {
        let alive = self
            .buffers
            .get(&buffer)
            .is_some_and(|window| self.windows.contains_key(window));
        if !alive {
            return Ok(None);
        }
        self.reads += 1;
        Ok(Some(vec![0x80; (width * height * 4) as usize]))
    }

    fn release_pixels(&mut self, buffer: PixelBuffer) {
        self.buffers.remove(&buffer);
        self.released.push(buffer);
    }

    fn grab(&mut self) -> Result<()> {
        self.grabs += 1;
        Ok(())
    }

    fn ungrab(&mut self) -> Result<()> {
        self.ungrabs += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Draw {
    Begin,
    Window {
        shape: ShapeHandle,
        texture: Option<TextureHandle>,
        params: WindowDraw,
    },
    Shadow(ShadowDraw),
}

/// GPU that keeps every resource in maps and records the draw stream
#[derive(Debug)]
pub struct FakeGpu {
    next: u32,
    pub shapes: HashMap<ShapeHandle, (usize, usize)>,
    pub destroyed_shapes: Vec<ShapeHandle>,

    pub formats: Vec<PixelFormat>,
    pub failing_alpha_query: bool,
    pub max_texture: u32,

    pub textures: HashMap<TextureHandle, (TextureFormat, u32, u32)>,
    pub destroyed_textures: Vec<TextureHandle>,
    pub imports: usize,
    pub updates: usize,

    pub bound: Option<TextureHandle>,
    pub releases: usize,
    pub draws: Vec<Draw>,
    pub vsync: bool,
    pub presents: usize,
}

impl FakeGpu {
    pub fn new() -> Self {
        Self {
            next: 0,
            shapes: HashMap::new(),
            destroyed_shapes: Vec::new(),
            formats: vec![
                PixelFormat { index: 0, depth: 24 },
                PixelFormat { index: 1, depth: 32 },
            ],
            failing_alpha_query: false,
            max_texture: 8192,
            textures: HashMap::new(),
            destroyed_textures: Vec::new(),
            imports: 0,
            updates: 0,
            bound: None,
            releases: 0,
            draws: Vec::new(),
            vsync: true,
            presents: 0,
        }
    }

    fn next_id(&mut self) -> u32 {
        self.next += 1;
        self.next
    }

    pub fn window_draws(&self) -> Vec<(ShapeHandle, Option<TextureHandle>, WindowDraw)> {
        self.draws
            .iter()
            .filter_map(|draw| match draw {
                Draw::Window {
                    shape,
                    texture,
                    params,
                } => Some((*shape, *texture, *params)),
                _ => None,
            })
            .collect()
    }
}

impl GpuBackend for FakeGpu {
    fn create_shape(&mut self) -> Result<ShapeHandle> {
        let shape = ShapeHandle(self.next_id());
        self.shapes.insert(shape, (0, 0));
        Ok(shape)
    }

    fn upload_shape(&mut self, shape: ShapeHandle, vertices: &[Vertex], indices: &[u16]) -> Result<()> {
        let entry = self
            .shapes
            .get_mut(&shape)
            .ok_or_else(|| anyhow!("upload to unknown shape {shape:?}"))?;
        *entry = (vertices.len(), indices.len());
        Ok(())
    }

    fn destroy_shape(&mut self, shape: ShapeHandle) {
        assert!(self.shapes.remove(&shape).is_some(), "double free of {shape:?}");
        self.destroyed_shapes.push(shape);
    }

    fn pixel_formats(&self) -> Vec<PixelFormat> {
        self.formats.clone()
    }

    fn format_has_alpha(&self, format: PixelFormat) -> Result<bool> {
        if self.failing_alpha_query {
            return Err(anyhow!("attribute query failed"));
        }
        Ok(format.depth == 32)
    }

    fn max_texture_size(&self) -> u32 {
        self.max_texture
    }

    fn import_texture(
        &mut self,
        format: TextureFormat,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<TextureHandle> {
        assert_eq!(pixels.len(), (width * height * 4) as usize);
        let texture = TextureHandle(self.next_id());
        self.textures.insert(texture, (format, width, height));
        self.imports += 1;
        Ok(texture)
    }

    fn update_texture(&mut self, texture: TextureHandle, _pixels: &[u8]) -> Result<()> {
        assert!(self.textures.contains_key(&texture));
        self.updates += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        assert!(self.textures.remove(&texture).is_some(), "double free of {texture:?}");
        self.destroyed_textures.push(texture);
    }

    fn bind_texture(&mut self, texture: TextureHandle) {
        self.bound = Some(texture);
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        assert_eq!(self.bound, Some(texture));
        self.bound = None;
        self.releases += 1;
    }

    fn begin_frame(&mut self, _clear: [f32; 3]) {
        self.draws.push(Draw::Begin);
    }

    fn draw_window(&mut self, shape: ShapeHandle, params: WindowDraw) {
        self.draws.push(Draw::Window {
            shape,
            texture: self.bound,
            params,
        });
    }

    fn draw_shadow(&mut self, quad: ShapeHandle, params: ShadowDraw) {
        assert!(self.shapes.contains_key(&quad));
        self.draws.push(Draw::Shadow(params));
    }

    fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
    }

    fn present(&mut self) -> Result<Instant> {
        self.presents += 1;
        Ok(Instant::now())
    }
}
