//! Conversion between server pixel coordinates and normalized device coordinates
//!
//! Server coordinates start at the top left of the screen and grow down.
//! Device coordinates span -1..1 on both axes with y growing up. Rects in
//! device space are described by their centre and full extents, so a rect
//! of width 2 and height 2 centred on the origin covers the whole screen.

/// Rect in server pixels, anchored at its top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// Rect in device coordinates, anchored at its centre
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const SCREEN: Rect = Rect {
        x: 0.0,
        y: 0.0,
        width: 2.0,
        height: 2.0,
    };

    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether the point lies inside the rect (edges included)
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x - self.width / 2.0
            && x <= self.x + self.width / 2.0
            && y >= self.y - self.height / 2.0
            && y <= self.y + self.height / 2.0
    }
}

/// Stateless mapper for a screen of a given resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapper {
    width: u32,
    height: u32,
}

impl Mapper {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn width_to_ndc(&self, pixels: f32) -> f32 {
        pixels / self.width as f32 * 2.0
    }

    pub fn height_to_ndc(&self, pixels: f32) -> f32 {
        pixels / self.height as f32 * 2.0
    }

    pub fn x_to_ndc(&self, pixels: f32) -> f32 {
        self.width_to_ndc(pixels) - 1.0
    }

    pub fn y_to_ndc(&self, pixels: f32) -> f32 {
        -self.height_to_ndc(pixels) + 1.0
    }

    pub fn ndc_to_width(&self, ndc: f32) -> i32 {
        (ndc / 2.0 * self.width as f32).round() as i32
    }

    pub fn ndc_to_height(&self, ndc: f32) -> i32 {
        (ndc / 2.0 * self.height as f32).round() as i32
    }

    pub fn ndc_to_x(&self, ndc: f32) -> i32 {
        self.ndc_to_width(ndc + 1.0)
    }

    pub fn ndc_to_y(&self, ndc: f32) -> i32 {
        self.ndc_to_height(-ndc + 1.0)
    }

    /// Size of one device pixel along each axis, in device units
    pub fn pixel_size(&self) -> (f32, f32) {
        (2.0 / self.width as f32, 2.0 / self.height as f32)
    }

    pub fn to_ndc(&self, rect: PixelRect) -> Rect {
        let width = rect.width as f32;
        let height = rect.height as f32;

        Rect::new(
            self.x_to_ndc(rect.x as f32 + width / 2.0),
            self.y_to_ndc(rect.y as f32 + height / 2.0),
            self.width_to_ndc(width),
            self.height_to_ndc(height),
        )
    }

    /// Degenerate sizes are clamped to one pixel, the server rejects zero
    pub fn to_pixels(&self, rect: Rect) -> PixelRect {
        PixelRect {
            x: self.ndc_to_x(rect.x - rect.width / 2.0),
            y: self.ndc_to_y(rect.y + rect.height / 2.0),
            width: self.ndc_to_width(rect.width).max(1) as u32,
            height: self.ndc_to_height(rect.height).max(1) as u32,
        }
    }
}
