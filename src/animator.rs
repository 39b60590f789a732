//! Per-frame smoothing of visual window state toward logical state
//!
//! Each channel is a first-order exponential smoother with its own rate.
//! The per-step factor is clamped to 1, so a step lands on the target at
//! worst and never overshoots it.

use crate::geometry::{Mapper, Rect};

pub const OPACITY_RATE: f32 = 10.0;
pub const POSITION_RATE: f32 = 20.0;
pub const SIZE_RATE: f32 = 30.0;
pub const SHADOW_OPACITY_RATE: f32 = 30.0;
pub const SHADOW_RADIUS_RATE: f32 = 20.0;
pub const SHADOW_OFFSET_RATE: f32 = 10.0;

/// Upper bound on the frame delta fed to the smoothers, in seconds
pub const MAX_DELTA: f32 = 1.0 / 30.0;

/// Size of a window relative to its target when it starts appearing
const APPEARING_SCALE: f32 = 0.9;

/// Shadow strength and radius (pixels) for unfocused and focused windows
const SHADOW_OPACITY: (f32, f32) = (0.15, 0.25);
const SHADOW_RADIUS: (f32, f32) = (64.0, 128.0);

pub fn approach(value: f32, target: f32, rate: f32, dt: f32) -> f32 {
    let factor = (rate * dt.clamp(0.0, MAX_DELTA)).clamp(0.0, 1.0);
    value + (target - value) * factor
}

/// Rendering-only state. Never read back as the window's real geometry.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Visual {
    pub opacity: f32,
    pub rect: Rect,
    pub shadow_opacity: f32,
    /// Shadow radius in pixels
    pub shadow_radius: f32,
    /// Vertical shadow offset in device units
    pub shadow_offset: f32,
}

/// Logical values the visual state converges to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Targets {
    pub opacity: f32,
    pub rect: Rect,
    pub focused: bool,
}

impl Visual {
    /// Pose of a window that just became visible: in place, slightly
    /// smaller and fully transparent
    pub fn appear(&mut self, target: Rect) {
        self.opacity = 0.0;
        self.rect = Rect {
            width: target.width * APPEARING_SCALE,
            height: target.height * APPEARING_SCALE,
            ..target
        };
    }

    pub fn step(&mut self, target: &Targets, dt: f32, mapper: &Mapper) {
        self.opacity = approach(self.opacity, target.opacity, OPACITY_RATE, dt);

        self.rect.x = approach(self.rect.x, target.rect.x, POSITION_RATE, dt);
        self.rect.y = approach(self.rect.y, target.rect.y, POSITION_RATE, dt);
        self.rect.width = approach(self.rect.width, target.rect.width, SIZE_RATE, dt);
        self.rect.height = approach(self.rect.height, target.rect.height, SIZE_RATE, dt);

        let (opacity, radius) = if target.focused {
            (SHADOW_OPACITY.1, SHADOW_RADIUS.1)
        } else {
            (SHADOW_OPACITY.0, SHADOW_RADIUS.0)
        };
        self.shadow_opacity = approach(self.shadow_opacity, opacity, SHADOW_OPACITY_RATE, dt);
        self.shadow_radius = approach(self.shadow_radius, radius, SHADOW_RADIUS_RATE, dt);

        // the offset follows the spread the radius has reached so far
        let spread_y = self.shadow_spread(mapper)[1];
        let offset = -spread_y / 32.0 - if target.focused { spread_y / 16.0 } else { 0.0 };
        self.shadow_offset = approach(self.shadow_offset, offset, SHADOW_OFFSET_RATE, dt);
    }

    /// How far the shadow quad extends past the window, in device units
    pub fn shadow_spread(&self, mapper: &Mapper) -> [f32; 2] {
        [
            mapper.width_to_ndc(self.shadow_radius * 2.0),
            mapper.height_to_ndc(self.shadow_radius * 2.0),
        ]
    }

    /// Shadow strength, faded together with the window
    pub fn shadow_strength(&self) -> f32 {
        self.opacity * self.shadow_opacity
    }
}

/// Position to render `rect` at so its edges land on pixel boundaries.
///
/// A rect with an odd pixel width centred on a pixel boundary would have
/// both edges in the middle of a pixel; shift it by half a pixel instead.
/// The stored visual state is left untouched.
pub fn pixel_aligned(rect: &Rect, mapper: &Mapper) -> (f32, f32) {
    let (pixel_w, pixel_h) = mapper.pixel_size();
    let mut x = rect.x;
    let mut y = rect.y;

    if mapper.ndc_to_width(rect.width) % 2 != 0 {
        x += pixel_w / 2.0;
    }
    if mapper.ndc_to_height(rect.height) % 2 != 0 {
        y += pixel_h / 2.0;
    }

    (x, y)
}
