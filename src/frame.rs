//! Frame pump
//!
//! One iteration drains every pending server event, draws the stack from
//! the bottom up (window, then its shadow), presents, and feeds the
//! smoothed frame time back into the animator.

use std::time::Instant;

use anyhow::Result;
use tracing::info;

use crate::animator::{pixel_aligned, Targets};
use crate::compositor::Compositor;
use crate::gpu::{GpuBackend, ShadowDraw, WindowDraw};
use crate::server::WindowServer;
use crate::wm::WindowManager;

/// Time between consecutive presents
#[derive(Debug, Default)]
pub struct FrameClock {
    last: Option<Instant>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Microseconds since the previous present, zero for the first one
    pub fn tick(&mut self, presented: Instant) -> u64 {
        let elapsed = self
            .last
            .map(|last| presented.saturating_duration_since(last).as_micros() as u64)
            .unwrap_or(0);
        self.last = Some(presented);
        elapsed
    }
}

/// Exponential moving average of the frame delta, in seconds
#[derive(Debug, Default, Clone, Copy)]
pub struct SmoothedDelta {
    average: f32,
}

impl SmoothedDelta {
    pub fn update(&mut self, delta: f32) -> f32 {
        self.average = (self.average + delta) / 2.0;
        self.average
    }

    pub fn get(&self) -> f32 {
        self.average
    }
}

impl<G: GpuBackend> Compositor<G> {
    /// Animate and draw every visible window, bottom of the stack first
    pub fn draw_frame<S: WindowServer>(&mut self, wm: &mut WindowManager<S>, dt: f32) -> Result<()> {
        self.gpu.begin_frame(self.background);
        let focused = self.registry.focused();

        for slot in 0..self.registry.len() {
            let depth = self.registry.depth(slot);
            let window = &mut self.registry.windows[slot];
            if !window.is_drawable() {
                continue;
            }

            let targets = Targets {
                opacity: window.opacity,
                rect: window.rect,
                focused: focused == Some(slot),
            };
            window.visual.step(&targets, dt, &self.mapper);

            let visual = window.visual;
            let (x, y) = pixel_aligned(&visual.rect, &self.mapper);
            let size = [visual.rect.width, visual.rect.height];

            if let (Some(shape), Some(handle)) = (window.shape, wm.handle(window.id)) {
                let server = wm.server_mut();
                if self.backings.bind(server, &mut self.gpu, handle, &mut window.backing)? {
                    self.gpu.draw_window(
                        shape,
                        WindowDraw {
                            depth,
                            position: [x, y],
                            size,
                            opacity: visual.opacity,
                        },
                    );
                    self.backings.unbind(server, &mut self.gpu, &window.backing)?;
                }
            }

            // after the window so the depth test keeps it out from under it
            self.gpu.draw_shadow(
                self.shadow,
                ShadowDraw {
                    strength: visual.shadow_strength(),
                    depth,
                    position: [x, y],
                    size,
                    spread: visual.shadow_spread(&self.mapper),
                    offset: visual.shadow_offset,
                },
            );
        }

        Ok(())
    }

    /// Present the frame, returning microseconds since the previous present
    pub fn present(&mut self, clock: &mut FrameClock) -> Result<u64> {
        let presented = self.gpu.present()?;
        Ok(clock.tick(presented))
    }
}

/// Run until a quit action stops the compositor
pub fn run<S: WindowServer, G: GpuBackend>(
    wm: &mut WindowManager<S>,
    compositor: &mut Compositor<G>,
) -> Result<()> {
    let mut clock = FrameClock::new();
    let mut delta = SmoothedDelta::default();

    info!("compositor ready");
    while compositor.running() {
        while wm.pump(compositor)? > 0 {}
        if !compositor.running() {
            break;
        }

        compositor.draw_frame(wm, delta.get())?;
        let micros = compositor.present(&mut clock)?;
        delta.update(micros as f32 / 1_000_000.0);
    }

    Ok(())
}
