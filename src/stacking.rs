//! Stacking order and focus
//!
//! The record array itself is the stacking order: it is kept sorted by
//! farness, descending, so the bottom window comes first and the focused
//! window last. Sorting permutes slots, which is why callers hold on to
//! `WindowId`s across a focus change and never to slots.

use crate::clients::WindowId;
use crate::registry::Registry;

impl Registry {
    /// Raise the window in `slot` to the top and make it the focused window.
    /// Returns the slot it occupies after the reorder.
    pub fn focus(&mut self, slot: usize) -> Option<usize> {
        let target = self.get(slot)?.id;

        for (index, window) in self.windows.iter_mut().enumerate() {
            if !window.exists {
                continue;
            }
            if index == slot {
                window.farness = 0;
            } else {
                window.farness = window.farness.saturating_add(1);
            }
        }

        // stable, ties keep their previous order
        self.windows.sort_by(|a, b| b.farness.cmp(&a.farness));

        let slot = self.find(target)?;
        self.focused = Some(slot);
        Some(slot)
    }

    /// Hand focus to the nearest visible window below the focused one.
    /// Returns the newly focused window, `None` when nothing is left.
    pub fn unfocus(&mut self) -> Option<WindowId> {
        let start = self.focused.take().unwrap_or(self.windows.len());

        let fallback = (0..start).rev().find(|&i| self.windows[i].is_drawable())?;
        let slot = self.focus(fallback)?;
        Some(self.windows[slot].id)
    }

    /// Draw depth of a slot, 1 for the bottom slot and shrinking upwards
    pub fn depth(&self, slot: usize) -> f32 {
        1.0 - slot as f32 / self.windows.len().max(1) as f32
    }
}
