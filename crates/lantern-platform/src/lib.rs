// SPDX-License-Identifier: CEPL-1.0
//! Windowing glue. `winit` is re-exported so the app depends on one version.

pub use winit;

use winit::dpi::PhysicalSize;

/// Tracks framebuffer size changes reported by the window.
///
/// The window handler records every resize here; the renderer consumes the
/// pending flag at its next present boundary instead of recreating inline.
#[derive(Debug, Clone, Copy)]
pub struct ResizeTracker {
    size: PhysicalSize<u32>,
    pending: bool,
}

impl ResizeTracker {
    pub fn new(size: PhysicalSize<u32>) -> Self {
        Self {
            size,
            pending: false,
        }
    }

    pub fn on_resized(&mut self, size: PhysicalSize<u32>) {
        if size != self.size {
            tracing::debug!("framebuffer {}x{}", size.width, size.height);
        }
        self.size = size;
        self.pending = true;
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    /// Zero in either dimension (typically a minimized window).
    pub fn is_degenerate(&self) -> bool {
        self.size.width == 0 || self.size.height == 0
    }

    /// Returns and clears the pending flag. Nothing is taken while the size is
    /// degenerate: recreation has to wait for a usable framebuffer.
    pub fn take_pending(&mut self) -> bool {
        if self.is_degenerate() {
            return false;
        }
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_is_pending_until_taken() {
        let mut t = ResizeTracker::new(PhysicalSize::new(800, 600));
        assert!(!t.take_pending());
        t.on_resized(PhysicalSize::new(1024, 768));
        assert!(t.take_pending());
        assert!(!t.take_pending());
        assert_eq!(t.size(), PhysicalSize::new(1024, 768));
    }

    #[test]
    fn minimized_window_holds_the_resize_back() {
        let mut t = ResizeTracker::new(PhysicalSize::new(800, 600));
        t.on_resized(PhysicalSize::new(0, 0));
        assert!(t.is_degenerate());
        assert!(!t.take_pending());

        t.on_resized(PhysicalSize::new(640, 480));
        assert!(!t.is_degenerate());
        assert!(t.take_pending());
    }
}
