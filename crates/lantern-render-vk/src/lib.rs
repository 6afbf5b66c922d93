// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: instance and device bring-up, swapchain management and
//! the textured-model draw, driven by [`FrameScheduler`].

use anyhow::Result;
use lantern_core::RenderConfig;
use lantern_render::{FrameOutcome, FrameScheduler, RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

mod commands;
mod device;
mod error;
mod frame;
mod gpu;
mod instance;
mod pipeline;
mod resources;
mod swapchain;
mod uniforms;

pub use device::{
    find_queue_families, max_sample_count, score_adapter, select_adapter, AdapterReport,
    QueueFamilyIndices,
};
pub use error::VkError;
pub use resources::{choose_depth_format, find_memory_type, transition_masks};
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format, SwapchainPlan,
};

use gpu::Gpu;

pub struct VkRenderer {
    scheduler: FrameScheduler,
    gpu: Gpu,
}

impl VkRenderer {
    pub fn frames_presented(&self) -> u64 {
        self.scheduler.frames_presented()
    }

    pub fn recreations(&self) -> u64 {
        self.scheduler.recreations()
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RenderConfig,
    ) -> Result<Self> {
        let gpu = unsafe { Gpu::new(window, display, size, cfg)? };
        let scheduler = FrameScheduler::new(cfg.max_frames_in_flight, gpu.image_count());
        info!(
            "vk: ready ({} images, {} frames in flight)",
            gpu.image_count(),
            scheduler.frames_in_flight()
        );
        Ok(Self { scheduler, gpu })
    }

    fn resize(&mut self, size: RenderSize) {
        if size != self.gpu.framebuffer {
            debug!("vk: resize to {}x{}", size.width, size.height);
        }
        self.gpu.framebuffer = size;
        self.scheduler.notify_resized();
    }

    fn render(&mut self) -> Result<FrameOutcome> {
        // A minimized window keeps the old chain; nothing is acquired against it.
        if self.gpu.framebuffer.is_degenerate() {
            return Ok(FrameOutcome::Deferred);
        }
        self.scheduler.draw_frame(&mut self.gpu)
    }
}
