// SPDX-License-Identifier: CEPL-1.0
use crate::gpu::Gpu;
use crate::resources::create_all;
use anyhow::{anyhow, Context, Result};
use ash::{vk, Device};
use lantern_math::UniformBufferObject;
use lantern_render::{Acquired, FrameBackend, Presented};

/// Synchronization owned by one frame slot.
pub(crate) struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    unsafe fn new(device: &Device) -> Result<Self> {
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        };
        if let Err(e) = sync.fill(device) {
            // Destroying null handles is a no-op.
            sync.destroy(device);
            return Err(e);
        }
        Ok(sync)
    }

    unsafe fn fill(&mut self, device: &Device) -> Result<()> {
        let sem_ci = vk::SemaphoreCreateInfo::default();
        // Signaled so the first wait on every slot returns immediately.
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        self.image_available = device.create_semaphore(&sem_ci, None)?;
        self.render_finished = device.create_semaphore(&sem_ci, None)?;
        self.in_flight = device.create_fence(&fence_ci, None)?;
        Ok(())
    }

    pub(crate) unsafe fn destroy(&self, device: &Device) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_fence(self.in_flight, None);
    }
}

pub(crate) unsafe fn create_frame_syncs(device: &Device, count: usize) -> Result<Vec<FrameSync>> {
    create_all(count, || FrameSync::new(device), |f| f.destroy(device)).context("frame sync objects")
}

impl FrameBackend for Gpu {
    type Error = anyhow::Error;

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.frames[slot].in_flight;
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
            .with_context(|| format!("wait_for_fences (slot {slot})"))
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquired> {
        let chain = self.chain()?;
        let acquired = unsafe {
            self.swapchain_loader.acquire_next_image(
                chain.swapchain.handle,
                u64::MAX,
                self.frames[slot].image_available,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(anyhow!("acquire_next_image: {e:?}")),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.frames[slot].in_flight;
        unsafe { self.device.reset_fences(&[fence]) }.context("reset_fences")
    }

    fn update_image(&mut self, image: u32) -> Result<()> {
        let chain = self.chain()?;
        let extent = chain.swapchain.plan.extent;
        let ubo = UniformBufferObject::at(
            self.started.elapsed().as_secs_f32(),
            extent.width,
            extent.height,
        );
        let buffer = chain
            .uniforms
            .get(image as usize)
            .ok_or_else(|| anyhow!("no uniform buffer for image {image}"))?;
        unsafe { buffer.write(&self.device, bytemuck::bytes_of(&ubo)) }
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<()> {
        let chain = self.chain()?;
        let frame = &self.frames[slot];
        let cmd = chain.cmd_bufs[image as usize];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &frame.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &frame.render_finished,
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, std::slice::from_ref(&submit), frame.in_flight)
        }
        .context("queue_submit")
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<Presented> {
        let chain = self.chain()?;
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.frames[slot].render_finished,
            swapchain_count: 1,
            p_swapchains: &chain.swapchain.handle,
            p_image_indices: &image,
            ..Default::default()
        };
        match unsafe {
            self.swapchain_loader
                .queue_present(self.present_queue, &present)
        } {
            Ok(false) => Ok(Presented::Optimal),
            Ok(true) => Ok(Presented::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::OutOfDate),
            Err(e) => Err(anyhow!("queue_present: {e:?}")),
        }
    }

    fn recreate(&mut self) -> Result<Option<usize>> {
        unsafe { self.rebuild_chain() }
    }
}
