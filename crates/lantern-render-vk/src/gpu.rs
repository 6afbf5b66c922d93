// SPDX-License-Identifier: CEPL-1.0
use crate::commands::{allocate_command_buffers, create_command_pool, record_draw, DrawState};
use crate::device::{create_logical_device, max_sample_count, pick_physical_device, QueueFamilyIndices};
use crate::frame::{create_frame_syncs, FrameSync};
use crate::instance::InstanceCtx;
use crate::pipeline::{
    create_descriptor_set_layout, create_framebuffers, create_pipeline, create_render_pass,
    ShaderCode,
};
use crate::resources::{choose_depth_format, GpuBuffer, GpuImage, ResourceFactory};
use crate::swapchain::{Swapchain, SwapchainPlan, SurfaceQuery};
use crate::uniforms::{create_descriptor_sets, create_uniform_buffers, TextureBinding};
use anyhow::{anyhow, Context, Result};
use ash::khr::swapchain;
use ash::{vk, Device};
use lantern_core::RenderConfig;
use lantern_render::{mesh, texture, RenderSize};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::time::Instant;
use tracing::{debug, info};

/// Geometry and texture uploaded once at startup.
pub(crate) struct Scene {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    pub index_count: u32,
    pub texture: GpuImage,
    pub sampler: vk::Sampler,
}

impl Scene {
    unsafe fn destroy(&self, device: &Device) {
        device.destroy_sampler(self.sampler, None);
        self.texture.destroy(device);
        self.indices.destroy(device);
        self.vertices.destroy(device);
    }
}

/// Everything whose shape depends on the current swapchain.
pub(crate) struct Chain {
    pub swapchain: Swapchain,
    pub color: Option<GpuImage>,
    pub depth: GpuImage,
    pub render_pass: vk::RenderPass,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub uniforms: Vec<GpuBuffer>,
    pub desc_pool: vk::DescriptorPool,
    pub cmd_bufs: Vec<vk::CommandBuffer>,
}

impl Chain {
    /// Destroys all but the swapchain handle itself, which the caller retires
    /// after handing it to its successor as `old_swapchain`.
    unsafe fn destroy_dependents(&mut self, device: &Device, cmd_pool: vk::CommandPool) {
        if !self.cmd_bufs.is_empty() {
            device.free_command_buffers(cmd_pool, &self.cmd_bufs);
            self.cmd_bufs.clear();
        }
        for fb in self.framebuffers.drain(..) {
            device.destroy_framebuffer(fb, None);
        }
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.pipeline_layout, None);
        device.destroy_render_pass(self.render_pass, None);
        // Freed with the pool.
        device.destroy_descriptor_pool(self.desc_pool, None);
        for u in self.uniforms.drain(..) {
            u.destroy(device);
        }
        if let Some(color) = self.color.take() {
            color.destroy(device);
        }
        self.depth.destroy(device);
        self.swapchain.destroy_views(device);
    }
}

pub(crate) struct Gpu {
    phys: vk::PhysicalDevice,
    memory: vk::PhysicalDeviceMemoryProperties,
    pub(crate) device: Device,
    families: QueueFamilyIndices,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    pub(crate) swapchain_loader: swapchain::Device,

    cmd_pool: vk::CommandPool,
    set_layout: vk::DescriptorSetLayout,
    samples: vk::SampleCountFlags,
    depth_format: vk::Format,
    shaders: ShaderCode,
    clear_color: [f32; 4],
    scene: Option<Scene>,

    pub(crate) chain: Option<Chain>,
    pub(crate) frames: Vec<FrameSync>,
    pub(crate) framebuffer: RenderSize,
    pub(crate) started: Instant,

    // Last, so it drops after Drop for Gpu has released the device.
    ctx: InstanceCtx,
}

impl Gpu {
    pub(crate) unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RenderConfig,
    ) -> Result<Self> {
        // CPU-side assets first: a bad path should fail before any device work.
        let shaders = ShaderCode::load(&cfg.shader_dir)?;
        let mesh = mesh::load_obj(&cfg.model_path)?;
        let tex = texture::load_texture(&cfg.texture_path)?;

        let dh = display.display_handle().context("display handle")?.as_raw();
        let wh = window.window_handle().context("window handle")?.as_raw();

        // STRICT ORDER: instance, surface, then adapter selection against that surface.
        let ctx = InstanceCtx::new(dh, wh, cfg.validation)?;
        let instance = &ctx.instance;
        let (phys, families) =
            pick_physical_device(instance, &ctx.surface_loader, ctx.surface, cfg.selection)?;

        let props = instance.get_physical_device_properties(phys);
        let memory = instance.get_physical_device_memory_properties(phys);
        let samples = if cfg.msaa {
            max_sample_count(&props.limits)
        } else {
            vk::SampleCountFlags::TYPE_1
        };
        let depth_format =
            choose_depth_format(|f| instance.get_physical_device_format_properties(phys, f))?;
        info!("vk: samples={:?} depth={:?}", samples, depth_format);

        let (device, graphics_queue, present_queue) = create_logical_device(instance, phys, families)?;
        let swapchain_loader = swapchain::Device::new(instance, &device);

        // From here on Drop owns cleanup; handles still null are skipped.
        let mut gpu = Gpu {
            phys,
            memory,
            device,
            families,
            graphics_queue,
            present_queue,
            swapchain_loader,
            cmd_pool: vk::CommandPool::null(),
            set_layout: vk::DescriptorSetLayout::null(),
            samples,
            depth_format,
            shaders,
            clear_color: cfg.clear_color,
            scene: None,
            chain: None,
            frames: Vec::new(),
            framebuffer: size,
            started: Instant::now(),
            ctx,
        };

        gpu.cmd_pool = create_command_pool(&gpu.device, families.graphics)?;
        gpu.set_layout = create_descriptor_set_layout(&gpu.device)?;
        gpu.frames = create_frame_syncs(&gpu.device, cfg.max_frames_in_flight.max(1))?;

        gpu.scene = Some(gpu.upload_scene(&mesh, &tex)?);

        let plan = SurfaceQuery::new(&gpu.ctx.surface_loader, gpu.phys, gpu.ctx.surface)?.plan(size)?;
        let swapchain = Swapchain::new(
            &gpu.device,
            &gpu.swapchain_loader,
            gpu.ctx.surface,
            gpu.families,
            plan,
            vk::SwapchainKHR::null(),
        )?;
        gpu.chain = Some(gpu.build_chain(swapchain)?);
        gpu.started = Instant::now();
        Ok(gpu)
    }

    fn factory(&self) -> ResourceFactory<'_> {
        ResourceFactory {
            instance: &self.ctx.instance,
            phys: self.phys,
            device: &self.device,
            memory: self.memory,
            queue: self.graphics_queue,
            pool: self.cmd_pool,
        }
    }

    unsafe fn upload_scene(
        &self,
        mesh: &lantern_render::MeshData,
        tex: &lantern_render::TextureData,
    ) -> Result<Scene> {
        let factory = self.factory();
        let vertices = factory
            .upload_buffer(mesh.vertex_bytes(), vk::BufferUsageFlags::VERTEX_BUFFER)
            .context("vertex buffer")?;
        let indices = factory
            .upload_buffer(mesh.index_bytes(), vk::BufferUsageFlags::INDEX_BUFFER)
            .context("index buffer")?;
        let (texture, mip_levels) = factory.upload_texture(tex).context("texture")?;
        let sampler = factory.create_sampler(mip_levels)?;
        info!(
            "vk: scene uploaded ({} indices, texture {}x{} with {} mips)",
            mesh.indices.len(),
            tex.width,
            tex.height,
            mip_levels
        );
        Ok(Scene {
            vertices,
            indices,
            index_count: mesh.indices.len() as u32,
            texture,
            sampler,
        })
    }

    pub(crate) fn chain(&self) -> Result<&Chain> {
        self.chain.as_ref().ok_or_else(|| anyhow!("swapchain is not built"))
    }

    pub(crate) fn image_count(&self) -> usize {
        self.chain
            .as_ref()
            .map_or(0, |c| c.swapchain.image_count())
    }

    /// Builds every swapchain-dependent resource in dependency order. On
    /// failure everything created so far is released, the swapchain included.
    unsafe fn build_chain(&self, swapchain: Swapchain) -> Result<Chain> {
        let mut chain = Chain {
            swapchain,
            color: None,
            depth: GpuImage::default(),
            render_pass: vk::RenderPass::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            framebuffers: Vec::new(),
            uniforms: Vec::new(),
            desc_pool: vk::DescriptorPool::null(),
            cmd_bufs: Vec::new(),
        };
        match self.fill_chain(&mut chain) {
            Ok(()) => Ok(chain),
            Err(e) => {
                // Destroying null handles is a no-op.
                chain.destroy_dependents(&self.device, self.cmd_pool);
                self.swapchain_loader
                    .destroy_swapchain(chain.swapchain.handle, None);
                Err(e)
            }
        }
    }

    unsafe fn fill_chain(&self, chain: &mut Chain) -> Result<()> {
        let scene = self.scene.as_ref().context("scene not uploaded")?;
        let factory = self.factory();
        let plan: SwapchainPlan = chain.swapchain.plan;
        let extent = plan.extent;
        let image_count = chain.swapchain.image_count();

        if self.samples != vk::SampleCountFlags::TYPE_1 {
            chain.color = Some(factory.create_color_target(plan.format, extent, self.samples)?);
        }
        chain.depth = factory.create_depth_target(self.depth_format, extent, self.samples)?;
        chain.render_pass =
            create_render_pass(&self.device, plan.format, self.depth_format, self.samples)?;
        (chain.pipeline_layout, chain.pipeline) = create_pipeline(
            &self.device,
            chain.render_pass,
            self.set_layout,
            &self.shaders,
            self.samples,
        )?;
        chain.framebuffers = create_framebuffers(
            &self.device,
            chain.render_pass,
            &chain.swapchain.views,
            chain.color.map(|c| c.view),
            chain.depth.view,
            extent,
        )?;

        chain.uniforms = create_uniform_buffers(&factory, image_count)?;
        let (desc_pool, desc_sets) = create_descriptor_sets(
            &self.device,
            self.set_layout,
            &chain.uniforms,
            &TextureBinding {
                view: scene.texture.view,
                sampler: scene.sampler,
            },
        )?;
        chain.desc_pool = desc_pool;

        chain.cmd_bufs = allocate_command_buffers(&self.device, self.cmd_pool, image_count)?;
        let draw = DrawState {
            render_pass: chain.render_pass,
            pipeline: chain.pipeline,
            layout: chain.pipeline_layout,
            extent,
            clear_color: self.clear_color,
            vertex_buffer: scene.vertices.buffer,
            index_buffer: scene.indices.buffer,
            index_count: scene.index_count,
        };
        for ((&cmd, &fb), &set) in chain.cmd_bufs.iter().zip(&chain.framebuffers).zip(&desc_sets) {
            record_draw(&self.device, cmd, fb, set, &draw)?;
        }
        Ok(())
    }

    // STRICT ORDER (recreate):
    // 1) Bail out while the surface has no area; the chain stays as is.
    // 2) device_wait_idle(): nothing may still reference the old chain.
    // 3) Destroy everything that depends on the old swapchain.
    // 4) Create the new swapchain from the old handle, then retire the old handle.
    // 5) Rebuild dependents and re-record all command buffers.
    pub(crate) unsafe fn rebuild_chain(&mut self) -> Result<Option<usize>> {
        if self.framebuffer.is_degenerate() {
            return Ok(None);
        }
        let plan = SurfaceQuery::new(&self.ctx.surface_loader, self.phys, self.ctx.surface)?
            .plan(self.framebuffer)?;
        if plan.is_degenerate() {
            debug!("vk: surface extent is 0x0, deferring swapchain rebuild");
            return Ok(None);
        }

        self.device
            .device_wait_idle()
            .context("device_wait_idle before swapchain rebuild")?;

        let old = match self.chain.take() {
            Some(mut chain) => {
                chain.destroy_dependents(&self.device, self.cmd_pool);
                chain.swapchain.handle
            }
            None => vk::SwapchainKHR::null(),
        };
        let swapchain = Swapchain::new(
            &self.device,
            &self.swapchain_loader,
            self.ctx.surface,
            self.families,
            plan,
            old,
        );
        if old != vk::SwapchainKHR::null() {
            self.swapchain_loader.destroy_swapchain(old, None);
        }
        let chain = self.build_chain(swapchain?)?;
        let image_count = chain.swapchain.image_count();
        debug!(
            "vk: swapchain rebuilt at {}x{} with {} images",
            plan.extent.width, plan.extent.height, image_count
        );
        self.chain = Some(chain);
        Ok(Some(image_count))
    }
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle()
// - Swapchain dependents, then the swapchain itself
// - Per-slot semaphores/fences, scene resources, layouts, command pool
// - Device; the instance context then drops surface, debug messenger, instance.
impl Drop for Gpu {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;
            d.device_wait_idle().ok();

            if let Some(mut chain) = self.chain.take() {
                chain.destroy_dependents(d, self.cmd_pool);
                self.swapchain_loader
                    .destroy_swapchain(chain.swapchain.handle, None);
            }
            for f in &self.frames {
                f.destroy(d);
            }
            if let Some(scene) = self.scene.take() {
                scene.destroy(d);
            }
            d.destroy_descriptor_set_layout(self.set_layout, None);
            d.destroy_command_pool(self.cmd_pool, None);

            d.destroy_device(None);
        }
    }
}
