// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::{vk, Device};

pub(crate) unsafe fn create_command_pool(device: &Device, queue_family: u32) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: queue_family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    device
        .create_command_pool(&pool_info, None)
        .context("create_command_pool")
}

pub(crate) unsafe fn allocate_command_buffers(
    device: &Device,
    pool: vk::CommandPool,
    count: usize,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: count as u32,
        ..Default::default()
    };
    device
        .allocate_command_buffers(&alloc_info)
        .context("allocate_command_buffers")
}

/// Everything a per-image draw needs besides its framebuffer and descriptor set.
pub(crate) struct DrawState {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

/// Records the full frame for one swapchain image. The buffer is reused
/// unchanged for every frame until the chain is rebuilt.
pub(crate) unsafe fn record_draw(
    device: &Device,
    cmd: vk::CommandBuffer,
    framebuffer: vk::Framebuffer,
    set: vk::DescriptorSet,
    draw: &DrawState,
) -> Result<()> {
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        ..Default::default()
    };
    device.begin_command_buffer(cmd, &begin)?;

    let clear_values = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: draw.clear_color,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ];
    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: draw.extent,
    };
    let rp_begin = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass: draw.render_pass,
        framebuffer,
        render_area,
        clear_value_count: clear_values.len() as u32,
        p_clear_values: clear_values.as_ptr(),
        ..Default::default()
    };
    device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);

    let vp = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: draw.extent.width as f32,
        height: draw.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
    device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&render_area));

    device.cmd_bind_vertex_buffers(cmd, 0, std::slice::from_ref(&draw.vertex_buffer), &[0]);
    device.cmd_bind_index_buffer(cmd, draw.index_buffer, 0, vk::IndexType::UINT32);
    device.cmd_bind_descriptor_sets(
        cmd,
        vk::PipelineBindPoint::GRAPHICS,
        draw.layout,
        0,
        std::slice::from_ref(&set),
        &[],
    );
    device.cmd_draw_indexed(cmd, draw.index_count, 1, 0, 0, 0);

    device.cmd_end_render_pass(cmd);
    device.end_command_buffer(cmd)?;
    Ok(())
}
