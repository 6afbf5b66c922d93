// SPDX-License-Identifier: CEPL-1.0
//! Buffers, images and uploads.
//!
//! Device-local memory is only ever filled through a host-visible staging
//! buffer and a one-shot copy. Temporaries are held in scoped guards so
//! they are released on every exit path, including `?` returns.

use crate::error::VkError;
use anyhow::{Context, Result};
use ash::{vk, Device, Instance};
use lantern_render::TextureData;

/// First memory type allowed by `type_bits` whose flags contain `flags`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32, VkError> {
    (0..props.memory_type_count)
        .find(|&i| {
            type_bits & (1 << i) != 0
                && props.memory_types[i as usize].property_flags.contains(flags)
        })
        .ok_or(VkError::NoSuitableMemoryType { type_bits, flags })
}

/// Depth formats in order of preference.
pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn choose_depth_format(
    mut props_of: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format, VkError> {
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&f| {
            props_of(f)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(VkError::NoDepthFormat)
}

/// Access masks and stages for the layout transitions textures go through.
pub fn transition_masks(
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) -> Result<
    (
        vk::AccessFlags,
        vk::AccessFlags,
        vk::PipelineStageFlags,
        vk::PipelineStageFlags,
    ),
    VkError,
> {
    match (from, to) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok((
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok((
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ))
        }
        _ => Err(VkError::UnsupportedLayoutTransition { from, to }),
    }
}

fn color_range(base_mip_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Creates `count` objects in order. If one fails, the ones already made go to
/// `destroy` before the error is returned.
pub(crate) fn create_all<T, E>(
    count: usize,
    mut create: impl FnMut() -> Result<T, E>,
    mut destroy: impl FnMut(&T),
) -> Result<Vec<T>, E> {
    let mut made = Vec::with_capacity(count);
    for _ in 0..count {
        match create() {
            Ok(v) => made.push(v),
            Err(e) => {
                made.iter().for_each(&mut destroy);
                return Err(e);
            }
        }
    }
    Ok(made)
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    /// Copies `bytes` into host-visible memory at offset 0.
    pub(crate) unsafe fn write(&self, device: &Device, bytes: &[u8]) -> Result<()> {
        let len = bytes.len().min(self.size as usize);
        let ptr = device
            .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
            .context("map_memory")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), len);
        device.unmap_memory(self.memory);
        Ok(())
    }

    pub(crate) unsafe fn destroy(&self, device: &Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl GpuImage {
    pub(crate) unsafe fn destroy(&self, device: &Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

/// Destroys the buffer on drop unless [`ScopedBuffer::release`]d.
struct ScopedBuffer<'a> {
    device: &'a Device,
    buf: GpuBuffer,
    armed: bool,
}

impl<'a> ScopedBuffer<'a> {
    fn new(device: &'a Device, buf: GpuBuffer) -> Self {
        Self {
            device,
            buf,
            armed: true,
        }
    }

    fn release(mut self) -> GpuBuffer {
        self.armed = false;
        self.buf
    }
}

impl Drop for ScopedBuffer<'_> {
    fn drop(&mut self) {
        if self.armed {
            unsafe { self.buf.destroy(self.device) };
        }
    }
}

/// A primary command buffer recorded once, submitted, waited on and freed.
struct OneShot<'a> {
    device: &'a Device,
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
}

impl<'a> OneShot<'a> {
    unsafe fn begin(device: &'a Device, pool: vk::CommandPool) -> Result<Self> {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = device
            .allocate_command_buffers(&ai)
            .context("allocate one-shot command buffer")?[0];
        let guard = Self { device, pool, cmd };
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device.begin_command_buffer(cmd, &bi)?;
        Ok(guard)
    }

    unsafe fn submit_and_wait(self, queue: vk::Queue) -> Result<()> {
        self.device.end_command_buffer(self.cmd)?;
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &self.cmd,
            ..Default::default()
        };
        self.device
            .queue_submit(queue, std::slice::from_ref(&si), vk::Fence::null())
            .context("one-shot queue_submit")?;
        self.device.queue_wait_idle(queue)?;
        Ok(())
    }
}

impl Drop for OneShot<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device
                .free_command_buffers(self.pool, std::slice::from_ref(&self.cmd))
        };
    }
}

pub(crate) unsafe fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
    mip_levels: u32,
) -> Result<vk::ImageView> {
    let ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    Ok(device.create_image_view(&ci, None)?)
}

pub(crate) struct ImageDesc {
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// Allocation and upload on the selected device.
pub(crate) struct ResourceFactory<'a> {
    pub instance: &'a Instance,
    pub phys: vk::PhysicalDevice,
    pub device: &'a Device,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub queue: vk::Queue,
    pub pool: vk::CommandPool,
}

impl ResourceFactory<'_> {
    pub(crate) unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = self.device.create_buffer(&bci, None)?;
        let req = self.device.get_buffer_memory_requirements(buffer);
        let memory_type_index = match find_memory_type(&self.memory, req.memory_type_bits, flags) {
            Ok(i) => i,
            Err(e) => {
                self.device.destroy_buffer(buffer, None);
                return Err(e.into());
            }
        };
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index,
            ..Default::default()
        };
        let memory = match self.device.allocate_memory(&mai, None) {
            Ok(m) => m,
            Err(e) => {
                self.device.destroy_buffer(buffer, None);
                return Err(e).context("allocate_memory (buffer)");
            }
        };
        let out = GpuBuffer {
            buffer,
            memory,
            size,
        };
        if let Err(e) = self.device.bind_buffer_memory(buffer, memory, 0) {
            out.destroy(self.device);
            return Err(e).context("bind_buffer_memory");
        }
        Ok(out)
    }

    pub(crate) unsafe fn create_host_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<GpuBuffer> {
        self.create_buffer(
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    unsafe fn staging(&self, bytes: &[u8]) -> Result<ScopedBuffer<'_>> {
        let buf = self.create_host_buffer(
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        let guard = ScopedBuffer::new(self.device, buf);
        buf.write(self.device, bytes)?;
        Ok(guard)
    }

    /// Device-local buffer with `usage` filled from `bytes` via staging.
    pub(crate) unsafe fn upload_buffer(
        &self,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<GpuBuffer> {
        let size = bytes.len() as vk::DeviceSize;
        let staging = self.staging(bytes)?;
        let dst = ScopedBuffer::new(
            self.device,
            self.create_buffer(
                size,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?,
        );

        let cmd = OneShot::begin(self.device, self.pool)?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        self.device.cmd_copy_buffer(
            cmd.cmd,
            staging.buf.buffer,
            dst.buf.buffer,
            std::slice::from_ref(&region),
        );
        cmd.submit_and_wait(self.queue)?;

        Ok(dst.release())
    }

    pub(crate) unsafe fn create_image(&self, desc: &ImageDesc) -> Result<GpuImage> {
        let ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            },
            mip_levels: desc.mip_levels,
            array_layers: 1,
            samples: desc.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = self.device.create_image(&ci, None)?;
        let req = self.device.get_image_memory_requirements(image);
        let memory_type_index = match find_memory_type(
            &self.memory,
            req.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Ok(i) => i,
            Err(e) => {
                self.device.destroy_image(image, None);
                return Err(e.into());
            }
        };
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index,
            ..Default::default()
        };
        let memory = match self.device.allocate_memory(&mai, None) {
            Ok(m) => m,
            Err(e) => {
                self.device.destroy_image(image, None);
                return Err(e).context("allocate_memory (image)");
            }
        };
        let view = self
            .device
            .bind_image_memory(image, memory, 0)
            .map_err(anyhow::Error::from)
            .and_then(|()| {
                create_image_view(self.device, image, desc.format, desc.aspect, desc.mip_levels)
            });
        match view {
            Ok(view) => Ok(GpuImage {
                image,
                memory,
                view,
            }),
            Err(e) => {
                self.device.destroy_image(image, None);
                self.device.free_memory(memory, None);
                Err(e)
            }
        }
    }

    /// Transient multisampled color target resolved into the swapchain image.
    pub(crate) unsafe fn create_color_target(
        &self,
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> Result<GpuImage> {
        self.create_image(&ImageDesc {
            extent,
            mip_levels: 1,
            samples,
            format,
            usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            aspect: vk::ImageAspectFlags::COLOR,
        })
        .context("MSAA color target")
    }

    pub(crate) unsafe fn create_depth_target(
        &self,
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> Result<GpuImage> {
        self.create_image(&ImageDesc {
            extent,
            mip_levels: 1,
            samples,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
        })
        .context("depth target")
    }

    unsafe fn transition(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        mip_levels: u32,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    ) -> Result<()> {
        let (src_access_mask, dst_access_mask, src_stage, dst_stage) = transition_masks(from, to)?;
        let barrier = vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_access_mask,
            dst_access_mask,
            old_layout: from,
            new_layout: to,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: color_range(0, mip_levels),
            ..Default::default()
        };
        self.device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&barrier),
        );
        Ok(())
    }

    /// Uploads `tex` into a sampled image and fills its whole mip chain.
    pub(crate) unsafe fn upload_texture(&self, tex: &TextureData) -> Result<(GpuImage, u32)> {
        let format = vk::Format::R8G8B8A8_SRGB;
        let props = self
            .instance
            .get_physical_device_format_properties(self.phys, format);
        if !props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            return Err(VkError::LinearBlitUnsupported(format).into());
        }

        let mip_levels = tex.mip_levels();
        let extent = vk::Extent2D {
            width: tex.width,
            height: tex.height,
        };
        let staging = self.staging(&tex.pixels)?;
        let image = self.create_image(&ImageDesc {
            extent,
            mip_levels,
            samples: vk::SampleCountFlags::TYPE_1,
            format,
            usage: vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
        })?;

        let recorded = (|| -> Result<()> {
            let cmd = OneShot::begin(self.device, self.pool)?;
            self.transition(
                cmd.cmd,
                image.image,
                mip_levels,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: tex.width,
                    height: tex.height,
                    depth: 1,
                },
            };
            self.device.cmd_copy_buffer_to_image(
                cmd.cmd,
                staging.buf.buffer,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
            self.record_mipmaps(cmd.cmd, image.image, extent, mip_levels);
            cmd.submit_and_wait(self.queue)
        })();

        if let Err(e) = recorded {
            image.destroy(self.device);
            return Err(e);
        }
        Ok((image, mip_levels))
    }

    /// Blits level i-1 into level i, leaving every level SHADER_READ_ONLY.
    /// Expects all levels in TRANSFER_DST_OPTIMAL.
    unsafe fn record_mipmaps(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        extent: vk::Extent2D,
        mip_levels: u32,
    ) {
        let mut barrier = vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: color_range(0, 1),
            ..Default::default()
        };
        let barrier_at = |barrier: &vk::ImageMemoryBarrier, src, dst| {
            self.device.cmd_pipeline_barrier(
                cmd,
                src,
                dst,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(barrier),
            )
        };

        let mut width = extent.width as i32;
        let mut height = extent.height as i32;
        for level in 1..mip_levels {
            barrier.subresource_range.base_mip_level = level - 1;
            barrier.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
            barrier.new_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
            barrier.src_access_mask = vk::AccessFlags::TRANSFER_WRITE;
            barrier.dst_access_mask = vk::AccessFlags::TRANSFER_READ;
            barrier_at(
                &barrier,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
            );

            let next_width = (width / 2).max(1);
            let next_height = (height / 2).max(1);
            let blit = vk::ImageBlit {
                src_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level - 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                src_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: width,
                        y: height,
                        z: 1,
                    },
                ],
                dst_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                dst_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: next_width,
                        y: next_height,
                        z: 1,
                    },
                ],
            };
            self.device.cmd_blit_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&blit),
                vk::Filter::LINEAR,
            );

            barrier.old_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
            barrier.new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            barrier.src_access_mask = vk::AccessFlags::TRANSFER_READ;
            barrier.dst_access_mask = vk::AccessFlags::SHADER_READ;
            barrier_at(
                &barrier,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            );

            width = next_width;
            height = next_height;
        }

        // The last level was only ever written to.
        barrier.subresource_range.base_mip_level = mip_levels - 1;
        barrier.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        barrier.new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        barrier.src_access_mask = vk::AccessFlags::TRANSFER_WRITE;
        barrier.dst_access_mask = vk::AccessFlags::SHADER_READ;
        barrier_at(
            &barrier,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        );
    }

    pub(crate) unsafe fn create_sampler(&self, mip_levels: u32) -> Result<vk::Sampler> {
        let limits = self
            .instance
            .get_physical_device_properties(self.phys)
            .limits;
        let ci = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            mip_lod_bias: 0.0,
            anisotropy_enable: vk::TRUE,
            max_anisotropy: limits.max_sampler_anisotropy,
            compare_enable: vk::FALSE,
            compare_op: vk::CompareOp::ALWAYS,
            min_lod: 0.0,
            max_lod: mip_levels as f32,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            unnormalized_coordinates: vk::FALSE,
            ..Default::default()
        };
        Ok(self.device.create_sampler(&ci, None)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            props.memory_types[i].property_flags = flags;
        }
        props
    }

    #[test]
    fn memory_type_respects_filter_and_flags() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let local = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        let props = memory_props(&[local, host, local | host]);

        assert_eq!(find_memory_type(&props, 0b111, local).unwrap(), 0);
        assert_eq!(find_memory_type(&props, 0b111, host).unwrap(), 1);
        // Type 0 filtered out by the resource.
        assert_eq!(find_memory_type(&props, 0b110, local).unwrap(), 2);
        assert_eq!(find_memory_type(&props, 0b100, local | host).unwrap(), 2);
    }

    #[test]
    fn no_matching_memory_type_is_an_error() {
        let props = memory_props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        assert!(matches!(err, VkError::NoSuitableMemoryType { type_bits: 1, .. }));
        // Bits past memory_type_count are ignored.
        assert!(find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).is_err());
    }

    #[test]
    fn depth_format_follows_preference_order() {
        let supported = |wanted: vk::Format| {
            move |f: vk::Format| vk::FormatProperties {
                optimal_tiling_features: if f == wanted {
                    vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                } else {
                    vk::FormatFeatureFlags::empty()
                },
                ..Default::default()
            }
        };
        assert_eq!(
            choose_depth_format(supported(vk::Format::D24_UNORM_S8_UINT)).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );
        assert_eq!(
            choose_depth_format(|_| vk::FormatProperties {
                optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                ..Default::default()
            })
            .unwrap(),
            vk::Format::D32_SFLOAT
        );
        assert!(choose_depth_format(|_| vk::FormatProperties::default()).is_err());
    }

    #[test]
    fn failed_creation_releases_earlier_objects() {
        let mut next = 0;
        let mut released = Vec::new();
        let err = create_all(
            4,
            || {
                next += 1;
                if next == 3 {
                    Err("third failed")
                } else {
                    Ok(next)
                }
            },
            |&v| released.push(v),
        )
        .unwrap_err();
        assert_eq!(err, "third failed");
        assert_eq!(next, 3);
        assert_eq!(released, vec![1, 2]);

        let made = create_all(3, || Ok::<_, ()>(7), |_| panic!("nothing to release")).unwrap();
        assert_eq!(made, vec![7, 7, 7]);
    }

    #[test]
    fn only_texture_upload_transitions_are_known() {
        let (src, dst, _, dst_stage) = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(src, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst, vk::AccessFlags::SHADER_READ);
        assert_eq!(dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        let err = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )
        .unwrap_err();
        assert!(matches!(err, VkError::UnsupportedLayoutTransition { .. }));
    }
}
