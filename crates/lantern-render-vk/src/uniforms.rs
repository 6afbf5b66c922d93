// SPDX-License-Identifier: CEPL-1.0
//! Per-image uniform buffers and descriptor sets.

use crate::resources::{create_all, GpuBuffer, ResourceFactory};
use anyhow::{Context, Result};
use ash::{vk, Device};
use lantern_math::UniformBufferObject;

pub(crate) const UBO_SIZE: vk::DeviceSize = std::mem::size_of::<UniformBufferObject>() as vk::DeviceSize;

/// One host-visible uniform buffer per swapchain image.
pub(crate) unsafe fn create_uniform_buffers(
    factory: &ResourceFactory<'_>,
    image_count: usize,
) -> Result<Vec<GpuBuffer>> {
    create_all(
        image_count,
        || factory.create_host_buffer(UBO_SIZE, vk::BufferUsageFlags::UNIFORM_BUFFER),
        |b| b.destroy(factory.device),
    )
    .context("uniform buffer")
}

pub(crate) struct TextureBinding {
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
}

/// Pool sized for exactly one set per uniform buffer; set `i` binds `uniforms[i]`.
pub(crate) unsafe fn create_descriptor_sets(
    device: &Device,
    set_layout: vk::DescriptorSetLayout,
    uniforms: &[GpuBuffer],
    texture: &TextureBinding,
) -> Result<(vk::DescriptorPool, Vec<vk::DescriptorSet>)> {
    let count = uniforms.len() as u32;
    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: count,
        },
    ];
    let pool_ci = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets: count,
        pool_size_count: pool_sizes.len() as u32,
        p_pool_sizes: pool_sizes.as_ptr(),
        ..Default::default()
    };
    let pool = device
        .create_descriptor_pool(&pool_ci, None)
        .context("create_descriptor_pool")?;

    let layouts = vec![set_layout; uniforms.len()];
    let alloc = vk::DescriptorSetAllocateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
        descriptor_pool: pool,
        descriptor_set_count: count,
        p_set_layouts: layouts.as_ptr(),
        ..Default::default()
    };
    let sets = match device.allocate_descriptor_sets(&alloc) {
        Ok(sets) => sets,
        Err(e) => {
            device.destroy_descriptor_pool(pool, None);
            return Err(e).context("allocate_descriptor_sets");
        }
    };

    let buffer_infos: Vec<vk::DescriptorBufferInfo> = uniforms
        .iter()
        .map(|u| vk::DescriptorBufferInfo {
            buffer: u.buffer,
            offset: 0,
            range: UBO_SIZE,
        })
        .collect();
    let image_info = vk::DescriptorImageInfo {
        sampler: texture.sampler,
        image_view: texture.view,
        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    };

    let mut writes = Vec::with_capacity(sets.len() * 2);
    for (set, info) in sets.iter().zip(&buffer_infos) {
        writes.push(vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: *set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            p_buffer_info: info,
            ..Default::default()
        });
        writes.push(vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: *set,
            dst_binding: 1,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            p_image_info: &image_info,
            ..Default::default()
        });
    }
    device.update_descriptor_sets(&writes, &[]);

    Ok((pool, sets))
}
