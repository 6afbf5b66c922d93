// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Setup failures. All of them are fatal; callers wrap them in `anyhow` with context.
#[derive(Debug, Error)]
pub enum VkError {
    #[error("validation layer {0} was requested but is not installed")]
    MissingValidationLayer(String),
    #[error("no adapter offers graphics + present queues, VK_KHR_swapchain and sampler anisotropy")]
    NoSuitableDevice,
    #[error("no memory type in filter {type_bits:#034b} has {flags:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },
    #[error("format {0:?} does not support linear blitting")]
    LinearBlitUnsupported(vk::Format),
    #[error("unsupported layout transition {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },
    #[error("no depth format supports optimal-tiling depth attachments")]
    NoDepthFormat,
    #[error("failed to load SPIR-V from {}", path.display())]
    Shader {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
