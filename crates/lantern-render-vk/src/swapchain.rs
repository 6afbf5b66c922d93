// SPDX-License-Identifier: CEPL-1.0
//! Swapchain parameters and creation.
//!
//! Every parameter is re-derived from the current surface capabilities on
//! each (re)creation; nothing is carried over from the previous chain except
//! the `old_swapchain` handle.

use crate::device::QueueFamilyIndices;
use anyhow::{anyhow, Context, Result};
use ash::khr::{surface, swapchain};
use ash::{vk, Device};
use lantern_render::RenderSize;
use tracing::info;

pub const PREFERRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
pub const PREFERRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// The preferred sRGB pair wherever it appears, otherwise the first reported format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == PREFERRED_FORMAT && f.color_space == PREFERRED_COLOR_SPACE)
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX when offered; FIFO is always available.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// `current_extent` verbatim unless it is the `u32::MAX` sentinel, in which
/// case the framebuffer size is clamped into the supported range.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: framebuffer
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: framebuffer
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum; `max_image_count == 0` means unbounded.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainPlan {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    /// `None` when the surface reports no formats.
    pub fn derive(
        caps: &vk::SurfaceCapabilitiesKHR,
        formats: &[vk::SurfaceFormatKHR],
        modes: &[vk::PresentModeKHR],
        framebuffer: RenderSize,
    ) -> Option<Self> {
        let surface_format = choose_surface_format(formats)?;
        Some(Self {
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode: choose_present_mode(modes),
            extent: choose_extent(caps, framebuffer),
            image_count: choose_image_count(caps),
            pre_transform: caps.current_transform,
        })
    }

    pub fn is_degenerate(&self) -> bool {
        self.extent.width == 0 || self.extent.height == 0
    }
}

pub(crate) struct SurfaceQuery {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceQuery {
    pub(crate) unsafe fn new(
        surf_i: &surface::Instance,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        Ok(Self {
            caps: surf_i
                .get_physical_device_surface_capabilities(phys, surface)
                .context("get_physical_device_surface_capabilities")?,
            formats: surf_i
                .get_physical_device_surface_formats(phys, surface)
                .context("get_physical_device_surface_formats")?,
            modes: surf_i
                .get_physical_device_surface_present_modes(phys, surface)
                .context("get_physical_device_surface_present_modes")?,
        })
    }

    pub(crate) fn plan(&self, framebuffer: RenderSize) -> Result<SwapchainPlan> {
        SwapchainPlan::derive(&self.caps, &self.formats, &self.modes, framebuffer)
            .ok_or_else(|| anyhow!("surface reports no formats"))
    }
}

pub(crate) struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub plan: SwapchainPlan,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

impl Swapchain {
    /// Creates the chain and one view per image. `old` may be null.
    pub(crate) unsafe fn new(
        device: &Device,
        swap_d: &swapchain::Device,
        surface: vk::SurfaceKHR,
        families: QueueFamilyIndices,
        plan: SwapchainPlan,
        old: vk::SwapchainKHR,
    ) -> Result<Self> {
        let family_indices = families.unique();
        let (sharing_mode, queue_family_index_count, p_queue_family_indices) = if families.is_split() {
            (
                vk::SharingMode::CONCURRENT,
                family_indices.len() as u32,
                family_indices.as_ptr(),
            )
        } else {
            (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
        };

        let create_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface,
            min_image_count: plan.image_count,
            image_format: plan.format,
            image_color_space: plan.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count,
            p_queue_family_indices,
            pre_transform: plan.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };

        let handle = swap_d
            .create_swapchain(&create_info, None)
            .context("create_swapchain")?;
        let mut views = Vec::new();
        let images = swap_d
            .get_swapchain_images(handle)
            .context("get_swapchain_images")
            .and_then(|images| {
                for &image in &images {
                    views.push(crate::resources::create_image_view(
                        device,
                        image,
                        plan.format,
                        vk::ImageAspectFlags::COLOR,
                        1,
                    )?);
                }
                Ok(images)
            });
        let images = match images {
            Ok(images) => images,
            Err(e) => {
                for view in views {
                    device.destroy_image_view(view, None);
                }
                swap_d.destroy_swapchain(handle, None);
                return Err(e);
            }
        };

        info!(
            "vk: swapchain {:?}/{:?} {:?} {}x{} images={} (requested {}) sharing={:?}",
            plan.format,
            plan.color_space,
            plan.present_mode,
            plan.extent.width,
            plan.extent.height,
            images.len(),
            plan.image_count,
            sharing_mode
        );

        Ok(Self {
            handle,
            plan,
            images,
            views,
        })
    }

    pub(crate) fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Destroys the views only; the handle is retired separately so it can
    /// be passed as `old_swapchain` first.
    pub(crate) unsafe fn destroy_views(&mut self, device: &Device) {
        for view in self.views.drain(..) {
            device.destroy_image_view(view, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    fn size(width: u32, height: u32) -> RenderSize {
        RenderSize { width, height }
    }

    #[test]
    fn defined_extent_is_used_verbatim() {
        let c = caps(2, 3, (1280, 720));
        let e = choose_extent(&c, size(640, 480));
        assert_eq!((e.width, e.height), (1280, 720));
    }

    #[test]
    fn sentinel_extent_clamps_the_framebuffer() {
        let c = caps(2, 3, (u32::MAX, u32::MAX));
        let e = choose_extent(&c, size(800, 600));
        assert_eq!((e.width, e.height), (800, 600));
        let e = choose_extent(&c, size(10_000, 0));
        assert_eq!((e.width, e.height), (4096, 1));
    }

    #[test]
    fn preferred_format_wins_from_any_position() {
        let unorm = fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let srgb = fmt(PREFERRED_FORMAT, PREFERRED_COLOR_SPACE);
        let rgba = fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);

        let picked = choose_surface_format(&[unorm, rgba, srgb]).unwrap();
        assert_eq!(picked.format, PREFERRED_FORMAT);

        let picked = choose_surface_format(&[rgba, unorm]).unwrap();
        assert_eq!(picked.format, vk::Format::R8G8B8A8_SRGB);

        // Right format, wrong color space does not count as preferred.
        let hdr = fmt(PREFERRED_FORMAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT);
        let picked = choose_surface_format(&[unorm, hdr]).unwrap();
        assert_eq!(picked.format, vk::Format::B8G8R8A8_UNORM);

        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_preferred_over_fifo() {
        use vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::FIFO, M::MAILBOX]), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::IMMEDIATE, M::FIFO]), M::FIFO);
        assert_eq!(choose_present_mode(&[]), M::FIFO);
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        assert_eq!(choose_image_count(&caps(1, 0, (1, 1))), 2);
        assert_eq!(choose_image_count(&caps(3, 3, (1, 1))), 3);
        assert_eq!(choose_image_count(&caps(2, 8, (1, 1))), 3);
    }

    #[test]
    fn rederiving_with_an_unchanged_surface_is_stable() {
        let c = caps(2, 0, (u32::MAX, u32::MAX));
        let formats = [fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let modes = [vk::PresentModeKHR::FIFO];

        let a = SwapchainPlan::derive(&c, &formats, &modes, size(1024, 768)).unwrap();
        let b = SwapchainPlan::derive(&c, &formats, &modes, size(1024, 768)).unwrap();

        assert_eq!(a.format, b.format);
        assert_eq!(a.color_space, b.color_space);
        assert_eq!(a.present_mode, b.present_mode);
        assert_eq!((a.extent.width, a.extent.height), (b.extent.width, b.extent.height));
        assert_eq!(a.image_count, b.image_count);
        assert!(!a.is_degenerate());
    }

    #[test]
    fn minimized_surface_yields_a_degenerate_plan() {
        let c = caps(2, 3, (0, 0));
        let plan = SwapchainPlan::derive(
            &c,
            &[fmt(PREFERRED_FORMAT, PREFERRED_COLOR_SPACE)],
            &[vk::PresentModeKHR::FIFO],
            size(800, 600),
        )
        .unwrap();
        assert!(plan.is_degenerate());
    }
}
