// SPDX-License-Identifier: CEPL-1.0
//! Adapter selection and logical device creation.
//!
//! Querying the driver is kept apart from the decision: every adapter is
//! summarized into an [`AdapterReport`] and [`select_adapter`] runs the
//! configured [`SelectionPolicy`] over the reports.

use crate::error::VkError;
use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::{vk, Device, Instance};
use lantern_core::SelectionPolicy;
use std::ffi::{c_char, CStr};
use tracing::{debug, info};

pub(crate) const DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    pub fn is_split(&self) -> bool {
        self.graphics != self.present
    }
}

/// First graphics-capable family and first family that can present.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut can_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilyIndices> {
    let graphics = families
        .iter()
        .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;
    let present = (0..families.len() as u32).find(|&i| can_present(i))?;
    Some(QueueFamilyIndices {
        graphics: graphics as u32,
        present,
    })
}

/// What the selector needs to know about one adapter.
#[derive(Clone, Debug, Default)]
pub struct AdapterReport {
    pub name: String,
    pub discrete: bool,
    pub max_image_dimension_2d: u32,
    pub queues: Option<QueueFamilyIndices>,
    pub has_required_extensions: bool,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
    pub sampler_anisotropy: bool,
}

impl AdapterReport {
    pub fn is_suitable(&self) -> bool {
        self.queues.is_some()
            && self.has_required_extensions
            && self.surface_format_count > 0
            && self.present_mode_count > 0
            && self.sampler_anisotropy
    }
}

/// Discrete adapters get a flat bonus; larger textures add to the score.
/// Without sampler anisotropy the adapter scores zero.
pub fn score_adapter(report: &AdapterReport) -> u32 {
    if !report.sampler_anisotropy {
        return 0;
    }
    let discrete = if report.discrete { 1000 } else { 0 };
    discrete + report.max_image_dimension_2d
}

/// Index of the chosen report. Ties keep the earlier adapter.
pub fn select_adapter(reports: &[AdapterReport], policy: SelectionPolicy) -> Option<usize> {
    let mut candidates = reports
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_suitable());
    match policy {
        SelectionPolicy::FirstSuitable => candidates.next().map(|(i, _)| i),
        SelectionPolicy::HighestScore => {
            let mut best: Option<(usize, u32)> = None;
            for (i, r) in candidates {
                let score = score_adapter(r);
                if score == 0 {
                    continue;
                }
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((i, score));
                }
            }
            best.map(|(i, _)| i)
        }
    }
}

/// Highest sample count usable by both color and depth framebuffers.
pub fn max_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts =
        limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&c| counts.contains(c))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

unsafe fn report_adapter(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Result<AdapterReport> {
    let props = instance.get_physical_device_properties(phys);
    let features = instance.get_physical_device_features(phys);
    let families = instance.get_physical_device_queue_family_properties(phys);

    let queues = find_queue_families(&families, |i| {
        surf_i
            .get_physical_device_surface_support(phys, i, surface)
            .unwrap_or(false)
    });

    let exts = instance
        .enumerate_device_extension_properties(phys)
        .context("enumerate_device_extension_properties")?;
    let has_required_extensions = DEVICE_EXTENSIONS.iter().all(|&want| {
        exts.iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == want)
    });

    // Surface queries are only meaningful once the swapchain extension is known to exist.
    let (surface_format_count, present_mode_count) = if has_required_extensions {
        (
            count_or_zero(
                "get_physical_device_surface_formats",
                surf_i.get_physical_device_surface_formats(phys, surface),
            ),
            count_or_zero(
                "get_physical_device_surface_present_modes",
                surf_i.get_physical_device_surface_present_modes(phys, surface),
            ),
        )
    } else {
        (0, 0)
    };

    Ok(AdapterReport {
        name: props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        discrete: props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
        max_image_dimension_2d: props.limits.max_image_dimension2_d,
        queues,
        has_required_extensions,
        surface_format_count,
        present_mode_count,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
    })
}

/// A failed capability query counts as nothing supported.
fn count_or_zero<T>(query: &str, result: Result<Vec<T>, vk::Result>) -> usize {
    match result {
        Ok(items) => items.len(),
        Err(e) => {
            debug!("vk: {query} failed: {e:?}");
            0
        }
    }
}

pub(crate) unsafe fn pick_physical_device(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
    policy: SelectionPolicy,
) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let adapters = instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?;

    let mut reports = Vec::with_capacity(adapters.len());
    for &phys in &adapters {
        let report = report_adapter(instance, surf_i, surface, phys)?;
        debug!(
            "vk: adapter {:?} suitable={} score={}",
            report.name,
            report.is_suitable(),
            score_adapter(&report)
        );
        reports.push(report);
    }

    let idx = select_adapter(&reports, policy).ok_or(VkError::NoSuitableDevice)?;
    let chosen = &reports[idx];
    let queues = chosen.queues.ok_or(VkError::NoSuitableDevice)?;
    info!(
        "vk: using {:?} ({:?}, graphics family {}, present family {})",
        chosen.name, policy, queues.graphics, queues.present
    );
    Ok((adapters[idx], queues))
}

/// One queue per unique family; sampler anisotropy enabled.
pub(crate) unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilyIndices,
) -> Result<(Device, vk::Queue, vk::Queue)> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: vk::TRUE,
        ..Default::default()
    };
    let extensions: Vec<*const c_char> = DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();

    let create_info = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    let device = instance
        .create_device(phys, &create_info, None)
        .context("create_device")?;
    let graphics = device.get_device_queue(families.graphics, 0);
    let present = device.get_device_queue(families.present, 0);
    Ok((device, graphics, present))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, discrete: bool, max_dim: u32) -> AdapterReport {
        AdapterReport {
            name: name.to_owned(),
            discrete,
            max_image_dimension_2d: max_dim,
            queues: Some(QueueFamilyIndices {
                graphics: 0,
                present: 0,
            }),
            has_required_extensions: true,
            surface_format_count: 2,
            present_mode_count: 1,
            sampler_anisotropy: true,
        }
    }

    #[test]
    fn discrete_adapter_outscores_integrated() {
        let integrated = adapter("igpu", false, 16384);
        let discrete = adapter("dgpu", true, 16384);
        assert_eq!(score_adapter(&integrated), 16384);
        assert_eq!(score_adapter(&discrete), 17384);
        let reports = [integrated, discrete];
        assert_eq!(select_adapter(&reports, SelectionPolicy::HighestScore), Some(1));
        assert_eq!(select_adapter(&reports, SelectionPolicy::FirstSuitable), Some(0));
    }

    #[test]
    fn failed_surface_query_reports_no_support() {
        assert_eq!(count_or_zero("formats", Ok(vec![1, 2, 3])), 3);
        let lost = count_or_zero::<vk::PresentModeKHR>(
            "present modes",
            Err(vk::Result::ERROR_SURFACE_LOST_KHR),
        );
        assert_eq!(lost, 0);

        let mut broken = adapter("dgpu", true, 32768);
        broken.present_mode_count = lost;
        assert!(!broken.is_suitable());
        let reports = [broken, adapter("igpu", false, 8192)];
        assert_eq!(select_adapter(&reports, SelectionPolicy::HighestScore), Some(1));
    }

    #[test]
    fn missing_anisotropy_disqualifies() {
        let mut dgpu = adapter("dgpu", true, 32768);
        dgpu.sampler_anisotropy = false;
        assert_eq!(score_adapter(&dgpu), 0);
        let reports = [dgpu, adapter("igpu", false, 8192)];
        assert_eq!(select_adapter(&reports, SelectionPolicy::HighestScore), Some(1));
        assert_eq!(select_adapter(&reports, SelectionPolicy::FirstSuitable), Some(1));
    }

    #[test]
    fn adapters_missing_a_capability_are_rejected() {
        let mut no_queue = adapter("a", true, 16384);
        no_queue.queues = None;
        let mut no_ext = adapter("b", true, 16384);
        no_ext.has_required_extensions = false;
        let mut no_modes = adapter("c", true, 16384);
        no_modes.present_mode_count = 0;
        let mut no_formats = adapter("d", true, 16384);
        no_formats.surface_format_count = 0;

        let reports = [no_queue, no_ext, no_modes, no_formats];
        for policy in [SelectionPolicy::HighestScore, SelectionPolicy::FirstSuitable] {
            assert_eq!(select_adapter(&reports, policy), None);
        }
        assert_eq!(select_adapter(&[], SelectionPolicy::HighestScore), None);
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let reports = [adapter("first", true, 8192), adapter("second", true, 8192)];
        assert_eq!(select_adapter(&reports, SelectionPolicy::HighestScore), Some(0));
    }

    #[test]
    fn queue_families_may_differ() {
        let families = [
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            },
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                queue_count: 4,
                ..Default::default()
            },
        ];
        let q = find_queue_families(&families, |i| i == 0).unwrap();
        assert_eq!(q, QueueFamilyIndices { graphics: 1, present: 0 });
        assert!(q.is_split());
        assert_eq!(q.unique(), vec![1, 0]);

        let q = find_queue_families(&families, |i| i == 1).unwrap();
        assert!(!q.is_split());
        assert_eq!(q.unique(), vec![1]);

        assert_eq!(find_queue_families(&families, |_| false), None);
    }

    #[test]
    fn sample_count_respects_both_limits() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_sample_count(&limits), vk::SampleCountFlags::TYPE_4);
        assert_eq!(
            max_sample_count(&vk::PhysicalDeviceLimits::default()),
            vk::SampleCountFlags::TYPE_1
        );
    }
}
