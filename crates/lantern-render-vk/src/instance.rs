// SPDX-License-Identifier: CEPL-1.0
use crate::error::VkError;
use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, c_void, CStr};
use tracing::{debug, error, info, trace, warn};

pub(crate) const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"Lantern";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{types:?} {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{types:?} {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{types:?} {msg}");
    } else {
        trace!(target: "vulkan", "{types:?} {msg}");
    }
    vk::FALSE
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

pub(crate) struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub(crate) unsafe fn new(entry: &Entry, instance: &Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let messenger = loader
            .create_debug_utils_messenger(&debug_messenger_info(), None)
            .context("create_debug_utils_messenger")?;
        Ok(Self { loader, messenger })
    }

    pub(crate) unsafe fn destroy(&self) {
        self.loader
            .destroy_debug_utils_messenger(self.messenger, None);
    }
}

unsafe fn has_layer(entry: &Entry, name: &CStr) -> Result<bool> {
    let layers = entry
        .enumerate_instance_layer_properties()
        .context("enumerate_instance_layer_properties")?;
    Ok(layers
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == name))
}

/// Creates the instance with the window-system extensions for `display`.
///
/// With `validation`, the Khronos layer must be installed; the debug messenger
/// info is chained into creation so instance create/destroy is covered too.
pub(crate) unsafe fn create_instance(
    entry: &Entry,
    display: RawDisplayHandle,
    validation: bool,
) -> Result<Instance> {
    if validation && !has_layer(entry, VALIDATION_LAYER)? {
        return Err(VkError::MissingValidationLayer(
            VALIDATION_LAYER.to_string_lossy().into_owned(),
        )
        .into());
    }

    let required = ash_window::enumerate_required_extensions(display)
        .context("enumerate_required_extensions")?;
    let available = entry
        .enumerate_instance_extension_properties(None)
        .context("enumerate_instance_extension_properties")?;
    for &ext in required {
        let name = CStr::from_ptr(ext);
        let found = available
            .iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == name);
        if !found {
            warn!("vk: loader does not advertise required extension {name:?}");
        }
    }

    let mut extensions: Vec<*const c_char> = required.to_vec();
    let layers: Vec<*const c_char> = if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let debug_info = debug_messenger_info();
    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_next: if validation {
            (&debug_info as *const vk::DebugUtilsMessengerCreateInfoEXT).cast()
        } else {
            std::ptr::null()
        },
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    let instance = entry
        .create_instance(&create_info, None)
        .context("create_instance")?;
    info!(
        "vk: instance created ({} extensions, validation={})",
        extensions.len(),
        validation
    );
    Ok(instance)
}

/// Instance-level objects. Owned by the device context and dropped after it.
pub(crate) struct InstanceCtx {
    entry: Entry,
    pub instance: Instance,
    debug: Option<DebugMessenger>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl InstanceCtx {
    /// STRICT ORDER: instance, debug messenger, surface. A failed step
    /// releases the ones before it.
    pub(crate) unsafe fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        validation: bool,
    ) -> Result<Self> {
        let entry = Entry::load().context("failed to load the Vulkan loader")?;
        let instance = create_instance(&entry, display, validation)?;
        let surface_loader = surface::Instance::new(&entry, &instance);
        let mut ctx = Self {
            entry,
            instance,
            debug: None,
            surface_loader,
            surface: vk::SurfaceKHR::null(),
        };
        if validation {
            ctx.debug = Some(DebugMessenger::new(&ctx.entry, &ctx.instance)?);
        }
        ctx.surface = ash_window::create_surface(&ctx.entry, &ctx.instance, display, window, None)
            .context("ash_window::create_surface")?;
        Ok(ctx)
    }
}

impl Drop for InstanceCtx {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}
