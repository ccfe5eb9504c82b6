//! Vulkan instance creation and physical device selection.

use crate::capabilities::GpuCapabilities;
use crate::config::ContextConfig;
use crate::error::{GpuError, Result};
use crate::queue::QueueFamilySelection;
use ash::vk;
use std::ffi::{c_char, CStr};

/// Create a Vulkan instance for `config`.
///
/// `surface_extensions` are the platform extensions reported by
/// `ash_window::enumerate_required_extensions`, empty for headless use.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    config: &ContextConfig,
    surface_extensions: &[*const c_char],
) -> Result<ash::Instance> {
    let app_info = vk::ApplicationInfo::default()
        .application_name(config.app_name())
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(config.engine_name())
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(config.api_version());

    let mut extension_names: Vec<*const c_char> = surface_extensions.to_vec();
    extension_names.extend(config.instance_extensions().iter().map(|e| e.as_ptr()));

    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

    let available_layers = entry.enumerate_instance_layer_properties()?;
    let layer_names: Vec<*const c_char> = config
        .layers()
        .iter()
        .filter(|layer| {
            let found = available_layers
                .iter()
                .any(|props| CStr::from_ptr(props.layer_name.as_ptr()) == layer.as_c_str());
            if !found {
                tracing::warn!("Layer {} not available, skipping", layer.to_string_lossy());
            }
            found
        })
        .map(|layer| layer.as_ptr())
        .collect();

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;
    tracing::debug!(
        extensions = extension_names.len(),
        layers = layer_names.len(),
        "Created Vulkan instance"
    );

    Ok(instance)
}

/// A physical device that passed selection.
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub capabilities: GpuCapabilities,
    pub queues: QueueFamilySelection,
}

/// Pick the highest scoring device with a usable queue set.
///
/// `select_queues` returns `None` for devices that cannot provide the
/// required queue families.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device<F>(
    instance: &ash::Instance,
    mut select_queues: F,
) -> Result<SelectedDevice>
where
    F: FnMut(vk::PhysicalDevice) -> Option<QueueFamilySelection>,
{
    let devices = instance.enumerate_physical_devices()?;

    let mut best: Option<(u32, SelectedDevice)> = None;
    for physical_device in devices {
        let capabilities = GpuCapabilities::query(instance, physical_device);
        let Some(score) = capabilities.score() else {
            tracing::debug!("Skipping {}: requirements not met", capabilities.device_name);
            continue;
        };
        let Some(queues) = select_queues(physical_device) else {
            tracing::debug!("Skipping {}: no usable queue families", capabilities.device_name);
            continue;
        };

        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((
                score,
                SelectedDevice {
                    physical_device,
                    capabilities,
                    queues,
                },
            ));
        }
    }

    best.map(|(_, selected)| selected)
        .ok_or(GpuError::NoSuitableDevice)
}
