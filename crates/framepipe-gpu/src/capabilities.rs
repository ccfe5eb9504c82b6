//! Physical device capability detection.

use ash::vk;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// What the frame pipeline needs to know about a physical device.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub driver_version: u32,
    /// Dynamic rendering (core in 1.3).
    pub supports_dynamic_rendering: bool,
    /// Synchronization2 (core in 1.3).
    pub supports_synchronization2: bool,
    /// Sum of device-local heaps, in MB.
    pub device_local_memory_mb: u64,
    /// Required alignment for uniform buffer offsets.
    pub min_uniform_buffer_offset_alignment: u64,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features13);
        instance.get_physical_device_features2(physical_device, &mut features2);
        let dynamic_rendering = features13.dynamic_rendering == vk::TRUE;
        let synchronization2 = features13.synchronization2 == vk::TRUE;

        let device_local_memory_mb = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name: CStr::from_ptr(properties.device_name.as_ptr())
                .to_string_lossy()
                .into_owned(),
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            supports_dynamic_rendering: dynamic_rendering,
            supports_synchronization2: synchronization2,
            device_local_memory_mb,
            min_uniform_buffer_offset_alignment: properties
                .limits
                .min_uniform_buffer_offset_alignment,
        }
    }

    /// Vulkan 1.3 with dynamic rendering and synchronization2.
    pub fn meets_requirements(&self) -> bool {
        is_vulkan_1_3(self.api_version)
            && self.supports_dynamic_rendering
            && self.supports_synchronization2
    }

    /// Selection score; higher is better. `None` for unusable devices.
    pub fn score(&self) -> Option<u32> {
        if !self.meets_requirements() {
            return None;
        }
        let type_score = match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
            _ => 10,
        };
        // +1 per GB of VRAM breaks ties within a type.
        let vram_score = u32::try_from(self.device_local_memory_mb / 1024).unwrap_or(u32::MAX);
        Some(type_score + vram_score.min(99))
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

/// Whether `version` is at least Vulkan 1.3.
pub fn is_vulkan_1_3(version: u32) -> bool {
    let major = vk::api_version_major(version);
    let minor = vk::api_version_minor(version);
    major > 1 || (major == 1 && minor >= 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(device_type: vk::PhysicalDeviceType, api_version: u32) -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Other(0),
            device_name: "test".to_string(),
            device_type,
            api_version,
            driver_version: 0,
            supports_dynamic_rendering: true,
            supports_synchronization2: true,
            device_local_memory_mb: 4096,
            min_uniform_buffer_offset_alignment: 256,
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn discrete_beats_integrated() {
        let discrete = caps(vk::PhysicalDeviceType::DISCRETE_GPU, vk::API_VERSION_1_3);
        let integrated = caps(vk::PhysicalDeviceType::INTEGRATED_GPU, vk::API_VERSION_1_3);
        assert!(discrete.score() > integrated.score());
    }

    #[test]
    fn pre_1_3_devices_are_unusable() {
        let old = caps(vk::PhysicalDeviceType::DISCRETE_GPU, vk::API_VERSION_1_2);
        assert!(!old.meets_requirements());
        assert_eq!(old.score(), None);

        let mut no_sync2 = caps(vk::PhysicalDeviceType::DISCRETE_GPU, vk::API_VERSION_1_3);
        no_sync2.supports_synchronization2 = false;
        assert_eq!(no_sync2.score(), None);
    }

    #[test]
    fn version_check() {
        assert!(is_vulkan_1_3(vk::make_api_version(0, 1, 3, 0)));
        assert!(is_vulkan_1_3(vk::make_api_version(0, 1, 4, 0)));
        assert!(is_vulkan_1_3(vk::make_api_version(0, 2, 0, 0)));
        assert!(!is_vulkan_1_3(vk::make_api_version(0, 1, 2, 199)));
    }
}
