//! Device context: instance, logical device, queues and allocator.

use crate::capabilities::GpuCapabilities;
use crate::command::{execute_single_time_commands, CommandPool};
use crate::config::ContextConfig;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use crate::queue::{select_queue_families, QueueFamilySelection, QueueInfo, QueueRole};
use crate::surface::{SurfaceHandle, SurfaceSupport};
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;

/// Long-lived Vulkan state shared by every other component.
///
/// Created once at startup and dropped last. Dropping waits for the device
/// to go idle, then tears down pools, allocator, device, surface and instance
/// in that order.
pub struct DeviceContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    surface: Option<SurfaceHandle>,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    allocator: Mutex<GpuAllocator>,
    selection: QueueFamilySelection,
    queues: Vec<QueueInfo>,
    graphics_slot: usize,
    present_slot: usize,
    transfer_slot: usize,
}

impl DeviceContext {
    /// Create a context that can present to `window`.
    pub fn new<W>(config: &ContextConfig, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let entry = unsafe { ash::Entry::load()? };

        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let surface_extensions = ash_window::enumerate_required_extensions(display.as_raw())
            .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let instance = unsafe { create_instance(&entry, config, surface_extensions)? };
        let surface = match unsafe { SurfaceHandle::from_window(&entry, &instance, window) } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        Self::finish(entry, instance, Some(surface), config)
    }

    /// Create a context without a surface, for off-screen work and tests.
    pub fn headless(config: &ContextConfig) -> Result<Self> {
        let entry = unsafe { ash::Entry::load()? };
        let no_extensions: [*const c_char; 0] = [];
        let instance = unsafe { create_instance(&entry, config, &no_extensions)? };
        Self::finish(entry, instance, None, config)
    }

    fn finish(
        entry: ash::Entry,
        instance: ash::Instance,
        surface: Option<SurfaceHandle>,
        config: &ContextConfig,
    ) -> Result<Self> {
        let selected = unsafe {
            select_physical_device(&instance, |physical_device| {
                let families =
                    instance.get_physical_device_queue_family_properties(physical_device);
                select_queue_families(
                    &families,
                    |family| {
                        surface
                            .as_ref()
                            .is_some_and(|s| s.supports_present(physical_device, family))
                    },
                    surface.is_some(),
                )
                .ok()
            })
        };

        let selected = match selected {
            Ok(selected) => selected,
            Err(e) => {
                unsafe { destroy_surface_and_instance(surface.as_ref(), &instance) };
                return Err(e);
            }
        };

        tracing::info!("Selected GPU: {}", selected.capabilities.summary());

        let device = match unsafe {
            create_device(
                &instance,
                selected.physical_device,
                &selected.queues,
                surface.is_some(),
                config,
            )
        } {
            Ok(device) => Arc::new(device),
            Err(e) => {
                unsafe { destroy_surface_and_instance(surface.as_ref(), &instance) };
                return Err(e);
            }
        };

        let family_properties = unsafe {
            instance.get_physical_device_queue_family_properties(selected.physical_device)
        };

        let mut queues: Vec<QueueInfo> = Vec::new();
        for family in selected.queues.unique_families() {
            let command_pool = match unsafe { CommandPool::new(&device, family) } {
                Ok(pool) => pool,
                Err(e) => {
                    unsafe {
                        for queue in &queues {
                            queue.command_pool.destroy(&device);
                        }
                        device.destroy_device(None);
                        destroy_surface_and_instance(surface.as_ref(), &instance);
                    }
                    return Err(e);
                }
            };
            queues.push(QueueInfo {
                family_index: family,
                capabilities: family_properties[family as usize].queue_flags,
                present_supported: selected.queues.present == Some(family),
                queue: unsafe { device.get_device_queue(family, 0) },
                command_pool,
            });
        }

        let slot = |family: u32| {
            queues
                .iter()
                .position(|q| q.family_index == family)
                .unwrap_or_default()
        };
        let graphics_slot = slot(selected.queues.family(QueueRole::Graphics));
        let present_slot = slot(selected.queues.family(QueueRole::Present));
        let transfer_slot = slot(selected.queues.family(QueueRole::Transfer));

        let allocator = match unsafe {
            GpuAllocator::new(&instance, device.clone(), selected.physical_device)
        } {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    for queue in &queues {
                        queue.command_pool.destroy(&device);
                    }
                    device.destroy_device(None);
                    destroy_surface_and_instance(surface.as_ref(), &instance);
                }
                return Err(e);
            }
        };

        tracing::info!(
            graphics = selected.queues.graphics,
            present = ?selected.queues.present,
            transfer = selected.queues.transfer,
            "Device context ready"
        );

        Ok(Self {
            entry,
            instance,
            surface,
            physical_device: selected.physical_device,
            device,
            capabilities: selected.capabilities,
            allocator: Mutex::new(allocator),
            selection: selected.queues,
            queues,
            graphics_slot,
            present_slot,
            transfer_slot,
        })
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared handle to the logical device.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        self.device.clone()
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Queue families chosen at creation.
    pub fn queue_selection(&self) -> &QueueFamilySelection {
        &self.selection
    }

    /// One entry per unique queue family in use.
    pub fn queues(&self) -> &[QueueInfo] {
        &self.queues
    }

    /// Queue serving `role`.
    pub fn queue(&self, role: QueueRole) -> &QueueInfo {
        let slot = match role {
            QueueRole::Graphics => self.graphics_slot,
            QueueRole::Present => self.present_slot,
            QueueRole::Transfer => self.transfer_slot,
        };
        &self.queues[slot]
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.queue(QueueRole::Graphics).queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.queue(QueueRole::Present).queue
    }

    pub fn transfer_queue(&self) -> vk::Queue {
        self.queue(QueueRole::Transfer).queue
    }

    /// Command pool feeding the queue for `role`.
    pub fn command_pool(&self, role: QueueRole) -> &CommandPool {
        &self.queue(role).command_pool
    }

    /// The presentation surface, `None` for headless contexts.
    pub fn surface(&self) -> Option<&SurfaceHandle> {
        self.surface.as_ref()
    }

    /// Query the surface's current capabilities, formats and present modes.
    pub fn surface_support(&self) -> Result<SurfaceSupport> {
        let surface = self
            .surface
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("context has no surface".to_string()))?;
        unsafe { surface.support(self.physical_device) }
    }

    /// Whether `format` can back an optimal-tiling 2D color/storage image.
    pub fn supports_2d_color_format(&self, format: vk::Format) -> bool {
        let properties = unsafe {
            self.instance.get_physical_device_image_format_properties(
                self.physical_device,
                format,
                vk::ImageType::TYPE_2D,
                vk::ImageTiling::OPTIMAL,
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::TRANSFER_SRC,
                vk::ImageCreateFlags::empty(),
            )
        };
        properties.is_ok_and(|p| {
            p.max_array_layers != 0 && p.max_extent.width > 0 && p.max_extent.height > 0
        })
    }

    /// Record `record` into a one-shot command buffer on the graphics queue and
    /// block until the queue is idle. Load-time use only.
    pub fn immediate_submit<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let graphics = self.queue(QueueRole::Graphics);
        unsafe {
            execute_single_time_commands(&self.device, &graphics.command_pool, graphics.queue, record)
        }
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            for queue in &self.queues {
                queue.command_pool.destroy(&self.device);
            }

            // Frees every VkDeviceMemory block; must precede device destruction.
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            if let Some(surface) = &self.surface {
                surface.destroy();
            }
            self.instance.destroy_instance(None);
        }
        tracing::debug!("Device context destroyed");
    }
}

unsafe fn destroy_surface_and_instance(surface: Option<&SurfaceHandle>, instance: &ash::Instance) {
    if let Some(surface) = surface {
        surface.destroy();
    }
    instance.destroy_instance(None);
}

/// Create the logical device with one queue per unique family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    selection: &QueueFamilySelection,
    with_swapchain: bool,
    config: &ContextConfig,
) -> Result<ash::Device> {
    let queue_priority = [1.0_f32];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = selection
        .unique_families()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&queue_priority)
        })
        .collect();

    let mut extension_names: Vec<*const c_char> = Vec::new();
    if with_swapchain {
        extension_names.push(ash::khr::swapchain::NAME.as_ptr());
    }
    extension_names.extend(config.device_extensions().iter().map(|e| e.as_ptr()));

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_1_3_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance.create_device(physical_device, &device_create_info, None)?;
    Ok(device)
}
