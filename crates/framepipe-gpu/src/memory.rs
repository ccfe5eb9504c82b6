//! Raw device memory allocation through `gpu-allocator`.
//!
//! [`RawBuffer`] and [`GpuImage`] are plain handle + allocation pairs. The
//! staging protocol lives one level up in [`crate::buffer`].

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::{AllocationSizes, AllocatorDebugSettings, MemoryLocation};
use std::sync::Arc;

/// Owner of the `gpu-allocator` instance.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: AllocationSizes::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("allocator already shut down".to_string()))
    }

    fn allocate(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        self.inner()?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| GpuError::AllocationFailed(format!("{name}: {e}")))
    }

    fn release(&mut self, allocation: Option<Allocation>) -> Result<()> {
        if let Some(allocation) = allocation {
            self.inner()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Create a buffer and bind freshly allocated memory to it.
    ///
    /// Host-visible locations come back persistently mapped.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<RawBuffer> {
        if size == 0 {
            return Err(GpuError::InvalidState(format!(
                "buffer '{name}' has zero size"
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) =
            unsafe { self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.release(Some(allocation))?;
            return Err(e.into());
        }

        tracing::debug!(name, size, ?location, "Created buffer");

        Ok(RawBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Destroy a buffer and free its memory. Safe to call twice.
    pub fn free_buffer(&mut self, buffer: &mut RawBuffer) -> Result<()> {
        self.release(buffer.allocation.take())?;
        if buffer.buffer != vk::Buffer::null() {
            unsafe { self.device.destroy_buffer(buffer.buffer, None) };
            buffer.buffer = vk::Buffer::null();
        }
        Ok(())
    }

    /// Create an image and bind freshly allocated memory to it.
    pub fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuImage> {
        let image = unsafe { self.device.create_image(create_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let linear = create_info.tiling == vk::ImageTiling::LINEAR;
        let allocation = match self.allocate(name, requirements, location, linear) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(e) =
            unsafe { self.device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
        {
            unsafe { self.device.destroy_image(image, None) };
            self.release(Some(allocation))?;
            return Err(e.into());
        }

        tracing::debug!(name, extent = ?create_info.extent, format = ?create_info.format, "Created image");

        Ok(GpuImage {
            image,
            allocation: Some(allocation),
            format: create_info.format,
            extent: create_info.extent,
        })
    }

    /// Destroy an image and free its memory. Safe to call twice.
    pub fn free_image(&mut self, image: &mut GpuImage) -> Result<()> {
        self.release(image.allocation.take())?;
        if image.image != vk::Image::null() {
            unsafe { self.device.destroy_image(image.image, None) };
            image.image = vk::Image::null();
        }
        Ok(())
    }

    /// Drop the inner allocator, freeing every memory block.
    ///
    /// Must run before the logical device is destroyed. Allocations still
    /// alive at this point are reported as leaks.
    pub fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A buffer handle and its allocation.
pub struct RawBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

impl RawBuffer {
    /// Whether the memory is persistently mapped.
    pub fn is_mapped(&self) -> bool {
        self.allocation
            .as_ref()
            .is_some_and(|a| a.mapped_ptr().is_some())
    }

    /// Mapped bytes, or `None` for device-only memory.
    pub fn mapped_bytes(&self) -> Option<&[u8]> {
        let bytes = self.allocation.as_ref()?.mapped_slice()?;
        Some(&bytes[..self.size as usize])
    }

    /// Mutable mapped bytes, or `None` for device-only memory.
    pub fn mapped_bytes_mut(&mut self) -> Option<&mut [u8]> {
        let size = self.size as usize;
        let bytes = self.allocation.as_mut()?.mapped_slice_mut()?;
        Some(&mut bytes[..size])
    }
}

/// An image handle and its allocation.
pub struct GpuImage {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
}
