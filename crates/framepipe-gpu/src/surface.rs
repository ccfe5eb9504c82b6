//! Presentable surface and framebuffer size tracking.

use crate::error::{GpuError, Result};
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// A window surface and the loader used to query and destroy it.
pub struct SurfaceHandle {
    pub surface: vk::SurfaceKHR,
    pub loader: ash::khr::surface::Instance,
}

impl SurfaceHandle {
    /// Create a surface for `window`.
    ///
    /// # Safety
    /// The instance must have been created with the surface extensions
    /// reported for the window's display.
    pub unsafe fn from_window<W>(entry: &ash::Entry, instance: &ash::Instance, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = ash_window::create_surface(
            entry,
            instance,
            display.as_raw(),
            window_handle.as_raw(),
            None,
        )
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        Ok(Self {
            surface,
            loader: ash::khr::surface::Instance::new(entry, instance),
        })
    }

    /// Whether `family` can present to this surface.
    ///
    /// # Safety
    /// The physical device must belong to the surface's instance.
    pub unsafe fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> bool {
        self.loader
            .get_physical_device_surface_support(physical_device, family, self.surface)
            .unwrap_or(false)
    }

    /// Query current capabilities, formats and present modes.
    ///
    /// # Safety
    /// The physical device must belong to the surface's instance.
    pub unsafe fn support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        Ok(SurfaceSupport {
            capabilities: self
                .loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)?,
            formats: self
                .loader
                .get_physical_device_surface_formats(physical_device, self.surface)?,
            present_modes: self
                .loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)?,
        })
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// No swapchain may still reference the surface.
    pub unsafe fn destroy(&self) {
        self.loader.destroy_surface(self.surface, None);
    }
}

/// Surface query result.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Live framebuffer size shared between the window callback and the frame loop.
///
/// The windowing side calls [`set`](Self::set) from its resize handler; the
/// frame loop reads it when rebuilding the swapchain.
#[derive(Debug, Clone, Default)]
pub struct FramebufferExtent {
    inner: Arc<Mutex<vk::Extent2D>>,
}

impl FramebufferExtent {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(vk::Extent2D { width, height })),
        }
    }

    pub fn set(&self, width: u32, height: u32) {
        *self.inner.lock() = vk::Extent2D { width, height };
    }

    pub fn get(&self) -> vk::Extent2D {
        *self.inner.lock()
    }

    /// True while either dimension is zero (minimized window).
    pub fn is_zero(&self) -> bool {
        let extent = self.get();
        extent.width == 0 || extent.height == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framebuffer_extent_is_shared() {
        let extent = FramebufferExtent::new(800, 600);
        let handle = extent.clone();
        handle.set(0, 600);
        assert!(extent.is_zero());
        handle.set(1280, 720);
        assert!(!extent.is_zero());
        assert_eq!(
            extent.get(),
            vk::Extent2D {
                width: 1280,
                height: 720
            }
        );
    }
}
