//! Swapchain creation and the selection rules behind it.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::surface::SurfaceSupport;
use ash::vk;

/// The presentable image chain.
///
/// `images` and `image_views` always have the same length.
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Build a swapchain for the context surface sized to `framebuffer`.
    ///
    /// `old` is handed to the driver as the retiring swapchain; the caller
    /// still destroys it afterwards.
    pub fn create(
        ctx: &DeviceContext,
        loader: &ash::khr::swapchain::Device,
        desired_image_count: u32,
        vsync: bool,
        framebuffer: vk::Extent2D,
        old: vk::SwapchainKHR,
    ) -> Result<Self> {
        let surface = ctx
            .surface()
            .ok_or_else(|| GpuError::SwapchainCreation("context has no surface".to_string()))?;
        let support = ctx.surface_support()?;
        check_support(&support)?;

        let format = select_surface_format(&support.formats, |f| ctx.supports_2d_color_format(f))
            .ok_or_else(|| GpuError::SwapchainCreation("no usable surface format".to_string()))?;
        let present_mode = select_present_mode(&support.present_modes, vsync);
        let extent = calculate_extent(&support.capabilities, framebuffer.width, framebuffer.height);
        let image_count = select_image_count(&support.capabilities, desired_image_count);

        let selection = ctx.queue_selection();
        let (sharing_mode, families) =
            image_sharing(selection.graphics, selection.present.unwrap_or(selection.graphics));

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let handle = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = match unsafe { loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(handle, None) };
                return Err(e.into());
            }
        };

        let mut swapchain = Self {
            handle,
            images: Vec::new(),
            image_views: Vec::with_capacity(images.len()),
            format,
            extent,
            present_mode,
        };

        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(crate::barrier::color_subresource_range());

            match unsafe { ctx.device().create_image_view(&view_info, None) } {
                Ok(view) => swapchain.image_views.push(view),
                Err(e) => {
                    unsafe { swapchain.destroy(ctx.device(), loader) };
                    return Err(e.into());
                }
            }
        }
        swapchain.images = images;

        tracing::info!(
            width = extent.width,
            height = extent.height,
            images = swapchain.images.len(),
            format = ?format.format,
            ?present_mode,
            "Created swapchain"
        );

        Ok(swapchain)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Destroy image views, then the swapchain. Safe to call twice.
    ///
    /// # Safety
    /// No GPU work may still reference the images.
    pub unsafe fn destroy(&mut self, device: &ash::Device, loader: &ash::khr::swapchain::Device) {
        for view in self.image_views.drain(..) {
            device.destroy_image_view(view, None);
        }
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            loader.destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
    }
}

/// First format passing `supports_2d`, otherwise the first reported one.
///
/// `None` only when `available` is empty.
pub fn select_surface_format(
    available: &[vk::SurfaceFormatKHR],
    supports_2d: impl Fn(vk::Format) -> bool,
) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .copied()
        .find(|f| supports_2d(f.format))
        .or_else(|| available.first().copied())
}

/// Pick a present mode. Never fails: falls back to FIFO, which every
/// implementation supports.
///
/// With vsync the preference is mailbox, FIFO, then FIFO relaxed. Without
/// vsync only immediate is accepted.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    let preferred: &[vk::PresentModeKHR] = if vsync {
        &[
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::FIFO_RELAXED,
        ]
    } else {
        &[vk::PresentModeKHR::IMMEDIATE]
    };

    if let Some(&mode) = preferred.iter().find(|mode| available.contains(mode)) {
        return mode;
    }

    tracing::warn!(vsync, ?available, "No preferred present mode available, using FIFO");
    vk::PresentModeKHR::FIFO
}

/// Swapchain extent: the surface's current extent when fixed, otherwise the
/// framebuffer size clamped to the surface limits.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: desired_width.max(min.width).min(max.width),
        height: desired_height.max(min.height).min(max.height),
    }
}

/// `desired` clamped to the surface's image count range. A zero maximum means
/// unbounded.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, desired: u32) -> u32 {
    let count = desired.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Concurrent sharing across both families when they differ, otherwise
/// exclusive on one.
pub fn image_sharing(graphics: u32, present: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics == present {
        (vk::SharingMode::EXCLUSIVE, vec![graphics])
    } else {
        (vk::SharingMode::CONCURRENT, vec![graphics, present])
    }
}

/// Reject a surface that offers no formats or no present modes.
pub fn check_support(support: &SurfaceSupport) -> Result<()> {
    if support.formats.is_empty() {
        return Err(GpuError::SwapchainCreation(
            "surface reports no formats".to_string(),
        ));
    }
    if support.present_modes.is_empty() {
        return Err(GpuError::SwapchainCreation(
            "surface reports no present modes".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn caps(min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn fifo_only_device() {
        let modes = [vk::PresentModeKHR::FIFO];
        assert_eq!(select_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn present_mode_preferences() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO_RELAXED,
        ];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::IMMEDIATE);

        let relaxed_only = [vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(
            select_present_mode(&relaxed_only, true),
            vk::PresentModeKHR::FIFO_RELAXED
        );
        assert_eq!(
            select_present_mode(&relaxed_only, false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn picks_second_format_when_only_it_passes() {
        let formats = [
            format(vk::Format::B8G8R8A8_SRGB),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        let chosen = select_surface_format(&formats, |f| f == vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen, Some(formats[1]));
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::B8G8R8A8_SRGB),
            format(vk::Format::R8G8B8A8_SRGB),
        ];
        assert_eq!(select_surface_format(&formats, |_| false), Some(formats[0]));
        assert_eq!(select_surface_format(&[], |_| true), None);
    }

    #[test]
    fn extent_clamped_to_limits() {
        let caps = caps(2, 3);
        assert_eq!(
            calculate_extent(&caps, 8000, 0),
            vk::Extent2D {
                width: 4096,
                height: 1
            }
        );

        let mut fixed = caps;
        fixed.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(calculate_extent(&fixed, 1280, 720), fixed.current_extent);
    }

    #[test]
    fn image_count_clamped() {
        assert_eq!(select_image_count(&caps(2, 3), 5), 3);
        assert_eq!(select_image_count(&caps(2, 3), 1), 2);
        assert_eq!(select_image_count(&caps(2, 0), 8), 8);
    }

    #[test]
    fn sharing_mode_by_family() {
        assert_eq!(image_sharing(0, 0), (vk::SharingMode::EXCLUSIVE, vec![0]));
        assert_eq!(
            image_sharing(0, 2),
            (vk::SharingMode::CONCURRENT, vec![0, 2])
        );
    }

    fn support(formats: usize, present_modes: usize) -> SurfaceSupport {
        SurfaceSupport {
            capabilities: caps(2, 3),
            formats: vec![format(vk::Format::B8G8R8A8_SRGB); formats],
            present_modes: vec![vk::PresentModeKHR::FIFO; present_modes],
        }
    }

    #[test]
    fn support_without_formats_rejected() {
        let err = check_support(&support(0, 1)).unwrap_err();
        assert!(matches!(err, GpuError::SwapchainCreation(m) if m.contains("formats")));
    }

    #[test]
    fn support_without_present_modes_rejected() {
        let err = check_support(&support(2, 0)).unwrap_err();
        assert!(matches!(err, GpuError::SwapchainCreation(m) if m.contains("present modes")));
    }

    #[test]
    fn complete_support_accepted() {
        assert!(check_support(&support(1, 1)).is_ok());
    }
}
