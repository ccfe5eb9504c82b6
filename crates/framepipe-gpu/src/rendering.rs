//! Dynamic rendering helpers for a single swapchain color target.

use crate::barrier::{image_barrier, ImageTransition};
use ash::vk;

/// Transition `image` to a color attachment and begin a rendering scope that
/// clears it to `clear`.
///
/// # Safety
/// `cmd` must be recording. `image` and `view` must be a matching pair whose
/// previous contents may be discarded.
pub unsafe fn begin_rendering(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    view: vk::ImageView,
    extent: vk::Extent2D,
    clear: [f32; 4],
) {
    image_barrier(device, cmd, image, ImageTransition::UndefinedToColorAttachment);

    let color_attachments = [vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            color: vk::ClearColorValue { float32: clear },
        })];

    let rendering_info = vk::RenderingInfo::default()
        .render_area(full_rect(extent))
        .layer_count(1)
        .color_attachments(&color_attachments);

    device.cmd_begin_rendering(cmd, &rendering_info);
}

/// End the rendering scope and transition `image` for presentation.
///
/// # Safety
/// `cmd` must be inside a scope opened by [`begin_rendering`] for `image`.
pub unsafe fn end_rendering(device: &ash::Device, cmd: vk::CommandBuffer, image: vk::Image) {
    device.cmd_end_rendering(cmd);
    image_barrier(device, cmd, image, ImageTransition::ColorAttachmentToPresent);
}

/// Set a full-extent viewport with depth range 0..1.
///
/// # Safety
/// `cmd` must be recording.
pub unsafe fn set_viewport(device: &ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
    device.cmd_set_viewport(cmd, 0, &[full_viewport(extent)]);
}

/// Set a full-extent scissor.
///
/// # Safety
/// `cmd` must be recording.
pub unsafe fn set_scissor(device: &ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
    device.cmd_set_scissor(cmd, 0, &[full_rect(extent)]);
}

pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}
