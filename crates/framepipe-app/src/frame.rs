//! Per-frame data handed to [`RenderApp::record`](crate::RenderApp::record).

use ash::vk;
use framepipe_gpu::FrameContext;

/// The frame being recorded.
#[derive(Debug, Clone, Copy)]
pub struct RenderFrame {
    pub command_buffer: vk::CommandBuffer,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    pub swapchain_image: vk::Image,
    pub swapchain_view: vk::ImageView,
    pub extent: vk::Extent2D,
    /// Frame slot in the ring.
    pub slot_index: usize,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    pub frame_number: u64,
}

impl RenderFrame {
    pub(crate) fn new(
        frame: &FrameContext,
        command_buffer: vk::CommandBuffer,
        image: (vk::Image, vk::ImageView),
        dt: f32,
    ) -> Self {
        Self {
            command_buffer,
            image_index: frame.image_index,
            swapchain_image: image.0,
            swapchain_view: image.1,
            extent: frame.extent,
            slot_index: frame.slot_index,
            dt,
            frame_number: frame.frame_number,
        }
    }
}
