//! Application context.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use framepipe_gpu::{DeviceContext, FrameLoop, FramebufferExtent, SwapchainPresenter};
use winit::window::Window;

/// Window, device context and frame loop shared across all app methods.
pub struct AppContext {
    /// Device context. Outlives every resource the app creates.
    pub gpu: Arc<DeviceContext>,
    /// Frame ring and swapchain.
    pub frames: FrameLoop<SwapchainPresenter>,
    pub(crate) framebuffer: FramebufferExtent,
    /// Total frames presented.
    pub frame_count: u64,
    pub(crate) last_frame_time: Instant,
    pub(crate) last_extent: vk::Extent2D,
    /// Dropped last so the surface never outlives it.
    pub window: Arc<Window>,
}

impl AppContext {
    pub(crate) fn new(
        window: Arc<Window>,
        gpu: Arc<DeviceContext>,
        framebuffer: FramebufferExtent,
        frames: FrameLoop<SwapchainPresenter>,
    ) -> Self {
        let last_extent = frames.swapchain().extent;
        Self {
            gpu,
            frames,
            framebuffer,
            frame_count: 0,
            last_frame_time: Instant::now(),
            last_extent,
            window,
        }
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.frames.swapchain().extent
    }

    pub fn width(&self) -> u32 {
        self.extent().width
    }

    pub fn height(&self) -> u32 {
        self.extent().height
    }

    /// Width over height, or 1.0 while the swapchain is zero-sized.
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        if extent.height == 0 {
            return 1.0;
        }
        extent.width as f32 / extent.height as f32
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.frames_in_flight()
    }

    /// Record a new framebuffer size and schedule a swapchain rebuild.
    pub(crate) fn resized(&mut self, width: u32, height: u32) {
        self.framebuffer.set(width, height);
        self.frames.request_recreate();
    }

    /// Tear down the frame loop, then release the device context.
    ///
    /// App resources must already be destroyed.
    pub(crate) fn destroy(self) -> anyhow::Result<()> {
        let Self {
            gpu,
            frames,
            window,
            ..
        } = self;
        frames.destroy()?;
        drop(gpu);
        drop(window);
        Ok(())
    }
}
