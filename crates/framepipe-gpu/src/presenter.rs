//! Vulkan implementation of [`PresentBackend`] over a window swapchain.

use crate::buffer::{BufferDesc, GpuBuffer};
use crate::command::{begin_command_buffer, end_command_buffer, submit_frame, SubmitBatch};
use crate::config::FrameLoopConfig;
use crate::context::DeviceContext;
use crate::error::Result;
use crate::frame::{FrameRing, FrameSlot};
use crate::frame_loop::{FrameLoop, PresentBackend};
use crate::queue::QueueRole;
use crate::surface::FramebufferExtent;
use crate::swapchain::Swapchain;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

/// Presents to the context surface through a [`Swapchain`].
pub struct SwapchainPresenter {
    ctx: Arc<DeviceContext>,
    loader: ash::khr::swapchain::Device,
    swapchain: Swapchain,
    framebuffer: FramebufferExtent,
    config: FrameLoopConfig,
}

impl SwapchainPresenter {
    /// Create the loader and the initial swapchain.
    pub fn new(
        ctx: Arc<DeviceContext>,
        framebuffer: FramebufferExtent,
        config: FrameLoopConfig,
    ) -> Result<Self> {
        let loader = ash::khr::swapchain::Device::new(ctx.instance(), ctx.device());
        let swapchain = Swapchain::create(
            &ctx,
            &loader,
            config.desired_image_count(),
            config.vsync(),
            framebuffer.get(),
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            ctx,
            loader,
            swapchain,
            framebuffer,
            config,
        })
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.ctx
    }

    /// Swapchain image and view for `image_index`.
    pub fn image(&self, image_index: u32) -> Option<(vk::Image, vk::ImageView)> {
        let i = image_index as usize;
        Some((*self.swapchain.images.get(i)?, *self.swapchain.image_views.get(i)?))
    }
}

impl PresentBackend for SwapchainPresenter {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<()> {
        unsafe { self.ctx.device().wait_for_fences(&[fence], true, u64::MAX)? };
        Ok(())
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<()> {
        unsafe { self.ctx.device().reset_fences(&[fence])? };
        Ok(())
    }

    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> VkResult<(u32, bool)> {
        unsafe {
            self.loader.acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        }
    }

    fn begin_commands(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe {
            begin_command_buffer(
                self.ctx.device(),
                cmd,
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            )
        }
    }

    fn end_commands(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe { end_command_buffer(self.ctx.device(), cmd) }
    }

    fn submit(&mut self, batch: &SubmitBatch) -> Result<()> {
        unsafe { submit_frame(self.ctx.device(), self.ctx.graphics_queue(), batch) }
    }

    fn present(&mut self, wait: vk::Semaphore, image_index: u32) -> VkResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(self.ctx.present_queue(), &present_info) }
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        self.framebuffer.get()
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.ctx.wait_idle()
    }

    fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> Result<()> {
        let replacement = Swapchain::create(
            &self.ctx,
            &self.loader,
            self.config.desired_image_count(),
            self.config.vsync(),
            extent,
            self.swapchain.handle,
        )?;
        let mut old = std::mem::replace(&mut self.swapchain, replacement);
        unsafe { old.destroy(self.ctx.device(), &self.loader) };
        Ok(())
    }
}

impl FrameLoop<SwapchainPresenter> {
    /// Create the swapchain and `frames_in_flight` slots for the context surface.
    pub fn create(
        ctx: Arc<DeviceContext>,
        framebuffer: FramebufferExtent,
        config: FrameLoopConfig,
    ) -> Result<Self> {
        let presenter = SwapchainPresenter::new(ctx.clone(), framebuffer, config)?;

        let pool = ctx.command_pool(QueueRole::Graphics);
        let mut slots = Vec::with_capacity(config.frames_in_flight());
        for _ in 0..config.frames_in_flight() {
            match unsafe { FrameSlot::new(ctx.device(), pool) } {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    let mut presenter = presenter;
                    let _ = FrameRing::new(slots)
                        .destroy_each(|_, slot| unsafe { slot.destroy(&ctx, pool) });
                    unsafe { presenter.swapchain.destroy(ctx.device(), &presenter.loader) };
                    return Err(e);
                }
            }
        }

        tracing::info!(
            frames_in_flight = config.frames_in_flight(),
            images = presenter.swapchain().image_count(),
            "Frame loop ready"
        );

        Self::new(presenter, slots, config.recreate_backoff())
    }

    /// Give every slot a staged uniform buffer of `size` bytes.
    pub fn create_uniform_buffers(&mut self, size: u64) -> Result<()> {
        let ctx = self.backend().context().clone();
        for (i, slot) in self.ring_mut().slots_mut().iter_mut().enumerate() {
            if let Some(mut previous) = slot.uniform.take() {
                previous.destroy(&ctx)?;
            }
            let desc = BufferDesc::uniform(format!("frame {i} uniforms"), size);
            slot.uniform = Some(GpuBuffer::new(&ctx, &desc)?);
        }
        Ok(())
    }

    pub fn swapchain(&self) -> &Swapchain {
        self.backend().swapchain()
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        self.backend().context()
    }

    /// Wait for the device, then destroy frame slots and the swapchain.
    ///
    /// Teardown runs to the end even when a step fails; the first error is
    /// returned afterwards.
    pub fn destroy(mut self) -> Result<()> {
        let ctx = self.backend().context().clone();
        let idle = ctx.wait_idle();
        if let Err(e) = &idle {
            tracing::error!("Failed to wait idle before teardown: {e}");
        }

        let pool = ctx.command_pool(QueueRole::Graphics);
        let slots = self
            .ring_mut()
            .destroy_each(|_, slot| unsafe { slot.destroy(&ctx, pool) });

        let presenter = self.backend_mut();
        unsafe { presenter.swapchain.destroy(ctx.device(), &presenter.loader) };
        tracing::debug!("Frame loop destroyed");
        idle.and(slots)
    }
}
