//! `RenderApp` trait definition.

use crate::context::AppContext;
use crate::frame::RenderFrame;
use winit::event::WindowEvent;

/// Trait for framepipe applications.
///
/// The runner owns the window, device context and frame loop. An application
/// only records commands into the frame it is handed.
pub trait RenderApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window, device context and frame loop exist.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state. `dt` is the time since the last frame in
    /// seconds.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record this frame's commands.
    ///
    /// The command buffer is already recording and the swapchain image is
    /// acquired. The runner stops recording, submits and presents afterwards,
    /// so the image must be left in `PRESENT_SRC_KHR` layout (see
    /// [`framepipe_gpu::rendering::end_rendering`]).
    fn record(&mut self, ctx: &mut AppContext, frame: &RenderFrame) -> anyhow::Result<()>;

    /// Called after the swapchain was rebuilt at a new size.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Return `true` to stop the runner from handling `event`.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Release GPU resources. The device is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
