//! Application runner and event loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use framepipe_gpu::{
    AcquireOutcome, ContextConfig, DeviceContext, FrameLoop, FrameLoopConfig, FramebufferExtent,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::RenderApp;
use crate::context::AppContext;
use crate::frame::RenderFrame;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title, also used as the Vulkan application name.
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Frame slots in the ring.
    pub frames_in_flight: usize,
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Sleep between swapchain rebuild attempts while minimized.
    pub recreate_backoff: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "framepipe".to_string(),
            width: 1280,
            height: 720,
            frames_in_flight: 2,
            vsync: true,
            validation: cfg!(debug_assertions),
            recreate_backoff: Duration::from_millis(100),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_recreate_backoff(mut self, backoff: Duration) -> Self {
        self.recreate_backoff = backoff;
        self
    }

    /// Device context settings for this app.
    pub fn context_config(&self) -> framepipe_gpu::Result<ContextConfig> {
        ContextConfig::builder()
            .app_name(self.title.clone())
            .validation(self.validation)
            .build()
    }

    /// Frame loop settings for this app.
    pub fn frame_loop_config(&self) -> framepipe_gpu::Result<FrameLoopConfig> {
        FrameLoopConfig::builder()
            .frames_in_flight(self.frames_in_flight)
            .vsync(self.vsync)
            .recreate_backoff(self.recreate_backoff)
            .build()
    }
}

/// Run a [`RenderApp`] with the given configuration.
///
/// Initializes logging, creates the window, device context and frame loop,
/// and runs the event loop until the window closes or a frame fails.
pub fn run_app<A: RenderApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Fail on bad settings before any window exists.
    config.context_config()?;
    config.frame_loop_config()?;

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failure: None,
    };

    event_loop.run_app(&mut runner)?;

    match runner.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Implements winit's `ApplicationHandler` around the app state.
struct AppRunner<A: RenderApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    failure: Option<anyhow::Error>,
}

struct AppState<A: RenderApp> {
    ctx: AppContext,
    app: A,
}

impl<A: RenderApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(state) = self.state.take() {
                    state.shutdown();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                match state.render_frame() {
                    Ok(()) => state.ctx.window.request_redraw(),
                    Err(e) => {
                        error!("Render error: {e:#}");
                        if let Some(state) = self.state.take() {
                            state.shutdown();
                        }
                        self.failure = Some(e);
                        event_loop.exit();
                    }
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    state.ctx.resized(size.width, size.height);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: RenderApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let gpu = Arc::new(DeviceContext::new(
            &self.config.context_config()?,
            window.as_ref(),
        )?);
        info!("GPU: {}", gpu.capabilities().summary());

        let size = window.inner_size();
        let framebuffer = FramebufferExtent::new(size.width, size.height);
        let frames = FrameLoop::create(
            gpu.clone(),
            framebuffer.clone(),
            self.config.frame_loop_config()?,
        )?;

        let mut ctx = AppContext::new(window, gpu, framebuffer, frames);
        match A::init(&mut ctx) {
            Ok(app) => Ok(AppState { ctx, app }),
            Err(e) => Err(teardown_after_failure(e, || ctx.destroy())),
        }
    }
}

/// Run `teardown` and hand back `failure`; a teardown error is only logged.
fn teardown_after_failure<F>(failure: anyhow::Error, teardown: F) -> anyhow::Error
where
    F: FnOnce() -> anyhow::Result<()>,
{
    if let Err(e) = teardown() {
        error!("Cleanup after failed init failed: {e:#}");
    }
    failure
}

impl<A: RenderApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let now = Instant::now();
        let dt = now.duration_since(self.ctx.last_frame_time).as_secs_f32();
        self.ctx.last_frame_time = now;

        self.app.update(&self.ctx, dt);

        let frame = match self.ctx.frames.acquire_image()? {
            AcquireOutcome::Frame(frame) => frame,
            AcquireOutcome::Skipped => return self.notify_resize(),
        };

        let cmd = self.ctx.frames.start_recording()?;
        let image = self
            .ctx
            .frames
            .backend()
            .image(frame.image_index)
            .ok_or_else(|| anyhow!("acquired image {} has no view", frame.image_index))?;
        let render_frame = RenderFrame::new(&frame, cmd, image, dt);

        self.app.record(&mut self.ctx, &render_frame)?;

        self.ctx.frames.stop_recording()?;
        self.ctx.frames.submit()?;
        self.ctx.frames.present_image()?;
        self.ctx.frame_count += 1;

        self.notify_resize()
    }

    /// Tell the app when the swapchain was rebuilt at a new size.
    fn notify_resize(&mut self) -> anyhow::Result<()> {
        let extent = self.ctx.extent();
        if extent == self.ctx.last_extent {
            return Ok(());
        }
        self.ctx.last_extent = extent;
        self.app.on_resize(&mut self.ctx, extent.width, extent.height)?;
        info!("Resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn shutdown(self) {
        let Self { mut ctx, mut app } = self;

        info!(frames = ctx.frame_count, "Starting cleanup...");
        if let Err(e) = ctx.gpu.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        app.cleanup(&mut ctx);

        match ctx.destroy() {
            Ok(()) => info!("Cleanup complete"),
            Err(e) => error!("Cleanup failed: {e:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_methods() {
        let config = AppConfig::new("demo")
            .with_size(640, 480)
            .with_frames_in_flight(3)
            .with_vsync(false)
            .with_validation(false)
            .with_recreate_backoff(Duration::from_millis(5));

        assert_eq!(config.title, "demo");
        assert_eq!((config.width, config.height), (640, 480));

        let frame_loop = config.frame_loop_config().unwrap();
        assert_eq!(frame_loop.frames_in_flight(), 3);
        assert!(!frame_loop.vsync());
        assert_eq!(frame_loop.recreate_backoff(), Duration::from_millis(5));

        let context = config.context_config().unwrap();
        assert_eq!(context.app_name().to_str().unwrap(), "demo");
        assert!(!context.validation());
    }

    #[test]
    fn init_failure_runs_teardown_and_keeps_error() {
        let mut torn_down = false;
        let err = teardown_after_failure(anyhow!("init failed"), || {
            torn_down = true;
            Err(anyhow!("device lost"))
        });

        assert!(torn_down);
        assert_eq!(err.to_string(), "init failed");
    }

    #[test]
    fn invalid_settings_rejected() {
        assert!(AppConfig::default()
            .with_frames_in_flight(0)
            .frame_loop_config()
            .is_err());
        assert!(AppConfig::new("").context_config().is_err());
    }
}
