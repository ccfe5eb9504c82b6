//! Windowed application runner for framepipe.
//!
//! The runner handles window creation, device context setup, the frame loop
//! and swapchain recreation on resize. Applications implement [`RenderApp`]
//! and record into the frame they are handed.
//!
//! # Example
//!
//! ```no_run
//! use framepipe_app::{run_app, AppConfig, AppContext, RenderApp, RenderFrame};
//!
//! struct Clear;
//!
//! impl RenderApp for Clear {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(Clear)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn record(&mut self, ctx: &mut AppContext, frame: &RenderFrame) -> anyhow::Result<()> {
//!         let device = ctx.gpu.device();
//!         unsafe {
//!             framepipe_gpu::rendering::begin_rendering(
//!                 device,
//!                 frame.command_buffer,
//!                 frame.swapchain_image,
//!                 frame.swapchain_view,
//!                 frame.extent,
//!                 [0.0, 0.0, 0.0, 1.0],
//!             );
//!             framepipe_gpu::rendering::end_rendering(
//!                 device,
//!                 frame.command_buffer,
//!                 frame.swapchain_image,
//!             );
//!         }
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<Clear>(AppConfig::new("clear"))
//! }
//! ```

mod app;
mod context;
mod frame;
mod runner;

pub use app::RenderApp;
pub use context::AppContext;
pub use frame::RenderFrame;
pub use runner::{run_app, AppConfig};

pub use winit::event::WindowEvent;
