//! Frame synchronization and staged uploads over Vulkan 1.3.
//!
//! This crate provides:
//! - Instance, device and queue setup with validated configuration
//! - A K-slot frame ring with fence/semaphore pacing and deferred swapchain
//!   recreation
//! - Device-local buffers fed through host-visible staging twins
//! - Indirect draw command tables and sampled textures
//! - Dynamic rendering helpers for the swapchain color target

pub mod barrier;
pub mod buffer;
pub mod capabilities;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod frame;
pub mod frame_loop;
pub mod indirect;
pub mod instance;
pub mod layout;
pub mod memory;
pub mod presenter;
pub mod queue;
pub mod rendering;
pub mod surface;
pub mod swapchain;
pub mod texture;

pub use barrier::{BufferConsumer, BufferSource, ImageTransition};
pub use buffer::{BufferDesc, GpuBuffer, HostWritable};
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::{CommandPool, SubmitBatch};
pub use config::{
    ContextConfig, ContextConfigBuilder, FrameLoopConfig, FrameLoopConfigBuilder,
    MAX_FRAMES_IN_FLIGHT,
};
pub use context::DeviceContext;
pub use error::{GpuError, Result};
pub use frame::{AcquireOutcome, FrameContext, FrameSlot, SlotState};
pub use frame_loop::{FrameLoop, PresentBackend};
pub use indirect::{DrawCommand, IndirectCommandTable};
pub use layout::BufferLayout;
pub use memory::{GpuAllocator, GpuImage, RawBuffer};
pub use presenter::SwapchainPresenter;
pub use queue::{QueueFamilySelection, QueueRole};
pub use surface::FramebufferExtent;
pub use swapchain::Swapchain;
pub use texture::Texture;
