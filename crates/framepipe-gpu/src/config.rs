//! Immutable configuration for context and frame loop creation.
//!
//! Both configurations are produced by a builder whose `build()` validates
//! the values once. The resulting structs are never mutated afterwards.

use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{CStr, CString};
use std::time::Duration;

/// Standard Khronos validation layer.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Upper bound on frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Finalized settings for [`DeviceContext`](crate::DeviceContext) creation.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    app_name: CString,
    engine_name: CString,
    api_version: u32,
    validation: bool,
    layers: Vec<CString>,
    instance_extensions: Vec<CString>,
    device_extensions: Vec<CString>,
}

impl ContextConfig {
    /// Start building a configuration.
    pub fn builder() -> ContextConfigBuilder {
        ContextConfigBuilder::default()
    }

    pub fn app_name(&self) -> &CStr {
        &self.app_name
    }

    pub fn engine_name(&self) -> &CStr {
        &self.engine_name
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub fn validation(&self) -> bool {
        self.validation
    }

    /// Layers to enable on the instance. Contains the validation layer when
    /// validation is on.
    pub fn layers(&self) -> &[CString] {
        &self.layers
    }

    /// Instance extensions requested on top of the surface extensions.
    pub fn instance_extensions(&self) -> &[CString] {
        &self.instance_extensions
    }

    /// Device extensions requested on top of `VK_KHR_swapchain`.
    pub fn device_extensions(&self) -> &[CString] {
        &self.device_extensions
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            app_name: c"framepipe".to_owned(),
            engine_name: c"framepipe".to_owned(),
            api_version: vk::API_VERSION_1_3,
            validation: false,
            layers: Vec::new(),
            instance_extensions: Vec::new(),
            device_extensions: Vec::new(),
        }
    }
}

/// Builder for [`ContextConfig`].
pub struct ContextConfigBuilder {
    app_name: String,
    engine_name: String,
    api_version: u32,
    validation: bool,
    layers: Vec<String>,
    instance_extensions: Vec<String>,
    device_extensions: Vec<String>,
}

impl Default for ContextConfigBuilder {
    fn default() -> Self {
        Self {
            app_name: "framepipe".to_string(),
            engine_name: "framepipe".to_string(),
            api_version: vk::API_VERSION_1_3,
            validation: cfg!(debug_assertions),
            layers: Vec::new(),
            instance_extensions: Vec::new(),
            device_extensions: Vec::new(),
        }
    }
}

impl ContextConfigBuilder {
    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Set the engine name.
    pub fn engine_name(mut self, name: impl Into<String>) -> Self {
        self.engine_name = name.into();
        self
    }

    /// Set the requested Vulkan API version. Must be at least 1.3.
    pub fn api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.validation = enable;
        self
    }

    /// Request an additional instance layer.
    pub fn layer(mut self, name: impl Into<String>) -> Self {
        self.layers.push(name.into());
        self
    }

    /// Request an additional instance extension.
    pub fn instance_extension(mut self, name: impl Into<String>) -> Self {
        self.instance_extensions.push(name.into());
        self
    }

    /// Request an additional device extension.
    pub fn device_extension(mut self, name: impl Into<String>) -> Self {
        self.device_extensions.push(name.into());
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<ContextConfig> {
        if self.app_name.trim().is_empty() {
            return Err(GpuError::InvalidConfig(
                "application name must not be empty".to_string(),
            ));
        }

        let major = vk::api_version_major(self.api_version);
        let minor = vk::api_version_minor(self.api_version);
        if major < 1 || (major == 1 && minor < 3) {
            return Err(GpuError::InvalidConfig(format!(
                "Vulkan {major}.{minor} requested, 1.3 is required"
            )));
        }

        let mut layers = to_cstrings(self.layers)?;
        if self.validation && !layers.iter().any(|l| l.as_c_str() == VALIDATION_LAYER) {
            layers.push(VALIDATION_LAYER.to_owned());
        }

        Ok(ContextConfig {
            app_name: to_cstring(self.app_name)?,
            engine_name: to_cstring(self.engine_name)?,
            api_version: self.api_version,
            validation: self.validation,
            layers,
            instance_extensions: to_cstrings(self.instance_extensions)?,
            device_extensions: to_cstrings(self.device_extensions)?,
        })
    }
}

fn to_cstring(value: String) -> Result<CString> {
    CString::new(value).map_err(|e| GpuError::InvalidConfig(e.to_string()))
}

fn to_cstrings(values: Vec<String>) -> Result<Vec<CString>> {
    values.into_iter().map(to_cstring).collect()
}

/// Finalized settings for swapchain and frame ring creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLoopConfig {
    frames_in_flight: usize,
    desired_image_count: u32,
    vsync: bool,
    recreate_backoff: Duration,
}

impl FrameLoopConfig {
    /// Start building a configuration.
    pub fn builder() -> FrameLoopConfigBuilder {
        FrameLoopConfigBuilder::default()
    }

    /// Number of frame slots (K).
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Requested swapchain image count, clamped to surface limits at creation.
    pub fn desired_image_count(&self) -> u32 {
        self.desired_image_count
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Sleep applied when recreation is deferred by a zero-sized framebuffer.
    pub fn recreate_backoff(&self) -> Duration {
        self.recreate_backoff
    }
}

impl Default for FrameLoopConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            desired_image_count: 3,
            vsync: true,
            recreate_backoff: Duration::from_millis(100),
        }
    }
}

/// Builder for [`FrameLoopConfig`].
#[derive(Default)]
pub struct FrameLoopConfigBuilder {
    config: FrameLoopConfig,
}

impl FrameLoopConfigBuilder {
    /// Set the number of frames in flight.
    pub fn frames_in_flight(mut self, count: usize) -> Self {
        self.config.frames_in_flight = count;
        self
    }

    /// Set the desired swapchain image count.
    pub fn desired_image_count(mut self, count: u32) -> Self {
        self.config.desired_image_count = count;
        self
    }

    /// Enable or disable vsync.
    pub fn vsync(mut self, vsync: bool) -> Self {
        self.config.vsync = vsync;
        self
    }

    /// Set the back-off used while the framebuffer is zero-sized.
    pub fn recreate_backoff(mut self, backoff: Duration) -> Self {
        self.config.recreate_backoff = backoff;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<FrameLoopConfig> {
        let config = self.config;
        if config.frames_in_flight == 0 || config.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(GpuError::InvalidConfig(format!(
                "frames in flight must be within 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                config.frames_in_flight
            )));
        }
        if config.desired_image_count == 0 {
            return Err(GpuError::InvalidConfig(
                "desired swapchain image count must be non-zero".to_string(),
            ));
        }
        Ok(config)
    }
}
