//! Demo application: per-frame uniforms, indirect tables and a cleared
//! swapchain image.

use anyhow::Context;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use tracing::info;

use framepipe_app::{AppContext, RenderApp, RenderFrame};
use framepipe_gpu::rendering::{begin_rendering, end_rendering, set_scissor, set_viewport};
use framepipe_gpu::{BufferConsumer, BufferLayout, IndirectCommandTable, Texture};

/// Draw commands written into each frame's indirect table.
pub const DRAWS_PER_FRAME: u32 = 64;

/// Indices per cube draw.
const CUBE_INDEX_COUNT: u32 = 36;

/// Side of the generated checker texture, in pixels.
const CHECKER_SIZE: u32 = 64;

/// Uniform block uploaded once per frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FrameUniforms {
    pub clear_color: Vec4,
    pub time: f32,
    pub frame: u32,
    pub extent: [u32; 2],
}

impl FrameUniforms {
    /// Field-by-field layout of the block as the shaders see it.
    pub fn layout() -> BufferLayout {
        BufferLayout::new()
            .with(vk::Format::R32G32B32A32_SFLOAT, 1)
            .with(vk::Format::R32_SFLOAT, 1)
            .with(vk::Format::R32_UINT, 1)
            .with(vk::Format::R32G32_UINT, 1)
    }
}

/// Frame counter as stored in the uniform block, wrapping at `u32::MAX`.
#[allow(clippy::cast_possible_truncation)]
pub fn wrapped_frame(frame_number: u64) -> u32 {
    (frame_number & u64::from(u32::MAX)) as u32
}

/// Clear color cycling through hues over time.
pub fn pulse_color(time: f32) -> Vec4 {
    let third = std::f32::consts::TAU / 3.0;
    let rgb = Vec3::new(time.sin(), (time + third).sin(), (time + 2.0 * third).sin()) * 0.5 + 0.5;
    rgb.extend(1.0)
}

/// RGBA8 checkerboard with `cell`-pixel squares.
pub fn checker_pixels(size: u32, cell: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let value = if ((x / cell) + (y / cell)) % 2 == 0 {
                255
            } else {
                32
            };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    pixels
}

pub struct Pulse {
    time: f32,
    /// One table per frame slot so the host never rewrites staging memory a
    /// frame in flight still copies from.
    draws: Vec<IndirectCommandTable>,
    checker: Texture,
}

impl RenderApp for Pulse {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let uniform_size = FrameUniforms::layout()
            .byte_size()
            .context("sizing frame uniforms")?;
        ctx.frames
            .create_uniform_buffers(uniform_size)
            .context("creating frame uniforms")?;

        let mut draws = Vec::with_capacity(ctx.frames_in_flight());
        for slot in 0..ctx.frames_in_flight() {
            draws.push(IndirectCommandTable::new(
                &ctx.gpu,
                &format!("frame {slot} draws"),
                DRAWS_PER_FRAME,
                true,
            )?);
        }

        let checker = Texture::from_rgba8(
            &ctx.gpu,
            CHECKER_SIZE,
            CHECKER_SIZE,
            &checker_pixels(CHECKER_SIZE, 8),
        )
        .context("uploading checker texture")?;

        info!(
            frames_in_flight = ctx.frames_in_flight(),
            draws = DRAWS_PER_FRAME,
            "Demo resources ready"
        );

        Ok(Self {
            time: 0.0,
            draws,
            checker,
        })
    }

    fn update(&mut self, _ctx: &AppContext, dt: f32) {
        self.time += dt;
    }

    fn record(&mut self, ctx: &mut AppContext, frame: &RenderFrame) -> anyhow::Result<()> {
        let clear_color = pulse_color(self.time);
        let uniforms = FrameUniforms {
            clear_color,
            time: self.time,
            frame: wrapped_frame(frame.frame_number),
            extent: [frame.extent.width, frame.extent.height],
        };

        let device = ctx.gpu.device();
        let cmd = frame.command_buffer;

        if let Some(uniform) = ctx.frames.uniform_buffer_mut() {
            uniform.write_pod(0, &uniforms);
            unsafe { uniform.upload(device, cmd, BufferConsumer::UniformRead) };
        }

        let draws = self
            .draws
            .get_mut(frame.slot_index)
            .context("no indirect table for frame slot")?;
        draws.reset();
        for instance in 0..DRAWS_PER_FRAME {
            draws.add_command(CUBE_INDEX_COUNT, 1, 0, 0, instance);
        }

        unsafe {
            draws.upload(device, cmd);

            begin_rendering(
                device,
                cmd,
                frame.swapchain_image,
                frame.swapchain_view,
                frame.extent,
                clear_color.to_array(),
            );
            set_viewport(device, cmd, frame.extent);
            set_scissor(device, cmd, frame.extent);
            end_rendering(device, cmd, frame.swapchain_image);
        }

        Ok(())
    }

    fn on_resize(&mut self, _ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        info!(width, height, "Demo surface resized");
        Ok(())
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        for table in &mut self.draws {
            if let Err(e) = table.destroy(&ctx.gpu) {
                tracing::error!("Failed to destroy indirect table: {e}");
            }
        }
        if let Err(e) = self.checker.destroy(&ctx.gpu) {
            tracing::error!("Failed to destroy checker texture: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_block_layout() {
        let described = FrameUniforms::layout().byte_size().unwrap();
        assert_eq!(described, 32);
        assert_eq!(described, std::mem::size_of::<FrameUniforms>() as u64);
    }

    #[test]
    fn frame_counter_wraps() {
        assert_eq!(wrapped_frame(7), 7);
        assert_eq!(wrapped_frame(u64::from(u32::MAX)), u32::MAX);
        assert_eq!(wrapped_frame(u64::from(u32::MAX) + 1), 0);
        assert_eq!(wrapped_frame(u64::from(u32::MAX) + 6), 5);
    }

    #[test]
    fn pulse_color_stays_in_range() {
        for step in 0..100 {
            let color = pulse_color(step as f32 * 0.37);
            assert!(color.min_element() >= 0.0);
            assert!(color.max_element() <= 1.0);
            assert_eq!(color.w, 1.0);
        }
    }

    #[test]
    fn checker_alternates() {
        let pixels = checker_pixels(4, 2);
        assert_eq!(pixels.len(), 4 * 4 * 4);
        assert_eq!(pixels[0], 255);
        assert_eq!(pixels[2 * 4], 32);
        assert_eq!(pixels[(2 * 4 + 2) * 4], 255);
    }
}
