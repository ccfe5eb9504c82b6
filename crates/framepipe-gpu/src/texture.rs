//! Sampled 2D textures uploaded through a staging buffer.

use crate::barrier::{color_subresource_range, image_barrier, ImageTransition};
use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::memory::GpuImage;
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::path::Path;

/// Texel format of every texture.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// A device-local image with a view and sampler, ready for fragment sampling.
pub struct Texture {
    image: GpuImage,
    view: vk::ImageView,
    sampler: vk::Sampler,
}

impl Texture {
    /// Decode an image file and upload it as RGBA8.
    pub fn load(ctx: &DeviceContext, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let decoded = image::open(path)?.to_rgba8();
        let (width, height) = decoded.dimensions();
        tracing::debug!(path = %path.display(), width, height, "Decoded texture");
        Self::from_rgba8(ctx, width, height, decoded.as_raw())
    }

    /// Upload tightly packed RGBA8 pixels.
    ///
    /// Runs three blocking single-use submissions: transition to transfer
    /// destination, copy, transition to shader read.
    pub fn from_rgba8(ctx: &DeviceContext, width: u32, height: u32, pixels: &[u8]) -> Result<Self> {
        let expected = rgba8_byte_len(width, height)?;
        if pixels.len() as u64 != expected {
            return Err(GpuError::InvalidState(format!(
                "texture {width}x{height} needs {expected} bytes, got {}",
                pixels.len()
            )));
        }

        let mut staging = ctx.allocator().lock().create_buffer(
            expected,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "texture staging",
        )?;

        let staging_buffer = staging.buffer;
        let result = match staging.mapped_bytes_mut() {
            Some(bytes) => {
                bytes.copy_from_slice(pixels);
                Self::upload(ctx, staging_buffer, width, height)
            }
            None => Err(GpuError::InvalidState(
                "texture staging buffer is not mapped".to_string(),
            )),
        };

        ctx.allocator().lock().free_buffer(&mut staging)?;
        result
    }

    fn upload(ctx: &DeviceContext, staging: vk::Buffer, width: u32, height: u32) -> Result<Self> {
        let device = ctx.device();
        let extent = vk::Extent3D {
            width,
            height,
            depth: 1,
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut image = ctx
            .allocator()
            .lock()
            .create_image(&image_info, MemoryLocation::GpuOnly, "texture")?;

        let uploaded = (|| -> Result<(vk::ImageView, vk::Sampler)> {
            ctx.immediate_submit(|cmd| {
                unsafe { image_barrier(device, cmd, image.image, ImageTransition::UndefinedToTransferDst) };
                Ok(())
            })?;

            ctx.immediate_submit(|cmd| {
                let region = vk::BufferImageCopy::default()
                    .buffer_offset(0)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(0)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
                    .image_offset(vk::Offset3D::default())
                    .image_extent(extent);
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        cmd,
                        staging,
                        image.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
                Ok(())
            })?;

            ctx.immediate_submit(|cmd| {
                unsafe { image_barrier(device, cmd, image.image, ImageTransition::TransferDstToShaderRead) };
                Ok(())
            })?;

            let view_info = vk::ImageViewCreateInfo::default()
                .image(image.image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(TEXTURE_FORMAT)
                .subresource_range(color_subresource_range());
            let view = unsafe { device.create_image_view(&view_info, None)? };

            let sampler = match unsafe { device.create_sampler(&sampler_info(), None) } {
                Ok(sampler) => sampler,
                Err(e) => {
                    unsafe { device.destroy_image_view(view, None) };
                    return Err(e.into());
                }
            };
            Ok((view, sampler))
        })();

        match uploaded {
            Ok((view, sampler)) => {
                tracing::debug!(width, height, "Uploaded texture");
                Ok(Self {
                    image,
                    view,
                    sampler,
                })
            }
            Err(e) => {
                ctx.allocator().lock().free_image(&mut image)?;
                Err(e)
            }
        }
    }

    pub fn image(&self) -> vk::Image {
        self.image.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.image.extent
    }

    /// Descriptor info for a combined image sampler binding.
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .sampler(self.sampler)
            .image_view(self.view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }

    /// Destroy sampler, view and image. Safe to call twice.
    pub fn destroy(&mut self, ctx: &DeviceContext) -> Result<()> {
        unsafe {
            if self.sampler != vk::Sampler::null() {
                ctx.device().destroy_sampler(self.sampler, None);
                self.sampler = vk::Sampler::null();
            }
            if self.view != vk::ImageView::null() {
                ctx.device().destroy_image_view(self.view, None);
                self.view = vk::ImageView::null();
            }
        }
        ctx.allocator().lock().free_image(&mut self.image)
    }
}

/// Nearest filtering, repeat addressing, no anisotropy.
fn sampler_info() -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::NEAREST)
        .min_filter(vk::Filter::NEAREST)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(false)
        .max_anisotropy(1.0)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
}

/// Byte length of a tightly packed RGBA8 image.
pub fn rgba8_byte_len(width: u32, height: u32) -> Result<u64> {
    if width == 0 || height == 0 {
        return Err(GpuError::InvalidState(format!(
            "texture extent {width}x{height} is empty"
        )));
    }
    Ok(u64::from(width) * u64::from(height) * 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba8_length() {
        assert_eq!(rgba8_byte_len(2, 3).unwrap(), 24);
        assert_eq!(rgba8_byte_len(1, 1).unwrap(), 4);
        assert!(rgba8_byte_len(0, 4).is_err());
    }

    #[test]
    fn sampler_is_nearest_repeat() {
        let info = sampler_info();
        assert_eq!(info.mag_filter, vk::Filter::NEAREST);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
    }
}
