//! Byte-size arithmetic for buffers described as format/count lists.

use crate::error::{GpuError, Result};
use ash::vk;

/// Size in bytes of one element of `format`, for the vertex/storage formats
/// buffers are commonly described with.
pub fn format_byte_size(format: vk::Format) -> Option<u64> {
    let size = match format {
        vk::Format::R8_SINT | vk::Format::R8_UINT | vk::Format::R8_UNORM => 1,
        vk::Format::R16_SFLOAT => 2,
        vk::Format::R16G16_SFLOAT => 4,
        vk::Format::R16G16B16_SFLOAT => 6,
        vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB | vk::Format::B8G8R8A8_UNORM => 4,
        vk::Format::R32_SFLOAT | vk::Format::R32_SINT | vk::Format::R32_UINT => 4,
        vk::Format::R32G32_SFLOAT | vk::Format::R32G32_SINT | vk::Format::R32G32_UINT => 8,
        vk::Format::R32G32B32_SFLOAT | vk::Format::R32G32B32_SINT | vk::Format::R32G32B32_UINT => 12,
        vk::Format::R32G32B32A32_SFLOAT
        | vk::Format::R32G32B32A32_SINT
        | vk::Format::R32G32B32A32_UINT => 16,
        _ => return None,
    };
    Some(size)
}

/// A buffer described as a list of `(format, count)` runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferLayout {
    elements: Vec<(vk::Format, u64)>,
}

impl BufferLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `count` elements of `format`.
    #[must_use]
    pub fn with(mut self, format: vk::Format, count: u64) -> Self {
        self.elements.push((format, count));
        self
    }

    /// Total size in bytes.
    pub fn byte_size(&self) -> Result<u64> {
        self.elements.iter().try_fold(0u64, |total, &(format, count)| {
            let element = format_byte_size(format).ok_or_else(|| {
                GpuError::InvalidConfig(format!("no byte size known for {format:?}"))
            })?;
            element
                .checked_mul(count)
                .and_then(|bytes| total.checked_add(bytes))
                .ok_or_else(|| GpuError::InvalidConfig("buffer layout size overflows".to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_runs() {
        let layout = BufferLayout::new()
            .with(vk::Format::R32G32_SFLOAT, 1)
            .with(vk::Format::R32G32_SFLOAT, 1);
        assert_eq!(layout.byte_size().unwrap(), 16);

        let ssbo = BufferLayout::new().with(vk::Format::R32G32_SFLOAT, 20_000);
        assert_eq!(ssbo.byte_size().unwrap(), 160_000);

        let mixed = BufferLayout::new()
            .with(vk::Format::R16G16B16_SFLOAT, 3)
            .with(vk::Format::R32G32B32A32_UINT, 2)
            .with(vk::Format::R8_SINT, 5);
        assert_eq!(mixed.byte_size().unwrap(), 18 + 32 + 5);
    }

    #[test]
    fn empty_layout_is_zero() {
        assert_eq!(BufferLayout::new().byte_size().unwrap(), 0);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let layout = BufferLayout::new().with(vk::Format::D32_SFLOAT_S8_UINT, 1);
        assert!(matches!(layout.byte_size(), Err(GpuError::InvalidConfig(_))));
    }
}
