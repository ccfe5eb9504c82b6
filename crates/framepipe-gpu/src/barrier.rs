//! Memory barrier tables for buffer uploads and image layout transitions.
//!
//! Every staged upload ends with a barrier that makes the copied bytes
//! visible to exactly one consumer. The tables here map each consumer or
//! transition to its synchronization2 access and stage masks.

use ash::vk;

/// How a buffer is consumed after an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferConsumer {
    /// Vertex attribute fetch.
    VertexInput,
    /// Index fetch.
    IndexInput,
    /// Indirect draw parameter read.
    IndirectDraw,
    /// Storage buffer read from shaders.
    ShaderStorageRead,
    /// Uniform buffer read from shaders.
    UniformRead,
}

impl BufferConsumer {
    /// Destination access and stage for this consumer.
    pub fn dst_masks(self) -> (vk::AccessFlags2, vk::PipelineStageFlags2) {
        let shader_stages =
            vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER;
        match self {
            Self::VertexInput => (
                vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
                vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
            ),
            Self::IndexInput => (
                vk::AccessFlags2::INDEX_READ,
                vk::PipelineStageFlags2::INDEX_INPUT,
            ),
            Self::IndirectDraw => (
                vk::AccessFlags2::INDIRECT_COMMAND_READ,
                vk::PipelineStageFlags2::DRAW_INDIRECT,
            ),
            Self::ShaderStorageRead => (vk::AccessFlags2::SHADER_STORAGE_READ, shader_stages),
            Self::UniformRead => (vk::AccessFlags2::UNIFORM_READ, shader_stages),
        }
    }
}

/// Where the bytes being made visible were written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSource {
    /// Written by a staging copy.
    Transfer,
    /// Written directly through a host mapping.
    Host,
}

impl BufferSource {
    /// Source access and stage.
    pub fn src_masks(self) -> (vk::AccessFlags2, vk::PipelineStageFlags2) {
        match self {
            Self::Transfer => (
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::PipelineStageFlags2::ALL_TRANSFER,
            ),
            Self::Host => (vk::AccessFlags2::HOST_WRITE, vk::PipelineStageFlags2::HOST),
        }
    }
}

/// Build a whole-buffer barrier from `source` to `consumer`.
pub fn buffer_barrier_info(
    buffer: vk::Buffer,
    size: u64,
    source: BufferSource,
    consumer: BufferConsumer,
) -> vk::BufferMemoryBarrier2<'static> {
    let (src_access, src_stage) = source.src_masks();
    let (dst_access, dst_stage) = consumer.dst_masks();
    vk::BufferMemoryBarrier2::default()
        .src_stage_mask(src_stage)
        .src_access_mask(src_access)
        .dst_stage_mask(dst_stage)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(size)
}

/// Record a whole-buffer barrier.
///
/// # Safety
/// `cmd` must be recording and `buffer` must be valid.
pub unsafe fn buffer_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    size: u64,
    source: BufferSource,
    consumer: BufferConsumer,
) {
    let barriers = [buffer_barrier_info(buffer, size, source, consumer)];
    let dependency = vk::DependencyInfo::default().buffer_memory_barriers(&barriers);
    device.cmd_pipeline_barrier2(cmd, &dependency);
}

/// Image layout transitions used by uploads and dynamic rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageTransition {
    /// Fresh image about to receive a copy.
    UndefinedToTransferDst,
    /// Copied image about to be sampled in fragment shaders.
    TransferDstToShaderRead,
    /// Swapchain image about to be rendered to. Previous contents are discarded.
    UndefinedToColorAttachment,
    /// Rendered swapchain image about to be presented.
    ColorAttachmentToPresent,
}

/// Layouts and masks of one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags2,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
}

impl ImageTransition {
    pub fn masks(self) -> TransitionMasks {
        match self {
            Self::UndefinedToTransferDst => TransitionMasks {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                src_access: vk::AccessFlags2::NONE,
                src_stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
                dst_access: vk::AccessFlags2::TRANSFER_WRITE,
                dst_stage: vk::PipelineStageFlags2::ALL_TRANSFER,
            },
            Self::TransferDstToShaderRead => TransitionMasks {
                old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                src_access: vk::AccessFlags2::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags2::ALL_TRANSFER,
                dst_access: vk::AccessFlags2::SHADER_SAMPLED_READ,
                dst_stage: vk::PipelineStageFlags2::FRAGMENT_SHADER,
            },
            Self::UndefinedToColorAttachment => TransitionMasks {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                // Orders against the acquire semaphore wait at this stage.
                src_access: vk::AccessFlags2::NONE,
                src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                dst_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                dst_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            },
            Self::ColorAttachmentToPresent => TransitionMasks {
                old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                src_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                dst_access: vk::AccessFlags2::NONE,
                dst_stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            },
        }
    }
}

/// Single-mip, single-layer color subresource.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Record a layout transition on a single-mip color image.
///
/// # Safety
/// `cmd` must be recording and `image` must be valid.
pub unsafe fn image_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    transition: ImageTransition,
) {
    let m = transition.masks();
    let barriers = [vk::ImageMemoryBarrier2::default()
        .src_stage_mask(m.src_stage)
        .src_access_mask(m.src_access)
        .dst_stage_mask(m.dst_stage)
        .dst_access_mask(m.dst_access)
        .old_layout(m.old_layout)
        .new_layout(m.new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_subresource_range())];
    let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
    device.cmd_pipeline_barrier2(cmd, &dependency);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_masks() {
        assert_eq!(
            BufferConsumer::IndirectDraw.dst_masks(),
            (
                vk::AccessFlags2::INDIRECT_COMMAND_READ,
                vk::PipelineStageFlags2::DRAW_INDIRECT
            )
        );
        assert_eq!(
            BufferConsumer::IndexInput.dst_masks().0,
            vk::AccessFlags2::INDEX_READ
        );
        let (access, stage) = BufferConsumer::UniformRead.dst_masks();
        assert_eq!(access, vk::AccessFlags2::UNIFORM_READ);
        assert!(stage.contains(vk::PipelineStageFlags2::VERTEX_SHADER));
        assert!(stage.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));
    }

    #[test]
    fn staged_barrier_waits_on_transfer_write() {
        let barrier = buffer_barrier_info(
            vk::Buffer::null(),
            256,
            BufferSource::Transfer,
            BufferConsumer::VertexInput,
        );
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(barrier.src_stage_mask, vk::PipelineStageFlags2::ALL_TRANSFER);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::VERTEX_ATTRIBUTE_READ);
        assert_eq!(barrier.size, 256);
        assert_eq!(barrier.offset, 0);
    }

    #[test]
    fn host_barrier_waits_on_host_write() {
        let barrier = buffer_barrier_info(
            vk::Buffer::null(),
            64,
            BufferSource::Host,
            BufferConsumer::IndirectDraw,
        );
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::HOST_WRITE);
        assert_eq!(barrier.src_stage_mask, vk::PipelineStageFlags2::HOST);
    }

    #[test]
    fn upload_transitions_chain() {
        let first = ImageTransition::UndefinedToTransferDst.masks();
        let second = ImageTransition::TransferDstToShaderRead.masks();
        assert_eq!(first.new_layout, second.old_layout);
        assert_eq!(first.dst_access, second.src_access);
        assert_eq!(second.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn render_transitions_chain() {
        let begin = ImageTransition::UndefinedToColorAttachment.masks();
        let end = ImageTransition::ColorAttachmentToPresent.masks();
        assert_eq!(begin.new_layout, end.old_layout);
        assert_eq!(end.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }
}
