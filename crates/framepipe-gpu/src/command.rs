//! Command pools, recording and queue submission.

use crate::error::Result;
use ash::vk;

/// Command pool bound to one queue family.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = device.create_command_pool(&create_info, None)?;
        tracing::debug!(queue_family, "Created command pool");

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate `count` primary command buffers.
    ///
    /// # Safety
    /// The device must be the one the pool was created on.
    pub unsafe fn allocate(&self, device: &ash::Device, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        Ok(device.allocate_command_buffers(&alloc_info)?)
    }

    /// Return command buffers to the pool.
    ///
    /// # Safety
    /// The buffers must come from this pool and must not be pending.
    pub unsafe fn free(&self, device: &ash::Device, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            device.free_command_buffers(self.pool, buffers);
        }
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// No buffer from the pool may be pending execution.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Reset and begin recording a command buffer.
///
/// # Safety
/// The command buffer must not be pending execution.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The command buffer must be in the recording state.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// The single submission a frame makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitBatch {
    /// Signaled by image acquisition; waited on at color-attachment output.
    pub wait_semaphore: vk::Semaphore,
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when rendering completes; waited on by present.
    pub signal_semaphore: vk::Semaphore,
    /// Frame slot fence, signaled when the batch retires.
    pub fence: vk::Fence,
}

/// Submit a frame batch with `vkQueueSubmit2`.
///
/// # Safety
/// All handles in `batch` must be valid and the fence must be unsignaled.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn submit_frame(device: &ash::Device, queue: vk::Queue, batch: &SubmitBatch) -> Result<()> {
    let wait = [vk::SemaphoreSubmitInfo::default()
        .semaphore(batch.wait_semaphore)
        .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)];
    let commands = [vk::CommandBufferSubmitInfo::default().command_buffer(batch.command_buffer)];
    let signal = [vk::SemaphoreSubmitInfo::default()
        .semaphore(batch.signal_semaphore)
        .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];

    let submit_info = vk::SubmitInfo2::default()
        .wait_semaphore_infos(&wait)
        .command_buffer_infos(&commands)
        .signal_semaphore_infos(&signal);

    device.queue_submit2(queue, &[submit_info], batch.fence)?;
    Ok(())
}

/// Record, submit and wait for a one-shot command buffer.
///
/// The buffer is freed before returning, also when recording fails.
///
/// # Safety
/// The pool must belong to `queue`'s family.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    record: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    let buffers = pool.allocate(device, 1)?;
    let result = record_and_wait(device, queue, buffers[0], record);
    pool.free(device, &buffers);
    result
}

unsafe fn record_and_wait<F>(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    record: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(cmd, &begin_info)?;
    record(cmd)?;
    device.end_command_buffer(cmd)?;

    let commands = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
    let submit_info = vk::SubmitInfo2::default().command_buffer_infos(&commands);
    device.queue_submit2(queue, &[submit_info], vk::Fence::null())?;
    device.queue_wait_idle(queue)?;
    Ok(())
}
