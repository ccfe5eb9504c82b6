//! Device buffers with an optional host-visible staging twin.
//!
//! The CPU never touches device-local memory directly. Writes land in the
//! staging twin, [`GpuBuffer::upload_from_staging`] records the copy, and
//! [`GpuBuffer::barrier`] makes the copied bytes visible to one consumer.
//! Both must be recorded into the same command buffer, upload first, before
//! the buffer is consumed there.
//!
//! Unstaged buffers are a single persistently mapped host-visible buffer.
//! For them the upload is a no-op and the barrier covers host writes.

use crate::barrier::{buffer_barrier, BufferConsumer, BufferSource};
use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::memory::RawBuffer;
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;

/// Creation parameters for a [`GpuBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub name: String,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    /// Device-local memory plus a staging twin when set.
    pub staged: bool,
}

impl BufferDesc {
    /// A staged buffer with the given usage.
    pub fn new(name: impl Into<String>, size: u64, usage: vk::BufferUsageFlags) -> Self {
        Self {
            name: name.into(),
            size,
            usage,
            staged: true,
        }
    }

    pub fn vertex(name: impl Into<String>, size: u64) -> Self {
        Self::new(name, size, vk::BufferUsageFlags::VERTEX_BUFFER)
    }

    pub fn index(name: impl Into<String>, size: u64) -> Self {
        Self::new(name, size, vk::BufferUsageFlags::INDEX_BUFFER)
    }

    /// Indirect draw parameters, also readable as a storage buffer.
    pub fn indirect(name: impl Into<String>, size: u64) -> Self {
        Self::new(
            name,
            size,
            vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER,
        )
    }

    pub fn uniform(name: impl Into<String>, size: u64) -> Self {
        Self::new(name, size, vk::BufferUsageFlags::UNIFORM_BUFFER)
    }

    pub fn storage(name: impl Into<String>, size: u64) -> Self {
        Self::new(name, size, vk::BufferUsageFlags::STORAGE_BUFFER)
    }

    /// Use a single host-visible buffer instead of a staging pair.
    #[must_use]
    pub fn unstaged(mut self) -> Self {
        self.staged = false;
        self
    }
}

/// Memory the CPU can write into before it is uploaded.
pub trait HostWritable {
    /// Size of the writable region in bytes.
    fn byte_size(&self) -> u64;

    /// The writable bytes, `byte_size()` long. `None` if not mapped.
    fn host_bytes_mut(&mut self) -> Option<&mut [u8]>;

    /// Copy `data` to `offset`. Returns false, logging a warning, when the
    /// range does not fit; nothing is written in that case.
    fn write(&mut self, offset: u64, data: &[u8]) -> bool {
        match self.host_bytes_mut() {
            Some(bytes) => write_within(bytes, offset, data),
            None => {
                tracing::warn!("Write to unmapped buffer dropped");
                false
            }
        }
    }
}

/// Bounds-checked copy of `data` into `dst` at `offset`.
pub fn write_within(dst: &mut [u8], offset: u64, data: &[u8]) -> bool {
    let range = usize::try_from(offset)
        .ok()
        .and_then(|start| start.checked_add(data.len()).map(|end| start..end));
    match range {
        Some(range) if range.end <= dst.len() => {
            dst[range].copy_from_slice(data);
            true
        }
        _ => {
            tracing::warn!(
                offset,
                len = data.len(),
                capacity = dst.len(),
                "Buffer write out of range, dropped"
            );
            false
        }
    }
}

/// A device buffer and, when staged, its exclusively owned staging twin.
pub struct GpuBuffer {
    name: String,
    device_local: RawBuffer,
    staging: Option<RawBuffer>,
    size: u64,
}

impl GpuBuffer {
    /// Allocate a buffer as described by `desc`.
    pub fn new(ctx: &DeviceContext, desc: &BufferDesc) -> Result<Self> {
        let mut allocator = ctx.allocator().lock();

        if !desc.staged {
            let buffer = allocator.create_buffer(
                desc.size,
                desc.usage,
                MemoryLocation::CpuToGpu,
                &desc.name,
            )?;
            if !buffer.is_mapped() {
                let mut buffer = buffer;
                allocator.free_buffer(&mut buffer)?;
                return Err(GpuError::AllocationFailed(format!(
                    "{}: host-visible memory is not mapped",
                    desc.name
                )));
            }
            return Ok(Self {
                name: desc.name.clone(),
                device_local: buffer,
                staging: None,
                size: desc.size,
            });
        }

        let mut device_local = allocator.create_buffer(
            desc.size,
            desc.usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::GpuOnly,
            &desc.name,
        )?;

        let staging_name = format!("{} staging", desc.name);
        let staging = match allocator.create_buffer(
            desc.size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            &staging_name,
        ) {
            Ok(staging) if staging.is_mapped() => staging,
            Ok(mut staging) => {
                allocator.free_buffer(&mut staging)?;
                allocator.free_buffer(&mut device_local)?;
                return Err(GpuError::AllocationFailed(format!(
                    "{staging_name}: host-visible memory is not mapped"
                )));
            }
            Err(e) => {
                allocator.free_buffer(&mut device_local)?;
                return Err(e);
            }
        };

        Ok(Self {
            name: desc.name.clone(),
            device_local,
            staging: Some(staging),
            size: desc.size,
        })
    }

    /// Buffer handle consumers bind.
    pub fn handle(&self) -> vk::Buffer {
        self.device_local.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_staged(&self) -> bool {
        self.staging.is_some()
    }

    /// Staging twin handle, if any.
    pub fn staging_handle(&self) -> Option<vk::Buffer> {
        self.staging.as_ref().map(|s| s.buffer)
    }

    /// Copy a `Pod` value to `offset`.
    pub fn write_pod<T: Pod>(&mut self, offset: u64, value: &T) -> bool {
        self.write(offset, bytemuck::bytes_of(value))
    }

    /// Copy a `Pod` slice to the start of the buffer.
    pub fn write_slice<T: Pod>(&mut self, data: &[T]) -> bool {
        self.write(0, bytemuck::cast_slice(data))
    }

    /// Record the full-size staging to device copy. No-op when unstaged.
    ///
    /// # Safety
    /// `cmd` must be recording on a queue that supports transfers.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn upload_from_staging(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if let Some(staging) = &self.staging {
            let region = vk::BufferCopy::default().size(self.size);
            device.cmd_copy_buffer(cmd, staging.buffer, self.device_local.buffer, &[region]);
        }
    }

    /// Record the dependency that makes uploaded bytes visible to `consumer`.
    ///
    /// # Safety
    /// `cmd` must be recording, after [`upload_from_staging`](Self::upload_from_staging)
    /// in the same command buffer.
    pub unsafe fn barrier(&self, device: &ash::Device, cmd: vk::CommandBuffer, consumer: BufferConsumer) {
        let source = if self.is_staged() {
            BufferSource::Transfer
        } else {
            BufferSource::Host
        };
        buffer_barrier(device, cmd, self.device_local.buffer, self.size, source, consumer);
    }

    /// Upload then barrier for `consumer`.
    ///
    /// # Safety
    /// `cmd` must be recording.
    pub unsafe fn upload(&self, device: &ash::Device, cmd: vk::CommandBuffer, consumer: BufferConsumer) {
        self.upload_from_staging(device, cmd);
        self.barrier(device, cmd, consumer);
    }

    /// Copy the device-local contents back to the host. Blocks on the
    /// graphics queue; intended for tests and diagnostics.
    pub fn read_back(&self, ctx: &DeviceContext) -> Result<Vec<u8>> {
        if self.staging.is_none() {
            return self
                .device_local
                .mapped_bytes()
                .map(<[u8]>::to_vec)
                .ok_or_else(|| GpuError::InvalidState(format!("{} is not mapped", self.name)));
        }

        let mut readback = ctx.allocator().lock().create_buffer(
            self.size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            &format!("{} readback", self.name),
        )?;

        let device = ctx.device();
        let copied = ctx.immediate_submit(|cmd| {
            let region = vk::BufferCopy::default().size(self.size);
            let barriers = [vk::BufferMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::ALL_TRANSFER)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::HOST)
                .dst_access_mask(vk::AccessFlags2::HOST_READ)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(readback.buffer)
                .size(self.size)];
            unsafe {
                device.cmd_copy_buffer(cmd, self.device_local.buffer, readback.buffer, &[region]);
                device.cmd_pipeline_barrier2(
                    cmd,
                    &vk::DependencyInfo::default().buffer_memory_barriers(&barriers),
                );
            }
            Ok(())
        });

        let bytes = copied.and_then(|()| {
            readback
                .mapped_bytes()
                .map(<[u8]>::to_vec)
                .ok_or_else(|| GpuError::InvalidState("readback buffer is not mapped".to_string()))
        });
        ctx.allocator().lock().free_buffer(&mut readback)?;
        bytes
    }

    /// Release the staging twin, then the device buffer. Safe to call twice.
    pub fn destroy(&mut self, ctx: &DeviceContext) -> Result<()> {
        let mut allocator = ctx.allocator().lock();
        if let Some(mut staging) = self.staging.take() {
            allocator.free_buffer(&mut staging)?;
        }
        allocator.free_buffer(&mut self.device_local)?;
        tracing::debug!(name = %self.name, "Destroyed buffer");
        Ok(())
    }
}

impl HostWritable for GpuBuffer {
    fn byte_size(&self) -> u64 {
        self.size
    }

    fn host_bytes_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.staging {
            Some(staging) => staging.mapped_bytes_mut(),
            None => self.device_local.mapped_bytes_mut(),
        }
    }
}

impl GpuBuffer {
    /// Copy `data` to `offset` in the host-visible side of the buffer.
    ///
    /// Out-of-range writes are logged and dropped.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> bool {
        HostWritable::write(self, offset, data)
    }
}
