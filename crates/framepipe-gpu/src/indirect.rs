//! Fixed-capacity table of indexed indirect draw commands.

use crate::barrier::BufferConsumer;
use crate::buffer::{BufferDesc, GpuBuffer, HostWritable};
use crate::context::DeviceContext;
use crate::error::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};

/// One `VkDrawIndexedIndirectCommand` record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

impl DrawCommand {
    /// Byte stride between records.
    pub const STRIDE: u64 = std::mem::size_of::<Self>() as u64;
}

/// Draw commands written into host-visible storage, at most `capacity` of them.
///
/// Writes past capacity are rejected and logged; the storage beyond
/// `capacity * STRIDE` is never touched.
pub struct IndirectCommandTable<S = GpuBuffer> {
    storage: S,
    capacity: u32,
    written: u32,
}

impl IndirectCommandTable<GpuBuffer> {
    /// Allocate a table for `capacity` commands.
    ///
    /// A staged table keeps its records in device-local memory and must be
    /// uploaded each time it changes. An unstaged table is read by the GPU
    /// straight from host-visible memory.
    pub fn new(ctx: &DeviceContext, name: &str, capacity: u32, staged: bool) -> Result<Self> {
        let mut desc = BufferDesc::indirect(name, u64::from(capacity) * DrawCommand::STRIDE);
        desc.staged = staged;
        let buffer = GpuBuffer::new(ctx, &desc)?;
        tracing::debug!(name, capacity, staged, "Created indirect command table");
        Ok(Self::with_storage(buffer, capacity))
    }

    /// Buffer handle for `vkCmdDrawIndexedIndirect`.
    pub fn handle(&self) -> vk::Buffer {
        self.storage.handle()
    }

    /// Record the upload and the indirect-read barrier.
    ///
    /// Unstaged tables only get the host-write barrier.
    ///
    /// # Safety
    /// `cmd` must be recording, outside a rendering scope.
    pub unsafe fn upload(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        self.storage.upload(device, cmd, BufferConsumer::IndirectDraw);
    }

    /// Record an indexed indirect draw of every written command.
    ///
    /// # Safety
    /// `cmd` must be recording inside a rendering scope with a pipeline bound.
    pub unsafe fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.written > 0 {
            device.cmd_draw_indexed_indirect(
                cmd,
                self.storage.handle(),
                0,
                self.written,
                DrawCommand::STRIDE as u32,
            );
        }
    }

    /// Free the backing buffer.
    pub fn destroy(&mut self, ctx: &DeviceContext) -> Result<()> {
        self.storage.destroy(ctx)
    }
}

impl<S: HostWritable> IndirectCommandTable<S> {
    /// Wrap existing storage. Capacity is clamped to what the storage can hold.
    pub fn with_storage(storage: S, capacity: u32) -> Self {
        let fits = u32::try_from(storage.byte_size() / DrawCommand::STRIDE).unwrap_or(u32::MAX);
        Self {
            storage,
            capacity: capacity.min(fits),
            written: 0,
        }
    }

    /// Rewind the write cursor. Existing bytes are left in place.
    pub fn reset(&mut self) {
        self.written = 0;
    }

    /// Append a draw command. Returns false once the table is full.
    pub fn add_command(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> bool {
        self.push(DrawCommand {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        })
    }

    /// Append a prepared draw command. Returns false once the table is full.
    pub fn push(&mut self, command: DrawCommand) -> bool {
        if self.written >= self.capacity {
            tracing::warn!(capacity = self.capacity, "Max indirect command count reached");
            return false;
        }
        let offset = u64::from(self.written) * DrawCommand::STRIDE;
        if !self.storage.write(offset, bytemuck::bytes_of(&command)) {
            return false;
        }
        self.written += 1;
        true
    }

    pub fn commands_written(&self) -> u32 {
        self.written
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.written >= self.capacity
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HostStorage(Vec<u8>);

    impl HostWritable for HostStorage {
        fn byte_size(&self) -> u64 {
            self.0.len() as u64
        }

        fn host_bytes_mut(&mut self) -> Option<&mut [u8]> {
            Some(&mut self.0)
        }
    }

    #[test]
    fn stride_is_twenty_bytes() {
        assert_eq!(DrawCommand::STRIDE, 20);
    }

    #[test]
    fn capacity_plus_one_is_rejected() {
        let capacity = 10;
        let mut table =
            IndirectCommandTable::with_storage(HostStorage(vec![0; capacity * 20]), capacity as u32);

        for i in 0..capacity as u32 {
            assert!(table.add_command(6, 1, i * 6, 0, i));
        }
        assert!(table.is_full());
        assert!(!table.add_command(6, 1, 0, 0, 0));
        assert_eq!(table.commands_written(), capacity as u32);
    }

    #[test]
    fn never_writes_past_capacity() {
        const SENTINEL: u8 = 0xAB;
        let capacity = 4u32;
        let used = capacity as usize * 20;
        let mut bytes = vec![0u8; used + 64];
        bytes[used..].fill(SENTINEL);

        // Storage is larger than the table; the tail must stay untouched.
        let mut table = IndirectCommandTable::with_storage(HostStorage(bytes), capacity);
        for _ in 0..=capacity {
            table.add_command(u32::MAX, u32::MAX, u32::MAX, -1, u32::MAX);
        }

        let storage = &table.storage().0;
        assert!(storage[..used].iter().all(|&b| b == 0xFF));
        assert!(storage[used..].iter().all(|&b| b == SENTINEL));
    }

    #[test]
    fn records_are_laid_out_at_stride() {
        let mut table = IndirectCommandTable::with_storage(HostStorage(vec![0; 40]), 2);
        assert!(table.add_command(3, 1, 0, 0, 0));
        assert!(table.add_command(6, 2, 3, -4, 1));

        let second: DrawCommand = bytemuck::pod_read_unaligned(&table.storage().0[20..40]);
        assert_eq!(
            second,
            DrawCommand {
                index_count: 6,
                instance_count: 2,
                first_index: 3,
                vertex_offset: -4,
                first_instance: 1,
            }
        );
    }

    #[test]
    fn reset_rewinds_cursor() {
        let mut table = IndirectCommandTable::with_storage(HostStorage(vec![0; 20]), 1);
        assert!(table.add_command(1, 1, 0, 0, 0));
        assert!(!table.add_command(1, 1, 0, 0, 0));
        table.reset();
        assert_eq!(table.commands_written(), 0);
        assert!(table.add_command(2, 1, 0, 0, 0));
    }

    #[test]
    fn capacity_clamped_to_storage() {
        let table = IndirectCommandTable::with_storage(HostStorage(vec![0; 50]), 10);
        assert_eq!(table.capacity(), 2);
    }
}
