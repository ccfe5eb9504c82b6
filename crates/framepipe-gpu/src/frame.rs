//! Frame-in-flight slots and the ring that cycles through them.

use crate::buffer::GpuBuffer;
use crate::command::CommandPool;
use crate::context::DeviceContext;
use crate::error::Result;
use ash::vk;

/// Lifecycle of one frame slot.
///
/// `Idle -> Acquiring -> Recording -> Recorded -> Submitted -> Idle`. A slot
/// stays `Submitted` after present until its fence is waited on at the next
/// acquire that lands on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signaled, no image held.
    Idle,
    /// Image acquired, recording not started.
    Acquiring,
    Recording,
    /// Recording closed, not yet submitted.
    Recorded,
    /// Work queued; fence unsignaled until it retires.
    Submitted,
}

/// Per-frame synchronization objects, command buffer and resources.
pub struct FrameSlot {
    /// Signaled when the acquired image is ready to be rendered to.
    pub image_available: vk::Semaphore,
    /// Signaled when this slot's submission completes; waited on by present.
    pub render_finished: vk::Semaphore,
    /// Signaled when this slot's submission retires. Created signaled.
    pub in_flight: vk::Fence,
    pub command_buffer: vk::CommandBuffer,
    /// Optional per-frame uniform buffer.
    pub uniform: Option<GpuBuffer>,
    pub state: SlotState,
}

impl FrameSlot {
    /// Create a slot's semaphores, pre-signaled fence and command buffer.
    ///
    /// # Safety
    /// `pool` must belong to `device`.
    pub unsafe fn new(device: &ash::Device, pool: &CommandPool) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let image_available = device.create_semaphore(&semaphore_info, None)?;
        let render_finished = device.create_semaphore(&semaphore_info, None)?;
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let in_flight = device.create_fence(&fence_info, None)?;
        let command_buffer = pool.allocate(device, 1)?[0];

        Ok(Self::from_handles(
            image_available,
            render_finished,
            in_flight,
            command_buffer,
        ))
    }

    /// Wrap existing handles in an idle slot.
    pub fn from_handles(
        image_available: vk::Semaphore,
        render_finished: vk::Semaphore,
        in_flight: vk::Fence,
        command_buffer: vk::CommandBuffer,
    ) -> Self {
        Self {
            image_available,
            render_finished,
            in_flight,
            command_buffer,
            uniform: None,
            state: SlotState::Idle,
        }
    }

    /// Destroy the slot's objects and uniform buffer.
    ///
    /// # Safety
    /// The slot's fence must be signaled (its work retired).
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext, pool: &CommandPool) -> Result<()> {
        if let Some(mut uniform) = self.uniform.take() {
            uniform.destroy(ctx)?;
        }
        let device = ctx.device();
        pool.free(device, &[self.command_buffer]);
        device.destroy_semaphore(self.image_available, None);
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_fence(self.in_flight, None);
        Ok(())
    }
}

/// K frame slots and the index of the current one.
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    current: usize,
}

impl FrameRing {
    /// Build a ring over `slots`. The ring must not be empty.
    pub fn new(slots: Vec<FrameSlot>) -> Self {
        debug_assert!(!slots.is_empty(), "frame ring needs at least one slot");
        Self { slots, current: 0 }
    }

    /// Index of the current slot, always in `[0, len)`.
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    /// Move to the next slot, wrapping after the last.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [FrameSlot] {
        &mut self.slots
    }

    /// Take all slots out of the ring, leaving it empty.
    pub fn drain(&mut self) -> Vec<FrameSlot> {
        self.current = 0;
        std::mem::take(&mut self.slots)
    }

    /// Drain the ring and run `destroy` on every slot.
    ///
    /// A failing slot does not stop the others from being destroyed. The
    /// first error is returned once all slots were visited.
    pub fn destroy_each<F>(&mut self, mut destroy: F) -> Result<()>
    where
        F: FnMut(usize, &mut FrameSlot) -> Result<()>,
    {
        let mut first_error = None;
        for (index, mut slot) in self.drain().into_iter().enumerate() {
            if let Err(e) = destroy(index, &mut slot) {
                tracing::error!(slot = index, "Failed to destroy frame slot: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// What the caller records against after a successful acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    /// Index of the frame slot in the ring.
    pub slot_index: usize,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    pub command_buffer: vk::CommandBuffer,
    /// Frames presented before this one.
    pub frame_number: u64,
    pub extent: vk::Extent2D,
}

/// Result of [`FrameLoop::acquire_image`](crate::FrameLoop::acquire_image).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; record, submit and present it.
    Frame(FrameContext),
    /// No image this time (swapchain stale or framebuffer zero-sized). The
    /// caller simply tries again next frame.
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn slot(i: u64) -> FrameSlot {
        FrameSlot::from_handles(
            vk::Semaphore::from_raw(i * 10 + 1),
            vk::Semaphore::from_raw(i * 10 + 2),
            vk::Fence::from_raw(i * 10 + 3),
            vk::CommandBuffer::from_raw(i * 10 + 4),
        )
    }

    #[test]
    fn ring_wraps_modulo_len() {
        let mut ring = FrameRing::new((0..3).map(slot).collect());
        let fences: Vec<_> = (0..7)
            .map(|_| {
                let fence = ring.current().in_flight;
                ring.advance();
                fence
            })
            .collect();
        assert_eq!(fences[0], fences[3]);
        assert_eq!(fences[1], fences[4]);
        assert_ne!(fences[0], fences[1]);
        assert_eq!(ring.current_index(), 1);
    }

    #[test]
    fn new_slots_are_idle() {
        let slot = slot(0);
        assert_eq!(slot.state, SlotState::Idle);
        assert!(slot.uniform.is_none());
    }

    #[test]
    fn drain_empties_ring() {
        let mut ring = FrameRing::new((0..2).map(slot).collect());
        ring.advance();
        let slots = ring.drain();
        assert_eq!(slots.len(), 2);
        assert!(ring.is_empty());
        assert_eq!(ring.current_index(), 0);
    }

    #[test]
    fn destroy_each_visits_every_slot_after_a_failure() {
        let mut ring = FrameRing::new((0..3).map(slot).collect());
        let mut visited = Vec::new();

        let result = ring.destroy_each(|index, slot| {
            visited.push(slot.in_flight);
            if index == 1 {
                Err(crate::error::GpuError::InvalidState("slot 1".to_string()))
            } else {
                Ok(())
            }
        });

        assert!(matches!(result, Err(crate::error::GpuError::InvalidState(m)) if m == "slot 1"));
        assert_eq!(visited.len(), 3);
        assert!(ring.is_empty());
        assert!(ring.destroy_each(|_, _| Ok(())).is_ok());
    }
}
