//! The per-frame acquire, record, submit and present cycle.
//!
//! [`FrameLoop`] owns the frame ring and drives a [`PresentBackend`]. The
//! Vulkan backend is [`SwapchainPresenter`](crate::SwapchainPresenter); tests
//! drive the same state machine with a scripted backend.
//!
//! Swapchain staleness (out-of-date or suboptimal) never surfaces as an
//! error. It triggers a rebuild and, at acquire, skips the frame. A rebuild
//! requested while the framebuffer is zero-sized stays pending: the loop
//! sleeps for the configured back-off and retries at the next acquire.

use crate::buffer::GpuBuffer;
use crate::command::SubmitBatch;
use crate::error::{GpuError, Result};
use crate::frame::{AcquireOutcome, FrameContext, FrameRing, FrameSlot, SlotState};
use ash::prelude::VkResult;
use ash::vk;
use std::time::Duration;

/// Device operations the frame loop needs.
pub trait PresentBackend {
    /// Block until `fence` is signaled.
    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<()>;

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<()>;

    /// Acquire the next swapchain image, signaling `signal` when it is ready.
    /// Returns the image index and the suboptimal flag.
    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> VkResult<(u32, bool)>;

    fn begin_commands(&mut self, cmd: vk::CommandBuffer) -> Result<()>;

    fn end_commands(&mut self, cmd: vk::CommandBuffer) -> Result<()>;

    fn submit(&mut self, batch: &SubmitBatch) -> Result<()>;

    /// Present `image_index` once `wait` is signaled. Returns the suboptimal flag.
    fn present(&mut self, wait: vk::Semaphore, image_index: u32) -> VkResult<bool>;

    /// Current size of the window's drawable area.
    fn framebuffer_extent(&self) -> vk::Extent2D;

    /// Extent of the live swapchain images.
    fn swapchain_extent(&self) -> vk::Extent2D;

    fn wait_idle(&mut self) -> Result<()>;

    /// Replace the swapchain with one sized to `extent`. Called only after
    /// [`wait_idle`](Self::wait_idle).
    fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> Result<()>;
}

/// Outcome of an image acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

/// Split an acquire result into success, staleness and fatal errors.
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> Result<AcquireStatus> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireStatus::Ready {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::OutOfDate),
        Err(e) => Err(GpuError::Vulkan(e)),
    }
}

/// Outcome of a present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    /// Out-of-date or suboptimal; the swapchain should be rebuilt.
    Stale,
}

/// Split a present result into success, staleness and fatal errors.
pub fn classify_present(result: VkResult<bool>) -> Result<PresentStatus> {
    match result {
        Ok(false) => Ok(PresentStatus::Presented),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::Stale),
        Err(e) => Err(GpuError::Vulkan(e)),
    }
}

/// Frame ring plus swapchain lifecycle driver.
pub struct FrameLoop<B: PresentBackend> {
    backend: B,
    ring: FrameRing,
    recreate_requested: bool,
    recreate_backoff: Duration,
    image_index: Option<u32>,
    frame_number: u64,
}

impl<B: PresentBackend> FrameLoop<B> {
    /// Drive `backend` with the given slots. `slots` must not be empty.
    pub fn new(backend: B, slots: Vec<FrameSlot>, recreate_backoff: Duration) -> Result<Self> {
        if slots.is_empty() {
            return Err(GpuError::InvalidConfig(
                "frame loop needs at least one frame slot".to_string(),
            ));
        }
        Ok(Self {
            backend,
            ring: FrameRing::new(slots),
            recreate_requested: false,
            recreate_backoff,
            image_index: None,
            frame_number: 0,
        })
    }

    /// Wait for the current slot, then acquire the next swapchain image.
    ///
    /// A pending rebuild is applied first. Returns
    /// [`AcquireOutcome::Skipped`] when the rebuild is still deferred or the
    /// swapchain turned out to be stale; the slot is left idle in both cases.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn acquire_image(&mut self) -> Result<AcquireOutcome> {
        if self.recreate_requested && !self.recreate_swapchain()? {
            return Ok(AcquireOutcome::Skipped);
        }

        let slot_index = self.ring.current_index();
        let slot = self.ring.current();
        if !matches!(slot.state, SlotState::Idle | SlotState::Submitted) {
            return Err(GpuError::InvalidState(format!(
                "acquire on frame slot {slot_index} in state {:?}",
                slot.state
            )));
        }
        let (fence, image_available, command_buffer) =
            (slot.in_flight, slot.image_available, slot.command_buffer);

        self.backend.wait_for_fence(fence)?;
        self.ring.current_mut().state = SlotState::Idle;

        match classify_acquire(self.backend.acquire_next_image(image_available))? {
            AcquireStatus::OutOfDate => {
                tracing::debug!("Swapchain out of date at acquire, skipping frame");
                self.recreate_requested = true;
                self.recreate_swapchain()?;
                Ok(AcquireOutcome::Skipped)
            }
            AcquireStatus::Ready {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    tracing::trace!("Acquired suboptimal swapchain image");
                }
                // Reset only once an image is in hand so a skipped frame
                // leaves the fence signaled.
                self.backend.reset_fence(fence)?;
                self.ring.current_mut().state = SlotState::Acquiring;
                self.image_index = Some(image_index);

                Ok(AcquireOutcome::Frame(FrameContext {
                    slot_index,
                    image_index,
                    command_buffer,
                    frame_number: self.frame_number,
                    extent: self.backend.swapchain_extent(),
                }))
            }
        }
    }

    /// Begin recording the current slot's command buffer.
    pub fn start_recording(&mut self) -> Result<vk::CommandBuffer> {
        self.expect_state(SlotState::Acquiring, "start recording")?;
        let cmd = self.ring.current().command_buffer;
        self.backend.begin_commands(cmd)?;
        self.ring.current_mut().state = SlotState::Recording;
        Ok(cmd)
    }

    /// Close the current slot's command buffer.
    pub fn stop_recording(&mut self) -> Result<()> {
        self.expect_state(SlotState::Recording, "stop recording")?;
        self.backend.end_commands(self.ring.current().command_buffer)?;
        self.ring.current_mut().state = SlotState::Recorded;
        Ok(())
    }

    /// Submit the recorded command buffer. Exactly once per acquired image.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn submit(&mut self) -> Result<()> {
        self.expect_state(SlotState::Recorded, "submit")?;
        let slot = self.ring.current();
        let batch = SubmitBatch {
            wait_semaphore: slot.image_available,
            command_buffer: slot.command_buffer,
            signal_semaphore: slot.render_finished,
            fence: slot.in_flight,
        };
        self.backend.submit(&batch)?;
        self.ring.current_mut().state = SlotState::Submitted;
        Ok(())
    }

    /// Present the acquired image and advance to the next slot.
    ///
    /// A stale swapchain is rebuilt here; the frame still counts as presented.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn present_image(&mut self) -> Result<()> {
        self.expect_state(SlotState::Submitted, "present")?;
        let image_index = self.image_index.take().ok_or_else(|| {
            GpuError::InvalidState("present without an acquired image".to_string())
        })?;

        let wait = self.ring.current().render_finished;
        if classify_present(self.backend.present(wait, image_index))? == PresentStatus::Stale {
            tracing::debug!("Swapchain stale at present");
            self.recreate_requested = true;
            self.recreate_swapchain()?;
        }

        self.ring.advance();
        self.frame_number += 1;
        Ok(())
    }

    /// Ask for a swapchain rebuild at the next acquire.
    pub fn request_recreate(&mut self) {
        self.recreate_requested = true;
    }

    pub fn recreate_pending(&self) -> bool {
        self.recreate_requested
    }

    /// Rebuild the swapchain now if the framebuffer has a non-zero size.
    ///
    /// Returns false, after sleeping for the back-off, when the framebuffer is
    /// zero-sized; the request then stays pending. While an image is acquired
    /// and not yet presented the request also stays pending, without sleeping,
    /// and is applied at the next acquire.
    pub fn recreate_swapchain(&mut self) -> Result<bool> {
        let mid_frame = matches!(
            self.ring.current().state,
            SlotState::Acquiring | SlotState::Recording | SlotState::Recorded
        );
        if mid_frame || self.image_index.is_some() {
            tracing::debug!("Image outstanding, deferring swapchain rebuild to next acquire");
            self.recreate_requested = true;
            return Ok(false);
        }

        let extent = self.backend.framebuffer_extent();
        if extent.width == 0 || extent.height == 0 {
            tracing::warn!(
                backoff_ms = self.recreate_backoff.as_millis(),
                "Framebuffer is zero-sized, deferring swapchain rebuild"
            );
            self.recreate_requested = true;
            std::thread::sleep(self.recreate_backoff);
            return Ok(false);
        }

        self.backend.wait_idle()?;
        self.backend.rebuild_swapchain(extent)?;
        self.recreate_requested = false;
        tracing::info!(
            width = extent.width,
            height = extent.height,
            "Swapchain rebuilt"
        );
        Ok(true)
    }

    /// Index of the current frame slot, in `[0, frames_in_flight)`.
    pub fn current_frame(&self) -> usize {
        self.ring.current_index()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.ring.len()
    }

    /// Number of frames presented so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn current_slot(&self) -> &FrameSlot {
        self.ring.current()
    }

    /// Uniform buffer of the current slot, if uniform buffers were created.
    pub fn uniform_buffer_mut(&mut self) -> Option<&mut GpuBuffer> {
        self.ring.current_mut().uniform.as_mut()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub(crate) fn ring_mut(&mut self) -> &mut FrameRing {
        &mut self.ring
    }

    fn expect_state(&self, expected: SlotState, action: &str) -> Result<()> {
        let state = self.ring.current().state;
        if state == expected {
            Ok(())
        } else {
            Err(GpuError::InvalidState(format!(
                "cannot {action}: frame slot {} is {state:?}, expected {expected:?}",
                self.ring.current_index()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::FramebufferExtent;
    use ash::vk::Handle;
    use std::collections::{HashMap, VecDeque};

    /// In-memory backend: submissions retire instantly, acquires and presents
    /// can be scripted.
    struct MockBackend {
        fences: HashMap<u64, bool>,
        framebuffer: FramebufferExtent,
        swapchain_extent: vk::Extent2D,
        image_count: u32,
        next_image: u32,
        acquire_script: VecDeque<VkResult<(u32, bool)>>,
        present_script: VecDeque<VkResult<bool>>,
        rebuilds: Vec<vk::Extent2D>,
        submitted_fences: Vec<vk::Fence>,
        presents: usize,
        idle_waits: usize,
    }

    impl MockBackend {
        fn new(framebuffer: FramebufferExtent) -> Self {
            let extent = framebuffer.get();
            Self {
                fences: HashMap::new(),
                framebuffer,
                swapchain_extent: extent,
                image_count: 3,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                rebuilds: Vec::new(),
                submitted_fences: Vec::new(),
                presents: 0,
                idle_waits: 0,
            }
        }
    }

    impl PresentBackend for MockBackend {
        fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<()> {
            if self.fences.get(&fence.as_raw()).copied().unwrap_or(false) {
                Ok(())
            } else {
                Err(GpuError::InvalidState("wait on unsignaled fence would block forever".into()))
            }
        }

        fn reset_fence(&mut self, fence: vk::Fence) -> Result<()> {
            self.fences.insert(fence.as_raw(), false);
            Ok(())
        }

        fn acquire_next_image(&mut self, _signal: vk::Semaphore) -> VkResult<(u32, bool)> {
            if let Some(scripted) = self.acquire_script.pop_front() {
                return scripted;
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok((index, false))
        }

        fn begin_commands(&mut self, _cmd: vk::CommandBuffer) -> Result<()> {
            Ok(())
        }

        fn end_commands(&mut self, _cmd: vk::CommandBuffer) -> Result<()> {
            Ok(())
        }

        fn submit(&mut self, batch: &SubmitBatch) -> Result<()> {
            if self.fences.get(&batch.fence.as_raw()).copied().unwrap_or(false) {
                return Err(GpuError::InvalidState("submit with signaled fence".into()));
            }
            self.submitted_fences.push(batch.fence);
            // Work retires immediately.
            self.fences.insert(batch.fence.as_raw(), true);
            Ok(())
        }

        fn present(&mut self, _wait: vk::Semaphore, _image_index: u32) -> VkResult<bool> {
            self.presents += 1;
            self.present_script.pop_front().unwrap_or(Ok(false))
        }

        fn framebuffer_extent(&self) -> vk::Extent2D {
            self.framebuffer.get()
        }

        fn swapchain_extent(&self) -> vk::Extent2D {
            self.swapchain_extent
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.idle_waits += 1;
            Ok(())
        }

        fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> Result<()> {
            self.rebuilds.push(extent);
            self.swapchain_extent = extent;
            self.next_image = 0;
            Ok(())
        }
    }

    fn slots(count: u64, backend: &mut MockBackend) -> Vec<FrameSlot> {
        (0..count)
            .map(|i| {
                let fence = vk::Fence::from_raw(100 + i);
                // Fences start signaled.
                backend.fences.insert(fence.as_raw(), true);
                FrameSlot::from_handles(
                    vk::Semaphore::from_raw(200 + i),
                    vk::Semaphore::from_raw(300 + i),
                    fence,
                    vk::CommandBuffer::from_raw(400 + i),
                )
            })
            .collect()
    }

    fn frame_loop(frames: u64, framebuffer: &FramebufferExtent) -> FrameLoop<MockBackend> {
        let mut backend = MockBackend::new(framebuffer.clone());
        let slots = slots(frames, &mut backend);
        FrameLoop::new(backend, slots, Duration::ZERO).unwrap()
    }

    /// One full cycle. Returns false when the frame was skipped.
    fn run_frame(frame_loop: &mut FrameLoop<MockBackend>) -> Result<bool> {
        match frame_loop.acquire_image()? {
            AcquireOutcome::Skipped => Ok(false),
            AcquireOutcome::Frame(frame) => {
                assert_eq!(frame.slot_index, frame_loop.current_frame());
                let cmd = frame_loop.start_recording()?;
                assert_eq!(cmd, frame.command_buffer);
                frame_loop.stop_recording()?;
                frame_loop.submit()?;
                frame_loop.present_image()?;
                Ok(true)
            }
        }
    }

    #[test]
    fn ring_returns_to_first_slot_after_k_frames() {
        for k in 2..=4u64 {
            let framebuffer = FramebufferExtent::new(800, 600);
            let mut frame_loop = frame_loop(k, &framebuffer);

            for _ in 0..k {
                assert!(run_frame(&mut frame_loop).unwrap());
            }
            assert_eq!(frame_loop.current_frame(), 0);
            assert_eq!(frame_loop.frame_number(), k);

            let fences = &frame_loop.backend().submitted_fences;
            let mut unique: Vec<u64> = fences.iter().map(|f| f.as_raw()).collect();
            unique.sort_unstable();
            unique.dedup();
            assert_eq!(unique.len(), k as usize, "slots must not share a fence");
        }
    }

    #[test]
    fn out_of_date_acquire_rebuilds_and_skips() {
        let framebuffer = FramebufferExtent::new(800, 600);
        let mut frame_loop = frame_loop(2, &framebuffer);
        frame_loop
            .backend_mut()
            .acquire_script
            .push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));

        assert!(!run_frame(&mut frame_loop).unwrap());
        assert_eq!(frame_loop.backend().rebuilds.len(), 1);
        assert_eq!(frame_loop.current_frame(), 0);
        assert_eq!(frame_loop.current_slot().state, SlotState::Idle);
        assert!(!frame_loop.recreate_pending());

        // The fence was not reset, so the retry does not block.
        assert!(run_frame(&mut frame_loop).unwrap());
        assert_eq!(frame_loop.current_frame(), 1);
    }

    #[test]
    fn suboptimal_acquire_is_success() {
        let framebuffer = FramebufferExtent::new(800, 600);
        let mut frame_loop = frame_loop(2, &framebuffer);
        frame_loop.backend_mut().acquire_script.push_back(Ok((1, true)));

        match frame_loop.acquire_image().unwrap() {
            AcquireOutcome::Frame(frame) => assert_eq!(frame.image_index, 1),
            AcquireOutcome::Skipped => panic!("suboptimal acquire must not skip"),
        }
        assert!(frame_loop.backend().rebuilds.is_empty());
    }

    #[test]
    fn other_acquire_errors_are_fatal() {
        let framebuffer = FramebufferExtent::new(800, 600);
        let mut frame_loop = frame_loop(2, &framebuffer);
        frame_loop
            .backend_mut()
            .acquire_script
            .push_back(Err(vk::Result::ERROR_DEVICE_LOST));

        assert!(matches!(
            frame_loop.acquire_image(),
            Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        ));
    }

    #[test]
    fn zero_framebuffer_defers_rebuild() {
        let framebuffer = FramebufferExtent::new(800, 600);
        let mut frame_loop = frame_loop(2, &framebuffer);

        framebuffer.set(0, 0);
        frame_loop.request_recreate();
        assert!(!run_frame(&mut frame_loop).unwrap());
        assert!(!run_frame(&mut frame_loop).unwrap());
        assert!(frame_loop.backend().rebuilds.is_empty());
        assert_eq!(frame_loop.backend().idle_waits, 0);
        assert!(frame_loop.recreate_pending());

        framebuffer.set(1280, 720);
        assert!(run_frame(&mut frame_loop).unwrap());
        assert_eq!(
            frame_loop.backend().rebuilds,
            vec![vk::Extent2D {
                width: 1280,
                height: 720
            }]
        );
        assert!(!frame_loop.recreate_pending());
    }

    #[test]
    fn stale_present_rebuilds_and_advances() {
        let framebuffer = FramebufferExtent::new(800, 600);
        let mut frame_loop = frame_loop(3, &framebuffer);
        frame_loop.backend_mut().present_script.push_back(Ok(true));
        frame_loop
            .backend_mut()
            .present_script
            .push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));

        assert!(run_frame(&mut frame_loop).unwrap());
        assert!(run_frame(&mut frame_loop).unwrap());
        assert_eq!(frame_loop.backend().rebuilds.len(), 2);
        assert_eq!(frame_loop.current_frame(), 2);
    }

    #[test]
    fn present_failure_is_fatal() {
        let framebuffer = FramebufferExtent::new(800, 600);
        let mut frame_loop = frame_loop(2, &framebuffer);
        frame_loop
            .backend_mut()
            .present_script
            .push_back(Err(vk::Result::ERROR_SURFACE_LOST_KHR));

        assert!(matches!(
            run_frame(&mut frame_loop),
            Err(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))
        ));
        assert_eq!(frame_loop.current_frame(), 0);
        assert_eq!(frame_loop.frame_number(), 0);
        assert!(frame_loop.backend().rebuilds.is_empty());
    }

    #[test]
    fn rebuild_waits_for_outstanding_image() {
        let framebuffer = FramebufferExtent::new(800, 600);
        let mut frame_loop = frame_loop(2, &framebuffer);

        frame_loop.acquire_image().unwrap();
        assert!(!frame_loop.recreate_swapchain().unwrap());
        frame_loop.start_recording().unwrap();
        assert!(!frame_loop.recreate_swapchain().unwrap());
        frame_loop.stop_recording().unwrap();
        assert!(!frame_loop.recreate_swapchain().unwrap());
        frame_loop.submit().unwrap();
        assert!(!frame_loop.recreate_swapchain().unwrap());
        assert!(frame_loop.backend().rebuilds.is_empty());
        assert!(frame_loop.recreate_pending());

        // The acquired image is presented on the swapchain it came from.
        frame_loop.present_image().unwrap();
        assert!(frame_loop.backend().rebuilds.is_empty());
        assert_eq!(frame_loop.backend().presents, 1);

        // The pending request lands at the next acquire.
        assert!(run_frame(&mut frame_loop).unwrap());
        assert_eq!(frame_loop.backend().rebuilds.len(), 1);
        assert!(!frame_loop.recreate_pending());
    }

    #[test]
    fn double_submit_is_rejected() {
        let framebuffer = FramebufferExtent::new(800, 600);
        let mut frame_loop = frame_loop(2, &framebuffer);

        assert!(matches!(
            frame_loop.acquire_image().unwrap(),
            AcquireOutcome::Frame(_)
        ));
        frame_loop.start_recording().unwrap();
        frame_loop.stop_recording().unwrap();
        frame_loop.submit().unwrap();
        assert!(matches!(frame_loop.submit(), Err(GpuError::InvalidState(_))));
        assert_eq!(frame_loop.backend().submitted_fences.len(), 1);
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let framebuffer = FramebufferExtent::new(800, 600);
        let mut frame_loop = frame_loop(2, &framebuffer);

        assert!(frame_loop.start_recording().is_err());
        assert!(frame_loop.submit().is_err());
        assert!(frame_loop.present_image().is_err());

        frame_loop.acquire_image().unwrap();
        assert!(frame_loop.submit().is_err());
        assert!(matches!(
            frame_loop.acquire_image(),
            Err(GpuError::InvalidState(_))
        ));
    }

    #[test]
    fn empty_ring_is_rejected() {
        let framebuffer = FramebufferExtent::new(800, 600);
        let backend = MockBackend::new(framebuffer);
        assert!(matches!(
            FrameLoop::new(backend, Vec::new(), Duration::ZERO),
            Err(GpuError::InvalidConfig(_))
        ));
    }

    #[test]
    fn thousand_cycles_with_resize() {
        let framebuffer = FramebufferExtent::new(800, 600);
        let mut frame_loop = frame_loop(3, &framebuffer);
        let mut presented = 0;

        for cycle in 0..1000 {
            if cycle == 500 {
                framebuffer.set(1280, 720);
                frame_loop.request_recreate();
                frame_loop
                    .backend_mut()
                    .acquire_script
                    .push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
            }

            if run_frame(&mut frame_loop).unwrap() {
                presented += 1;
            }
            assert!(frame_loop.current_frame() < 3);
        }

        let backend = frame_loop.backend();
        assert_eq!(backend.presents, presented);
        assert!(presented >= 998);
        assert!(backend.rebuilds.iter().all(|e| e.width == 1280 && e.height == 720));
        assert!(!backend.rebuilds.is_empty());
        assert_eq!(backend.swapchain_extent.width, 1280);
        assert_eq!(frame_loop.frame_number(), presented as u64);
    }
}
