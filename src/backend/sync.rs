// Synchronization primitives - one slot per frame in flight
//
// A FrameSlot bundles what a single pipelining stage owns: the completion
// fence, the image-acquired and render-finished semaphores, and the command
// buffer recorded for it. FramePool is the fixed ring of N slots; the frame
// loop is the only thing that advances slot state.

use ash::vk;

use super::gpu::{Gpu, Submission};
use crate::error::{FrameError, FrameResult};

/// Host-side view of a slot's fence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    /// Signaled, no outstanding submission
    Signaled,
    /// Reset by the host, nothing submitted against it yet
    Reset,
    /// Submitted; the GPU signals it when the batch completes
    InFlight,
}

/// Proof that the device has been idled.
///
/// Destroy paths take one by reference; it cannot be built without a
/// successful device-wide wait.
#[derive(Debug)]
pub struct IdleBarrier {
    _private: (),
}

impl IdleBarrier {
    pub fn wait<G: Gpu + ?Sized>(gpu: &G) -> FrameResult<Self> {
        gpu.wait_idle()
            .map_err(|r| FrameError::from_vk("device wait idle", r))?;
        Ok(Self { _private: () })
    }
}

/// One pipelining stage
#[derive(Debug)]
pub struct FrameSlot {
    index: usize,
    fence: vk::Fence,
    fence_state: FenceState,
    image_acquired: vk::Semaphore,
    render_finished: vk::Semaphore,
    /// Null until the recycler hands out the first buffer
    command_buffer: vk::CommandBuffer,
    submissions: u64,
}

impl FrameSlot {
    fn new<G: Gpu + ?Sized>(gpu: &G, index: usize) -> FrameResult<Self> {
        // Start signaled: the first wait on this slot has nothing to wait for
        let fence = gpu
            .create_fence(true)
            .map_err(|r| FrameError::creation("frame fence", r))?;

        let image_acquired = match gpu.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(r) => {
                gpu.destroy_fence(fence);
                return Err(FrameError::creation("image-acquired semaphore", r));
            }
        };

        let render_finished = match gpu.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(r) => {
                gpu.destroy_semaphore(image_acquired);
                gpu.destroy_fence(fence);
                return Err(FrameError::creation("render-finished semaphore", r));
            }
        };

        Ok(Self {
            index,
            fence,
            fence_state: FenceState::Signaled,
            image_acquired,
            render_finished,
            command_buffer: vk::CommandBuffer::null(),
            submissions: 0,
        })
    }

    fn destroy<G: Gpu + ?Sized>(&self, gpu: &G) {
        gpu.destroy_semaphore(self.image_acquired);
        gpu.destroy_semaphore(self.render_finished);
        gpu.destroy_fence(self.fence);
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn fence(&self) -> vk::Fence {
        self.fence
    }

    pub fn fence_state(&self) -> FenceState {
        self.fence_state
    }

    pub fn image_acquired(&self) -> vk::Semaphore {
        self.image_acquired
    }

    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Number of submissions made from this slot so far
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    /// No GPU work from this slot can still be running
    pub fn is_idle(&self) -> bool {
        self.fence_state != FenceState::InFlight
    }

    /// Block until the slot's last submission has completed.
    ///
    /// A slot in `Reset` had its cycle aborted before submitting, so there is
    /// nothing to wait for and no GPU call is made.
    pub(crate) fn wait<G: Gpu + ?Sized>(&mut self, gpu: &G, timeout_ns: u64) -> FrameResult<()> {
        if self.fence_state == FenceState::Reset {
            log::trace!("Slot {} has no pending submission, skipping fence wait", self.index);
            return Ok(());
        }

        gpu.wait_for_fence(self.fence, timeout_ns)
            .map_err(|r| FrameError::from_vk("frame fence", r))?;
        self.fence_state = FenceState::Signaled;
        Ok(())
    }

    /// Return the fence to unsignaled ahead of this cycle's submission
    pub(crate) fn reset<G: Gpu + ?Sized>(&mut self, gpu: &G) -> FrameResult<()> {
        match self.fence_state {
            FenceState::Reset => Ok(()),
            FenceState::InFlight => Err(FrameError::ContractViolation(
                "fence reset while its submission is in flight",
            )),
            FenceState::Signaled => {
                gpu.reset_fence(self.fence)
                    .map_err(|r| FrameError::from_vk("fence reset", r))?;
                self.fence_state = FenceState::Reset;
                Ok(())
            }
        }
    }

    /// Swap in a freshly allocated buffer, handing back the previous one
    pub(crate) fn replace_command_buffer(&mut self, buffer: vk::CommandBuffer) -> vk::CommandBuffer {
        std::mem::replace(&mut self.command_buffer, buffer)
    }

    /// Submit the slot's recorded buffer: wait on image-acquired at
    /// `wait_stage`, signal render-finished and the slot fence.
    pub(crate) fn submit<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        wait_stage: vk::PipelineStageFlags,
    ) -> FrameResult<()> {
        if self.fence_state != FenceState::Reset {
            return Err(FrameError::ContractViolation(
                "submission without a waited and reset slot fence",
            ));
        }
        if self.command_buffer == vk::CommandBuffer::null() {
            return Err(FrameError::ContractViolation("submission without a command buffer"));
        }

        let submission = Submission {
            command_buffer: self.command_buffer,
            wait_semaphore: self.image_acquired,
            wait_stage,
            signal_semaphore: self.render_finished,
            fence: self.fence,
        };
        gpu.submit(&submission)
            .map_err(|r| FrameError::from_vk("queue submit", r))?;

        self.fence_state = FenceState::InFlight;
        self.submissions += 1;
        Ok(())
    }
}

/// Fixed ring of frame slots
#[derive(Debug)]
pub struct FramePool {
    slots: Vec<FrameSlot>,
}

impl FramePool {
    /// Create `count` slots, all with pre-signaled fences
    pub fn create<G: Gpu + ?Sized>(gpu: &G, count: usize) -> FrameResult<Self> {
        if count == 0 {
            return Err(FrameError::ContractViolation("frame pool needs at least one slot"));
        }

        let mut slots = Vec::with_capacity(count);
        for index in 0..count {
            match FrameSlot::new(gpu, index) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    // Nothing was submitted yet, so no barrier is needed
                    for slot in &slots {
                        slot.destroy(gpu);
                    }
                    return Err(e);
                }
            }
        }

        log::info!("Created frame pool with {} slots", count);
        Ok(Self { slots })
    }

    /// Idle the device and mark every slot idle
    pub fn wait_idle<G: Gpu + ?Sized>(&mut self, gpu: &G) -> FrameResult<IdleBarrier> {
        let barrier = IdleBarrier::wait(gpu)?;

        for slot in &mut self.slots {
            if slot.fence_state == FenceState::InFlight {
                slot.fence_state = FenceState::Signaled;
            }
        }
        Ok(barrier)
    }

    /// Destroy all slots. No slot may have been submitted since the pool
    /// last went idle.
    pub fn destroy<G: Gpu + ?Sized>(self, gpu: &G, _barrier: &IdleBarrier) -> FrameResult<()> {
        if self.slots.iter().any(|s| !s.is_idle()) {
            // Leaking beats destroying objects the GPU may still use
            log::error!("Frame pool destroy refused: work was submitted after the idle barrier");
            return Err(FrameError::ContractViolation(
                "frame pool destroyed without a device-idle barrier",
            ));
        }

        for slot in &self.slots {
            slot.destroy(gpu);
        }
        log::info!("Destroyed frame pool ({} slots)", self.slots.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// Submissions whose fence the host has not yet seen signal
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_idle()).count()
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut FrameSlot {
        &mut self.slots[index]
    }

    pub(crate) fn submit<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        index: usize,
        wait_stage: vk::PipelineStageFlags,
    ) -> FrameResult<()> {
        self.slots[index].submit(gpu, wait_stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, MockGpu};

    #[test]
    fn test_pool_creates_signaled_fences_and_two_semaphores_per_slot() {
        let gpu = MockGpu::new(3);
        let pool = FramePool::create(&gpu, 3).unwrap();

        assert_eq!(pool.len(), 3);
        assert_eq!(gpu.count(|e| *e == Event::CreateFence { signaled: true }), 3);
        assert_eq!(gpu.count(|e| *e == Event::CreateSemaphore), 6);
        for (i, slot) in pool.slots().iter().enumerate() {
            assert_eq!(slot.index(), i);
            assert_eq!(slot.fence_state(), FenceState::Signaled);
            assert_eq!(slot.command_buffer(), vk::CommandBuffer::null());
            assert_ne!(slot.image_acquired(), slot.render_finished());
        }
    }

    #[test]
    fn test_pool_rejects_zero_slots() {
        let gpu = MockGpu::new(1);
        assert!(matches!(
            FramePool::create(&gpu, 0),
            Err(FrameError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_failed_creation_releases_partial_pool() {
        let gpu = MockGpu::new(3);
        // Slot 1's render-finished semaphore
        gpu.fail_semaphore_creation_at(3);

        let err = FramePool::create(&gpu, 3).unwrap_err();
        assert!(matches!(
            err,
            FrameError::ResourceCreation { what: "render-finished semaphore", .. }
        ));
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn test_slot_state_transitions() {
        let gpu = MockGpu::new(1);
        let mut pool = FramePool::create(&gpu, 1).unwrap();
        let pool_handle = gpu.create_command_pool(0).unwrap();
        let buffer = gpu.allocate_command_buffer(pool_handle).unwrap();

        let slot = pool.slot_mut(0);
        slot.wait(&gpu, u64::MAX).unwrap();
        slot.reset(&gpu).unwrap();
        assert_eq!(slot.fence_state(), FenceState::Reset);

        slot.replace_command_buffer(buffer);
        gpu.begin_command_buffer(buffer).unwrap();
        gpu.end_command_buffer(buffer).unwrap();
        pool.submit(&gpu, 0, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .unwrap();

        assert_eq!(pool.slot(0).fence_state(), FenceState::InFlight);
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(pool.slot(0).submissions(), 1);

        // Resetting before the fence signals is refused
        assert!(matches!(
            pool.slot_mut(0).reset(&gpu),
            Err(FrameError::ContractViolation(_))
        ));

        pool.slot_mut(0).wait(&gpu, u64::MAX).unwrap();
        assert_eq!(pool.slot(0).fence_state(), FenceState::Signaled);
        assert_eq!(gpu.fence_signaled(pool.slot(0).fence()), Some(true));
        assert_eq!(gpu.blocking_waits(), 1);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn test_submit_requires_reset_fence() {
        let gpu = MockGpu::new(1);
        let mut pool = FramePool::create(&gpu, 1).unwrap();
        let err = pool
            .submit(&gpu, 0, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .unwrap_err();
        assert!(matches!(err, FrameError::ContractViolation(_)));
        assert_eq!(gpu.submissions(), 0);
    }

    #[test]
    fn test_wait_after_aborted_cycle_does_not_touch_gpu() {
        let gpu = MockGpu::new(1);
        let mut pool = FramePool::create(&gpu, 1).unwrap();
        let slot = pool.slot_mut(0);
        slot.wait(&gpu, u64::MAX).unwrap();
        slot.reset(&gpu).unwrap();
        gpu.clear_events();

        // Cycle aborted; the next wait must not block on an unsignaled fence
        slot.wait(&gpu, u64::MAX).unwrap();
        assert!(gpu.events().is_empty());
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn test_destroy_requires_fresh_barrier() {
        let gpu = MockGpu::new(1);
        let mut pool = FramePool::create(&gpu, 1).unwrap();
        let pool_handle = gpu.create_command_pool(0).unwrap();
        let buffer = gpu.allocate_command_buffer(pool_handle).unwrap();

        let stale = pool.wait_idle(&gpu).unwrap();

        let slot = pool.slot_mut(0);
        slot.wait(&gpu, u64::MAX).unwrap();
        slot.reset(&gpu).unwrap();
        slot.replace_command_buffer(buffer);
        gpu.begin_command_buffer(buffer).unwrap();
        gpu.end_command_buffer(buffer).unwrap();
        pool.submit(&gpu, 0, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .unwrap();

        let err = pool.destroy(&gpu, &stale).unwrap_err();
        assert!(matches!(err, FrameError::ContractViolation(_)));
        assert_eq!(gpu.count(|e| *e == Event::DestroyFence), 0);
    }

    #[test]
    fn test_destroy_after_barrier() {
        let gpu = MockGpu::new(2);
        let mut pool = FramePool::create(&gpu, 2).unwrap();
        let barrier = pool.wait_idle(&gpu).unwrap();
        pool.destroy(&gpu, &barrier).unwrap();

        assert_eq!(gpu.count(|e| *e == Event::DestroyFence), 2);
        assert_eq!(gpu.count(|e| *e == Event::DestroySemaphore), 4);
        assert_eq!(gpu.live_objects(), 0);
        assert!(gpu.violations().is_empty());
    }
}
