// Frame loop - wait, acquire, record, submit, present
//
// One cycle per displayed frame, driven from a single host thread. The CPU
// records frame k+1 while the GPU still runs frame k; at most N submissions
// are ever outstanding because each cycle starts by waiting on the fence of
// the slot it is about to reuse.
//
// Out-of-date and suboptimal swapchains are absorbed here. Timeouts are
// reported per cycle and escalate to device loss when they keep happening.
// Anything else halts the loop; after that only `shutdown` is valid.

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::commands::CommandRecycler;
use crate::backend::gpu::{Gpu, WaitStage};
use crate::backend::swapchain::{negotiated_extent, AcquireOutcome, PresentModePreference, Swapchain};
use crate::backend::sync::{FramePool, IdleBarrier};
use crate::error::{FrameError, FrameResult};

/// Tunables for a frame loop
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLoopSettings {
    /// Pipelining depth N
    pub frames_in_flight: usize,
    pub present_mode: PresentModePreference,
    pub wait_stage: WaitStage,
    pub fence_timeout: Duration,
    pub acquire_timeout: Duration,
    /// Timeouts in a row before the device is treated as lost
    pub max_consecutive_timeouts: u32,
    pub clear_color: [f32; 4],
}

impl Default for FrameLoopSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            present_mode: PresentModePreference::LowLatency,
            wait_stage: WaitStage::ColorAttachmentOutput,
            fence_timeout: Duration::from_secs(2),
            acquire_timeout: Duration::from_secs(2),
            max_consecutive_timeouts: 3,
            clear_color: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Monotonic frame counter; the slot for a frame is `counter mod N`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor {
    counter: u64,
    depth: usize,
}

impl FrameCursor {
    pub fn new(depth: usize) -> Self {
        Self { counter: 0, depth }
    }

    /// Number of the frame the next cycle will produce
    pub fn frame(&self) -> u64 {
        self.counter
    }

    pub fn slot(&self) -> usize {
        (self.counter % self.depth as u64) as usize
    }

    fn advance(&mut self) {
        self.counter += 1;
    }
}

/// Where the current (or last) cycle got to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    WaitingOnFence,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// Everything the recording callback needs for one frame
#[derive(Debug, Clone, Copy)]
pub struct FrameTarget {
    /// Already in the recording state; the loop ends it
    pub command_buffer: vk::CommandBuffer,
    pub image_index: u32,
    pub image: vk::Image,
    pub image_view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub slot: usize,
    pub frame: u64,
    pub clear_color: [f32; 4],
}

/// How a call to `render_frame` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Submitted and queued for presentation. `suboptimal` means the
    /// swapchain no longer matches the surface and will be rebuilt before
    /// the next acquire.
    Presented {
        frame: u64,
        slot: usize,
        image_index: u32,
        suboptimal: bool,
    },
    /// Nothing was rendered: the window is minimized, the surface has no
    /// area yet, or the swapchain stayed out of date through recreation
    Skipped,
    /// A bounded wait expired; nothing was submitted
    TimedOut,
}

pub struct FrameLoop<G: Gpu + ?Sized> {
    gpu: Arc<G>,
    settings: FrameLoopSettings,
    // None only after a failed recreation, which halts the loop
    swapchain: Option<Swapchain>,
    pool: FramePool,
    recycler: CommandRecycler,
    cursor: FrameCursor,
    phase: CyclePhase,
    /// Window extent as last reported
    extent: vk::Extent2D,
    recreate_pending: bool,
    recreations: u64,
    consecutive_timeouts: u32,
    halted: bool,
}

fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

impl<G: Gpu + ?Sized> FrameLoop<G> {
    /// Build the swapchain, the slot pool and the command recycler.
    ///
    /// On failure everything created so far is released again.
    pub fn new(gpu: Arc<G>, extent: vk::Extent2D, settings: FrameLoopSettings) -> FrameResult<Self> {
        if settings.frames_in_flight == 0 {
            return Err(FrameError::ContractViolation("frames_in_flight must be at least 1"));
        }

        let mut swapchain = Swapchain::create(&*gpu, extent, settings.present_mode)?;
        let [r, g, b, a] = settings.clear_color;
        swapchain.set_clear_value(r, g, b, a, 1.0, 0);

        let pool = match FramePool::create(&*gpu, settings.frames_in_flight) {
            Ok(pool) => pool,
            Err(e) => {
                if let Ok(barrier) = IdleBarrier::wait(&*gpu) {
                    swapchain.destroy(&*gpu, &barrier);
                }
                return Err(e);
            }
        };

        let recycler = match CommandRecycler::new(&*gpu) {
            Ok(recycler) => recycler,
            Err(e) => {
                let mut pool = pool;
                if let Ok(barrier) = pool.wait_idle(&*gpu) {
                    // Nothing was submitted, the pool is idle
                    let _ = pool.destroy(&*gpu, &barrier);
                    swapchain.destroy(&*gpu, &barrier);
                }
                return Err(e);
            }
        };

        log::info!(
            "Frame loop ready: {} frames in flight, {} swapchain images, waiting at {:?}",
            settings.frames_in_flight,
            swapchain.image_count(),
            settings.wait_stage
        );

        Ok(Self {
            gpu,
            cursor: FrameCursor::new(settings.frames_in_flight),
            settings,
            swapchain: Some(swapchain),
            pool,
            recycler,
            phase: CyclePhase::Idle,
            extent,
            recreate_pending: false,
            recreations: 0,
            consecutive_timeouts: 0,
            halted: false,
        })
    }

    /// Run one frame cycle, handing `record` a command buffer to fill.
    pub fn render_frame<F, E>(&mut self, record: F) -> FrameResult<FrameStatus>
    where
        F: FnOnce(&FrameTarget) -> Result<(), E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if self.halted {
            return Err(FrameError::ContractViolation("frame loop halted after a fatal error"));
        }

        match self.run_cycle(record) {
            Ok(status) => Ok(status),
            Err(e) if !e.is_fatal() => self.on_timeout(&e),
            Err(e) => {
                log::error!("Frame loop halted in {:?}: {}", self.phase, e);
                self.halted = true;
                Err(e)
            }
        }
    }

    fn on_timeout(&mut self, error: &FrameError) -> FrameResult<FrameStatus> {
        self.consecutive_timeouts += 1;
        log::warn!(
            "{} on frame {} ({} in a row)",
            error,
            self.cursor.frame(),
            self.consecutive_timeouts
        );

        if self.consecutive_timeouts >= self.settings.max_consecutive_timeouts {
            log::error!("GPU stopped making progress, treating the device as lost");
            self.halted = true;
            return Err(FrameError::DeviceLost);
        }
        Ok(FrameStatus::TimedOut)
    }

    fn run_cycle<F, E>(&mut self, record: F) -> FrameResult<FrameStatus>
    where
        F: FnOnce(&FrameTarget) -> Result<(), E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if self.is_minimized() {
            self.enter(CyclePhase::Idle);
            return Ok(FrameStatus::Skipped);
        }

        let gpu = Arc::clone(&self.gpu);
        let gpu = &*gpu;

        if self.recreate_pending && !self.recreate(gpu)? {
            self.enter(CyclePhase::Idle);
            return Ok(FrameStatus::Skipped);
        }

        let slot = self.cursor.slot();
        let frame = self.cursor.frame();

        // 1. The slot's previous submission must be done before anything of it is touched
        self.enter(CyclePhase::WaitingOnFence);
        {
            let frame_slot = self.pool.slot_mut(slot);
            frame_slot.wait(gpu, timeout_ns(self.settings.fence_timeout))?;
            frame_slot.reset(gpu)?;
        }

        // 2. Acquire
        self.enter(CyclePhase::Acquiring);
        let Some((image_index, acquire_suboptimal)) = self.acquire(gpu, slot)? else {
            return Ok(FrameStatus::Skipped);
        };
        log::trace!("Frame {}: slot {} acquired image {}", frame, slot, image_index);

        // 3. Record
        self.enter(CyclePhase::Recording);
        let command_buffer = self.recycler.recycle(gpu, self.pool.slot_mut(slot))?;
        let target = {
            let swapchain = self.live_swapchain()?;
            FrameTarget {
                command_buffer,
                image_index,
                image: swapchain.images()[image_index as usize],
                image_view: swapchain.image_views()[image_index as usize],
                extent: swapchain.extent(),
                format: swapchain.format(),
                slot,
                frame,
                clear_color: swapchain.clear_values().color,
            }
        };
        record(&target).map_err(|e| FrameError::Recording(e.into()))?;
        gpu.end_command_buffer(command_buffer)
            .map_err(|r| FrameError::from_vk("end command buffer", r))?;

        // 4. Submit
        self.pool.submit(gpu, slot, self.settings.wait_stage.flags())?;
        self.enter(CyclePhase::Submitted);

        // 5. Present. A failure here leaves the phase at Submitted: the
        // work is queued but the image never reached the presentation engine.
        let render_finished = self.pool.slot(slot).render_finished();
        let outcome = self.live_swapchain_mut()?.present(gpu, render_finished, image_index)?;
        self.enter(CyclePhase::Presenting);

        let suboptimal = acquire_suboptimal || outcome.needs_recreation();
        if suboptimal {
            log::debug!("Swapchain stale after frame {} ({:?}), recreating", frame, outcome);
            self.recreate_pending = true;
        }

        // 6. Advance
        self.cursor.advance();
        self.consecutive_timeouts = 0;
        self.enter(CyclePhase::Idle);

        Ok(FrameStatus::Presented {
            frame,
            slot,
            image_index,
            suboptimal,
        })
    }

    /// `None` when the swapchain is still out of date after one rebuild
    fn acquire(&mut self, gpu: &G, slot: usize) -> FrameResult<Option<(u32, bool)>> {
        let semaphore = self.pool.slot(slot).image_acquired();
        let timeout = timeout_ns(self.settings.acquire_timeout);

        let first = self.live_swapchain_mut()?.acquire_next(gpu, semaphore, timeout)?;
        let outcome = match first {
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire, recreating");
                if !self.recreate(gpu)? {
                    return Ok(None);
                }
                self.live_swapchain_mut()?.acquire_next(gpu, semaphore, timeout)?
            }
            outcome => outcome,
        };

        match outcome {
            AcquireOutcome::Acquired { index } => Ok(Some((index, false))),
            AcquireOutcome::Suboptimal { index } => Ok(Some((index, true))),
            AcquireOutcome::Timeout => Err(FrameError::Timeout {
                what: "swapchain image",
            }),
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain still out of date after recreation, skipping frame");
                self.recreate_pending = true;
                Ok(None)
            }
        }
    }

    /// Rebuild the swapchain behind an idle barrier. Returns `false` and
    /// leaves the old swapchain alone while the surface has no area; the
    /// rebuild stays pending until it does.
    fn recreate(&mut self, gpu: &G) -> FrameResult<bool> {
        let extent = negotiated_extent(gpu, self.extent)?;
        if extent.width == 0 || extent.height == 0 {
            log::debug!(
                "Surface is {}x{}, postponing swapchain recreation",
                extent.width,
                extent.height
            );
            self.recreate_pending = true;
            return Ok(false);
        }

        let barrier = self.pool.wait_idle(gpu)?;
        let old = self
            .swapchain
            .take()
            .ok_or(FrameError::ContractViolation("no swapchain to recreate"))?;

        let swapchain = old.recreate(gpu, &barrier, self.extent)?;
        log::info!(
            "Recreated swapchain: {}x{}, {} images",
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.image_count()
        );

        self.swapchain = Some(swapchain);
        self.recreate_pending = false;
        self.recreations += 1;
        Ok(true)
    }

    fn enter(&mut self, phase: CyclePhase) {
        log::trace!("Frame {}: {:?}", self.cursor.frame(), phase);
        self.phase = phase;
    }

    /// Resize signal from the windowing layer. A zero-area extent pauses
    /// rendering until a real size arrives.
    pub fn resize(&mut self, width: u32, height: u32) {
        log::debug!("Resize to {}x{}", width, height);
        self.extent = vk::Extent2D { width, height };
        self.recreate_pending = true;
    }

    /// Rebuild the swapchain at the start of the next cycle
    pub fn request_recreate(&mut self) {
        self.recreate_pending = true;
    }

    /// Idle the device and destroy everything the loop owns, surface last
    pub fn shutdown(self) -> FrameResult<()> {
        let FrameLoop {
            gpu,
            mut pool,
            recycler,
            swapchain,
            cursor,
            ..
        } = self;
        let gpu = &*gpu;

        let barrier = pool.wait_idle(gpu)?;
        pool.destroy(gpu, &barrier)?;
        recycler.destroy(gpu, &barrier);
        match swapchain {
            Some(swapchain) => swapchain.destroy_with_surface(gpu, &barrier),
            None => gpu.destroy_surface(),
        }

        log::info!("Frame loop shut down after {} frames", cursor.frame());
        Ok(())
    }

    fn live_swapchain(&self) -> FrameResult<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or(FrameError::ContractViolation("no swapchain"))
    }

    fn live_swapchain_mut(&mut self) -> FrameResult<&mut Swapchain> {
        self.swapchain
            .as_mut()
            .ok_or(FrameError::ContractViolation("no swapchain"))
    }

    pub fn gpu(&self) -> &Arc<G> {
        &self.gpu
    }

    pub fn settings(&self) -> &FrameLoopSettings {
        &self.settings
    }

    pub fn cursor(&self) -> FrameCursor {
        self.cursor
    }

    pub fn frames_in_flight(&self) -> usize {
        self.pool.len()
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    /// `None` only after a failed recreation halted the loop
    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    pub fn is_minimized(&self) -> bool {
        self.extent.width == 0 || self.extent.height == 0
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }
}
