// Mock GPU - records every call and checks synchronization hazards
//
// A submission stays pending until the host waits on its fence or idles the
// device: the slowest GPU the host could be paired with. Hazards are recorded
// as violations instead of panicking so tests can assert on all of them.

use std::collections::{HashMap, HashSet};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;

use crate::backend::gpu::{Gpu, Submission, SurfaceSupport, SwapchainRequest};

/// Result injected into a specific acquire or present call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    OutOfDate,
    Suboptimal,
    Timeout,
    Fail(vk::Result),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CreateFence { signaled: bool },
    DestroyFence,
    WaitFence { fence: u64, blocked: bool },
    ResetFence { fence: u64 },
    CreateSemaphore,
    DestroySemaphore,
    CreateCommandPool,
    DestroyCommandPool,
    AllocateCommandBuffer { buffer: u64 },
    FreeCommandBuffer { buffer: u64 },
    BeginCommandBuffer { buffer: u64 },
    EndCommandBuffer { buffer: u64 },
    Submit { buffer: u64, fence: u64, wait_stage: vk::PipelineStageFlags },
    WaitIdle,
    SurfaceSupport,
    CreateSwapchain { min_image_count: u32, present_mode: vk::PresentModeKHR },
    DestroySwapchain,
    CreateImageView,
    DestroyImageView,
    Acquire { image_index: Option<u32> },
    Present { image_index: u32 },
    DestroySurface,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    events: Vec<Event>,
    violations: Vec<String>,

    fences: HashMap<u64, bool>,
    // (fence, command buffer) per submission the "GPU" has not finished
    pending: Vec<(u64, u64)>,
    max_pending: usize,
    blocking_waits: usize,
    in_flight_limit: usize,

    semaphores: HashSet<u64>,
    semaphore_attempts: usize,
    fail_semaphore_at: Option<usize>,
    command_pools: HashSet<u64>,
    // buffer -> (pool, recording)
    command_buffers: HashMap<u64, (u64, bool)>,

    surface_alive: bool,
    support: SurfaceSupport,
    swapchains: HashMap<u64, u32>,
    next_image: HashMap<u64, u32>,
    acquired: HashSet<(u64, u32)>,
    views: HashSet<u64>,

    acquire_calls: usize,
    present_calls: usize,
    acquire_script: HashMap<usize, Scripted>,
    present_script: HashMap<usize, Scripted>,

    hung: bool,
    device_lost: bool,
}

impl MockState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn violation(&mut self, message: impl Into<String>) {
        self.violations.push(message.into());
    }

    fn require_idle(&mut self, what: &str) {
        if !self.pending.is_empty() {
            self.violation(format!("{what} while GPU work is pending"));
        }
    }

    fn buffer_in_flight(&self, buffer: u64) -> bool {
        self.pending.iter().any(|&(_, b)| b == buffer)
    }

    fn complete(&mut self, fence: u64) {
        self.pending.retain(|&(f, _)| f != fence);
        self.fences.insert(fence, true);
    }
}

/// In-memory stand-in for a device, its graphics queue and a surface
pub struct MockGpu {
    state: Mutex<MockState>,
}

pub fn default_support() -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST,
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

impl MockGpu {
    /// Mock that flags more than `in_flight_limit` pending submissions
    pub fn new(in_flight_limit: usize) -> Self {
        Self::with_support(in_flight_limit, default_support())
    }

    pub fn with_support(in_flight_limit: usize, support: SurfaceSupport) -> Self {
        Self {
            state: Mutex::new(MockState {
                in_flight_limit,
                support,
                surface_alive: true,
                ..MockState::default()
            }),
        }
    }

    // ── scripting ─────────────────────────────────────────────────────────

    /// Inject a result into the `call`-th acquire (0-based, counting every attempt)
    pub fn script_acquire(&self, call: usize, result: Scripted) {
        self.state.lock().acquire_script.insert(call, result);
    }

    /// Inject a result into the `call`-th present (0-based)
    pub fn script_present(&self, call: usize, result: Scripted) {
        self.state.lock().present_script.insert(call, result);
    }

    /// Fence waits on pending work time out until `recover`
    pub fn hang(&self) {
        self.state.lock().hung = true;
    }

    pub fn recover(&self) {
        self.state.lock().hung = false;
    }

    pub fn lose_device(&self) {
        self.state.lock().device_lost = true;
    }

    /// The `attempt`-th semaphore creation (0-based) fails with host OOM
    pub fn fail_semaphore_creation_at(&self, attempt: usize) {
        self.state.lock().fail_semaphore_at = Some(attempt);
    }

    pub fn set_support(&self, support: SurfaceSupport) {
        self.state.lock().support = support;
    }

    // ── inspection ────────────────────────────────────────────────────────

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn max_pending(&self) -> usize {
        self.state.lock().max_pending
    }

    pub fn blocking_waits(&self) -> usize {
        self.state.lock().blocking_waits
    }

    pub fn submissions(&self) -> usize {
        self.count(|e| matches!(e, Event::Submit { .. }))
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| pred(e)).count()
    }

    /// Fences, semaphores, pools, buffers, swapchains and views still alive
    pub fn live_objects(&self) -> usize {
        let s = self.state.lock();
        s.fences.len()
            + s.semaphores.len()
            + s.command_pools.len()
            + s.command_buffers.len()
            + s.swapchains.len()
            + s.views.len()
    }

    pub fn surface_alive(&self) -> bool {
        self.state.lock().surface_alive
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> Option<bool> {
        self.state.lock().fences.get(&fence.as_raw()).copied()
    }
}

impl Gpu for MockGpu {
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut s = self.state.lock();
        let h = s.handle();
        s.fences.insert(h, signaled);
        s.events.push(Event::CreateFence { signaled });
        Ok(vk::Fence::from_raw(h))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut s = self.state.lock();
        s.require_idle("fence destroyed");
        s.fences.remove(&fence.as_raw());
        s.events.push(Event::DestroyFence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        let mut s = self.state.lock();
        if s.device_lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        let id = fence.as_raw();
        let signaled = match s.fences.get(&id).copied() {
            Some(signaled) => signaled,
            None => {
                s.violation("wait on an unknown fence");
                return Err(vk::Result::ERROR_UNKNOWN);
            }
        };
        if signaled {
            s.events.push(Event::WaitFence { fence: id, blocked: false });
            return Ok(());
        }
        if !s.pending.iter().any(|&(f, _)| f == id) {
            s.violation("wait on a fence that nothing will signal");
            return Err(vk::Result::TIMEOUT);
        }
        s.events.push(Event::WaitFence { fence: id, blocked: true });
        if s.hung {
            return Err(vk::Result::TIMEOUT);
        }
        s.blocking_waits += 1;
        s.complete(id);
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.state.lock();
        let id = fence.as_raw();
        if s.pending.iter().any(|&(f, _)| f == id) {
            s.violation("reset a fence that is still in flight");
        }
        s.fences.insert(id, false);
        s.events.push(Event::ResetFence { fence: id });
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut s = self.state.lock();
        let attempt = s.semaphore_attempts;
        s.semaphore_attempts += 1;
        if s.fail_semaphore_at == Some(attempt) {
            return Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        }
        let h = s.handle();
        s.semaphores.insert(h);
        s.events.push(Event::CreateSemaphore);
        Ok(vk::Semaphore::from_raw(h))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut s = self.state.lock();
        s.require_idle("semaphore destroyed");
        s.semaphores.remove(&semaphore.as_raw());
        s.events.push(Event::DestroySemaphore);
    }

    fn create_command_pool(&self, _queue_family: u32) -> VkResult<vk::CommandPool> {
        let mut s = self.state.lock();
        let h = s.handle();
        s.command_pools.insert(h);
        s.events.push(Event::CreateCommandPool);
        Ok(vk::CommandPool::from_raw(h))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut s = self.state.lock();
        s.require_idle("command pool destroyed");
        let id = pool.as_raw();
        s.command_pools.remove(&id);
        s.command_buffers.retain(|_, &mut (p, _)| p != id);
        s.events.push(Event::DestroyCommandPool);
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let mut s = self.state.lock();
        let pool = pool.as_raw();
        if !s.command_pools.contains(&pool) {
            s.violation("allocation from an unknown command pool");
        }
        let h = s.handle();
        s.command_buffers.insert(h, (pool, false));
        s.events.push(Event::AllocateCommandBuffer { buffer: h });
        Ok(vk::CommandBuffer::from_raw(h))
    }

    fn free_command_buffer(&self, _pool: vk::CommandPool, buffer: vk::CommandBuffer) {
        let mut s = self.state.lock();
        let id = buffer.as_raw();
        if s.buffer_in_flight(id) {
            s.violation("freed a command buffer the GPU is still executing");
        }
        s.command_buffers.remove(&id);
        s.events.push(Event::FreeCommandBuffer { buffer: id });
    }

    fn begin_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.state.lock();
        let id = buffer.as_raw();
        if s.buffer_in_flight(id) {
            s.violation("re-recorded a command buffer the GPU is still executing");
        }
        if s.command_buffers.contains_key(&id) {
            if let Some(entry) = s.command_buffers.get_mut(&id) {
                entry.1 = true;
            }
        } else {
            s.violation("began an unknown command buffer");
        }
        s.events.push(Event::BeginCommandBuffer { buffer: id });
        Ok(())
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.state.lock();
        let id = buffer.as_raw();
        let recording = s.command_buffers.get(&id).map_or(false, |&(_, recording)| recording);
        if recording {
            if let Some(entry) = s.command_buffers.get_mut(&id) {
                entry.1 = false;
            }
        } else {
            s.violation("ended a command buffer that was not recording");
        }
        s.events.push(Event::EndCommandBuffer { buffer: id });
        Ok(())
    }

    fn graphics_queue_family(&self) -> u32 {
        0
    }

    fn submit(&self, submission: &Submission) -> VkResult<()> {
        let mut s = self.state.lock();
        if s.device_lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        let fence = submission.fence.as_raw();
        let buffer = submission.command_buffer.as_raw();
        if s.fences.get(&fence).copied().unwrap_or(true) {
            s.violation("submitted with a fence that is not unsignaled");
        }
        if s.pending.iter().any(|&(f, _)| f == fence) {
            s.violation("submitted twice against the same fence");
        }
        if s.command_buffers.get(&buffer).map_or(true, |&(_, recording)| recording) {
            s.violation("submitted a command buffer that is not executable");
        }
        let wait = submission.wait_semaphore.as_raw();
        let signal = submission.signal_semaphore.as_raw();
        if !s.semaphores.contains(&wait) || !s.semaphores.contains(&signal) {
            s.violation("submitted with an unknown semaphore");
        }
        s.pending.push((fence, buffer));
        s.max_pending = s.max_pending.max(s.pending.len());
        if s.pending.len() > s.in_flight_limit {
            s.violation("more submissions in flight than frame slots");
        }
        s.events.push(Event::Submit {
            buffer,
            fence,
            wait_stage: submission.wait_stage,
        });
        Ok(())
    }

    fn wait_idle(&self) -> VkResult<()> {
        let mut s = self.state.lock();
        if s.device_lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        let fences: Vec<u64> = s.pending.iter().map(|&(f, _)| f).collect();
        for fence in fences {
            s.complete(fence);
        }
        s.events.push(Event::WaitIdle);
        Ok(())
    }

    fn surface_support(&self) -> VkResult<SurfaceSupport> {
        let mut s = self.state.lock();
        s.events.push(Event::SurfaceSupport);
        Ok(s.support.clone())
    }

    fn create_swapchain(&self, request: &SwapchainRequest) -> VkResult<vk::SwapchainKHR> {
        let mut s = self.state.lock();
        if !s.surface_alive {
            s.violation("swapchain created on a destroyed surface");
        }
        if !s.swapchains.is_empty() {
            s.violation("surface already owns a swapchain");
        }
        let h = s.handle();
        s.swapchains.insert(h, request.min_image_count);
        s.events.push(Event::CreateSwapchain {
            min_image_count: request.min_image_count,
            present_mode: request.present_mode,
        });
        Ok(vk::SwapchainKHR::from_raw(h))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut s = self.state.lock();
        let count = s.swapchains.get(&swapchain.as_raw()).copied().unwrap_or(0);
        Ok((0..count).map(|_| vk::Image::from_raw(s.handle())).collect())
    }

    fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        let mut s = self.state.lock();
        let h = s.handle();
        s.views.insert(h);
        s.events.push(Event::CreateImageView);
        Ok(vk::ImageView::from_raw(h))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut s = self.state.lock();
        s.require_idle("image view destroyed");
        s.views.remove(&view.as_raw());
        s.events.push(Event::DestroyImageView);
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut s = self.state.lock();
        s.require_idle("swapchain destroyed");
        if !s.views.is_empty() {
            s.violation("swapchain destroyed before its image views");
        }
        let id = swapchain.as_raw();
        s.swapchains.remove(&id);
        s.acquired.retain(|&(sc, _)| sc != id);
        s.events.push(Event::DestroySwapchain);
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _semaphore: vk::Semaphore,
        _timeout_ns: u64,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.state.lock();
        if s.device_lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        let call = s.acquire_calls;
        s.acquire_calls += 1;
        let id = swapchain.as_raw();
        let count = match s.swapchains.get(&id).copied() {
            Some(count) => count,
            None => {
                s.violation("acquire on a destroyed swapchain");
                return Err(vk::Result::ERROR_UNKNOWN);
            }
        };

        let suboptimal = match s.acquire_script.remove(&call) {
            Some(Scripted::OutOfDate) => {
                s.events.push(Event::Acquire { image_index: None });
                return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
            }
            Some(Scripted::Timeout) => {
                s.events.push(Event::Acquire { image_index: None });
                return Err(vk::Result::TIMEOUT);
            }
            Some(Scripted::Fail(result)) => {
                s.events.push(Event::Acquire { image_index: None });
                return Err(result);
            }
            Some(Scripted::Suboptimal) => true,
            None => false,
        };

        let index = s.next_image.get(&id).copied().unwrap_or(0);
        s.next_image.insert(id, (index + 1) % count.max(1));
        s.acquired.insert((id, index));
        s.events.push(Event::Acquire { image_index: Some(index) });
        Ok((index, suboptimal))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        _wait_semaphore: vk::Semaphore,
        image_index: u32,
    ) -> VkResult<bool> {
        let mut s = self.state.lock();
        if s.device_lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        let call = s.present_calls;
        s.present_calls += 1;
        if !s.acquired.remove(&(swapchain.as_raw(), image_index)) {
            s.violation("presented an image that was not acquired");
        }
        s.events.push(Event::Present { image_index });
        match s.present_script.remove(&call) {
            Some(Scripted::OutOfDate) => Err(vk::Result::ERROR_OUT_OF_DATE_KHR),
            Some(Scripted::Suboptimal) => Ok(true),
            Some(Scripted::Timeout) => Err(vk::Result::TIMEOUT),
            Some(Scripted::Fail(result)) => Err(result),
            None => Ok(false),
        }
    }

    fn destroy_surface(&self) {
        let mut s = self.state.lock();
        if !s.swapchains.is_empty() {
            s.violation("surface destroyed before its swapchain");
        }
        s.surface_alive = false;
        s.events.push(Event::DestroySurface);
    }
}
