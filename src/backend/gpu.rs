// GPU interface - the narrow device/queue/presentation surface of the core
//
// The frame loop never calls ash directly. Everything it does on the GPU
// goes through `Gpu`, which uses raw Vulkan handles and `VkResult` exactly
// like ash does. VulkanDevice implements it over a real device.

use ash::prelude::VkResult;
use ash::vk;

/// Pipeline stage at which a submission waits for its acquired image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitStage {
    /// Graphics submissions: first write to the image is a color attachment write
    #[default]
    ColorAttachmentOutput,
    /// Compute-then-graphics submissions: first write is a storage write
    ComputeShader,
}

impl WaitStage {
    pub fn flags(self) -> vk::PipelineStageFlags {
        match self {
            WaitStage::ColorAttachmentOutput => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            WaitStage::ComputeShader => vk::PipelineStageFlags::COMPUTE_SHADER,
        }
    }
}

/// A single queue submission as issued by the frame loop
#[derive(Debug, Clone, Copy)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore signaled by the presentation engine when the image is free
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    /// Semaphore the present call waits on
    pub signal_semaphore: vk::Semaphore,
    /// Host-waitable completion fence
    pub fence: vk::Fence,
}

/// Surface properties, queried together before (re)creating a swapchain
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Swapchain parameters picked by the negotiator
#[derive(Debug, Clone, Copy)]
pub struct SwapchainRequest {
    pub min_image_count: u32,
    pub image_format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Device, graphics queue and presentation surface as seen by the core.
///
/// All calls are made from the single thread driving the frame loop.
pub trait Gpu {
    // ── sync objects ──────────────────────────────────────────────────────
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Block until `fence` signals. `Err(vk::Result::TIMEOUT)` once `timeout_ns` passes.
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // ── commands ──────────────────────────────────────────────────────────
    fn create_command_pool(&self, queue_family: u32) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer>;
    fn free_command_buffer(&self, pool: vk::CommandPool, buffer: vk::CommandBuffer);
    /// Begin recording with one-time-submit usage
    fn begin_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()>;
    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()>;

    // ── queue ─────────────────────────────────────────────────────────────
    fn graphics_queue_family(&self) -> u32;
    fn submit(&self, submission: &Submission) -> VkResult<()>;
    fn wait_idle(&self) -> VkResult<()>;

    // ── presentation ──────────────────────────────────────────────────────
    fn surface_support(&self) -> VkResult<SurfaceSupport>;
    fn create_swapchain(&self, request: &SwapchainRequest) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// `Ok((index, suboptimal))`, or `Err(ERROR_OUT_OF_DATE_KHR | TIMEOUT | NOT_READY | ...)`
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> VkResult<(u32, bool)>;
    /// `Ok(suboptimal)`, or `Err(ERROR_OUT_OF_DATE_KHR | ...)`
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        wait_semaphore: vk::Semaphore,
        image_index: u32,
    ) -> VkResult<bool>;
    fn destroy_surface(&self);
}
