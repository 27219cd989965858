// Backend module - Vulkan abstraction layer
//
// Design: thin wrappers around ash behind the `Gpu` trait
// Ownership: the frame loop owns swapchain, slots and command pool;
// VulkanDevice owns instance, device and surface

pub mod commands;
pub mod device;
pub mod gpu;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use commands::CommandRecycler;
pub use device::VulkanDevice;
pub use gpu::{Gpu, WaitStage};
pub use swapchain::{AcquireOutcome, PresentModePreference, PresentOutcome, Swapchain};
pub use sync::{FenceState, FramePool, FrameSlot, IdleBarrier};
