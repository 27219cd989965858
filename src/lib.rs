// frameloop - frame pipelining and host/GPU synchronization for Vulkan
//
// N frame slots, each with a fence, two semaphores and a command buffer,
// cycled by a single controller:
//
//   FrameLoop::render_frame
//     1. wait on the slot's fence, then reset it
//     2. acquire a swapchain image (recreate once on out-of-date)
//     3. recycle the slot's command buffer, let the caller record
//     4. submit: wait image-acquired, signal render-finished + fence
//     5. present on render-finished
//     6. advance the frame cursor
//
// Everything GPU-facing goes through the `Gpu` trait; `VulkanDevice` is the
// ash implementation.

pub mod backend;
pub mod config;
pub mod error;
pub mod frame_loop;
pub mod timer;

#[cfg(test)]
mod testing;

pub use backend::{Gpu, Swapchain, VulkanDevice, WaitStage};
pub use config::Config;
pub use error::{FrameError, FrameResult};
pub use frame_loop::{CyclePhase, FrameCursor, FrameLoop, FrameLoopSettings, FrameStatus, FrameTarget};
pub use timer::FrameTimer;
