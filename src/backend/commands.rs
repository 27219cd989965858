// Command buffer recycling - a fresh primary buffer per slot per cycle
//
// Buffers come from one pool bound to the graphics queue family. Each cycle
// the slot's previous buffer is freed and a new one allocated and begun
// (one-time submit). Freeing is only legal once the slot's fence has been
// observed signaled.

use ash::vk;

use super::gpu::Gpu;
use super::sync::{FrameSlot, IdleBarrier};
use crate::error::{FrameError, FrameResult};

pub struct CommandRecycler {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandRecycler {
    pub fn new<G: Gpu + ?Sized>(gpu: &G) -> FrameResult<Self> {
        let queue_family = gpu.graphics_queue_family();
        let pool = gpu
            .create_command_pool(queue_family)
            .map_err(|r| FrameError::creation("command pool", r))?;

        log::debug!("Created command pool for queue family {}", queue_family);
        Ok(Self { pool, queue_family })
    }

    pub fn pool(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Replace the slot's command buffer with a new one in the recording state
    pub fn recycle<G: Gpu + ?Sized>(
        &self,
        gpu: &G,
        slot: &mut FrameSlot,
    ) -> FrameResult<vk::CommandBuffer> {
        if !slot.is_idle() {
            return Err(FrameError::ContractViolation(
                "command buffer recycled before its fence signaled",
            ));
        }

        let old = slot.replace_command_buffer(vk::CommandBuffer::null());
        if old != vk::CommandBuffer::null() {
            gpu.free_command_buffer(self.pool, old);
        }

        let buffer = gpu
            .allocate_command_buffer(self.pool)
            .map_err(|r| FrameError::creation("command buffer", r))?;
        slot.replace_command_buffer(buffer);

        gpu.begin_command_buffer(buffer)
            .map_err(|r| FrameError::from_vk("begin command buffer", r))?;
        Ok(buffer)
    }

    /// Destroying the pool frees every buffer still allocated from it
    pub fn destroy<G: Gpu + ?Sized>(self, gpu: &G, _barrier: &IdleBarrier) {
        gpu.destroy_command_pool(self.pool);
        log::debug!("Destroyed command pool");
    }
}
