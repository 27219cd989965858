// Frame errors - what the frame loop can fail with
//
// Swapchain out-of-date/suboptimal are NOT errors; they are outcomes
// (see AcquireOutcome / PresentOutcome) and are absorbed by the frame loop.
// Everything in here reaches the caller.

use ash::vk;
use thiserror::Error;

/// Error type for the frame pipelining core
#[derive(Error, Debug)]
pub enum FrameError {
    /// A fence, semaphore, command pool, swapchain or view could not be created
    #[error("failed to create {what}: {result}")]
    ResourceCreation {
        what: &'static str,
        result: vk::Result,
    },

    /// The logical device is gone; only a full teardown can recover
    #[error("device lost")]
    DeviceLost,

    /// A bounded wait expired
    #[error("timed out waiting for {what}")]
    Timeout { what: &'static str },

    /// The caller broke the usage contract of the frame loop
    #[error("contract violation: {0}")]
    ContractViolation(&'static str),

    /// Surface cannot be presented to
    #[error("surface error: {0}")]
    Surface(String),

    /// The command-recording callback failed
    #[error("command recording failed: {0}")]
    Recording(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// Any other Vulkan failure
    #[error("{what} failed: {result}")]
    Vulkan {
        what: &'static str,
        result: vk::Result,
    },
}

impl FrameError {
    /// Classify a raw Vulkan result from a non-creating call
    pub fn from_vk(what: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost,
            vk::Result::TIMEOUT | vk::Result::NOT_READY => FrameError::Timeout { what },
            _ => FrameError::Vulkan { what, result },
        }
    }

    /// Classify a raw Vulkan result from a create/allocate call
    pub fn creation(what: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost,
            _ => FrameError::ResourceCreation { what, result },
        }
    }

    /// Whether the frame loop can keep going after this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::Timeout { .. })
    }
}

/// Result alias used throughout the core
pub type FrameResult<T> = std::result::Result<T, FrameError>;
