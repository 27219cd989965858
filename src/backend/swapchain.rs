// Swapchain - Window presentation
//
// Negotiates the chain of images we render to and present to the screen.
// A Swapchain value is never mutated after creation: recreation tears the
// old one down behind an idle barrier and runs the same `create` path as
// startup, so the negotiated policy cannot drift between the two.

use ash::vk;

use super::gpu::{Gpu, SurfaceSupport, SwapchainRequest};
use super::sync::IdleBarrier;
use crate::error::{FrameError, FrameResult};

/// Which present mode to ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentModePreference {
    /// MAILBOX, then IMMEDIATE: the host never blocks on vsync
    #[default]
    LowLatency,
    Mailbox,
    Immediate,
    Fifo,
    FifoRelaxed,
}

impl PresentModePreference {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "low_latency" => Some(Self::LowLatency),
            "mailbox" => Some(Self::Mailbox),
            "immediate" => Some(Self::Immediate),
            "fifo" => Some(Self::Fifo),
            "fifo_relaxed" => Some(Self::FifoRelaxed),
            _ => None,
        }
    }
}

/// Clear values re-applied to every swapchain built from this one
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
}

impl Default for ClearValues {
    fn default() -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 0.0],
            depth: 1.0,
            stencil: 0,
        }
    }
}

/// Result of asking the presentation engine for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { index: u32 },
    /// Usable this frame, recreate afterwards
    Suboptimal { index: u32 },
    /// No image; the swapchain must be recreated first
    OutOfDate,
    Timeout,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_recreation(self) -> bool {
        self != PresentOutcome::Presented
    }
}

// ── selection policies ────────────────────────────────────────────────────

const PREFERRED_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];

/// Prefer 32-bit BGRA, then RGBA, in the sRGB non-linear color space
pub fn select_surface_format(formats: &[vk::SurfaceFormatKHR]) -> FrameResult<vk::SurfaceFormatKHR> {
    let preferred = |format| vk::SurfaceFormatKHR {
        format,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    match formats {
        [] => Err(FrameError::Surface("surface reports no formats".to_string())),
        // A lone UNDEFINED entry: the surface takes whatever we ask for
        [only] if only.format == vk::Format::UNDEFINED => Ok(preferred(PREFERRED_FORMATS[0])),
        _ => {
            let found = PREFERRED_FORMATS.iter().find_map(|&format| {
                formats.iter().copied().find(|f| {
                    f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
                })
            });
            Ok(found.unwrap_or(formats[0]))
        }
    }
}

/// FIFO is the fallback; it is always supported
pub fn select_present_mode(
    modes: &[vk::PresentModeKHR],
    preference: PresentModePreference,
) -> vk::PresentModeKHR {
    let wanted: &[vk::PresentModeKHR] = match preference {
        PresentModePreference::LowLatency => {
            &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        }
        PresentModePreference::Mailbox => &[vk::PresentModeKHR::MAILBOX],
        PresentModePreference::Immediate => &[vk::PresentModeKHR::IMMEDIATE],
        PresentModePreference::Fifo => &[vk::PresentModeKHR::FIFO],
        PresentModePreference::FifoRelaxed => &[vk::PresentModeKHR::FIFO_RELAXED],
    };

    wanted
        .iter()
        .copied()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// One more than the minimum so the first acquire does not stall.
/// A max of 0 means unbounded.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Extent a swapchain built right now would get. Zero while the window is
/// minimized, even if no resize has arrived yet.
pub fn negotiated_extent<G: Gpu + ?Sized>(
    gpu: &G,
    requested: vk::Extent2D,
) -> FrameResult<vk::Extent2D> {
    let support = gpu
        .surface_support()
        .map_err(|r| FrameError::from_vk("surface query", r))?;
    Ok(select_extent(&support.capabilities, requested))
}

pub fn select_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

// ── swapchain ─────────────────────────────────────────────────────────────

pub struct Swapchain {
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    /// Images handed out by acquire and not yet presented
    acquired: Vec<bool>,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    capabilities: vk::SurfaceCapabilitiesKHR,
    preference: PresentModePreference,
    clear_values: ClearValues,
}

impl Swapchain {
    /// Negotiate and build a swapchain for the device's surface.
    ///
    /// Any failing step aborts the whole operation and releases what the
    /// earlier steps created.
    pub fn create<G: Gpu + ?Sized>(
        gpu: &G,
        requested: vk::Extent2D,
        preference: PresentModePreference,
    ) -> FrameResult<Self> {
        let SurfaceSupport {
            capabilities,
            formats,
            present_modes,
        } = gpu
            .surface_support()
            .map_err(|r| FrameError::from_vk("surface query", r))?;

        let surface_format = select_surface_format(&formats)?;
        let present_mode = select_present_mode(&present_modes, preference);
        let extent = select_extent(&capabilities, requested);
        let min_image_count = select_image_count(&capabilities);

        if extent.width == 0 || extent.height == 0 {
            return Err(FrameError::Surface(format!(
                "surface extent is {}x{}",
                extent.width, extent.height
            )));
        }

        log::info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} images requested",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            min_image_count
        );

        let request = SwapchainRequest {
            min_image_count,
            image_format: surface_format.format,
            color_space: surface_format.color_space,
            extent,
            present_mode,
            pre_transform: capabilities.current_transform,
        };
        let handle = gpu
            .create_swapchain(&request)
            .map_err(|r| FrameError::creation("swapchain", r))?;

        let images = match gpu.swapchain_images(handle) {
            Ok(images) => images,
            Err(r) => {
                gpu.destroy_swapchain(handle);
                return Err(FrameError::from_vk("swapchain image query", r));
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            match gpu.create_image_view(image, surface_format.format) {
                Ok(view) => image_views.push(view),
                Err(r) => {
                    for &view in &image_views {
                        gpu.destroy_image_view(view);
                    }
                    gpu.destroy_swapchain(handle);
                    return Err(FrameError::creation("swapchain image view", r));
                }
            }
        }

        log::info!("Created swapchain with {} images", images.len());

        Ok(Self {
            handle,
            acquired: vec![false; images.len()],
            images,
            image_views,
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode,
            extent,
            capabilities,
            preference,
            clear_values: ClearValues::default(),
        })
    }

    /// Destroy views then the swapchain. The surface stays alive.
    pub fn destroy<G: Gpu + ?Sized>(self, gpu: &G, _barrier: &IdleBarrier) {
        for &view in &self.image_views {
            gpu.destroy_image_view(view);
        }
        gpu.destroy_swapchain(self.handle);
        log::debug!("Destroyed swapchain ({} images)", self.images.len());
    }

    /// Final teardown: views, swapchain, then the presentation surface
    pub fn destroy_with_surface<G: Gpu + ?Sized>(self, gpu: &G, barrier: &IdleBarrier) {
        self.destroy(gpu, barrier);
        gpu.destroy_surface();
        log::debug!("Destroyed surface");
    }

    /// Tear down and build again through `create`, keeping the present
    /// mode preference and clear values.
    pub fn recreate<G: Gpu + ?Sized>(
        self,
        gpu: &G,
        barrier: &IdleBarrier,
        requested: vk::Extent2D,
    ) -> FrameResult<Self> {
        let preference = self.preference;
        let clear_values = self.clear_values;
        self.destroy(gpu, barrier);

        let mut swapchain = Self::create(gpu, requested, preference)?;
        swapchain.clear_values = clear_values;
        Ok(swapchain)
    }

    pub fn acquire_next<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> FrameResult<AcquireOutcome> {
        match gpu.acquire_next_image(self.handle, semaphore, timeout_ns) {
            Ok((index, suboptimal)) => {
                let Some(flag) = self.acquired.get_mut(index as usize) else {
                    return Err(FrameError::Vulkan {
                        what: "acquire returned an index out of range",
                        result: vk::Result::ERROR_UNKNOWN,
                    });
                };
                *flag = true;
                if suboptimal {
                    Ok(AcquireOutcome::Suboptimal { index })
                } else {
                    Ok(AcquireOutcome::Acquired { index })
                }
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Ok(AcquireOutcome::Timeout),
            Err(r) => Err(FrameError::from_vk("acquire next image", r)),
        }
    }

    /// Queue `image_index` for presentation once `wait_semaphore` signals
    pub fn present<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        wait_semaphore: vk::Semaphore,
        image_index: u32,
    ) -> FrameResult<PresentOutcome> {
        match self.acquired.get_mut(image_index as usize) {
            Some(flag) if *flag => *flag = false,
            _ => {
                return Err(FrameError::ContractViolation(
                    "present of an image that was not acquired",
                ))
            }
        }

        match gpu.queue_present(self.handle, wait_semaphore, image_index) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(r) => Err(FrameError::from_vk("queue present", r)),
        }
    }

    pub fn set_clear_value(&mut self, r: f32, g: f32, b: f32, a: f32, depth: f32, stencil: u32) {
        self.clear_values = ClearValues {
            color: [r, g, b, a],
            depth,
            stencil,
        };
    }

    pub fn clear_values(&self) -> ClearValues {
        self.clear_values
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn capabilities(&self) -> &vk::SurfaceCapabilitiesKHR {
        &self.capabilities
    }
}
