// =============================================================================
// FRAMELOOP DEMO - clears the window through the pipelined frame loop
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit App (window, input)                                      │
// │    └── VulkanDevice (instance, surface, device, queue)          │
// │          └── FrameLoop                                          │
// │                ├── Swapchain (negotiated, rebuilt on resize)    │
// │                ├── FramePool (N fences + semaphore pairs)       │
// │                └── CommandRecycler (fresh buffer per cycle)     │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (one render_frame call):
// 1. Wait for the slot's previous frame, reset its fence
// 2. Acquire swapchain image
// 3. Record: barrier, clear, barrier (this file)
// 4. Submit
// 5. Present
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use frameloop::{Config, FrameLoop, FrameStatus, FrameTarget, FrameTimer, VulkanDevice};
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting frameloop demo");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Frames in flight: {}, present mode: {}",
        config.graphics.frames_in_flight,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    app.finish()
}

/// Level from config.toml; RUST_LOG directives still win
fn init_logging(config: &Config) {
    use env_logger::Builder;

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_default_env();
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the frame loop is shut down explicitly
/// before the device goes away.
struct App {
    config: Config,

    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    frame_loop: Option<FrameLoop<VulkanDevice>>,
    device: Option<Arc<VulkanDevice>>,

    timer: FrameTimer,
    /// First fatal error; reported from main after the event loop exits
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        Self {
            config,
            window: None,
            is_fullscreen,
            frame_loop: None,
            device: None,
            timer: FrameTimer::new(),
            failure: None,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_vulkan(&mut self, window: &Window) -> Result<()> {
        let device = VulkanDevice::new(
            &self.config.window.title,
            self.config.debug.validation_layers,
            window,
        )?;

        let size = window.inner_size();
        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };

        let frame_loop = FrameLoop::new(
            Arc::clone(&device),
            extent,
            self.config.frame_loop_settings(),
        )
        .context("Failed to create frame loop")?;

        self.device = Some(device);
        self.frame_loop = Some(frame_loop);
        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn render_frame(&mut self) -> Result<()> {
        let (Some(frame_loop), Some(device)) = (self.frame_loop.as_mut(), self.device.as_ref())
        else {
            return Ok(());
        };
        let wait_stage = frame_loop.settings().wait_stage.flags();

        let status = frame_loop
            .render_frame(|target: &FrameTarget| record_clear(&device.device, target, wait_stage))?;

        match status {
            FrameStatus::Presented { .. } => self.update_fps(),
            FrameStatus::Skipped | FrameStatus::TimedOut => {}
        }
        Ok(())
    }

    /// Tear down in dependency-reverse order and report the validation count
    fn shutdown(&mut self) {
        if let Some(frame_loop) = self.frame_loop.take() {
            if let Err(e) = frame_loop.shutdown() {
                log::error!("Frame loop shutdown failed: {}", e);
            }
        }

        if let Some(device) = self.device.take() {
            let errors = device.validation_error_count();
            if errors == 0 {
                log::info!("Shut down with no validation errors");
            } else {
                log::warn!("Shut down with {} validation errors", errors);
            }
        }
    }

    fn finish(mut self) -> Result<()> {
        self.shutdown();
        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            // winit sends Resized as well, but not on every platform
            if let Some(ref mut frame_loop) = self.frame_loop {
                frame_loop.request_recreate();
            }
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        let frame_time = self.timer.tick();

        if !self.config.debug.show_fps || !self.timer.fps_updated() {
            return;
        }

        if let Some(ref window) = self.window {
            let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
            window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms) [{}]",
                self.config.window.title,
                self.timer.fps(),
                frame_time.as_secs_f64() * 1000.0,
                mode
            ));
        }
    }
}

/// Clear the acquired image to the swapchain's clear color
fn record_clear(
    device: &ash::Device,
    target: &FrameTarget,
    wait_stage: vk::PipelineStageFlags,
) -> Result<()> {
    let cmd = target.command_buffer;
    let clear_color = vk::ClearColorValue {
        float32: target.clear_color,
    };

    // Which parts of the image to affect (all of it)
    let subresource_range = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };

    // UNDEFINED -> TRANSFER_DST; old contents are discarded
    let barrier_to_transfer = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(target.image)
        .subresource_range(subresource_range)
        .build();

    // TRANSFER_DST -> PRESENT_SRC
    let barrier_to_present = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::empty())
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(target.image)
        .subresource_range(subresource_range)
        .build();

    unsafe {
        // Source stage chains with the image-acquired semaphore wait
        device.cmd_pipeline_barrier(
            cmd,
            wait_stage,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier_to_transfer],
        );

        device.cmd_clear_color_image(
            cmd,
            target.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &clear_color,
            &[subresource_range],
        );

        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier_to_present],
        );
    }

    Ok(())
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.failure = Some(anyhow::anyhow!("Failed to create window: {}", e));
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_vulkan(&window) {
            log::error!("Failed to initialize Vulkan: {:#}", e);
            self.failure = Some(e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(ref mut frame_loop) = self.frame_loop {
                    frame_loop.resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    log::error!("Render error: {:#}", e);
                    self.failure = Some(e);
                    event_loop.exit();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}
