// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.
// The frame loop itself never reads files; it gets a FrameLoopSettings.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::backend::gpu::WaitStage;
use crate::backend::swapchain::PresentModePreference;
use crate::frame_loop::FrameLoopSettings;

/// Deepest pipelining we accept from a config file
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub sync: SyncConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "frameloop".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub frames_in_flight: usize,
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub wait_stage: String,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            present_mode: "low_latency".to_string(),
            clear_color: [0.1, 0.2, 0.8, 1.0],
            wait_stage: "color_attachment_output".to_string(),
        }
    }
}

/// Bounded waits
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub fence_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
    pub max_consecutive_timeouts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fence_timeout_ms: 2000,
            acquire_timeout_ms: 2000,
            max_consecutive_timeouts: 3,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Present mode preference; unknown names fall back to low latency
    pub fn present_mode(&self) -> PresentModePreference {
        PresentModePreference::from_name(&self.graphics.present_mode).unwrap_or_else(|| {
            log::warn!(
                "Unknown present mode '{}', defaulting to low_latency",
                self.graphics.present_mode
            );
            PresentModePreference::LowLatency
        })
    }

    pub fn wait_stage(&self) -> WaitStage {
        match self.graphics.wait_stage.to_lowercase().as_str() {
            "color_attachment_output" => WaitStage::ColorAttachmentOutput,
            "compute_shader" => WaitStage::ComputeShader,
            other => {
                log::warn!(
                    "Unknown wait stage '{}', defaulting to color_attachment_output",
                    other
                );
                WaitStage::ColorAttachmentOutput
            }
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.debug.log_level.parse().unwrap_or(LevelFilter::Info)
    }

    /// Typed settings for the frame loop, with out-of-range values clamped
    pub fn frame_loop_settings(&self) -> FrameLoopSettings {
        let frames_in_flight = self.graphics.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT);
        if frames_in_flight != self.graphics.frames_in_flight {
            log::warn!(
                "frames_in_flight = {} is out of range, using {}",
                self.graphics.frames_in_flight,
                frames_in_flight
            );
        }

        FrameLoopSettings {
            frames_in_flight,
            present_mode: self.present_mode(),
            wait_stage: self.wait_stage(),
            fence_timeout: Duration::from_millis(self.sync.fence_timeout_ms),
            acquire_timeout: Duration::from_millis(self.sync.acquire_timeout_ms),
            max_consecutive_timeouts: self.sync.max_consecutive_timeouts.max(1),
            clear_color: self.graphics.clear_color,
        }
    }
}
