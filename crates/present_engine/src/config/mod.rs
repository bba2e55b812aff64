//! Configuration system
//!
//! Renderer settings are plain serde structs that load from TOML or RON
//! files. Every field has a default, so a config file only needs to name the
//! settings it changes.

pub use serde::{Deserialize, Serialize};

use crate::foundation::logging;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Upper bound for [`RendererConfig::frames_in_flight`]
pub const MAX_FRAMES_IN_FLIGHT: u32 = 3;

/// # Renderer Configuration
///
/// Application metadata, presentation policy and frame pacing for the
/// Vulkan renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Whether to enable Vulkan validation layers (`None` = debug builds only)
    pub enable_validation: Option<bool>,
    /// Force the FIFO present mode
    pub vsync: bool,
    /// Extent requested for the first swapchain generation
    pub initial_extent: (u32, u32),
    /// Image acquisition timeout; `None` waits forever
    pub acquire_timeout_ms: Option<u64>,
    /// Frames the CPU may record ahead of the GPU
    ///
    /// `1` shares a single semaphore pair across all frames and never waits
    /// on a fence.
    pub frames_in_flight: u32,
    /// Clear color used by the default recorder
    pub clear_color: [f32; 4],
    /// Default log level when `RUST_LOG` is not set
    pub log_level: String,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Enable or disable vsync
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Set the extent requested for the first swapchain
    pub fn with_initial_extent(mut self, width: u32, height: u32) -> Self {
        self.initial_extent = (width, height);
        self
    }

    /// Use a finite image acquisition timeout
    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the number of frames in flight
    pub fn with_frames_in_flight(mut self, frames: u32) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the clear color
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Acquisition timeout in nanoseconds as expected by Vulkan
    pub fn acquire_timeout_ns(&self) -> u64 {
        self.acquire_timeout_ms
            .map_or(u64::MAX, |ms| ms.saturating_mul(1_000_000))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }

        if self.initial_extent.0 == 0 || self.initial_extent.1 == 0 {
            return Err(ConfigError::Invalid(format!(
                "Initial extent must be non-zero, got {}x{}",
                self.initial_extent.0, self.initial_extent.1
            )));
        }

        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(ConfigError::Invalid(format!(
                "Frames in flight must be between 1 and {MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }

        if logging::parse_level(&self.log_level).is_none() {
            return Err(ConfigError::Invalid(format!("Unknown log level: {}", self.log_level)));
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Present Engine Application".to_string(),
            application_version: (1, 0, 0),
            enable_validation: None,
            vsync: false,
            initial_extent: (1280, 720),
            acquire_timeout_ms: None,
            frames_in_flight: 1,
            clear_color: [0.2, 0.3, 0.8, 1.0],
            log_level: "info".to_string(),
        }
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 1);
        assert_eq!(config.acquire_timeout_ns(), u64::MAX);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(RendererConfig::new("").validate().is_err());
        assert!(RendererConfig::default().with_initial_extent(0, 600).validate().is_err());
        assert!(RendererConfig::default().with_frames_in_flight(0).validate().is_err());
        assert!(RendererConfig::default()
            .with_frames_in_flight(MAX_FRAMES_IN_FLIGHT + 1)
            .validate()
            .is_err());

        let mut config = RendererConfig::default();
        config.log_level = "chatty".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_acquire_timeout_conversion() {
        let config = RendererConfig::default().with_acquire_timeout_ms(16);
        assert_eq!(config.acquire_timeout_ns(), 16_000_000);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "vsync = true\nframes_in_flight = 2\n").unwrap();

        let config = RendererConfig::load_from_file(file.path().to_str().unwrap()).unwrap();
        assert!(config.vsync);
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.initial_extent, (1280, 720));
    }

    #[test]
    fn test_save_and_load_ron() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.ron");
        let path = path.to_str().unwrap();

        let config = RendererConfig::new("Viewer")
            .with_vsync(true)
            .with_clear_color([0.0, 0.0, 0.0, 1.0]);
        config.save_to_file(path).unwrap();

        let loaded = RendererConfig::load_from_file(path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = RendererConfig::default().save_to_file("renderer.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
