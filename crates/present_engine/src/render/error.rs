//! Error taxonomy for the renderer
//!
//! Backend calls fail with [`VulkanError`]. The renderer classifies those
//! into [`RenderError`] so the frame loop can tell a stale swapchain, which
//! it recovers from locally, from a failure that must stop rendering.

use std::fmt;

use ash::vk;
use thiserror::Error;

use crate::config::ConfigError;
use crate::scene::{MeshError, ResourceError, TextureError};

/// Vulkan-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        Self::Api(result)
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Setup or runtime phase a fatal error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetupPhase {
    /// Instance and debug messenger creation
    Instance,
    /// Adapter scan and logical device creation
    DeviceSelection,
    /// Surface negotiation, first swapchain, command pool
    SurfaceBinding,
    /// Swapchain generation creation
    SwapchainCreation,
    /// Upload of scene resources and pipeline bindings
    ResourceBinding,
    /// Command buffer recording
    CommandRecording,
    /// Steady-state acquire, submit and present
    FrameLoop,
    /// Size-dependent resource rebuild
    Resize,
    /// Teardown
    Teardown,
}

impl fmt::Display for SetupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Instance => "instance creation",
            Self::DeviceSelection => "device selection",
            Self::SurfaceBinding => "surface binding",
            Self::SwapchainCreation => "swapchain creation",
            Self::ResourceBinding => "resource binding",
            Self::CommandRecording => "command recording",
            Self::FrameLoop => "frame loop",
            Self::Resize => "resize",
            Self::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// How the caller should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Stop rendering
    Fatal,
    /// Swapchain is stale; recreate it and continue
    Recoverable,
    /// Caller misuse or a stale handle
    Logical,
    /// Unsupported hardware configuration
    KnownLimitation,
    /// A finite acquire timeout expired
    Timeout,
}

/// Renderer-level errors
#[derive(Error, Debug)]
pub enum RenderError {
    /// No adapter could provide a device
    #[error("Device creation failed: {reason}")]
    DeviceCreationFailed {
        /// What was missing
        reason: String,
    },

    /// No queue family can present to the surface
    #[error("No queue family supports presentation to this surface")]
    NoSuitableQueue,

    /// Graphics and present are only available on different families
    #[error("Separate graphics ({graphics}) and present ({present}) queue families are not supported")]
    SeparateQueuesUnsupported {
        /// Graphics-capable family
        graphics: u32,
        /// Present-capable family
        present: u32,
    },

    /// The surface reported an empty format list
    #[error("Surface reports no formats")]
    NoSurfaceFormats,

    /// The swapchain no longer matches the surface
    #[error("Swapchain is out of date")]
    OutOfDate,

    /// The surface was lost
    #[error("Surface lost")]
    SurfaceLost,

    /// Image acquisition timed out
    #[error("Timed out waiting for a presentable image")]
    Timeout,

    /// A GPU call failed
    #[error("GPU failure during {phase}: {source}")]
    Gpu {
        /// Phase the call belonged to
        phase: SetupPhase,
        /// Backend error
        #[source]
        source: VulkanError,
    },

    /// An operation was called in the wrong lifecycle state
    #[error("{operation} is not valid in state {state}")]
    InvalidState {
        /// Rejected operation
        operation: &'static str,
        /// State at the time of the call
        state: String,
    },

    /// Stale or missing resource handle
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Mesh data that cannot be uploaded
    #[error(transparent)]
    Mesh(#[from] MeshError),

    /// Texture data that cannot be uploaded
    #[error(transparent)]
    Texture(#[from] TextureError),

    /// Bad configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RenderError {
    /// Classify for the propagation policy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::OutOfDate | Self::SurfaceLost => ErrorClass::Recoverable,
            Self::Timeout => ErrorClass::Timeout,
            Self::SeparateQueuesUnsupported { .. } => ErrorClass::KnownLimitation,
            Self::InvalidState { .. } | Self::Resource(_) | Self::Mesh(_) | Self::Texture(_) => ErrorClass::Logical,
            Self::DeviceCreationFailed { .. }
            | Self::NoSuitableQueue
            | Self::NoSurfaceFormats
            | Self::Gpu { .. }
            | Self::Config(_) => ErrorClass::Fatal,
        }
    }

    /// Whether recreating the swapchain clears this error
    pub fn is_recoverable(&self) -> bool {
        self.class() == ErrorClass::Recoverable
    }

    /// Phase for diagnostics, when the error carries one
    pub fn phase(&self) -> Option<SetupPhase> {
        match self {
            Self::Gpu { phase, .. } => Some(*phase),
            Self::DeviceCreationFailed { .. }
            | Self::NoSuitableQueue
            | Self::SeparateQueuesUnsupported { .. } => Some(SetupPhase::DeviceSelection),
            Self::NoSurfaceFormats => Some(SetupPhase::SurfaceBinding),
            _ => None,
        }
    }

    /// Treat swapchain staleness as fatal, for steps that must not be retried
    pub fn fatal_in(self, phase: SetupPhase) -> Self {
        let code = match self {
            Self::OutOfDate => vk::Result::ERROR_OUT_OF_DATE_KHR,
            Self::SurfaceLost => vk::Result::ERROR_SURFACE_LOST_KHR,
            Self::Timeout => vk::Result::TIMEOUT,
            other => return other,
        };
        Self::Gpu {
            phase,
            source: VulkanError::Api(code),
        }
    }

    pub(crate) fn invalid_state(operation: &'static str, state: impl fmt::Debug) -> Self {
        Self::InvalidState {
            operation,
            state: format!("{state:?}"),
        }
    }
}

/// Turn a backend error into a renderer error
pub fn classify(phase: SetupPhase, error: VulkanError) -> RenderError {
    match error {
        VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR) => RenderError::OutOfDate,
        VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR) => RenderError::SurfaceLost,
        VulkanError::Api(vk::Result::TIMEOUT | vk::Result::NOT_READY) => RenderError::Timeout,
        source => RenderError::Gpu { phase, source },
    }
}

/// Result type for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Attach a phase to backend results
pub(crate) trait PhaseExt<T> {
    fn during(self, phase: SetupPhase) -> RenderResult<T>;
}

impl<T> PhaseExt<T> for VulkanResult<T> {
    fn during(self, phase: SetupPhase) -> RenderResult<T> {
        self.map_err(|e| classify(phase, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::HandleId;

    #[test]
    fn test_staleness_is_recoverable() {
        let out_of_date = classify(
            SetupPhase::FrameLoop,
            VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR),
        );
        let lost = classify(SetupPhase::FrameLoop, vk::Result::ERROR_SURFACE_LOST_KHR.into());

        assert!(matches!(out_of_date, RenderError::OutOfDate));
        assert!(out_of_date.is_recoverable());
        assert!(lost.is_recoverable());
    }

    #[test]
    fn test_device_loss_is_fatal_with_phase() {
        let error = classify(SetupPhase::Resize, vk::Result::ERROR_DEVICE_LOST.into());
        assert_eq!(error.class(), ErrorClass::Fatal);
        assert_eq!(error.phase(), Some(SetupPhase::Resize));
        assert!(error.to_string().contains("resize"));
    }

    #[test]
    fn test_timeout_is_distinct() {
        let error = classify(SetupPhase::FrameLoop, vk::Result::TIMEOUT.into());
        assert_eq!(error.class(), ErrorClass::Timeout);
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_other_classes() {
        let limitation = RenderError::SeparateQueuesUnsupported { graphics: 0, present: 1 };
        assert_eq!(limitation.class(), ErrorClass::KnownLimitation);

        let stale = RenderError::from(ResourceError::Stale(HandleId::from_bits(1)));
        assert_eq!(stale.class(), ErrorClass::Logical);

        let misuse = RenderError::invalid_state("submit", "Idle");
        assert_eq!(misuse.class(), ErrorClass::Logical);
    }

    #[test]
    fn test_fatal_in_pins_staleness_to_phase() {
        let error = RenderError::OutOfDate.fatal_in(SetupPhase::Resize);
        assert_eq!(error.class(), ErrorClass::Fatal);
        assert_eq!(error.phase(), Some(SetupPhase::Resize));
        assert!(matches!(RenderError::NoSuitableQueue.fatal_in(SetupPhase::Resize), RenderError::NoSuitableQueue));
    }
}
