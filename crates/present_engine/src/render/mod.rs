//! Rendering core
//!
//! The swapchain manager, frame synchronizer and renderer lifecycle are
//! written against the capability traits in [`backend`]. [`vulkan`] provides
//! the ash implementation used by applications.

pub mod backend;
pub mod error;
pub mod frame_sync;
pub mod lifecycle;
pub mod swapchain;
pub mod vulkan;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{AdapterInfo, GpuDevice, GpuInstance, PresentationSurface, SurfaceProvider, TextureImage};
pub use error::{ErrorClass, RenderError, RenderResult, SetupPhase, VulkanError, VulkanResult};
pub use frame_sync::{FramePhase, FrameStats, FrameSynchronizer};
pub use lifecycle::{
    BoundResources, CommandRecorder, FrameOutcome, PipelineBindings, PipelineBuilder, PipelineContext,
    RecordTarget, Renderer, RendererState, ResizeEvent,
};
pub use swapchain::{PresentOutcome, SwapchainGeneration, SwapchainManager};
pub use vulkan::{create_renderer, VulkanRenderer};
