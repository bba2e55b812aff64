//! Ash implementation of the backend capability traits

pub mod device;
pub mod instance;
pub mod recorder;
pub mod surface;

pub use device::VulkanDevice;
pub use instance::VulkanInstance;
pub use recorder::{ClearPassRecorder, NullPipelineBuilder};
pub use surface::VulkanSurface;

use crate::config::RendererConfig;
use crate::render::backend::SurfaceProvider;
use crate::render::error::{classify, RenderResult, SetupPhase};
use crate::render::lifecycle::Renderer;

/// Renderer on the real driver
pub type VulkanRenderer<P> = Renderer<VulkanInstance<P>>;

/// Create an instance for `provider` and wrap it in a clear-pass renderer
///
/// Nothing beyond the instance is created; call
/// [`Renderer::initialize_device`] and the following steps next.
pub fn create_renderer<P: SurfaceProvider>(provider: P, config: RendererConfig) -> RenderResult<VulkanRenderer<P>> {
    config.validate()?;
    let instance = VulkanInstance::new(provider, &config).map_err(|e| classify(SetupPhase::Instance, e))?;
    Renderer::new(
        instance,
        config,
        Box::new(ClearPassRecorder),
        Box::new(NullPipelineBuilder),
    )
}
