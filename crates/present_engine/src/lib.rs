//! # Present Engine
//!
//! The presentation core of a Vulkan renderer: swapchain lifecycle, frame
//! synchronization, and a stable-handle registry for scene resources.
//!
//! ## Features
//!
//! - **Swapchain generations**: negotiated once per surface, recreated on
//!   resize with the old chain retired only after the new one is usable
//! - **Frame synchronization**: one semaphore pair by default, fenced
//!   frames-in-flight on request
//! - **Lifecycle state machine**: device, surface, resources and teardown in
//!   reverse acquisition order from any state
//! - **Resource table**: dense, generation-checked handles for textures,
//!   materials, meshes, transforms, instances and cameras
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use present_engine::prelude::*;
//!
//! fn run<P: SurfaceProvider>(window: P, scene: &Scene) -> Result<(), RenderError> {
//!     let mut renderer = create_renderer(window, RendererConfig::new("Demo"))?;
//!     renderer.initialize_device()?;
//!     renderer.bind_surface()?;
//!     renderer.bind_resources(scene)?;
//!     loop {
//!         match renderer.render_frame(scene)? {
//!             FrameOutcome::Presented { .. } | FrameOutcome::Dropped | FrameOutcome::Skipped => {}
//!         }
//!         # break;
//!     }
//!     renderer.destroy();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod foundation;
pub mod render;
pub mod scene;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, RendererConfig},
        foundation::math::{Mat4, Point3f, Quat, Vec3},
        render::{
            create_renderer, FrameOutcome, RenderError, RenderResult, Renderer, RendererState, ResizeEvent,
            SurfaceProvider, VulkanRenderer,
        },
        scene::{
            Camera, CameraHandle, Instance, InstanceHandle, Material, MaterialHandle, Mesh, MeshHandle, MeshSlice,
            Scene, Texture, TextureHandle, Transform, TransformHandle,
        },
    };
}
