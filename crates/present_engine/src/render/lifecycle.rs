//! Renderer lifecycle
//!
//! [`Renderer`] is the top-level state machine. It creates the device and the
//! first swapchain generation once, binds scene resources, drives the frame
//! synchronizer every tick and rebuilds only the size-dependent subset on
//! resize. Teardown runs in reverse acquisition order from any state.
//!
//! ```text
//! Uninitialized -> DeviceReady -> SwapchainReady -> ResourcesBound -> Rendering <-> Resizing
//!        \______________\_______________\_________________\_____________\______-> Destroyed
//! ```

use ash::vk;
use log::{debug, error, info, warn};
use slotmap::SecondaryMap;

use crate::config::RendererConfig;
use crate::render::backend::{DepthImage, GpuBuffer, GpuDevice, GpuInstance, TextureImage};
use crate::render::error::{classify, PhaseExt, RenderError, RenderResult, SetupPhase, VulkanResult};
use crate::render::frame_sync::{FrameStats, FrameSynchronizer};
use crate::render::swapchain::{PresentOutcome, SwapchainManager};
use crate::scene::{MeshHandle, MeshSlice, Scene, TextureHandle};

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 5] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    /// Nothing created
    Uninitialized,
    /// Device and queue exist
    DeviceReady,
    /// Surface bound, first swapchain generation live
    SwapchainReady,
    /// Scene resources uploaded, command buffers recorded
    ResourcesBound,
    /// Frame loop running
    Rendering,
    /// Size-dependent resources being rebuilt
    Resizing,
    /// Everything released
    Destroyed,
}

/// Surface-size-changed signal from the platform layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeEvent {
    /// New width in pixels
    pub width: u32,
    /// New height in pixels
    pub height: u32,
}

impl ResizeEvent {
    fn extent(self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

/// What happened to one tick of the frame loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The image was queued for display
    Presented {
        /// Swapchain image index
        image_index: u32,
    },
    /// The swapchain went stale; it was recreated and the frame lost
    Dropped,
    /// The surface has zero area, nothing was rendered
    Skipped,
}

/// Opaque pipeline state produced by a [`PipelineBuilder`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineBindings {
    /// Pipeline layout
    pub layout: vk::PipelineLayout,
    /// Graphics pipeline, null for clear-only rendering
    pub pipeline: vk::Pipeline,
    /// Descriptor sets bound before drawing
    pub descriptor_sets: Vec<vk::DescriptorSet>,
}

/// What a pipeline builder may depend on
#[derive(Debug, Clone, Copy)]
pub struct PipelineContext {
    /// Render pass the pipeline is used with
    pub render_pass: vk::RenderPass,
    /// Swapchain color format
    pub color_format: vk::Format,
    /// Depth attachment format
    pub depth_format: vk::Format,
    /// Extent at build time; pipelines are expected to use dynamic viewports
    pub extent: vk::Extent2D,
}

/// Builds pipeline layout and descriptor sets for a scene
///
/// Bindings are rebuilt whenever the set of uploaded textures changes, so
/// descriptor sets may refer to the views in `resources`.
pub trait PipelineBuilder<D: GpuDevice> {
    /// Create the bindings
    fn build(
        &mut self,
        device: &D,
        context: &PipelineContext,
        scene: &Scene,
        resources: &BoundResources,
    ) -> VulkanResult<PipelineBindings>;

    /// Release the bindings
    fn destroy(&mut self, device: &D, bindings: &PipelineBindings);
}

/// Everything a recorder needs for one swapchain image
#[derive(Debug, Clone, Copy)]
pub struct RecordTarget<'a> {
    /// Swapchain image index
    pub image_index: u32,
    /// Command buffer to record into
    pub command_buffer: vk::CommandBuffer,
    /// Render pass
    pub render_pass: vk::RenderPass,
    /// Framebuffer for this image
    pub framebuffer: vk::Framebuffer,
    /// Render area
    pub extent: vk::Extent2D,
    /// Color attachment clear value
    pub clear_color: [f32; 4],
    /// Pipeline state, once built
    pub pipeline: Option<&'a PipelineBindings>,
}

/// Records the command buffer for one swapchain image
pub trait CommandRecorder<D: GpuDevice> {
    /// Record commands for `target`
    fn record(
        &mut self,
        device: &D,
        target: &RecordTarget<'_>,
        scene: &Scene,
        resources: &BoundResources,
    ) -> VulkanResult<()>;
}

/// GPU buffers backing one mesh
#[derive(Debug, Clone, PartialEq)]
pub struct MeshBuffers {
    /// Interleaved vertex data
    pub vertices: GpuBuffer,
    /// 32-bit indices
    pub indices: GpuBuffer,
    /// Total index count
    pub index_count: u32,
    /// Draw slices copied from the mesh record
    pub slices: Vec<MeshSlice>,
}

/// GPU-side objects created for a scene
#[derive(Debug, Default)]
pub struct BoundResources {
    meshes: SecondaryMap<MeshHandle, MeshBuffers>,
    textures: SecondaryMap<TextureHandle, TextureImage>,
    pipeline: Option<PipelineBindings>,
}

impl BoundResources {
    /// Buffers for a mesh, if it has been uploaded
    pub fn mesh(&self, handle: MeshHandle) -> Option<&MeshBuffers> {
        self.meshes.get(handle)
    }

    /// Number of uploaded meshes
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Sampled image for a texture, if it has been uploaded
    pub fn texture(&self, handle: TextureHandle) -> Option<&TextureImage> {
        self.textures.get(handle)
    }

    /// Number of uploaded textures
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Pipeline bindings, once built
    pub fn pipeline(&self) -> Option<&PipelineBindings> {
        self.pipeline.as_ref()
    }
}

/// Depth buffer, framebuffers and command buffers sized to one generation
#[derive(Debug, Default)]
struct RenderTargets {
    depth: Option<DepthImage>,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,
}

/// First depth format usable as an optimal-tiling attachment
pub fn choose_depth_format(device: &dyn GpuDevice) -> RenderResult<vk::Format> {
    DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|&format| {
            device
                .format_properties(format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| RenderError::DeviceCreationFailed {
            reason: "no supported depth format".to_string(),
        })
}

/// Top-level renderer state machine
pub struct Renderer<I: GpuInstance> {
    config: RendererConfig,
    state: RendererState,
    instance: I,
    device: Option<I::Device>,
    swapchain: Option<SwapchainManager<I::Surface>>,
    sync: Option<FrameSynchronizer>,
    command_pool: vk::CommandPool,
    render_pass: vk::RenderPass,
    depth_format: vk::Format,
    targets: RenderTargets,
    resources: BoundResources,
    recorder: Box<dyn CommandRecorder<I::Device>>,
    pipeline_builder: Box<dyn PipelineBuilder<I::Device>>,
    requested_extent: vk::Extent2D,
    pending_resize: Option<vk::Extent2D>,
    commands_stale: bool,
}

impl<I: GpuInstance> Renderer<I> {
    /// Wrap an instance; nothing is created until [`Self::initialize_device`]
    pub fn new(
        instance: I,
        config: RendererConfig,
        recorder: Box<dyn CommandRecorder<I::Device>>,
        pipeline_builder: Box<dyn PipelineBuilder<I::Device>>,
    ) -> RenderResult<Self> {
        config.validate()?;
        let requested_extent = vk::Extent2D {
            width: config.initial_extent.0,
            height: config.initial_extent.1,
        };
        Ok(Self {
            config,
            state: RendererState::Uninitialized,
            instance,
            device: None,
            swapchain: None,
            sync: None,
            command_pool: vk::CommandPool::null(),
            render_pass: vk::RenderPass::null(),
            depth_format: vk::Format::UNDEFINED,
            targets: RenderTargets::default(),
            resources: BoundResources::default(),
            recorder,
            pipeline_builder,
            requested_extent,
            pending_resize: None,
            commands_stale: false,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> RendererState {
        self.state
    }

    /// Configuration in use
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// The instance, e.g. to reach the platform collaborator it owns
    pub fn instance(&self) -> &I {
        &self.instance
    }

    /// Mutable instance access
    pub fn instance_mut(&mut self) -> &mut I {
        &mut self.instance
    }

    /// The logical device, once created
    pub fn device(&self) -> Option<&I::Device> {
        self.device.as_ref()
    }

    /// The swapchain manager, once the surface is taken
    pub fn swapchain(&self) -> Option<&SwapchainManager<I::Surface>> {
        self.swapchain.as_ref()
    }

    /// GPU objects bound for the scene
    pub fn resources(&self) -> &BoundResources {
        &self.resources
    }

    /// Frame counters
    pub fn stats(&self) -> FrameStats {
        self.sync.as_ref().map(FrameSynchronizer::stats).unwrap_or_default()
    }

    /// Extent of the live swapchain generation
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.as_ref().and_then(SwapchainManager::extent)
    }

    /// Uninitialized -> DeviceReady
    ///
    /// Takes the surface, scans adapters for a queue family that does both
    /// graphics and presentation, and creates the logical device on it.
    pub fn initialize_device(&mut self) -> RenderResult<()> {
        self.expect_state("initialize_device", &[RendererState::Uninitialized])?;

        let surface = self.instance.create_surface().during(SetupPhase::Instance)?;
        let swapchain = self.swapchain.insert(SwapchainManager::new(surface));

        let mut adapters = self.instance.adapters().during(SetupPhase::DeviceSelection)?;
        if adapters.is_empty() {
            return Err(self.fail(RenderError::DeviceCreationFailed {
                reason: "no Vulkan adapters found".to_string(),
            }));
        }
        // Discrete GPUs first, otherwise driver order
        adapters.sort_by_key(|a| a.device_type != vk::PhysicalDeviceType::DISCRETE_GPU);

        let mut limitation = None;
        let mut chosen = None;
        for adapter in &adapters {
            match swapchain.select_queue(adapter) {
                Ok(family) => {
                    chosen = Some((adapter, family));
                    break;
                }
                Err(e @ RenderError::SeparateQueuesUnsupported { .. }) => {
                    warn!("Adapter '{}': {e}", adapter.name);
                    limitation.get_or_insert(e);
                }
                Err(RenderError::NoSuitableQueue) => {
                    debug!("Adapter '{}' has no presentable queue", adapter.name);
                }
                Err(e) => return Err(self.fail(e)),
            }
        }

        let Some((adapter, family)) = chosen else {
            let error = limitation.unwrap_or_else(|| RenderError::DeviceCreationFailed {
                reason: "no adapter exposes a queue that supports both graphics and presentation".to_string(),
            });
            return Err(self.fail(error));
        };

        let device = self
            .instance
            .create_device(adapter, family)
            .map_err(|e| RenderError::DeviceCreationFailed { reason: e.to_string() })?;
        let device = self.device.insert(device);
        self.depth_format = choose_depth_format(device)?;

        info!(
            "Device ready on '{}' (queue family {family}, depth {:?})",
            adapter.name, self.depth_format
        );
        self.state = RendererState::DeviceReady;
        Ok(())
    }

    /// DeviceReady -> SwapchainReady
    ///
    /// Negotiates the surface format and creates the first generation, the
    /// command pool, the render pass and the frame synchronizer.
    pub fn bind_surface(&mut self) -> RenderResult<()> {
        self.expect_state("bind_surface", &[RendererState::DeviceReady])?;
        let phase = SetupPhase::SurfaceBinding;
        let device = self.device.as_ref().ok_or_else(|| missing("bind_surface", "device"))?;
        let swapchain = self.swapchain.as_mut().ok_or_else(|| missing("bind_surface", "swapchain"))?;

        let format = swapchain.negotiate(device)?;
        swapchain.create(device, self.requested_extent, self.config.vsync)?;
        let image_count = swapchain.image_count();

        self.command_pool = device.create_command_pool().during(phase)?;
        self.render_pass = device
            .create_render_pass(format.color_format, self.depth_format)
            .during(phase)?;
        self.sync = Some(FrameSynchronizer::new(
            device,
            self.config.frames_in_flight,
            image_count,
            self.config.acquire_timeout_ns(),
        )?);

        info!("Surface bound: {image_count} images, {:?}", format.color_format);
        self.state = RendererState::SwapchainReady;
        Ok(())
    }

    /// SwapchainReady -> ResourcesBound
    ///
    /// Uploads mesh data and diffuse maps, builds pipeline bindings, creates
    /// the depth buffer and framebuffers, and records one command buffer per
    /// image.
    pub fn bind_resources(&mut self, scene: &Scene) -> RenderResult<()> {
        self.expect_state("bind_resources", &[RendererState::SwapchainReady])?;
        scene.validate_references()?;

        self.upload_meshes(scene)?;
        self.upload_textures(scene)?;
        self.build_pipeline(scene)?;

        self.create_targets(SetupPhase::ResourceBinding)?;
        self.record_all(scene)?;

        info!(
            "Resources bound: {} mesh(es), {} texture(s), {} command buffer(s)",
            self.resources.mesh_count(),
            self.resources.texture_count(),
            self.targets.command_buffers.len()
        );
        self.state = RendererState::ResourcesBound;
        Ok(())
    }

    /// Record a surface-size change; applied at the start of the next frame
    pub fn request_resize(&mut self, event: ResizeEvent) {
        if self.state == RendererState::Destroyed {
            return;
        }
        debug!("Resize requested: {}x{}", event.width, event.height);
        self.requested_extent = event.extent();
        self.pending_resize = Some(event.extent());
    }

    /// Run one acquire, submit, present cycle
    ///
    /// A stale swapchain is recreated on the spot and the frame reported as
    /// dropped. Any other failure is returned and rendering must stop.
    pub fn render_frame(&mut self, scene: &Scene) -> RenderResult<FrameOutcome> {
        self.expect_state(
            "render_frame",
            &[RendererState::ResourcesBound, RendererState::Rendering],
        )?;
        self.state = RendererState::Rendering;

        if let Some(extent) = self.pending_resize {
            if is_zero_area(extent) {
                return Ok(FrameOutcome::Skipped);
            }
            self.resize(scene, extent)?;
        }
        if self.commands_stale {
            debug!("Re-recording after released scene resources");
            self.record_all(scene)?;
        }

        match self.run_frame() {
            Ok((image_index, PresentOutcome::Presented)) => Ok(FrameOutcome::Presented { image_index }),
            Ok((image_index, PresentOutcome::Suboptimal)) => {
                self.pending_resize = Some(self.requested_extent);
                Ok(FrameOutcome::Presented { image_index })
            }
            Err(e) if e.is_recoverable() => {
                warn!("Swapchain stale ({e}), recreating");
                if let Some(sync) = self.sync.as_mut() {
                    sync.record_dropped_frame();
                }
                self.resize(scene, self.requested_extent)?;
                Ok(FrameOutcome::Dropped)
            }
            Err(e) => {
                match e.phase() {
                    Some(phase) => error!("Rendering stopped during {phase}: {e}"),
                    None => error!("Rendering stopped: {e}"),
                }
                Err(e)
            }
        }
    }

    /// Rebuild the size-dependent resources for a new surface extent
    ///
    /// Waits for the device to go idle, destroys the depth buffer,
    /// framebuffers and command buffers, recreates the swapchain generation,
    /// recreates the size-dependent resources and re-records. A zero-area
    /// extent is deferred until a non-zero one arrives. A scene with dangling
    /// references is rejected before anything is destroyed; failures after
    /// the idle wait are fatal.
    pub fn resize(&mut self, scene: &Scene, extent: vk::Extent2D) -> RenderResult<()> {
        self.expect_state("resize", &[RendererState::ResourcesBound, RendererState::Rendering])?;
        if is_zero_area(extent) {
            debug!("Deferring resize to zero-area surface");
            self.pending_resize = Some(extent);
            return Ok(());
        }
        scene.validate_references()?;

        let resumed = self.state;
        self.state = RendererState::Resizing;
        let phase = SetupPhase::Resize;

        // (1) drain in-flight work
        let device = self.device.as_ref().ok_or_else(|| missing("resize", "device"))?;
        device.wait_idle().during(phase).map_err(|e| e.fatal_in(phase))?;

        // (2) size-dependent resources
        self.destroy_targets();

        // (3) new generation
        let device = self.device.as_ref().ok_or_else(|| missing("resize", "device"))?;
        let swapchain = self.swapchain.as_mut().ok_or_else(|| missing("resize", "swapchain"))?;
        let generation = swapchain
            .create(device, extent, self.config.vsync)
            .map_err(|e| e.fatal_in(phase))?;
        let (new_extent, image_count) = (generation.extent, generation.image_count);
        if let Some(sync) = self.sync.as_mut() {
            sync.rebuild_for_swapchain(image_count);
        }

        // (4), (5)
        self.create_targets(phase)?;
        self.record_all(scene).map_err(|e| e.fatal_in(phase))?;

        // (6)
        self.pending_resize = None;
        self.state = if resumed == RendererState::ResourcesBound {
            RendererState::ResourcesBound
        } else {
            RendererState::Rendering
        };
        info!("Resized to {}x{}", new_extent.width, new_extent.height);
        Ok(())
    }

    /// Re-record every command buffer after scene edits
    ///
    /// Meshes and textures added since binding are uploaded; those removed
    /// from the scene are released. Pipeline bindings are rebuilt when the
    /// texture set changed.
    pub fn rerecord(&mut self, scene: &Scene) -> RenderResult<()> {
        self.expect_state("rerecord", &[RendererState::ResourcesBound, RendererState::Rendering])?;
        scene.validate_references()?;
        let device = self.device.as_ref().ok_or_else(|| missing("rerecord", "device"))?;
        device.wait_idle().during(SetupPhase::CommandRecording)?;

        let stale_meshes: Vec<MeshHandle> = self
            .resources
            .meshes
            .keys()
            .filter(|&handle| !scene.meshes.contains(handle))
            .collect();
        for handle in stale_meshes {
            self.release_buffers(handle);
        }
        self.upload_meshes(scene)?;

        let stale_textures: Vec<TextureHandle> = self
            .resources
            .textures
            .keys()
            .filter(|&handle| !scene.textures.contains(handle))
            .collect();
        let added_textures = scene
            .textures
            .iter()
            .any(|(handle, texture)| !texture.is_empty() && !self.resources.textures.contains_key(handle));
        let textures_changed = added_textures || !stale_textures.is_empty();
        if textures_changed {
            self.destroy_pipeline();
        }
        for handle in stale_textures {
            self.release_texture(handle);
        }
        self.upload_textures(scene)?;
        if textures_changed {
            self.build_pipeline(scene)?;
        }

        self.record_all(scene)
    }

    /// Release the GPU buffers of a mesh before it is removed from the scene
    ///
    /// Waits for the device to go idle first. The recorded command buffers
    /// are marked stale and re-recorded before the next submit.
    pub fn release_mesh(&mut self, handle: MeshHandle) -> RenderResult<bool> {
        if !self.resources.meshes.contains_key(handle) {
            return Ok(false);
        }
        let device = self.device.as_ref().ok_or_else(|| missing("release_mesh", "device"))?;
        device.wait_idle().during(SetupPhase::ResourceBinding)?;
        self.release_buffers(handle);
        self.commands_stale = !self.targets.command_buffers.is_empty();
        Ok(true)
    }

    /// Release everything in reverse acquisition order
    ///
    /// Scene resources, then the swapchain and surface, then the device, then
    /// the instance. Safe from any state, including a partially initialized
    /// one, and safe to call more than once.
    pub fn destroy(&mut self) {
        if self.state == RendererState::Destroyed {
            return;
        }
        info!("Destroying renderer from state {:?}", self.state);

        if let Some(device) = self.device.as_ref() {
            if let Err(e) = device.wait_idle() {
                warn!("Device wait failed during teardown: {e}");
            }
        }

        // Resources
        self.destroy_targets();
        self.destroy_pipeline();
        let textures: Vec<TextureHandle> = self.resources.textures.keys().collect();
        for handle in textures {
            self.release_texture(handle);
        }
        let meshes: Vec<MeshHandle> = self.resources.meshes.keys().collect();
        for handle in meshes {
            self.release_buffers(handle);
        }
        if let Some(device) = self.device.as_ref() {
            if let Some(mut sync) = self.sync.take() {
                sync.destroy(device);
            }
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass);
                self.render_pass = vk::RenderPass::null();
            }
            if self.command_pool != vk::CommandPool::null() {
                device.destroy_command_pool(self.command_pool);
                self.command_pool = vk::CommandPool::null();
            }
        }

        // Swapchain: views, chain, surface
        if let Some(mut swapchain) = self.swapchain.take() {
            swapchain.teardown(self.device.as_ref().map(|d| d as &dyn GpuDevice));
        }

        // Device
        if let Some(mut device) = self.device.take() {
            device.destroy();
        }

        // Instance
        self.instance.destroy();
        self.state = RendererState::Destroyed;
    }

    fn run_frame(&mut self) -> RenderResult<(u32, PresentOutcome)> {
        let device = self.device.as_ref().ok_or_else(|| missing("render_frame", "device"))?;
        let swapchain = self.swapchain.as_ref().ok_or_else(|| missing("render_frame", "swapchain"))?;
        let sync = self.sync.as_mut().ok_or_else(|| missing("render_frame", "synchronizer"))?;

        let image_index = sync.begin_frame(device, swapchain)?;
        let command_buffer = self
            .targets
            .command_buffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| RenderError::invalid_state("submit", format!("no command buffer for image {image_index}")))?;
        sync.submit(device, command_buffer)?;
        let outcome = sync.end_frame(device, swapchain, image_index)?;
        Ok((image_index, outcome))
    }

    fn upload_meshes(&mut self, scene: &Scene) -> RenderResult<()> {
        let device = self.device.as_ref().ok_or_else(|| missing("upload", "device"))?;
        let phase = SetupPhase::ResourceBinding;

        for (handle, mesh) in scene.meshes.iter() {
            if self.resources.meshes.contains_key(handle) {
                continue;
            }
            mesh.validate()?;
            if mesh.indices.is_empty() {
                debug!("Skipping empty mesh '{}'", mesh.name);
                continue;
            }

            let vertex_data = mesh.interleaved_vertices();
            let vertices = device
                .create_buffer(vk::BufferUsageFlags::VERTEX_BUFFER, bytemuck::cast_slice(&vertex_data))
                .during(phase)?;
            let indices = match device.create_buffer(vk::BufferUsageFlags::INDEX_BUFFER, bytemuck::cast_slice(&mesh.indices)) {
                Ok(buffer) => buffer,
                Err(e) => {
                    device.destroy_buffer(&vertices);
                    return Err(classify(phase, e));
                }
            };

            debug!(
                "Uploaded mesh '{}': {} vertices, {} indices",
                mesh.name,
                mesh.vertex_count(),
                mesh.indices.len()
            );
            self.resources.meshes.insert(
                handle,
                MeshBuffers {
                    vertices,
                    indices,
                    index_count: mesh.indices.len() as u32,
                    slices: mesh.slices.clone(),
                },
            );
        }
        Ok(())
    }

    fn upload_textures(&mut self, scene: &Scene) -> RenderResult<()> {
        let device = self.device.as_ref().ok_or_else(|| missing("upload", "device"))?;

        for (handle, texture) in scene.textures.iter() {
            if self.resources.textures.contains_key(handle) {
                continue;
            }
            texture.validate()?;
            if texture.is_empty() {
                debug!("Skipping empty texture '{}'", texture.name);
                continue;
            }
            let extent = vk::Extent2D {
                width: texture.width,
                height: texture.height,
            };
            let image = device
                .create_texture(self.command_pool, extent, &texture.pixels)
                .during(SetupPhase::ResourceBinding)?;
            debug!("Uploaded texture '{}': {}x{}", texture.name, texture.width, texture.height);
            self.resources.textures.insert(handle, image);
        }
        Ok(())
    }

    fn release_texture(&mut self, handle: TextureHandle) {
        if let (Some(device), Some(image)) = (self.device.as_ref(), self.resources.textures.remove(handle)) {
            device.destroy_texture(&image);
        }
    }

    fn build_pipeline(&mut self, scene: &Scene) -> RenderResult<()> {
        let context = self.pipeline_context()?;
        let device = self.device.as_ref().ok_or_else(|| missing("build pipeline", "device"))?;
        let bindings = self
            .pipeline_builder
            .build(device, &context, scene, &self.resources)
            .during(SetupPhase::ResourceBinding)?;
        self.resources.pipeline = Some(bindings);
        Ok(())
    }

    fn destroy_pipeline(&mut self) {
        if let (Some(device), Some(bindings)) = (self.device.as_ref(), self.resources.pipeline.take()) {
            self.pipeline_builder.destroy(device, &bindings);
        }
    }

    fn release_buffers(&mut self, handle: MeshHandle) {
        if let (Some(device), Some(buffers)) = (self.device.as_ref(), self.resources.meshes.remove(handle)) {
            device.destroy_buffer(&buffers.indices);
            device.destroy_buffer(&buffers.vertices);
        }
    }

    fn create_targets(&mut self, phase: SetupPhase) -> RenderResult<()> {
        let device = self.device.as_ref().ok_or_else(|| missing("create targets", "device"))?;
        let swapchain = self.swapchain.as_ref().ok_or_else(|| missing("create targets", "swapchain"))?;
        let generation = swapchain
            .current()
            .ok_or_else(|| missing("create targets", "swapchain generation"))?;
        let extent = generation.extent;

        let depth = device.create_depth_image(extent, self.depth_format).during(phase)?;
        self.targets.depth = Some(depth);

        for view in generation.views() {
            let framebuffer = device
                .create_framebuffer(self.render_pass, &[view, depth.view], extent)
                .during(phase)?;
            self.targets.framebuffers.push(framebuffer);
        }

        self.targets.command_buffers = device
            .allocate_command_buffers(self.command_pool, generation.image_count)
            .during(phase)?;
        debug!(
            "Created {} framebuffer(s) at {}x{}",
            self.targets.framebuffers.len(),
            extent.width,
            extent.height
        );
        Ok(())
    }

    fn destroy_targets(&mut self) {
        let Some(device) = self.device.as_ref() else {
            return;
        };
        if !self.targets.command_buffers.is_empty() {
            device.free_command_buffers(self.command_pool, &self.targets.command_buffers);
            self.targets.command_buffers.clear();
        }
        for framebuffer in self.targets.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }
        if let Some(depth) = self.targets.depth.take() {
            device.destroy_depth_image(&depth);
        }
    }

    fn record_all(&mut self, scene: &Scene) -> RenderResult<()> {
        scene.validate_references()?;
        let device = self.device.as_ref().ok_or_else(|| missing("record", "device"))?;
        let extent = self.extent().unwrap_or(self.requested_extent);

        for (index, (&command_buffer, &framebuffer)) in self
            .targets
            .command_buffers
            .iter()
            .zip(&self.targets.framebuffers)
            .enumerate()
        {
            let target = RecordTarget {
                image_index: index as u32,
                command_buffer,
                render_pass: self.render_pass,
                framebuffer,
                extent,
                clear_color: self.config.clear_color,
                pipeline: self.resources.pipeline.as_ref(),
            };
            self.recorder
                .record(device, &target, scene, &self.resources)
                .during(SetupPhase::CommandRecording)?;
        }
        self.commands_stale = false;
        Ok(())
    }

    fn pipeline_context(&self) -> RenderResult<PipelineContext> {
        let swapchain = self.swapchain.as_ref().ok_or_else(|| missing("pipeline", "swapchain"))?;
        let format = swapchain.format().ok_or_else(|| missing("pipeline", "surface format"))?;
        Ok(PipelineContext {
            render_pass: self.render_pass,
            color_format: format.color_format,
            depth_format: self.depth_format,
            extent: swapchain.extent().unwrap_or(self.requested_extent),
        })
    }

    fn expect_state(&self, operation: &'static str, allowed: &[RendererState]) -> RenderResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RenderError::invalid_state(operation, self.state))
        }
    }

    fn fail(&self, error: RenderError) -> RenderError {
        error!("Initialization failed in state {:?}: {error}", self.state);
        error
    }
}

impl<I: GpuInstance> Drop for Renderer<I> {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn missing(operation: &'static str, what: &str) -> RenderError {
    RenderError::invalid_state(operation, format!("no {what}"))
}

fn is_zero_area(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}
