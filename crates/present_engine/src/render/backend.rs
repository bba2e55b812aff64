//! Capability traits between the renderer core and the GPU driver
//!
//! The core never reaches for global driver state. Everything it needs is
//! handed to it as one of these capability objects, created once and passed
//! explicitly into the components that use it. The ash backend in
//! [`crate::render::vulkan`] implements them against a real device; the test
//! backend implements them against an event log.
//!
//! Handles crossing this seam are plain `ash::vk` handle values. Nothing here
//! destroys itself on drop: every object has an explicit `destroy_*` call so
//! callers control the order.

use ash::vk;

use crate::render::error::VulkanResult;

/// Platform collaborator that can produce a presentable surface
///
/// Implemented outside the core, once per windowing layer.
pub trait SurfaceProvider {
    /// Instance extensions the platform needs for surface creation
    fn required_instance_extensions(&self) -> VulkanResult<Vec<String>>;

    /// Create a surface for the platform window
    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> VulkanResult<vk::SurfaceKHR>;

    /// Current drawable size in pixels
    fn framebuffer_extent(&self) -> vk::Extent2D;
}

/// Physical device as seen during the adapter scan
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Physical device handle
    pub handle: vk::PhysicalDevice,
    /// Driver-reported name
    pub name: String,
    /// Discrete, integrated, ...
    pub device_type: vk::PhysicalDeviceType,
    /// Queue families in index order
    pub queue_families: Vec<vk::QueueFamilyProperties>,
}

/// Entry point: owns the instance and hands out surfaces and devices
pub trait GpuInstance {
    /// Surface type produced by this instance
    type Surface: PresentationSurface;
    /// Device type produced by this instance
    type Device: GpuDevice;

    /// Take the window surface; fails if it was already taken
    fn create_surface(&mut self) -> VulkanResult<Self::Surface>;

    /// Physical devices available to the instance
    fn adapters(&self) -> VulkanResult<Vec<AdapterInfo>>;

    /// Create a logical device with one queue from `queue_family`
    fn create_device(&self, adapter: &AdapterInfo, queue_family: u32) -> VulkanResult<Self::Device>;

    /// Destroy the instance; safe to call more than once
    fn destroy(&mut self);
}

/// Read-only surface capability plus its teardown
pub trait PresentationSurface {
    /// Raw surface handle
    fn handle(&self) -> vk::SurfaceKHR;

    /// Whether `family` on `adapter` can present to this surface
    fn supports_present(&self, adapter: vk::PhysicalDevice, family: u32) -> VulkanResult<bool>;

    /// Extent limits, image count limits and transforms
    fn capabilities(&self, adapter: vk::PhysicalDevice) -> VulkanResult<vk::SurfaceCapabilitiesKHR>;

    /// Supported formats in driver order
    fn formats(&self, adapter: vk::PhysicalDevice) -> VulkanResult<Vec<vk::SurfaceFormatKHR>>;

    /// Supported present modes
    fn present_modes(&self, adapter: vk::PhysicalDevice) -> VulkanResult<Vec<vk::PresentModeKHR>>;

    /// Destroy the surface; safe to call more than once
    fn destroy(&mut self);
}

/// Everything needed to create one swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDescriptor {
    /// Target surface
    pub surface: vk::SurfaceKHR,
    /// Requested minimum image count
    pub min_image_count: u32,
    /// Color format and color space
    pub format: vk::SurfaceFormatKHR,
    /// Image extent
    pub extent: vk::Extent2D,
    /// Image usage flags
    pub usage: vk::ImageUsageFlags,
    /// Pre-transform applied by the presentation engine
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Alpha compositing mode
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    /// Present mode
    pub present_mode: vk::PresentModeKHR,
    /// Previous chain passed as a recycling hint, or null
    pub old_swapchain: vk::SwapchainKHR,
}

/// Depth attachment with its memory and view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthImage {
    /// Image handle
    pub image: vk::Image,
    /// Bound device memory
    pub memory: vk::DeviceMemory,
    /// Depth view
    pub view: vk::ImageView,
    /// Depth format
    pub format: vk::Format,
}

/// Host-visible buffer with its memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBuffer {
    /// Buffer handle
    pub buffer: vk::Buffer,
    /// Bound device memory
    pub memory: vk::DeviceMemory,
    /// Size in bytes
    pub size: vk::DeviceSize,
}

/// Sampled RGBA8 image with its memory, view and sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureImage {
    /// Image handle
    pub image: vk::Image,
    /// Bound device memory
    pub memory: vk::DeviceMemory,
    /// Color view
    pub view: vk::ImageView,
    /// Linear repeat sampler
    pub sampler: vk::Sampler,
    /// Size in pixels
    pub extent: vk::Extent2D,
}

/// Logical device capability
///
/// Object safe so collaborators can receive it as `&dyn GpuDevice`.
pub trait GpuDevice {
    /// Physical device the logical device was created on
    fn physical_device(&self) -> vk::PhysicalDevice;

    /// Family of the single graphics+present queue
    fn queue_family(&self) -> u32;

    /// Format features on the physical device
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;

    // Swapchain

    /// Create a swapchain
    fn create_swapchain(&self, descriptor: &SwapchainDescriptor) -> VulkanResult<vk::SwapchainKHR>;

    /// Retrieve the presentable images of a swapchain
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>>;

    /// Destroy a swapchain
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Create a 2D view of a single-level image
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<vk::ImageView>;

    /// Destroy an image view
    fn destroy_image_view(&self, view: vk::ImageView);

    // Frame loop

    /// Acquire the next presentable image; returns the index and whether
    /// the swapchain is suboptimal
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VulkanResult<(u32, bool)>;

    /// Submit one command buffer to the queue
    fn queue_submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> VulkanResult<()>;

    /// Present an image, waiting on `wait` if it is not null; returns
    /// whether the swapchain is suboptimal
    fn queue_present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> VulkanResult<bool>;

    /// Block until all submitted work has retired
    fn wait_idle(&self) -> VulkanResult<()>;

    // Synchronization

    /// Create a binary semaphore
    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore>;

    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Create a fence, optionally already signaled
    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence>;

    /// Wait for a fence to be signaled
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<()>;

    /// Return a fence to the unsignaled state
    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()>;

    /// Destroy a fence
    fn destroy_fence(&self, fence: vk::Fence);

    // Commands

    /// Create a resettable command pool on the queue family
    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool>;

    /// Allocate primary command buffers
    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>>;

    /// Return command buffers to their pool
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);

    /// Destroy a command pool
    fn destroy_command_pool(&self, pool: vk::CommandPool);

    // Render targets

    /// Create a render pass with one color and one depth attachment
    fn create_render_pass(&self, color_format: vk::Format, depth_format: vk::Format) -> VulkanResult<vk::RenderPass>;

    /// Destroy a render pass
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    /// Create a device-local depth attachment
    fn create_depth_image(&self, extent: vk::Extent2D, format: vk::Format) -> VulkanResult<DepthImage>;

    /// Destroy a depth attachment, view first
    fn destroy_depth_image(&self, depth: &DepthImage);

    /// Create a framebuffer
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer>;

    /// Destroy a framebuffer
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Buffers

    /// Create a host-visible buffer filled with `data`
    fn create_buffer(&self, usage: vk::BufferUsageFlags, data: &[u8]) -> VulkanResult<GpuBuffer>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&self, buffer: &GpuBuffer);

    // Textures

    /// Create a device-local sampled image from tightly packed RGBA8 rows
    ///
    /// The copy is recorded into a one-time command buffer from `pool` and
    /// waited on before returning, so the image is ready for shader reads.
    fn create_texture(&self, pool: vk::CommandPool, extent: vk::Extent2D, pixels: &[u8]) -> VulkanResult<TextureImage>;

    /// Destroy a texture: sampler, view, image, then memory
    fn destroy_texture(&self, texture: &TextureImage);

    /// Destroy the logical device; safe to call more than once
    fn destroy(&mut self);
}
