//! In-memory GPU backend for tests
//!
//! Every backend call appends an [`Event`] to a log shared by the instance,
//! surface, device and the test collaborators, so tests can assert the exact
//! order of GPU operations. Faults are injected through [`Faults`].

use std::cell::{RefCell, RefMut};
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use ash::vk::{self, Handle};

use crate::render::backend::{
    AdapterInfo, DepthImage, GpuBuffer, GpuDevice, GpuInstance, PresentationSurface, SwapchainDescriptor,
    TextureImage,
};
use crate::render::error::{VulkanError, VulkanResult};
use crate::render::lifecycle::{
    BoundResources, CommandRecorder, PipelineBindings, PipelineBuilder, PipelineContext, RecordTarget,
};
use crate::scene::Scene;

/// One backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    DestroyInstance,
    TakeSurface,
    DestroySurface,
    CreateDevice { family: u32 },
    DestroyDevice,
    CreateSwapchain { handle: u64, old: u64, extent: (u32, u32), image_count: u32 },
    GetSwapchainImages(u64),
    DestroySwapchain(u64),
    CreateView(u64),
    DestroyView(u64),
    Acquire { swapchain: u64, signal: u64 },
    Submit { command_buffer: u64, wait: u64, signal: u64, fence: u64 },
    Present { swapchain: u64, index: u32, wait: u64 },
    WaitIdle,
    CreateSemaphore(u64),
    DestroySemaphore(u64),
    CreateFence(u64),
    WaitFence(u64),
    ResetFence(u64),
    DestroyFence(u64),
    CreateCommandPool(u64),
    AllocateCommandBuffers(u32),
    FreeCommandBuffers(u32),
    DestroyCommandPool(u64),
    CreateRenderPass(u64),
    DestroyRenderPass(u64),
    CreateDepthImage(u64),
    DestroyDepthImage(u64),
    CreateFramebuffer(u64),
    DestroyFramebuffer(u64),
    CreateBuffer(u64),
    DestroyBuffer(u64),
    CreateTexture { handle: u64, extent: (u32, u32) },
    DestroyTexture(u64),
    Record { image_index: u32, command_buffer: u64, draws: usize },
    BuildPipeline,
    DestroyPipeline,
}

/// Scripted reply for acquire or present
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Suboptimal,
    Fail(vk::Result),
}

/// Injected failures
#[derive(Debug, Default)]
pub struct Faults {
    /// Fail the next `n` image retrievals
    pub fail_swapchain_images: u32,
    /// Let this many image views succeed, then fail the next one
    pub fail_image_view_after: Option<u32>,
    /// Replies consumed by successive acquires
    pub acquire: VecDeque<Reply>,
    /// Replies consumed by successive presents
    pub present: VecDeque<Reply>,
    /// Fail `wait_idle` with device lost
    pub fail_wait_idle: bool,
    /// Report no blit support for any format
    pub no_blit: bool,
}

/// Shared fake GPU state
#[derive(Debug)]
pub struct FakeState {
    pub events: Vec<Event>,
    pub faults: Faults,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub adapters: Vec<AdapterInfo>,
    /// Queue families able to present, on every adapter
    pub present_families: Vec<u32>,
    /// Objects created and not yet destroyed
    pub live: HashSet<u64>,
    next_handle: u64,
    next_image: u32,
}

impl FakeState {
    fn new_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn create(&mut self, event: impl FnOnce(u64) -> Event) -> u64 {
        let handle = self.new_handle();
        self.live.insert(handle);
        self.events.push(event(handle));
        handle
    }

    fn destroy(&mut self, handle: u64, event: Event) {
        self.live.remove(&handle);
        self.events.push(event);
    }
}

/// Handle to the shared state; clone freely
#[derive(Debug, Clone)]
pub struct FakeGpu {
    state: Rc<RefCell<FakeState>>,
}

impl Default for FakeGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGpu {
    /// One adapter with a single graphics+present family, an 800x600 surface
    pub fn new() -> Self {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D { width: 800, height: 600 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY | vk::SurfaceTransformFlagsKHR::ROTATE_90,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        };
        let state = FakeState {
            events: Vec::new(),
            faults: Faults::default(),
            capabilities,
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![
                vk::PresentModeKHR::FIFO,
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::IMMEDIATE,
            ],
            adapters: vec![adapter(1, "fake adapter", &[vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER])],
            present_families: vec![0],
            live: HashSet::new(),
            next_handle: 1000,
            next_image: 0,
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Mutable access for configuring faults and surface properties
    pub fn state(&self) -> RefMut<'_, FakeState> {
        self.state.borrow_mut()
    }

    /// Snapshot of the event log
    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    /// Forget all events so far
    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    /// Position of the first event matching `pred`
    pub fn position(&self, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.state.borrow().events.iter().position(pred)
    }

    /// Number of created objects not yet destroyed
    pub fn live_objects(&self) -> usize {
        self.state.borrow().live.len()
    }

    /// Change the surface's current extent, as a window resize would
    pub fn set_surface_extent(&self, width: u32, height: u32) {
        self.state.borrow_mut().capabilities.current_extent = vk::Extent2D { width, height };
    }

    /// Instance backed by this state
    pub fn instance(&self) -> FakeInstance {
        FakeInstance {
            gpu: self.clone(),
            surface_taken: false,
            destroyed: false,
        }
    }

    /// Surface backed by this state
    pub fn surface(&self) -> FakeSurface {
        FakeSurface {
            gpu: self.clone(),
            handle: vk::SurfaceKHR::from_raw(1),
            destroyed: false,
        }
    }

    /// Device backed by this state
    pub fn device(&self, family: u32) -> FakeDevice {
        FakeDevice {
            gpu: self.clone(),
            physical: vk::PhysicalDevice::from_raw(1),
            family,
            destroyed: false,
        }
    }
}

/// Adapter with the given queue families
pub fn adapter(handle: u64, name: &str, families: &[vk::QueueFlags]) -> AdapterInfo {
    AdapterInfo {
        handle: vk::PhysicalDevice::from_raw(handle),
        name: name.to_string(),
        device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
        queue_families: families
            .iter()
            .map(|&queue_flags| vk::QueueFamilyProperties {
                queue_flags,
                queue_count: 1,
                ..Default::default()
            })
            .collect(),
    }
}

pub struct FakeInstance {
    gpu: FakeGpu,
    surface_taken: bool,
    destroyed: bool,
}

impl GpuInstance for FakeInstance {
    type Surface = FakeSurface;
    type Device = FakeDevice;

    fn create_surface(&mut self) -> VulkanResult<FakeSurface> {
        if self.surface_taken {
            return Err(VulkanError::InvalidOperation {
                reason: "surface already taken".to_string(),
            });
        }
        self.surface_taken = true;
        self.gpu.state().events.push(Event::TakeSurface);
        Ok(self.gpu.surface())
    }

    fn adapters(&self) -> VulkanResult<Vec<AdapterInfo>> {
        Ok(self.gpu.state.borrow().adapters.clone())
    }

    fn create_device(&self, adapter: &AdapterInfo, queue_family: u32) -> VulkanResult<FakeDevice> {
        self.gpu.state().events.push(Event::CreateDevice { family: queue_family });
        let mut device = self.gpu.device(queue_family);
        device.physical = adapter.handle;
        Ok(device)
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.gpu.state().events.push(Event::DestroyInstance);
        }
    }
}

pub struct FakeSurface {
    gpu: FakeGpu,
    handle: vk::SurfaceKHR,
    destroyed: bool,
}

impl PresentationSurface for FakeSurface {
    fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    fn supports_present(&self, _adapter: vk::PhysicalDevice, family: u32) -> VulkanResult<bool> {
        Ok(self.gpu.state.borrow().present_families.contains(&family))
    }

    fn capabilities(&self, _adapter: vk::PhysicalDevice) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.gpu.state.borrow().capabilities)
    }

    fn formats(&self, _adapter: vk::PhysicalDevice) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.gpu.state.borrow().formats.clone())
    }

    fn present_modes(&self, _adapter: vk::PhysicalDevice) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        Ok(self.gpu.state.borrow().present_modes.clone())
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.gpu.state().events.push(Event::DestroySurface);
        }
    }
}

pub struct FakeDevice {
    gpu: FakeGpu,
    physical: vk::PhysicalDevice,
    family: u32,
    destroyed: bool,
}

fn scripted(queue: &mut VecDeque<Reply>) -> VulkanResult<bool> {
    match queue.pop_front() {
        None => Ok(false),
        Some(Reply::Suboptimal) => Ok(true),
        Some(Reply::Fail(result)) => Err(VulkanError::Api(result)),
    }
}

impl GpuDevice for FakeDevice {
    fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical
    }

    fn queue_family(&self) -> u32 {
        self.family
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let state = self.gpu.state.borrow();
        let optimal_tiling_features = match format {
            vk::Format::D32_SFLOAT | vk::Format::D24_UNORM_S8_UINT => vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            _ if state.faults.no_blit => vk::FormatFeatureFlags::COLOR_ATTACHMENT,
            _ => vk::FormatFeatureFlags::COLOR_ATTACHMENT | vk::FormatFeatureFlags::BLIT_SRC,
        };
        vk::FormatProperties {
            optimal_tiling_features,
            ..Default::default()
        }
    }

    fn create_swapchain(&self, descriptor: &SwapchainDescriptor) -> VulkanResult<vk::SwapchainKHR> {
        let handle = self.gpu.state().create(|handle| Event::CreateSwapchain {
            handle,
            old: descriptor.old_swapchain.as_raw(),
            extent: (descriptor.extent.width, descriptor.extent.height),
            image_count: descriptor.min_image_count,
        });
        Ok(vk::SwapchainKHR::from_raw(handle))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        let mut state = self.gpu.state();
        state.events.push(Event::GetSwapchainImages(swapchain.as_raw()));
        if state.faults.fail_swapchain_images > 0 {
            state.faults.fail_swapchain_images -= 1;
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        }
        let count = state
            .events
            .iter()
            .find_map(|e| match e {
                Event::CreateSwapchain { handle, image_count, .. } if *handle == swapchain.as_raw() => {
                    Some(*image_count)
                }
                _ => None,
            })
            .unwrap_or(0);
        let images = (0..count)
            .map(|_| {
                state.next_image += 1;
                vk::Image::from_raw(u64::from(state.next_image))
            })
            .collect();
        Ok(images)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.gpu
            .state()
            .destroy(swapchain.as_raw(), Event::DestroySwapchain(swapchain.as_raw()));
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<vk::ImageView> {
        let mut state = self.gpu.state();
        match state.faults.fail_image_view_after {
            Some(0) => {
                state.faults.fail_image_view_after = None;
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            Some(n) => state.faults.fail_image_view_after = Some(n - 1),
            None => {}
        }
        Ok(vk::ImageView::from_raw(state.create(Event::CreateView)))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.gpu.state().destroy(view.as_raw(), Event::DestroyView(view.as_raw()));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VulkanResult<(u32, bool)> {
        let mut state = self.gpu.state();
        state.events.push(Event::Acquire {
            swapchain: swapchain.as_raw(),
            signal: signal.as_raw(),
        });
        let suboptimal = scripted(&mut state.faults.acquire)?;
        let acquires = state
            .events
            .iter()
            .filter(|e| matches!(e, Event::Acquire { .. }))
            .count() as u32;
        let image_count = state.capabilities.min_image_count + 1;
        Ok(((acquires - 1) % image_count, suboptimal))
    }

    fn queue_submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        _wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> VulkanResult<()> {
        self.gpu.state().events.push(Event::Submit {
            command_buffer: command_buffer.as_raw(),
            wait: wait.as_raw(),
            signal: signal.as_raw(),
            fence: fence.as_raw(),
        });
        Ok(())
    }

    fn queue_present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> VulkanResult<bool> {
        let mut state = self.gpu.state();
        state.events.push(Event::Present {
            swapchain: swapchain.as_raw(),
            index: image_index,
            wait: wait.as_raw(),
        });
        scripted(&mut state.faults.present)
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        let mut state = self.gpu.state();
        state.events.push(Event::WaitIdle);
        if state.faults.fail_wait_idle {
            return Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST));
        }
        Ok(())
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        Ok(vk::Semaphore::from_raw(self.gpu.state().create(Event::CreateSemaphore)))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.gpu
            .state()
            .destroy(semaphore.as_raw(), Event::DestroySemaphore(semaphore.as_raw()));
    }

    fn create_fence(&self, _signaled: bool) -> VulkanResult<vk::Fence> {
        Ok(vk::Fence::from_raw(self.gpu.state().create(Event::CreateFence)))
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VulkanResult<()> {
        self.gpu.state().events.push(Event::WaitFence(fence.as_raw()));
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        self.gpu.state().events.push(Event::ResetFence(fence.as_raw()));
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.gpu.state().destroy(fence.as_raw(), Event::DestroyFence(fence.as_raw()));
    }

    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool> {
        Ok(vk::CommandPool::from_raw(self.gpu.state().create(Event::CreateCommandPool)))
    }

    fn allocate_command_buffers(&self, _pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let mut state = self.gpu.state();
        state.events.push(Event::AllocateCommandBuffers(count));
        let buffers = (0..count)
            .map(|_| {
                let handle = state.new_handle();
                state.live.insert(handle);
                vk::CommandBuffer::from_raw(handle)
            })
            .collect();
        Ok(buffers)
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.gpu.state();
        for buffer in buffers {
            state.live.remove(&buffer.as_raw());
        }
        state.events.push(Event::FreeCommandBuffers(buffers.len() as u32));
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.gpu
            .state()
            .destroy(pool.as_raw(), Event::DestroyCommandPool(pool.as_raw()));
    }

    fn create_render_pass(&self, _color_format: vk::Format, _depth_format: vk::Format) -> VulkanResult<vk::RenderPass> {
        Ok(vk::RenderPass::from_raw(self.gpu.state().create(Event::CreateRenderPass)))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.gpu
            .state()
            .destroy(render_pass.as_raw(), Event::DestroyRenderPass(render_pass.as_raw()));
    }

    fn create_depth_image(&self, _extent: vk::Extent2D, format: vk::Format) -> VulkanResult<DepthImage> {
        let handle = self.gpu.state().create(Event::CreateDepthImage);
        Ok(DepthImage {
            image: vk::Image::from_raw(handle),
            memory: vk::DeviceMemory::from_raw(handle),
            view: vk::ImageView::from_raw(handle),
            format,
        })
    }

    fn destroy_depth_image(&self, depth: &DepthImage) {
        let handle = depth.image.as_raw();
        self.gpu.state().destroy(handle, Event::DestroyDepthImage(handle));
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer> {
        Ok(vk::Framebuffer::from_raw(self.gpu.state().create(Event::CreateFramebuffer)))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.gpu
            .state()
            .destroy(framebuffer.as_raw(), Event::DestroyFramebuffer(framebuffer.as_raw()));
    }

    fn create_buffer(&self, _usage: vk::BufferUsageFlags, data: &[u8]) -> VulkanResult<GpuBuffer> {
        let handle = self.gpu.state().create(Event::CreateBuffer);
        Ok(GpuBuffer {
            buffer: vk::Buffer::from_raw(handle),
            memory: vk::DeviceMemory::from_raw(handle),
            size: data.len() as vk::DeviceSize,
        })
    }

    fn destroy_buffer(&self, buffer: &GpuBuffer) {
        let handle = buffer.buffer.as_raw();
        self.gpu.state().destroy(handle, Event::DestroyBuffer(handle));
    }

    fn create_texture(&self, _pool: vk::CommandPool, extent: vk::Extent2D, pixels: &[u8]) -> VulkanResult<TextureImage> {
        let expected = u64::from(extent.width) * u64::from(extent.height) * 4;
        if pixels.len() as u64 != expected {
            return Err(VulkanError::InvalidOperation {
                reason: format!("expected {expected} bytes, got {}", pixels.len()),
            });
        }
        let handle = self.gpu.state().create(|handle| Event::CreateTexture {
            handle,
            extent: (extent.width, extent.height),
        });
        Ok(TextureImage {
            image: vk::Image::from_raw(handle),
            memory: vk::DeviceMemory::from_raw(handle),
            view: vk::ImageView::from_raw(handle),
            sampler: vk::Sampler::from_raw(handle),
            extent,
        })
    }

    fn destroy_texture(&self, texture: &TextureImage) {
        let handle = texture.image.as_raw();
        self.gpu.state().destroy(handle, Event::DestroyTexture(handle));
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.gpu.state().events.push(Event::DestroyDevice);
        }
    }
}

/// Recorder that logs what it would record
pub struct FakeRecorder {
    pub gpu: FakeGpu,
}

impl CommandRecorder<FakeDevice> for FakeRecorder {
    fn record(
        &mut self,
        _device: &FakeDevice,
        target: &RecordTarget<'_>,
        scene: &Scene,
        resources: &BoundResources,
    ) -> VulkanResult<()> {
        let draws = scene
            .draw_list()
            .map_err(|e| VulkanError::InvalidOperation { reason: e.to_string() })?
            .iter()
            .filter(|item| resources.mesh(item.mesh).is_some())
            .count();
        self.gpu.state().events.push(Event::Record {
            image_index: target.image_index,
            command_buffer: target.command_buffer.as_raw(),
            draws,
        });
        Ok(())
    }
}

/// Pipeline builder that hands out one descriptor set per uploaded texture
pub struct FakePipeline {
    pub gpu: FakeGpu,
}

impl PipelineBuilder<FakeDevice> for FakePipeline {
    fn build(
        &mut self,
        _device: &FakeDevice,
        _context: &PipelineContext,
        scene: &Scene,
        resources: &BoundResources,
    ) -> VulkanResult<PipelineBindings> {
        self.gpu.state().events.push(Event::BuildPipeline);
        let descriptor_sets = scene
            .textures
            .handles()
            .filter_map(|handle| resources.texture(handle))
            .map(|texture| vk::DescriptorSet::from_raw(texture.view.as_raw()))
            .collect();
        Ok(PipelineBindings {
            descriptor_sets,
            ..PipelineBindings::default()
        })
    }

    fn destroy(&mut self, _device: &FakeDevice, _bindings: &PipelineBindings) {
        self.gpu.state().events.push(Event::DestroyPipeline);
    }
}
