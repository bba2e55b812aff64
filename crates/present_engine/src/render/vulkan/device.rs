//! Logical device
//!
//! One queue from the single graphics+present family, the swapchain loader,
//! and thin wrappers for every object the renderer creates. Nothing here
//! destroys itself on drop; the renderer calls the matching `destroy_*`.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device, Instance};
use log::{debug, warn};

use crate::render::backend::{DepthImage, GpuBuffer, GpuDevice, SwapchainDescriptor, TextureImage};
use crate::render::error::{VulkanError, VulkanResult};

/// Format of uploaded diffuse maps
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Vulkan logical device with its queue
pub struct VulkanDevice {
    instance: Instance,
    physical_device: vk::PhysicalDevice,
    device: Device,
    queue: vk::Queue,
    queue_family: u32,
    swapchain_loader: SwapchainLoader,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    destroyed: bool,
}

impl VulkanDevice {
    pub(crate) fn new(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        device: Device,
        queue_family: u32,
    ) -> Self {
        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        Self {
            instance: instance.clone(),
            physical_device,
            device,
            queue,
            queue_family,
            swapchain_loader,
            memory_properties,
            destroyed: false,
        }
    }

    /// Raw ash device, for command recording
    pub fn raw(&self) -> &Device {
        &self.device
    }

    /// The single graphics+present queue
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    fn allocate(&self, requirements: vk::MemoryRequirements, properties: vk::MemoryPropertyFlags) -> VulkanResult<vk::DeviceMemory> {
        let memory_type = find_memory_type(&self.memory_properties, requirements.memory_type_bits, properties)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        unsafe { Ok(self.device.allocate_memory(&alloc_info, None)?) }
    }

    fn create_depth_image_inner(&self, image: vk::Image, format: vk::Format) -> VulkanResult<(vk::DeviceMemory, vk::ImageView)> {
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let memory = self.allocate(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;

        let bound = unsafe { self.device.bind_image_memory(image, memory, 0) };
        let view = bound
            .map_err(VulkanError::Api)
            .and_then(|()| self.create_image_view(image, format, depth_aspect(format)));
        match view {
            Ok(view) => Ok((memory, view)),
            Err(e) => {
                unsafe { self.device.free_memory(memory, None) };
                Err(e)
            }
        }
    }

    fn fill_buffer(&self, buffer: vk::Buffer, data: &[u8]) -> VulkanResult<vk::DeviceMemory> {
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory = self.allocate(
            requirements,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let written = unsafe {
            self.device.bind_buffer_memory(buffer, memory, 0).and_then(|()| {
                let mapped = self
                    .device
                    .map_memory(memory, 0, requirements.size, vk::MemoryMapFlags::empty())?;
                std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.cast::<u8>(), data.len());
                self.device.unmap_memory(memory);
                Ok(())
            })
        };
        match written {
            Ok(()) => Ok(memory),
            Err(e) => {
                unsafe { self.device.free_memory(memory, None) };
                Err(VulkanError::Api(e))
            }
        }
    }

    fn fill_texture(&self, texture: &mut TextureImage, pool: vk::CommandPool, staging: &GpuBuffer) -> VulkanResult<()> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: texture.extent.width,
                height: texture.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(TEXTURE_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        texture.image = unsafe { self.device.create_image(&create_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(texture.image) };
        texture.memory = self.allocate(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        unsafe { self.device.bind_image_memory(texture.image, texture.memory, 0)? };

        self.copy_to_texture(pool, staging.buffer, texture.image, texture.extent)?;
        texture.view = self.create_image_view(texture.image, TEXTURE_FORMAT, vk::ImageAspectFlags::COLOR)?;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(0.0);
        texture.sampler = unsafe { self.device.create_sampler(&sampler_info, None)? };
        Ok(())
    }

    fn copy_to_texture(
        &self,
        pool: vk::CommandPool,
        source: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        let command_buffer = self
            .allocate_command_buffers(pool, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "no command buffer for texture upload".to_string(),
            })?;

        let result = self
            .record_texture_copy(command_buffer, source, image, extent)
            .and_then(|()| {
                let command_buffers = [command_buffer];
                let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
                unsafe {
                    self.device.queue_submit(self.queue, &[submit_info], vk::Fence::null())?;
                    Ok(self.device.queue_wait_idle(self.queue)?)
                }
            });
        self.free_command_buffers(pool, &[command_buffer]);
        result
    }

    fn record_texture_copy(
        &self,
        command_buffer: vk::CommandBuffer,
        source: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let to_transfer = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .build();
        let to_shader = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .build();
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .build();

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.begin_command_buffer(command_buffer, &begin_info)?;
            self.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
            self.device.cmd_copy_buffer_to_image(
                command_buffer,
                source,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            self.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader],
            );
            self.device.end_command_buffer(command_buffer)?;
        }
        Ok(())
    }
}

impl GpuDevice for VulkanDevice {
    fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    fn queue_family(&self) -> u32 {
        self.queue_family
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    fn create_swapchain(&self, descriptor: &SwapchainDescriptor) -> VulkanResult<vk::SwapchainKHR> {
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(descriptor.surface)
            .min_image_count(descriptor.min_image_count)
            .image_format(descriptor.format.format)
            .image_color_space(descriptor.format.color_space)
            .image_extent(descriptor.extent)
            .image_array_layers(1)
            .image_usage(descriptor.usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(descriptor.pre_transform)
            .composite_alpha(descriptor.composite_alpha)
            .present_mode(descriptor.present_mode)
            .clipped(true)
            .old_swapchain(descriptor.old_swapchain);

        unsafe { Ok(self.swapchain_loader.create_swapchain(&create_info, None)?) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        unsafe { Ok(self.swapchain_loader.get_swapchain_images(swapchain)?) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe { Ok(self.device.create_image_view(&create_info, None)?) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VulkanResult<(u32, bool)> {
        unsafe {
            Ok(self
                .swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, signal, vk::Fence::null())?)
        }
    }

    fn queue_submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> VulkanResult<()> {
        let wait_semaphores = [wait];
        let wait_stages = [wait_stage];
        let signal_semaphores = [signal];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe { Ok(self.device.queue_submit(self.queue, &[submit_info], fence)?) }
    }

    fn queue_present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> VulkanResult<bool> {
        let waits = [wait];
        let wait_semaphores = if wait == vk::Semaphore::null() { &waits[..0] } else { &waits[..] };
        let swapchains = [swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { Ok(self.swapchain_loader.queue_present(self.queue, &present_info)?) }
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { Ok(self.device.device_wait_idle()?) }
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        unsafe { Ok(self.device.create_semaphore(&create_info, None)?) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { Ok(self.device.create_fence(&create_info, None)?) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<()> {
        unsafe { Ok(self.device.wait_for_fences(&[fence], true, timeout_ns)?) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        unsafe { Ok(self.device.reset_fences(&[fence])?) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.queue_family);
        unsafe { Ok(self.device.create_command_pool(&create_info, None)?) }
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { Ok(self.device.allocate_command_buffers(&alloc_info)?) }
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) };
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn create_render_pass(&self, color_format: vk::Format, depth_format: vk::Format) -> VulkanResult<vk::RenderPass> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let depth_attachment = vk::AttachmentDescription::builder()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        let attachments = [color_attachment, depth_attachment];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];

        // Acquire signals at color output; hold the layout transition until then
        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        unsafe { Ok(self.device.create_render_pass(&create_info, None)?) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_depth_image(&self, extent: vk::Extent2D, format: vk::Format) -> VulkanResult<DepthImage> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { self.device.create_image(&create_info, None)? };
        match self.create_depth_image_inner(image, format) {
            Ok((memory, view)) => Ok(DepthImage {
                image,
                memory,
                view,
                format,
            }),
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                Err(e)
            }
        }
    }

    fn destroy_depth_image(&self, depth: &DepthImage) {
        unsafe {
            self.device.destroy_image_view(depth.view, None);
            self.device.destroy_image(depth.image, None);
            self.device.free_memory(depth.memory, None);
        }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        unsafe { Ok(self.device.create_framebuffer(&create_info, None)?) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_buffer(&self, usage: vk::BufferUsageFlags, data: &[u8]) -> VulkanResult<GpuBuffer> {
        if data.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "cannot create an empty buffer".to_string(),
            });
        }
        let size = data.len() as vk::DeviceSize;
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&create_info, None)? };
        match self.fill_buffer(buffer, data) {
            Ok(memory) => Ok(GpuBuffer { buffer, memory, size }),
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                Err(e)
            }
        }
    }

    fn destroy_buffer(&self, buffer: &GpuBuffer) {
        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
            self.device.free_memory(buffer.memory, None);
        }
    }

    fn create_texture(&self, pool: vk::CommandPool, extent: vk::Extent2D, pixels: &[u8]) -> VulkanResult<TextureImage> {
        let expected = u64::from(extent.width) * u64::from(extent.height) * 4;
        if pixels.is_empty() || pixels.len() as u64 != expected {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "texture of {}x{} needs {expected} bytes, got {}",
                    extent.width,
                    extent.height,
                    pixels.len()
                ),
            });
        }

        let staging = self.create_buffer(vk::BufferUsageFlags::TRANSFER_SRC, pixels)?;
        let mut texture = TextureImage {
            image: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            extent,
        };
        let filled = self.fill_texture(&mut texture, pool, &staging);
        self.destroy_buffer(&staging);
        match filled {
            Ok(()) => {
                debug!("Uploaded {}x{} texture", extent.width, extent.height);
                Ok(texture)
            }
            Err(e) => {
                self.destroy_texture(&texture);
                Err(e)
            }
        }
    }

    fn destroy_texture(&self, texture: &TextureImage) {
        // Null handles are ignored by the driver, so partial textures are fine
        unsafe {
            self.device.destroy_sampler(texture.sampler, None);
            self.device.destroy_image_view(texture.view, None);
            self.device.destroy_image(texture.image, None);
            self.device.free_memory(texture.memory, None);
        }
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!("Device wait failed before destruction: {e:?}");
            }
            self.device.destroy_device(None);
        }
        debug!("Destroyed logical device");
    }
}

/// Index of the first memory type allowed by `type_filter` that has all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            type_filter & (1 << i) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

/// View aspect for a depth attachment; stencil formats get both aspects
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}
