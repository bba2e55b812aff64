//! Swapchain management
//!
//! Owns the presentable-image chain for one surface. Selection policy lives
//! in free functions so it can be checked without a device; the manager
//! applies it and sequences creation, recreation and teardown.
//!
//! A recreated chain is built while the old generation is still alive. The
//! old generation is only destroyed once every image and view of the new one
//! exists; if any step fails the new chain is destroyed and the old
//! generation is put back untouched.

use ash::vk;
use log::{debug, info, warn};

use crate::render::backend::{AdapterInfo, GpuDevice, PresentationSurface, SwapchainDescriptor};
use crate::render::error::{classify, PhaseExt, RenderError, RenderResult, SetupPhase};

/// Sentinel extent meaning the application chooses the size
pub const SURFACE_DEFINED_EXTENT: u32 = u32::MAX;

/// Format used when the surface has no preference
pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Pick the family that serves both graphics and presentation
///
/// `supports_present` is asked about each family in index order.
pub fn select_queue_family(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> RenderResult<bool>,
) -> RenderResult<u32> {
    let mut graphics = None;
    let mut present = None;

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        let has_graphics = family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_present = family.queue_count > 0 && supports_present(index)?;

        if has_graphics && has_present {
            return Ok(index);
        }
        if has_graphics && graphics.is_none() {
            graphics = Some(index);
        }
        if has_present && present.is_none() {
            present = Some(index);
        }
    }

    match (graphics, present) {
        (Some(graphics), Some(present)) => Err(RenderError::SeparateQueuesUnsupported { graphics, present }),
        _ => Err(RenderError::NoSuitableQueue),
    }
}

/// First reported format, or the default when the surface has no preference
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RenderResult<vk::SurfaceFormatKHR> {
    match formats {
        [] => Err(RenderError::NoSurfaceFormats),
        [only] if only.format == vk::Format::UNDEFINED => Ok(DEFAULT_SURFACE_FORMAT),
        [first, ..] => Ok(*first),
    }
}

/// FIFO with vsync; otherwise mailbox, then immediate, then FIFO
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent, or the request clamped to the surface limits
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    let current = capabilities.current_extent;
    if current.width != SURFACE_DEFINED_EXTENT && current.height != SURFACE_DEFINED_EXTENT {
        return current;
    }
    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: requested.width.clamp(min.width, max.width.max(min.width)),
        height: requested.height.clamp(min.height, max.height.max(min.height)),
    }
}

/// One more than the minimum, capped by a nonzero maximum
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Identity when supported, otherwise the current transform
pub fn choose_pre_transform(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

/// First supported of opaque, pre-multiplied, post-multiplied, inherit
pub fn choose_composite_alpha(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&alpha| capabilities.supported_composite_alpha.contains(alpha))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Color attachment, plus transfer source when the format can be blitted from
pub fn choose_image_usage(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    format_properties: &vk::FormatProperties,
) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
    let blit = format_properties
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::BLIT_SRC);
    if blit && capabilities.supported_usage_flags.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    usage
}

/// Color format and space chosen for the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Color format
    pub color_format: vk::Format,
    /// Color space
    pub color_space: vk::ColorSpaceKHR,
}

impl NegotiatedFormat {
    fn surface_format(self) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format: self.color_format,
            color_space: self.color_space,
        }
    }
}

/// One presentable image and its view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainBuffer {
    /// Image owned by the swapchain
    pub image: vk::Image,
    /// View owned by the generation
    pub view: vk::ImageView,
}

/// One complete chain of presentable images
#[derive(Debug)]
pub struct SwapchainGeneration {
    /// Monotonic generation number
    pub id: u64,
    /// Swapchain handle
    pub handle: vk::SwapchainKHR,
    /// Color format
    pub format: vk::Format,
    /// Color space
    pub color_space: vk::ColorSpaceKHR,
    /// Image extent
    pub extent: vk::Extent2D,
    /// Present mode
    pub present_mode: vk::PresentModeKHR,
    /// Number of images the driver returned
    pub image_count: u32,
    /// Image usage
    pub usage: vk::ImageUsageFlags,
    /// Images and views in swapchain index order
    pub buffers: Vec<SwapchainBuffer>,
    previous: Option<Box<SwapchainGeneration>>,
}

impl SwapchainGeneration {
    /// Views of every buffer, in index order
    pub fn views(&self) -> impl Iterator<Item = vk::ImageView> + '_ {
        self.buffers.iter().map(|b| b.view)
    }

    /// Whether transfer-source usage was enabled
    pub fn supports_capture(&self) -> bool {
        self.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC)
    }

    /// Destroy every view, then the chain
    ///
    /// Null handles are skipped, so a second call does nothing.
    pub fn destroy(&mut self, device: &dyn GpuDevice) {
        for buffer in self.buffers.drain(..) {
            if buffer.view != vk::ImageView::null() {
                device.destroy_image_view(buffer.view);
            }
        }
        if self.handle != vk::SwapchainKHR::null() {
            device.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
            debug!("Destroyed swapchain generation {}", self.id);
        }
    }
}

/// Result of a successful acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    /// Index into the generation's buffers
    pub index: u32,
    /// The chain still works but no longer matches the surface exactly
    pub suboptimal: bool,
}

/// Result of a successful present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Queued for display
    Presented,
    /// Queued, but the chain should be recreated
    Suboptimal,
}

/// Owns the surface and the live swapchain generation
pub struct SwapchainManager<S: PresentationSurface> {
    surface: S,
    format: Option<NegotiatedFormat>,
    queue_family: Option<u32>,
    current: Option<SwapchainGeneration>,
    generations_created: u64,
    surface_destroyed: bool,
}

impl<S: PresentationSurface> SwapchainManager<S> {
    /// Take ownership of a surface
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            format: None,
            queue_family: None,
            current: None,
            generations_created: 0,
            surface_destroyed: false,
        }
    }

    /// The surface capability
    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Find the joint graphics+present family on an adapter
    pub fn select_queue(&self, adapter: &AdapterInfo) -> RenderResult<u32> {
        select_queue_family(&adapter.queue_families, |family| {
            self.surface
                .supports_present(adapter.handle, family)
                .during(SetupPhase::DeviceSelection)
        })
    }

    /// Choose the color format and confirm the device queue can present
    pub fn negotiate(&mut self, device: &dyn GpuDevice) -> RenderResult<NegotiatedFormat> {
        let adapter = device.physical_device();
        let family = device.queue_family();
        if !self
            .surface
            .supports_present(adapter, family)
            .during(SetupPhase::SurfaceBinding)?
        {
            return Err(RenderError::NoSuitableQueue);
        }

        let formats = self.surface.formats(adapter).during(SetupPhase::SurfaceBinding)?;
        let chosen = choose_surface_format(&formats)?;
        let negotiated = NegotiatedFormat {
            color_format: chosen.format,
            color_space: chosen.color_space,
        };
        debug!("Negotiated surface format {:?} / {:?}", chosen.format, chosen.color_space);

        self.format = Some(negotiated);
        self.queue_family = Some(family);
        Ok(negotiated)
    }

    /// Create the first generation, or replace the current one
    pub fn create(
        &mut self,
        device: &dyn GpuDevice,
        requested_extent: vk::Extent2D,
        vsync: bool,
    ) -> RenderResult<&SwapchainGeneration> {
        let format = self
            .format
            .ok_or_else(|| RenderError::invalid_state("create swapchain", "format not negotiated"))?;
        let phase = SetupPhase::SwapchainCreation;
        let adapter = device.physical_device();

        let capabilities = self.surface.capabilities(adapter).during(phase)?;
        let present_modes = self.surface.present_modes(adapter).during(phase)?;
        let format_properties = device.format_properties(format.color_format);

        let extent = choose_extent(&capabilities, requested_extent);
        let present_mode = choose_present_mode(&present_modes, vsync);
        let usage = choose_image_usage(&capabilities, &format_properties);

        let previous = self.current.take();
        let descriptor = SwapchainDescriptor {
            surface: self.surface.handle(),
            min_image_count: choose_image_count(&capabilities),
            format: format.surface_format(),
            extent,
            usage,
            pre_transform: choose_pre_transform(&capabilities),
            composite_alpha: choose_composite_alpha(&capabilities),
            present_mode,
            old_swapchain: previous.as_ref().map_or(vk::SwapchainKHR::null(), |g| g.handle),
        };

        let handle = match device.create_swapchain(&descriptor) {
            Ok(handle) => handle,
            Err(e) => {
                self.current = previous;
                return Err(classify(phase, e));
            }
        };

        // The old generation stays alive until these succeed
        let images = match device.swapchain_images(handle) {
            Ok(images) => images,
            Err(e) => {
                warn!("Swapchain image retrieval failed, keeping previous generation");
                device.destroy_swapchain(handle);
                self.current = previous;
                return Err(classify(phase, e));
            }
        };

        self.generations_created += 1;
        let mut generation = SwapchainGeneration {
            id: self.generations_created,
            handle,
            format: format.color_format,
            color_space: format.color_space,
            extent,
            present_mode,
            image_count: images.len() as u32,
            usage,
            buffers: Vec::with_capacity(images.len()),
            previous: previous.map(Box::new),
        };

        for image in images {
            match device.create_image_view(image, format.color_format, vk::ImageAspectFlags::COLOR) {
                Ok(view) => generation.buffers.push(SwapchainBuffer { image, view }),
                Err(e) => {
                    warn!("Swapchain image view creation failed, keeping previous generation");
                    self.current = generation.previous.take().map(|b| *b);
                    generation.destroy(device);
                    return Err(classify(phase, e));
                }
            }
        }

        if let Some(mut old) = generation.previous.take() {
            old.destroy(device);
            debug!("Retired swapchain generation {} for {}", old.id, generation.id);
        }

        info!(
            "Created swapchain generation {}: {}x{}, {:?}, {:?}, {} images{}",
            generation.id,
            extent.width,
            extent.height,
            generation.format,
            present_mode,
            generation.image_count,
            if generation.supports_capture() { ", capture enabled" } else { "" }
        );

        let generation = self.current.insert(generation);
        Ok(&*generation)
    }

    /// Wait for the next presentable image
    ///
    /// `timeout_ns == u64::MAX` blocks until an image is available.
    pub fn acquire_next(
        &self,
        device: &dyn GpuDevice,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> RenderResult<AcquiredImage> {
        let generation = self.live("acquire_next")?;
        let (index, suboptimal) = device
            .acquire_next_image(generation.handle, timeout_ns, signal)
            .during(SetupPhase::FrameLoop)?;
        if suboptimal {
            warn!("Acquired image {index} from a suboptimal swapchain");
        }
        Ok(AcquiredImage { index, suboptimal })
    }

    /// Queue an image for display after `wait` is signaled
    pub fn present(&self, device: &dyn GpuDevice, index: u32, wait: vk::Semaphore) -> RenderResult<PresentOutcome> {
        let generation = self.live("present")?;
        let suboptimal = device
            .queue_present(generation.handle, index, wait)
            .during(SetupPhase::FrameLoop)?;
        if suboptimal {
            warn!("Presented image {index} to a suboptimal swapchain");
            Ok(PresentOutcome::Suboptimal)
        } else {
            Ok(PresentOutcome::Presented)
        }
    }

    /// Destroy views, then the chain, then the surface
    ///
    /// Works on a partially built manager and on one already torn down.
    /// Without a device only the surface can be released.
    pub fn teardown(&mut self, device: Option<&dyn GpuDevice>) {
        if let Some(mut generation) = self.current.take() {
            match device {
                Some(device) => generation.destroy(device),
                None => warn!("Swapchain generation {} leaked: no device at teardown", generation.id),
            }
        }
        if !self.surface_destroyed {
            self.surface.destroy();
            self.surface_destroyed = true;
            debug!("Destroyed surface");
        }
    }

    /// The live generation, if any
    pub fn current(&self) -> Option<&SwapchainGeneration> {
        self.current.as_ref()
    }

    /// Extent of the live generation
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.current.as_ref().map(|g| g.extent)
    }

    /// Image count of the live generation, zero when there is none
    pub fn image_count(&self) -> u32 {
        self.current.as_ref().map_or(0, |g| g.image_count)
    }

    /// Negotiated format, once known
    pub fn format(&self) -> Option<NegotiatedFormat> {
        self.format
    }

    /// Queue family confirmed by `negotiate`
    pub fn queue_family(&self) -> Option<u32> {
        self.queue_family
    }

    /// Number of generations created so far
    pub fn generations_created(&self) -> u64 {
        self.generations_created
    }

    fn live(&self, operation: &'static str) -> RenderResult<&SwapchainGeneration> {
        self.current
            .as_ref()
            .ok_or_else(|| RenderError::invalid_state(operation, "no swapchain"))
    }
}
