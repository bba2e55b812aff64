//! Window surface queries through the `VK_KHR_surface` loader

use ash::extensions::khr;
use ash::vk;

use crate::render::backend::PresentationSurface;
use crate::render::error::VulkanResult;

/// Presentable surface of the platform window
pub struct VulkanSurface {
    loader: khr::Surface,
    surface: vk::SurfaceKHR,
}

impl VulkanSurface {
    pub(crate) fn new(loader: khr::Surface, surface: vk::SurfaceKHR) -> Self {
        Self { loader, surface }
    }
}

impl PresentationSurface for VulkanSurface {
    fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    fn supports_present(&self, adapter: vk::PhysicalDevice, family: u32) -> VulkanResult<bool> {
        unsafe {
            Ok(self
                .loader
                .get_physical_device_surface_support(adapter, family, self.surface)?)
        }
    }

    fn capabilities(&self, adapter: vk::PhysicalDevice) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            Ok(self
                .loader
                .get_physical_device_surface_capabilities(adapter, self.surface)?)
        }
    }

    fn formats(&self, adapter: vk::PhysicalDevice) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe { Ok(self.loader.get_physical_device_surface_formats(adapter, self.surface)?) }
    }

    fn present_modes(&self, adapter: vk::PhysicalDevice) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            Ok(self
                .loader
                .get_physical_device_surface_present_modes(adapter, self.surface)?)
        }
    }

    fn destroy(&mut self) {
        if self.surface != vk::SurfaceKHR::null() {
            unsafe { self.loader.destroy_surface(self.surface, None) };
            self.surface = vk::SurfaceKHR::null();
        }
    }
}
