//! Window management using GLFW
//!
//! Provides the window the renderer presents to, and the surface collaborator
//! the Vulkan instance asks for extensions and a surface.

use ash::vk;
use present_engine::render::{SurfaceProvider, VulkanError, VulkanResult};
use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed: {0}")]
    InitializationFailed(String),

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// What the render loop needs to know after polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSignal {
    /// Framebuffer changed size
    Resized(u32, u32),
    /// User asked to quit
    Close,
}

/// GLFW window configured for Vulkan
pub struct GlfwWindow {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl GlfwWindow {
    /// Create a resizable window with no client API
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|e| WindowError::InitializationFailed(e.to_string()))?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self { glfw, window, events })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Pump the event queue and translate what the render loop cares about
    pub fn poll(&mut self) -> Vec<WindowSignal> {
        self.glfw.poll_events();
        let mut signals = Vec::new();
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    signals.push(WindowSignal::Resized(width.max(0) as u32, height.max(0) as u32));
                }
                glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) | glfw::WindowEvent::Close => {
                    self.window.set_should_close(true);
                    signals.push(WindowSignal::Close);
                }
                _ => {}
            }
        }
        signals
    }

    /// Block until an event arrives; used while minimized
    pub fn wait(&mut self) {
        self.glfw.wait_events();
    }
}

impl SurfaceProvider for GlfwWindow {
    fn required_instance_extensions(&self) -> VulkanResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| VulkanError::InitializationFailed("GLFW reports no Vulkan support".to_string()))
    }

    fn create_surface(&self, _entry: &ash::Entry, instance: &ash::Instance) -> VulkanResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance.handle(), std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(VulkanError::Api(result))
        }
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        let (width, height) = self.window.get_framebuffer_size();
        vk::Extent2D {
            width: width.max(0) as u32,
            height: height.max(0) as u32,
        }
    }
}
