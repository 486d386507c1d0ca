//! Window management using GLFW
//!
//! The presenter only needs a handful of window queries, collected in [`EventPump`] so
//! the resize logic can run against a fake in tests.

use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// GLFW reports no Vulkan loader
    #[error("Vulkan is not supported by the window system")]
    VulkanUnsupported,

    /// Window creation failed
    #[error("Window creation failed")]
    CreationFailed,

    /// Any other GLFW failure
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Window queries the presenter depends on
pub trait EventPump {
    /// Drawable size in pixels
    fn framebuffer_size(&self) -> (u32, u32);
    /// Process pending events without blocking
    fn poll_events(&mut self);
    /// Block until at least one event arrives
    fn wait_events(&mut self);
    /// Whether the user asked to close the window
    fn should_close(&self) -> bool;
    /// Request (or cancel) closing the window
    fn set_should_close(&mut self, should_close: bool);
}

/// Block until the drawable area is non-empty
///
/// A minimized window reports 0x0; this is the only place the presenter waits on the user.
pub fn wait_for_drawable_size<P: EventPump + ?Sized>(pump: &mut P) -> (u32, u32) {
    loop {
        let (width, height) = pump.framebuffer_size();
        if width > 0 && height > 0 {
            return (width, height);
        }
        log::debug!("Framebuffer is {}x{}, waiting for events", width, height);
        pump.wait_events();
    }
}

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Create a resizable window without a client API
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|_| WindowError::InitializationFailed)?;

        if !glfw.vulkan_supported() {
            return Err(WindowError::VulkanUnsupported);
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::debug!("Created {}x{} window '{}'", width, height, title);

        Ok(Self { glfw, window, events })
    }

    /// Get required Vulkan instance extensions from GLFW
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Failed to get required extensions".to_string()))
    }

    /// Create Vulkan surface using GLFW's built-in functionality
    pub fn create_vulkan_surface(&self, instance: ash::vk::Instance) -> WindowResult<ash::vk::SurfaceKHR> {
        let mut surface = ash::vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == ash::vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!("Failed to create Vulkan surface: {:?}", result)))
        }
    }

    fn drain_events(&mut self) {
        let mut close_requested = false;
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => {
                    close_requested = true;
                }
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    log::debug!("Framebuffer resized to {}x{}", width, height);
                }
                _ => {}
            }
        }
        if close_requested {
            self.window.set_should_close(true);
        }
    }
}

impl EventPump for Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    fn poll_events(&mut self) {
        self.glfw.poll_events();
        self.drain_events();
    }

    fn wait_events(&mut self) {
        self.glfw.wait_events();
        self.drain_events();
    }

    fn should_close(&self) -> bool {
        self.window.should_close()
    }

    fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Pump that replays a scripted sequence of framebuffer sizes
    pub(crate) struct ScriptedPump {
        sizes: VecDeque<(u32, u32)>,
        pub(crate) waits: usize,
        pub(crate) polls: usize,
        closed: bool,
    }

    impl ScriptedPump {
        pub(crate) fn new(sizes: &[(u32, u32)]) -> Self {
            Self {
                sizes: sizes.iter().copied().collect(),
                waits: 0,
                polls: 0,
                closed: false,
            }
        }
    }

    impl EventPump for ScriptedPump {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.sizes.front().copied().unwrap_or((0, 0))
        }

        fn poll_events(&mut self) {
            self.polls += 1;
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            if self.sizes.len() > 1 {
                self.sizes.pop_front();
            }
        }

        fn should_close(&self) -> bool {
            self.closed
        }

        fn set_should_close(&mut self, should_close: bool) {
            self.closed = should_close;
        }
    }

    #[test]
    fn test_drawable_size_returns_immediately() {
        let mut pump = ScriptedPump::new(&[(800, 600)]);
        assert_eq!(wait_for_drawable_size(&mut pump), (800, 600));
        assert_eq!(pump.waits, 0);
    }

    #[test]
    fn test_minimized_window_blocks_until_restored() {
        let mut pump = ScriptedPump::new(&[(0, 0), (0, 0), (1024, 0), (1024, 768)]);
        assert_eq!(wait_for_drawable_size(&mut pump), (1024, 768));
        assert_eq!(pump.waits, 3);
        assert_eq!(pump.polls, 0);
    }

    #[test]
    fn test_close_flag_round_trip() {
        let mut pump = ScriptedPump::new(&[(1, 1)]);
        assert!(!pump.should_close());
        pump.set_should_close(true);
        assert!(pump.should_close());
    }
}
