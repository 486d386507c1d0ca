//! Device layer: window, instance, surface and logical device

pub mod context;
pub mod surface;
pub mod window;

pub use context::*;
pub use surface::Surface;
pub use window::{wait_for_drawable_size, EventPump, Window, WindowError, WindowResult};
