//! Rendering

pub mod backends;
