//! Swapchain lifecycle and per-frame synchronization state

pub mod frame;
pub mod swapchain;
pub mod swapchain_manager;
pub mod sync;

pub use frame::{FrameCursor, FrameStatus, ImageOwnership, PendingImage};
pub use swapchain::Swapchain;
pub use swapchain_manager::{ManagerState, SwapchainGeneration, SwapchainManager, SwapchainSlot};
pub use sync::{DeviceSyncFactory, Fence, PerImageSync, Semaphore, SyncObjectFactory};
