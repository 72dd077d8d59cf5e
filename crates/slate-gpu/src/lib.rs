//! Vulkan abstraction layer for the Slate engine.
//!
//! This crate provides:
//! - Vulkan instance and device management
//! - Surface and swapchain handling
//! - Memory allocation via gpu-allocator
//! - Command buffer management
//! - Descriptor set allocation from growable fixed-capacity pools

pub mod allocator;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use allocator::{
    DescriptorAllocator, DescriptorBatch, PoolLedger, ReleaseOutcome, SampledImage,
    DEFAULT_SETS_PER_POOL,
};
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::DescriptorSetLayoutBuilder;
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::Swapchain;
pub use sync::{create_fence, create_semaphore, FrameSync, FrameSyncManager};

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
