//! RHI-specific error types.
//!
//! Every variant here is fatal to the caller. A stale swapchain is not an
//! error: acquire and present report it through their status enums.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    /// Another thread panicked while holding the allocator lock
    #[error("GPU allocator lock poisoned")]
    AllocatorPoisoned,

    /// Validation was requested but the layer is not installed
    #[error("Validation layer {0} requested but not available")]
    MissingValidationLayer(String),

    /// Physical device enumeration returned nothing
    #[error("Failed to find GPUs with Vulkan support")]
    NoDevicesPresent,

    /// Devices exist but none meets the renderer's requirements
    #[error("Failed to find a suitable GPU")]
    NoSuitableDevice,

    /// vkCreateSwapchainKHR or the image query failed
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreation(vk::Result),

    /// Swapchain image view creation failed
    #[error("Failed to create image view: {0}")]
    ImageViewCreation(vk::Result),

    /// Framebuffer creation failed
    #[error("Failed to create framebuffer: {0}")]
    FramebufferCreation(vk::Result),

    /// vkAcquireNextImageKHR failed with something other than out-of-date
    #[error("Failed to acquire swapchain image: {0}")]
    SwapchainAcquire(vk::Result),

    /// vkQueuePresentKHR failed with something other than out-of-date/suboptimal
    #[error("Failed to present swapchain image: {0}")]
    SwapchainPresent(vk::Result),

    /// A frame fence did not signal within the configured timeout
    #[error("Frame fence not signaled within {timeout_ms} ms")]
    FrameTimeout { timeout_ms: u64 },

    /// The logical device was lost (driver reset, GPU hang)
    #[error("GPU device lost")]
    DeviceLost,

    /// No format satisfies the requested features
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Shader loading error
    #[error("Shader error: {0}")]
    Shader(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// A resource was used with an invalid size or state
    #[error("Invalid resource: {0}")]
    InvalidResource(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
