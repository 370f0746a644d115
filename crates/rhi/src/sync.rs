//! Synchronization primitives.
//!
//! - [`Semaphore`] orders GPU work against GPU work (acquire before render,
//!   render before present).
//! - [`Fence`] lets the host wait for a submission to finish.
//! - [`FrameSync`] bundles the three objects one frame-in-flight slot needs.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Vulkan semaphore wrapper, created unsignaled.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Vulkan fence wrapper.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence, optionally already signaled.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence signals or `timeout_ns` elapses.
    ///
    /// `u64::MAX` waits forever.
    ///
    /// # Errors
    ///
    /// - [`RhiError::FrameTimeout`] if the timeout elapsed
    /// - [`RhiError::DeviceLost`] if the device was lost while waiting
    pub fn wait(&self, timeout_ns: u64) -> RhiResult<()> {
        let fences = [self.fence];
        let result = unsafe {
            self.device
                .handle()
                .wait_for_fences(&fences, true, timeout_ns)
        };
        map_wait_result(result, timeout_ns)
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// The fence must not be pending on any queue.
    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

fn map_wait_result(result: Result<(), vk::Result>, timeout_ns: u64) -> RhiResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(RhiError::FrameTimeout {
            timeout_ms: timeout_ns / 1_000_000,
        }),
        Err(vk::Result::ERROR_DEVICE_LOST) => Err(RhiError::DeviceLost),
        Err(e) => Err(e.into()),
    }
}

/// Synchronization objects for one frame-in-flight slot.
///
/// ```text
/// wait(in_flight) -> acquire(signals image_available) -> reset(in_flight)
///   -> submit(waits image_available, signals render_finished + in_flight)
///   -> present(waits render_finished)
/// ```
pub struct FrameSync {
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSync {
    /// The fence starts signaled so the slot's first wait returns at once.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        debug!("Created frame synchronization primitives");

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.handle()
    }

    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.handle()
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_buffered() {
        assert_eq!(MAX_FRAMES_IN_FLIGHT, 2);
    }

    #[test]
    fn test_wait_timeout_is_frame_timeout() {
        let err = map_wait_result(Err(vk::Result::TIMEOUT), 10_000_000_000).unwrap_err();
        assert!(matches!(err, RhiError::FrameTimeout { timeout_ms: 10_000 }));
    }

    #[test]
    fn test_wait_device_lost() {
        let err = map_wait_result(Err(vk::Result::ERROR_DEVICE_LOST), u64::MAX).unwrap_err();
        assert!(matches!(err, RhiError::DeviceLost));
    }

    #[test]
    fn test_wait_other_errors_pass_through() {
        assert!(map_wait_result(Ok(()), 0).is_ok());
        let err =
            map_wait_result(Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY), u64::MAX).unwrap_err();
        assert!(matches!(
            err,
            RhiError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        ));
    }

    #[test]
    fn test_frame_sync_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FrameSync>();
    }
}
