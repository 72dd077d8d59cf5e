//! Synchronization primitives.

use crate::error::Result;
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Wait for a fence to be signaled.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_for_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout_ns: u64,
) -> Result<()> {
    device.wait_for_fences(&[fence], true, timeout_ns)?;
    Ok(())
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}

/// Per-frame synchronization resources.
pub struct FrameSync {
    /// Semaphore signaled when the acquired image is available
    pub image_available: vk::Semaphore,
    /// Fence to wait for frame completion
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create frame synchronization resources.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        Ok(Self {
            image_available: create_semaphore(device)?,
            in_flight: create_fence(device, true)?,
        })
    }

    /// Wait for this frame to be available.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        wait_for_fence(device, self.in_flight, u64::MAX)
    }

    /// Reset the fence for the next frame.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        reset_fence(device, self.in_flight)
    }

    /// Destroy synchronization resources.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_fence(self.in_flight, None);
    }
}

/// Synchronization for multiple frames in flight.
///
/// Holds one [`FrameSync`] per frame and one render-finished semaphore per
/// swapchain image. Render-finished semaphores are keyed by the acquired
/// image index so presenting image N always waits on semaphore N, even when
/// acquisition returns images out of order.
pub struct FrameSyncManager {
    frame_syncs: Vec<FrameSync>,
    render_finished: Vec<vk::Semaphore>,
}

impl FrameSyncManager {
    /// Create sync resources for the given frame and swapchain image counts.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        frames_in_flight: usize,
        image_count: usize,
    ) -> Result<Self> {
        let mut frame_syncs = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            frame_syncs.push(FrameSync::new(device)?);
        }

        let mut render_finished = Vec::with_capacity(image_count);
        for _ in 0..image_count {
            render_finished.push(create_semaphore(device)?);
        }

        Ok(Self {
            frame_syncs,
            render_finished,
        })
    }

    /// Number of frames in flight.
    pub fn frames_in_flight(&self) -> usize {
        self.frame_syncs.len()
    }

    /// Get the sync resources for a frame index.
    pub fn frame(&self, frame_index: usize) -> &FrameSync {
        &self.frame_syncs[frame_index % self.frame_syncs.len()]
    }

    /// Get the render-finished semaphore for a swapchain image.
    pub fn render_finished(&self, image_index: u32) -> vk::Semaphore {
        self.render_finished[image_index as usize]
    }

    /// Rebuild the render-finished semaphores after swapchain recreation.
    ///
    /// # Safety
    /// The device must be valid and the old semaphores must not be in use.
    pub unsafe fn resize_images(&mut self, device: &ash::Device, image_count: usize) -> Result<()> {
        for &semaphore in &self.render_finished {
            device.destroy_semaphore(semaphore, None);
        }
        self.render_finished.clear();
        for _ in 0..image_count {
            self.render_finished.push(create_semaphore(device)?);
        }
        Ok(())
    }

    /// Destroy all resources.
    ///
    /// # Safety
    /// The device must be valid and all resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        for sync in &self.frame_syncs {
            sync.destroy(device);
        }
        for &semaphore in &self.render_finished {
            device.destroy_semaphore(semaphore, None);
        }
    }
}
