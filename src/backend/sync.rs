// Synchronization primitives
//
// Per frame in flight: the acquire semaphore, the render-done semaphore and
// the fence the CPU waits on before reusing the frame's command buffer.

use anyhow::{Context, Result};
use ash::vk;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Signaled so the first wait on each frame returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create image-available semaphore")?;
            let render_finished = device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create render-finished semaphore")?;
            let in_flight_fence = device
                .create_fence(&fence_info, None)
                .context("Failed to create in-flight fence")?;

            Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Slot after `current`, wrapping at `frames_in_flight`
pub fn next_frame(current: usize, frames_in_flight: usize) -> usize {
    (current + 1) % frames_in_flight.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_buffering_alternates() {
        let frames: Vec<usize> = std::iter::successors(Some(0), |&f| Some(next_frame(f, 2)))
            .take(5)
            .collect();
        assert_eq!(frames, [0, 1, 0, 1, 0]);
    }

    #[test]
    fn single_frame_stays_put() {
        assert_eq!(next_frame(0, 1), 0);
        assert_eq!(next_frame(0, 0), 0);
    }

    #[test]
    fn triple_buffering_wraps() {
        assert_eq!(next_frame(2, 3), 0);
        assert_eq!(next_frame(1, 3), 2);
    }
}
