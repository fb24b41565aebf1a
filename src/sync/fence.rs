// Fence - GPU to CPU completion signal

use ash::vk;
use std::time::Duration;

use super::{timeout_ns, wait_outcome, WaitOutcome};
use crate::backend::{SharedDevice, Unique};
use crate::error::{Result, VkResultExt};

pub struct Fence {
    handle: Unique<vk::Fence>,
}

impl Fence {
    /// Create a fence, optionally already signaled (first-frame pattern)
    pub fn new(device: &SharedDevice, signaled: bool) -> Result<Self> {
        let handle = device.create_fence(signaled).driver("vkCreateFence")?;
        log::debug!("Created fence {:?} (signaled: {})", handle, signaled);
        Ok(Self {
            handle: Unique::new(device, handle),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.handle.get()
    }

    /// Non-blocking status query
    pub fn signaled(&self) -> Result<bool> {
        self.handle.device().fence_status(self.handle()).driver("vkGetFenceStatus")
    }

    pub fn reset(&self) -> Result<()> {
        self.handle.device().reset_fence(self.handle()).driver("vkResetFences")
    }

    /// Blocks until signaled or `timeout` elapses; a zero timeout only polls
    pub fn wait(&self, timeout: Duration) -> Result<WaitOutcome> {
        let result = self
            .handle
            .device()
            .wait_for_fence(self.handle(), timeout_ns(timeout));
        wait_outcome(result, "vkWaitForFences")
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fence").field(&self.handle()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullDevice;

    #[test]
    fn signaled_fence_resets_and_then_times_out() {
        let device: SharedDevice = NullDevice::new();
        let fence = Fence::new(&device, true).unwrap();
        assert!(fence.signaled().unwrap());
        assert_eq!(fence.wait(Duration::ZERO).unwrap(), WaitOutcome::Ready);

        fence.reset().unwrap();
        assert!(!fence.signaled().unwrap());
        assert_eq!(fence.wait(Duration::ZERO).unwrap(), WaitOutcome::TimedOut);
        assert_eq!(fence.wait(Duration::from_millis(5)).unwrap(), WaitOutcome::TimedOut);
    }

    #[test]
    fn creation_failure_reports_driver_code() {
        let null = NullDevice::new();
        let device: SharedDevice = null.clone();
        null.fail_next("vkCreateFence", vk::Result::ERROR_DEVICE_LOST);
        let err = Fence::new(&device, false).unwrap_err();
        assert!(err.to_string().contains("vkCreateFence"));
        assert_eq!(null.live_objects(), 0);
    }
}
