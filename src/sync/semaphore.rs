// Semaphores - GPU to GPU ordering
//
// Binary semaphores have no CPU-side API. Timeline semaphores carry a
// monotonically increasing 64-bit counter that both queues and the host can
// signal and wait on. Monotonicity is enforced by the driver.

use ash::vk;
use std::time::Duration;

use super::{timeout_ns, wait_outcome, WaitOutcome};
use crate::backend::{SemaphoreKind, SharedDevice, Unique};
use crate::error::{Result, VkResultExt};

pub struct BinarySemaphore {
    handle: Unique<vk::Semaphore>,
}

impl BinarySemaphore {
    pub fn new(device: &SharedDevice) -> Result<Self> {
        let handle = device
            .create_semaphore(SemaphoreKind::Binary)
            .driver("vkCreateSemaphore")?;
        Ok(Self {
            handle: Unique::new(device, handle),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.handle.get()
    }
}

pub struct TimelineSemaphore {
    handle: Unique<vk::Semaphore>,
}

impl TimelineSemaphore {
    pub fn new(device: &SharedDevice, initial_value: u64) -> Result<Self> {
        let handle = device
            .create_semaphore(SemaphoreKind::Timeline { initial_value })
            .driver("vkCreateSemaphore")?;
        log::debug!("Created timeline semaphore {:?} at {}", handle, initial_value);
        Ok(Self {
            handle: Unique::new(device, handle),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.handle.get()
    }

    pub fn counter(&self) -> Result<u64> {
        self.handle
            .device()
            .semaphore_counter(self.handle())
            .driver("vkGetSemaphoreCounterValue")
    }

    /// Host signal; `value` must exceed the current counter
    pub fn signal(&self, value: u64) -> Result<()> {
        self.handle
            .device()
            .signal_semaphore(self.handle(), value)
            .driver("vkSignalSemaphore")
    }

    /// Blocks until the counter reaches `value` or `timeout` elapses
    pub fn wait(&self, value: u64, timeout: Duration) -> Result<WaitOutcome> {
        let result = self
            .handle
            .device()
            .wait_semaphore(self.handle(), value, timeout_ns(timeout));
        wait_outcome(result, "vkWaitSemaphores")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullDevice;
    use crate::error::Error;

    #[test]
    fn signal_then_wait_is_immediate() {
        let device: SharedDevice = NullDevice::new();
        let timeline = TimelineSemaphore::new(&device, 0).unwrap();
        timeline.signal(5).unwrap();
        assert_eq!(timeline.counter().unwrap(), 5);
        assert_eq!(timeline.wait(5, Duration::ZERO).unwrap(), WaitOutcome::Ready);
        assert_eq!(timeline.wait(3, Duration::ZERO).unwrap(), WaitOutcome::Ready);
        assert_eq!(timeline.wait(6, Duration::from_millis(1)).unwrap(), WaitOutcome::TimedOut);
    }

    #[test]
    fn non_increasing_signal_surfaces_driver_error() {
        let device: SharedDevice = NullDevice::new();
        let timeline = TimelineSemaphore::new(&device, 4).unwrap();
        let err = timeline.signal(4).unwrap_err();
        assert!(matches!(err, Error::Driver { call: "vkSignalSemaphore", .. }));
        assert_eq!(timeline.counter().unwrap(), 4);
    }
}
