// Synchronization primitives
//
// Fences and timeline semaphores are the only CPU-blocking objects; every
// blocking call takes an explicit timeout and reports expiry as
// `WaitOutcome::TimedOut` rather than an error.

pub mod barrier;
pub mod event;
pub mod fence;
pub mod semaphore;

pub use barrier::{
    Barrier, BarrierBatch, BufferBarrier, BufferBarrierBuilder, ImageBarrier, ImageBarrierBuilder, MemoryBarrier,
    MemoryBarrierBuilder,
};
pub use event::{Event, EventState};
pub use fence::Fence;
pub use semaphore::{BinarySemaphore, TimelineSemaphore};

use ash::vk;
use std::time::Duration;

use crate::error::{Result, VkResultExt};

/// Result of a bounded CPU wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_ready(self) -> bool {
        self == WaitOutcome::Ready
    }
}

/// Saturates: anything past ~584 years waits forever
pub(crate) fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Folds `vk::Result::TIMEOUT` into `WaitOutcome::TimedOut`
pub(crate) fn wait_outcome(result: std::result::Result<(), vk::Result>, call: &'static str) -> Result<WaitOutcome> {
    match result {
        Ok(()) => Ok(WaitOutcome::Ready),
        Err(vk::Result::TIMEOUT) => Ok(WaitOutcome::TimedOut),
        Err(result) => Err(result).driver(call),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_timeouts_saturate() {
        assert_eq!(timeout_ns(Duration::MAX), u64::MAX);
        assert_eq!(timeout_ns(Duration::from_millis(2)), 2_000_000);
    }

    #[test]
    fn timeout_code_is_not_an_error() {
        assert_eq!(
            wait_outcome(Err(vk::Result::TIMEOUT), "vkWaitForFences").unwrap(),
            WaitOutcome::TimedOut
        );
        assert!(wait_outcome(Err(vk::Result::ERROR_DEVICE_LOST), "vkWaitForFences").is_err());
    }
}
