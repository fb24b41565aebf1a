// SubmitInfo - semaphore waits and signals for one queue submission

use ash::vk;

use crate::backend::{SemaphoreSignal, SemaphoreWait};
use crate::sync::{BinarySemaphore, TimelineSemaphore};

/// Borrowed semaphores stay alive at least until the submission is enqueued;
/// keeping them alive until it completes is the caller's job.
#[derive(Debug, Clone, Default)]
pub struct SubmitInfo {
    waits: Vec<SemaphoreWait>,
    signals: Vec<SemaphoreSignal>,
}

impl SubmitInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `stage` until the binary semaphore is signaled (and unsignal it)
    pub fn wait_binary(mut self, semaphore: &BinarySemaphore, stage: vk::PipelineStageFlags) -> Self {
        self.waits.push(SemaphoreWait {
            semaphore: semaphore.handle(),
            value: 0,
            stage,
        });
        self
    }

    /// Block `stage` until the timeline counter reaches `value`
    pub fn wait_timeline(mut self, semaphore: &TimelineSemaphore, value: u64, stage: vk::PipelineStageFlags) -> Self {
        self.waits.push(SemaphoreWait {
            semaphore: semaphore.handle(),
            value,
            stage,
        });
        self
    }

    pub fn signal_binary(mut self, semaphore: &BinarySemaphore) -> Self {
        self.signals.push(SemaphoreSignal {
            semaphore: semaphore.handle(),
            value: 0,
        });
        self
    }

    /// Set the timeline counter to `value` once the batch completes
    pub fn signal_timeline(mut self, semaphore: &TimelineSemaphore, value: u64) -> Self {
        self.signals.push(SemaphoreSignal {
            semaphore: semaphore.handle(),
            value,
        });
        self
    }

    pub fn waits(&self) -> &[SemaphoreWait] {
        &self.waits
    }

    pub fn signals(&self) -> &[SemaphoreSignal] {
        &self.signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{NullDevice, SharedDevice};

    #[test]
    fn collects_waits_and_signals_in_order() {
        let device: SharedDevice = NullDevice::new();
        let acquire = BinarySemaphore::new(&device).unwrap();
        let timeline = TimelineSemaphore::new(&device, 0).unwrap();

        let info = SubmitInfo::new()
            .wait_binary(&acquire, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .wait_timeline(&timeline, 3, vk::PipelineStageFlags::COMPUTE_SHADER)
            .signal_timeline(&timeline, 4);

        assert_eq!(info.waits().len(), 2);
        assert_eq!(info.waits()[1].value, 3);
        assert_eq!(info.waits()[1].semaphore, timeline.handle());
        assert_eq!(info.signals().len(), 1);
        assert_eq!(info.signals()[0].value, 4);
    }
}
