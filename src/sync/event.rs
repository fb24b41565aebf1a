// Event - fine-grained split barrier
//
// The device only knows set / unset. A recorder that records a set marks the
// event `SetPending` until the device is observed to have set it, or until
// the recording is discarded without being submitted.

use ash::vk;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::backend::{SharedDevice, Unique};
use crate::error::{Result, VkResultExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Unset,
    /// Set recorded into a command buffer, not yet observed on the device
    SetPending,
    Set,
}

/// Host-side bookkeeping shared between an event and the recorders that set it
#[derive(Debug, Default)]
pub(crate) struct EventMarks {
    // Recorded sets not yet observed on the device
    pending: AtomicU32,
    // Stages that may set this event since its last reset, consumed by vkCmdWaitEvents
    set_stages: AtomicU32,
}

impl EventMarks {
    fn clear(&self) {
        self.pending.store(0, Ordering::Release);
        self.set_stages.store(0, Ordering::Relaxed);
    }

    /// Drops one recorded set whose command buffer was reset or dropped unsubmitted
    pub(crate) fn discard_set(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

pub struct Event {
    handle: Unique<vk::Event>,
    marks: Arc<EventMarks>,
}

impl Event {
    pub fn new(device: &SharedDevice) -> Result<Self> {
        let handle = device.create_event().driver("vkCreateEvent")?;
        Ok(Self {
            handle: Unique::new(device, handle),
            marks: Arc::default(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Event {
        self.handle.get()
    }

    /// Host-side set
    pub fn set(&self) -> Result<()> {
        self.handle.device().set_event(self.handle()).driver("vkSetEvent")?;
        self.marks
            .set_stages
            .fetch_or(vk::PipelineStageFlags::HOST.as_raw(), Ordering::Relaxed);
        self.marks.pending.store(0, Ordering::Release);
        Ok(())
    }

    /// Host-side reset
    pub fn reset(&self) -> Result<()> {
        self.handle.device().reset_event(self.handle()).driver("vkResetEvent")?;
        self.marks.clear();
        Ok(())
    }

    /// Snapshot; may be stale as soon as it returns
    pub fn signaled(&self) -> Result<bool> {
        let set = self
            .handle
            .device()
            .event_status(self.handle())
            .driver("vkGetEventStatus")?;
        if set {
            self.marks.pending.store(0, Ordering::Release);
        }
        Ok(set)
    }

    pub fn state(&self) -> Result<EventState> {
        if self.signaled()? {
            Ok(EventState::Set)
        } else if self.marks.pending.load(Ordering::Acquire) > 0 {
            Ok(EventState::SetPending)
        } else {
            Ok(EventState::Unset)
        }
    }

    /// Returns the marks so the recorder can discard the set with its recording
    pub(crate) fn mark_set_recorded(&self, stage: vk::PipelineStageFlags) -> Arc<EventMarks> {
        self.marks.set_stages.fetch_or(stage.as_raw(), Ordering::Relaxed);
        self.marks.pending.fetch_add(1, Ordering::AcqRel);
        Arc::clone(&self.marks)
    }

    pub(crate) fn mark_reset_recorded(&self) {
        self.marks.clear();
    }

    pub(crate) fn set_stages(&self) -> vk::PipelineStageFlags {
        vk::PipelineStageFlags::from_raw(self.marks.set_stages.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullDevice;

    #[test]
    fn host_set_and_reset() {
        let device: SharedDevice = NullDevice::new();
        let event = Event::new(&device).unwrap();
        assert_eq!(event.state().unwrap(), EventState::Unset);

        event.set().unwrap();
        assert!(event.signaled().unwrap());
        assert_eq!(event.state().unwrap(), EventState::Set);
        assert!(event.set_stages().contains(vk::PipelineStageFlags::HOST));

        event.reset().unwrap();
        assert_eq!(event.state().unwrap(), EventState::Unset);
        assert!(event.set_stages().is_empty());
    }

    #[test]
    fn recorded_set_is_pending_until_observed() {
        let device: SharedDevice = NullDevice::new();
        let event = Event::new(&device).unwrap();
        let _marks = event.mark_set_recorded(vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(event.state().unwrap(), EventState::SetPending);

        device.set_event(event.handle()).unwrap();
        assert_eq!(event.state().unwrap(), EventState::Set);
        device.reset_event(event.handle()).unwrap();
        assert_eq!(event.state().unwrap(), EventState::Unset);
    }

    #[test]
    fn discarded_sets_only_clear_their_own_mark() {
        let device: SharedDevice = NullDevice::new();
        let event = Event::new(&device).unwrap();
        let first = event.mark_set_recorded(vk::PipelineStageFlags::TRANSFER);
        let second = event.mark_set_recorded(vk::PipelineStageFlags::COMPUTE_SHADER);

        first.discard_set();
        assert_eq!(event.state().unwrap(), EventState::SetPending);
        second.discard_set();
        assert_eq!(event.state().unwrap(), EventState::Unset);
        second.discard_set();
        assert_eq!(event.state().unwrap(), EventState::Unset);

        event.mark_reset_recorded();
        assert!(event.set_stages().is_empty());
    }
}
