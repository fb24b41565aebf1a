// Fences, semaphores, events and barrier validation

mod common;

use common::null_device;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use vkgraph::vk::{self, Handle};
use vkgraph::{
    BarrierBatch, BufferBarrier, CommandBuffer, Error, Event, EventState, Fence, ImageBarrier, MemoryBarrier,
    QueueType, SubmitInfo, TimelineSemaphore, WaitOutcome,
};

#[test]
fn fence_created_signaled() {
    let (_null, device) = null_device();
    let fence = Fence::new(&device, true).unwrap();
    assert!(fence.signaled().unwrap());
    assert_eq!(fence.wait(Duration::ZERO).unwrap(), WaitOutcome::Ready);

    fence.reset().unwrap();
    assert!(!fence.signaled().unwrap());
    assert_eq!(fence.wait(Duration::ZERO).unwrap(), WaitOutcome::TimedOut);
}

#[test]
fn timeline_signal_and_wait() {
    let (_null, device) = null_device();
    let timeline = TimelineSemaphore::new(&device, 0).unwrap();
    timeline.signal(5).unwrap();
    assert_eq!(timeline.counter().unwrap(), 5);
    assert_eq!(timeline.wait(5, Duration::ZERO).unwrap(), WaitOutcome::Ready);
    assert_eq!(
        timeline.wait(6, Duration::from_millis(10)).unwrap(),
        WaitOutcome::TimedOut
    );
}

#[test]
fn timeline_wait_unblocked_by_another_thread() {
    let (_null, device) = null_device();
    let timeline = Arc::new(TimelineSemaphore::new(&device, 5).unwrap());

    let signaller = {
        let timeline = Arc::clone(&timeline);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            timeline.signal(6).unwrap();
        })
    };

    assert_eq!(timeline.wait(6, Duration::from_secs(5)).unwrap(), WaitOutcome::Ready);
    assert!(timeline.counter().unwrap() >= 6);
    signaller.join().unwrap();
}

#[test]
fn timeline_signal_must_increase() {
    let (_null, device) = null_device();
    let timeline = TimelineSemaphore::new(&device, 3).unwrap();
    assert!(matches!(
        timeline.signal(3),
        Err(Error::Driver {
            call: "vkSignalSemaphore",
            ..
        })
    ));
    assert_eq!(timeline.counter().unwrap(), 3);
}

#[test]
fn event_moves_through_pending() {
    let (_null, device) = null_device();
    let event = Event::new(&device).unwrap();
    assert_eq!(event.state().unwrap(), EventState::Unset);

    let mut cmd = CommandBuffer::new(&device, QueueType::Compute).unwrap();
    cmd.set_event(&event, vk::PipelineStageFlags::COMPUTE_SHADER).unwrap();
    assert_eq!(event.state().unwrap(), EventState::SetPending);

    cmd.submit(None).unwrap();
    assert_eq!(event.state().unwrap(), EventState::Set);
    assert!(event.signaled().unwrap());

    event.reset().unwrap();
    assert_eq!(event.state().unwrap(), EventState::Unset);
}

#[test]
fn host_set_event_is_observed_immediately() {
    let (_null, device) = null_device();
    let event = Event::new(&device).unwrap();
    event.set().unwrap();
    assert_eq!(event.state().unwrap(), EventState::Set);
}

#[test]
fn barrier_access_must_fit_stage() {
    let buffer = vk::Buffer::from_raw(1);
    let err = BufferBarrier::builder(buffer)
        .src(vk::PipelineStageFlags::VERTEX_INPUT, vk::AccessFlags::SHADER_WRITE)
        .dst(vk::PipelineStageFlags::COMPUTE_SHADER, vk::AccessFlags::SHADER_READ)
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidBarrier(_)));

    assert!(MemoryBarrier::builder()
        .src(vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::TRANSFER_WRITE)
        .dst(vk::PipelineStageFlags::ALL_GRAPHICS, vk::AccessFlags::SHADER_READ)
        .build()
        .is_ok());
}

#[test]
fn barrier_requires_stages_and_resources() {
    assert!(matches!(
        MemoryBarrier::builder()
            .dst(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ)
            .build(),
        Err(Error::InvalidBarrier(_))
    ));
    assert!(matches!(
        BufferBarrier::builder(vk::Buffer::null())
            .src(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE)
            .dst(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ)
            .build(),
        Err(Error::InvalidBarrier(_))
    ));
    assert!(matches!(
        ImageBarrier::builder(vk::Image::from_raw(3))
            .src(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE)
            .dst(vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ)
            .layout_transition(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::UNDEFINED)
            .build(),
        Err(Error::InvalidBarrier(_))
    ));
}

#[test]
fn queue_ownership_transfer_needs_both_families() {
    let image = vk::Image::from_raw(9);
    let half = ImageBarrier::builder(image)
        .src(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE)
        .dst(vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ)
        .layout_transition(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .queue_family_transfer(2, vk::QUEUE_FAMILY_IGNORED)
        .build();
    assert!(matches!(half, Err(Error::InvalidBarrier(_))));

    let full = ImageBarrier::builder(image)
        .src(vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE)
        .dst(vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ)
        .layout_transition(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .queue_family_transfer(2, 0)
        .build()
        .unwrap();
    assert_eq!(full.get().src_queue_family_index, 2);
    assert_eq!(full.get().dst_queue_family_index, 0);
}

#[test]
fn semaphore_gates_cross_queue_submission() {
    let (null, device) = null_device();
    let timeline = TimelineSemaphore::new(&device, 0).unwrap();
    let fence = Fence::new(&device, false).unwrap();

    // Consumer first: blocked until the producer signals 1
    let mut consumer = CommandBuffer::new(&device, QueueType::Graphics).unwrap();
    consumer.begin().unwrap();
    consumer
        .submit_with(
            &SubmitInfo::new().wait_timeline(&timeline, 1, vk::PipelineStageFlags::FRAGMENT_SHADER),
            Some(&fence),
        )
        .unwrap();
    assert_eq!(null.pending_batches(), 1);
    assert_eq!(fence.wait(Duration::from_millis(5)).unwrap(), WaitOutcome::TimedOut);

    let mut producer = CommandBuffer::new(&device, QueueType::Compute).unwrap();
    producer
        .add_barriers(
            BarrierBatch::new().with(
                MemoryBarrier::builder()
                    .src(vk::PipelineStageFlags::COMPUTE_SHADER, vk::AccessFlags::SHADER_WRITE)
                    .dst(vk::PipelineStageFlags::COMPUTE_SHADER, vk::AccessFlags::SHADER_READ)
                    .build()
                    .unwrap(),
            ),
        )
        .unwrap();
    producer
        .submit_with(&SubmitInfo::new().signal_timeline(&timeline, 1), None)
        .unwrap();

    assert_eq!(fence.wait(Duration::from_secs(1)).unwrap(), WaitOutcome::Ready);
    assert_eq!(null.pending_batches(), 0);

    let executed = null.executed();
    let order: Vec<QueueType> = executed.iter().map(|b| b.queue).collect();
    assert_eq!(order, vec![QueueType::Compute, QueueType::Graphics]);
}

#[test]
fn discarded_recording_clears_set_pending() {
    let (_null, device) = null_device();
    let event = Event::new(&device).unwrap();

    // reset before submission
    let mut cmd = CommandBuffer::new(&device, QueueType::Compute).unwrap();
    cmd.begin().unwrap();
    cmd.set_event(&event, vk::PipelineStageFlags::COMPUTE_SHADER).unwrap();
    cmd.end().unwrap();
    assert_eq!(event.state().unwrap(), EventState::SetPending);
    cmd.reset().unwrap();
    assert_eq!(event.state().unwrap(), EventState::Unset);

    // dropped while executable
    cmd.set_event(&event, vk::PipelineStageFlags::COMPUTE_SHADER).unwrap();
    cmd.end().unwrap();
    assert_eq!(event.state().unwrap(), EventState::SetPending);
    drop(cmd);
    assert_eq!(event.state().unwrap(), EventState::Unset);
}

#[test]
fn discarding_one_recording_keeps_another_pending() {
    let (_null, device) = null_device();
    let event = Event::new(&device).unwrap();

    let mut kept = CommandBuffer::new(&device, QueueType::Compute).unwrap();
    kept.set_event(&event, vk::PipelineStageFlags::COMPUTE_SHADER).unwrap();
    let mut discarded = CommandBuffer::new(&device, QueueType::Transfer).unwrap();
    discarded.set_event(&event, vk::PipelineStageFlags::TRANSFER).unwrap();

    discarded.reset().unwrap();
    assert_eq!(event.state().unwrap(), EventState::SetPending);

    kept.submit(None).unwrap();
    assert_eq!(event.state().unwrap(), EventState::Set);
    // reset after execution leaves the device state alone
    kept.reset().unwrap();
    assert_eq!(event.state().unwrap(), EventState::Set);
}
