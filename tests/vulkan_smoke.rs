// Needs a Vulkan 1.2 driver: cargo test -- --ignored

use std::time::Duration;
use vkgraph::{vk, Buffer, CommandBuffer, Fence, QueueType, SharedDevice, VulkanDevice, WaitOutcome};

#[test]
#[ignore]
fn create_device_and_round_trip_a_submission() {
    let _ = env_logger::builder().is_test(true).try_init();
    let vulkan = VulkanDevice::new("vkgraph-smoke", false).unwrap();
    let device: SharedDevice = vulkan.clone();

    let buffer = Buffer::with_data(&device, vk::BufferUsageFlags::STORAGE_BUFFER, &[1u32, 2, 3, 4]).unwrap();
    assert_eq!(buffer.read_all::<u32>().unwrap(), vec![1, 2, 3, 4]);

    let fence = Fence::new(&device, false).unwrap();
    let mut cmd = CommandBuffer::new(&device, QueueType::Compute).unwrap();
    cmd.begin().unwrap();
    cmd.submit(Some(&fence)).unwrap();
    assert_eq!(fence.wait(Duration::from_secs(5)).unwrap(), WaitOutcome::Ready);
    cmd.reset().unwrap();

    vulkan.wait_idle().unwrap();
}
