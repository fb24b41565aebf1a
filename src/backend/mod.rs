// Backend module - Vulkan abstraction layer
//
// Design: `GpuDevice` is the seam. `VulkanDevice` drives a real GPU through
// ash, `NullDevice` executes everything in-process for tests and tooling.
// Setup wrappers (buffers, shaders, pipelines) are thin RAII owners on top.

pub mod buffer;
pub mod device;
pub mod gpu_device;
pub mod handle;
pub mod null;
pub mod pipeline;
pub mod shader;

pub use buffer::Buffer;
pub use device::VulkanDevice;
pub use gpu_device::{
    BarrierLists, GpuDevice, QueueType, SemaphoreKind, SemaphoreSignal, SemaphoreWait, SharedDevice, Submission,
};
pub use handle::{DeviceObject, Unique};
pub use null::{
    BarrierRecord, ExecutedBatch, FramebufferRecord, NullCommand, NullDevice, RenderPassRecord, SubpassRecord,
};
pub use pipeline::{GraphicsPipelineDesc, Pipeline};
pub use shader::ShaderModule;
