// Unique<H> - owning wrapper for device objects
//
// Destroys the wrapped handle through the owning device when dropped.
// A null handle is never destroyed, for every wrapped kind.

use ash::vk::{self, Handle};
use std::fmt;

use super::{GpuDevice, SharedDevice};

/// A native handle that knows which device call destroys it
pub trait DeviceObject: Handle + Copy {
    fn destroy(self, device: &dyn GpuDevice);
}

macro_rules! device_object {
    ($($handle:ty => $destroy:ident),* $(,)?) => {
        $(
            impl DeviceObject for $handle {
                fn destroy(self, device: &dyn GpuDevice) {
                    device.$destroy(self);
                }
            }
        )*
    };
}

device_object! {
    vk::Fence => destroy_fence,
    vk::Semaphore => destroy_semaphore,
    vk::Event => destroy_event,
    vk::RenderPass => destroy_render_pass,
    vk::Framebuffer => destroy_framebuffer,
    vk::CommandPool => destroy_command_pool,
    vk::Buffer => destroy_buffer,
    vk::ShaderModule => destroy_shader_module,
    vk::PipelineLayout => destroy_pipeline_layout,
    vk::Pipeline => destroy_pipeline,
}

/// Owns one device object and keeps its device alive
pub struct Unique<H: DeviceObject> {
    handle: H,
    device: SharedDevice,
}

impl<H: DeviceObject> Unique<H> {
    pub fn new(device: &SharedDevice, handle: H) -> Self {
        Self {
            handle,
            device: device.clone(),
        }
    }

    #[inline]
    pub fn get(&self) -> H {
        self.handle
    }

    #[inline]
    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.handle.as_raw() == 0
    }

    /// Gives up ownership; the caller becomes responsible for destruction
    pub fn into_raw(mut self) -> H {
        std::mem::replace(&mut self.handle, H::from_raw(0))
    }
}

impl<H: DeviceObject> Drop for Unique<H> {
    fn drop(&mut self) {
        if !self.is_null() {
            self.handle.destroy(self.device.as_ref());
        }
    }
}

impl<H: DeviceObject + fmt::Debug> fmt::Debug for Unique<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Unique").field(&self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullDevice;

    #[test]
    fn drop_destroys_handle() {
        let null = NullDevice::new();
        let device: SharedDevice = null.clone();
        let fence = device.create_fence(false).unwrap();
        {
            let _owned = Unique::new(&device, fence);
            assert_eq!(null.live_objects(), 1);
        }
        assert_eq!(null.live_objects(), 0);
    }

    #[test]
    fn null_handle_is_never_destroyed() {
        let null = NullDevice::new();
        let device: SharedDevice = null.clone();
        drop(Unique::new(&device, vk::Fence::null()));
        drop(Unique::new(&device, vk::RenderPass::null()));
        assert_eq!(null.destroyed_objects(), 0);
    }

    #[test]
    fn into_raw_releases_ownership() {
        let null = NullDevice::new();
        let device: SharedDevice = null.clone();
        let event = device.create_event().unwrap();
        let raw = Unique::new(&device, event).into_raw();
        assert_eq!(raw, event);
        assert_eq!(null.live_objects(), 1);
        device.destroy_event(raw);
        assert_eq!(null.live_objects(), 0);
    }
}
