// Buffer - sized GPU memory for vertex, index, uniform and storage data
//
// Memory comes from the device's allocator. Host-visible buffers can be
// written and read back directly; device-local ones need a transfer.

use ash::vk;
use bytemuck::Pod;

use super::{SharedDevice, Unique};
use crate::error::{Error, Result};

pub struct Buffer {
    handle: Unique<vk::Buffer>,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory: vk::MemoryPropertyFlags,
}

impl Buffer {
    /// Create a GPU buffer with specified usage and memory properties
    ///
    /// Fails with `Error::NoCompatibleMemory` / `Error::OutOfMemory` instead
    /// of aborting, so callers can retry with relaxed flags.
    pub fn new(
        device: &SharedDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let handle = device.create_buffer(size, usage, memory)?;
        log::debug!("Created buffer {:?}: {} bytes, {:?}", handle, size, usage);
        Ok(Self {
            handle: Unique::new(device, handle),
            size,
            usage,
            memory,
        })
    }

    /// Create a host-visible buffer and fill it with data
    pub fn with_data<T: Pod>(device: &SharedDevice, usage: vk::BufferUsageFlags, data: &[T]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = Self::new(
            device,
            bytes.len() as vk::DeviceSize,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        buffer.write(0, bytes)?;
        Ok(buffer)
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.handle.get()
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn memory_properties(&self) -> vk::MemoryPropertyFlags {
        self.memory
    }

    /// Host write; no barrier is inserted for the GPU side
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        self.handle.device().write_buffer(self.handle(), offset, data)
    }

    pub fn read(&self, offset: vk::DeviceSize, out: &mut [u8]) -> Result<()> {
        self.handle.device().read_buffer(self.handle(), offset, out)
    }

    /// Reads the whole buffer as `T`s; trailing bytes that do not fill a `T` are dropped
    ///
    /// Only plain-data types can be read back:
    ///
    /// ```compile_fail
    /// # use vkgraph::{vk, Buffer, NullDevice, SharedDevice};
    /// let device: SharedDevice = NullDevice::new();
    /// let buffer = Buffer::with_data(&device, vk::BufferUsageFlags::STORAGE_BUFFER, &[2u8, 7]).unwrap();
    /// let flags = buffer.read_all::<bool>();
    /// ```
    pub fn read_all<T: Pod>(&self) -> Result<Vec<T>> {
        let size = usize::try_from(self.size).map_err(|_| Error::config("buffer too large to read on this host"))?;
        let count = size / std::mem::size_of::<T>().max(1);
        let mut out = vec![T::zeroed(); count];
        self.read(0, bytemuck::cast_slice_mut(&mut out))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullDevice;

    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Vertex {
        position: [f32; 3],
        color: [f32; 4],
    }

    #[test]
    fn upload_and_read_back() {
        let device: SharedDevice = NullDevice::new();
        let buffer = Buffer::with_data(&device, vk::BufferUsageFlags::STORAGE_BUFFER, &[1u32, 2, 3, 4]).unwrap();
        assert_eq!(buffer.size(), 16);
        assert_eq!(buffer.read_all::<u32>().unwrap(), vec![1, 2, 3, 4]);

        buffer.write(4, &9u32.to_ne_bytes()).unwrap();
        assert_eq!(buffer.read_all::<u32>().unwrap(), vec![1, 9, 3, 4]);
        assert!(buffer.write(14, &[0; 4]).is_err());
    }

    #[test]
    fn device_local_memory_is_not_mappable() {
        let device: SharedDevice = NullDevice::new();
        let buffer = Buffer::new(
            &device,
            64,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .unwrap();
        assert!(matches!(buffer.write(0, &[1, 2, 3]), Err(Error::Configuration(_))));
    }

    #[test]
    fn exhaustion_is_recoverable() {
        let null = NullDevice::new();
        let device: SharedDevice = null.clone();
        null.fail_next("vkAllocateMemory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let usage = vk::BufferUsageFlags::UNIFORM_BUFFER;
        assert!(matches!(
            Buffer::new(&device, 256, usage, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Err(Error::OutOfMemory(_))
        ));
        assert!(Buffer::new(&device, 256, usage, vk::MemoryPropertyFlags::HOST_VISIBLE).is_ok());
    }

    #[test]
    fn vertex_structs_round_trip() {
        let device: SharedDevice = NullDevice::new();
        let vertices = [
            Vertex {
                position: [0.0, -0.5, 0.0],
                color: [1.0, 0.0, 0.0, 1.0],
            },
            Vertex {
                position: [0.5, 0.5, 0.0],
                color: [0.0, 1.0, 0.0, 1.0],
            },
        ];
        let buffer = Buffer::with_data(&device, vk::BufferUsageFlags::VERTEX_BUFFER, &vertices).unwrap();
        assert_eq!(buffer.size(), 2 * 28);
        assert_eq!(buffer.read_all::<Vertex>().unwrap(), vertices.to_vec());
    }

    #[test]
    fn out_of_range_offsets_are_errors() {
        let device: SharedDevice = NullDevice::new();
        let buffer = Buffer::with_data(&device, vk::BufferUsageFlags::STORAGE_BUFFER, &[0u8; 16]).unwrap();
        assert!(matches!(buffer.write(u64::MAX, &[1]), Err(Error::Configuration(_))));
        let mut out = [0u8; 4];
        assert!(matches!(buffer.read(u64::MAX - 1, &mut out), Err(Error::Configuration(_))));
        assert!(matches!(buffer.read(13, &mut out), Err(Error::Configuration(_))));
        buffer.read(12, &mut out).unwrap();
    }
}
