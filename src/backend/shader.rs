// Shader module loading
//
// Vulkan consumes SPIR-V words. Bytes are re-read with `ash::util::read_spv`,
// which checks the length and fixes alignment, instead of being cast in place.

use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::{SharedDevice, Unique};
use crate::error::{Error, Result, VkResultExt};

pub struct ShaderModule {
    handle: Unique<vk::ShaderModule>,
}

impl ShaderModule {
    pub fn from_words(device: &SharedDevice, code: &[u32]) -> Result<Self> {
        if code.is_empty() {
            return Err(Error::config("shader code is empty"));
        }
        let handle = device.create_shader_module(code).driver("vkCreateShaderModule")?;
        Ok(Self {
            handle: Unique::new(device, handle),
        })
    }

    /// Load SPIR-V from bytes (e.g. `include_bytes!`)
    pub fn from_bytes(device: &SharedDevice, bytes: &[u8]) -> Result<Self> {
        let words = ash::util::read_spv(&mut Cursor::new(bytes))?;
        Self::from_words(device, &words)
    }

    /// Load a compiled `.spv` file
    pub fn load<P: AsRef<Path>>(device: &SharedDevice, path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        log::debug!("Loaded shader {:?} ({} bytes)", path, bytes.len());
        Self::from_bytes(device, &bytes)
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullDevice;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn bytes_are_read_as_words() {
        let device: SharedDevice = NullDevice::new();
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 16]);
        assert!(ShaderModule::from_bytes(&device, &bytes).is_ok());
    }

    #[test]
    fn truncated_spirv_is_an_io_error() {
        let device: SharedDevice = NullDevice::new();
        assert!(matches!(
            ShaderModule::from_bytes(&device, &[0x03, 0x02, 0x23]),
            Err(Error::Io(_))
        ));
        assert!(matches!(ShaderModule::from_words(&device, &[]), Err(Error::Configuration(_))));
    }
}
