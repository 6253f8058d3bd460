// Shader module loading
//
// Shaders are compiled to SPIR-V ahead of time (see build.rs) and read from
// disk at startup. Modules only live as long as a pipeline build.

use anyhow::Result;
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::RenderError;

/// Read a SPIR-V file into 4-byte words.
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|e| RenderError::ShaderRead {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_spirv(&bytes).map_err(|reason| {
        RenderError::ShaderRead {
            path: path.to_path_buf(),
            reason,
        }
        .into()
    })
}

/// Realign raw bytes as SPIR-V words. Only size and magic are checked.
pub fn parse_spirv(bytes: &[u8]) -> std::result::Result<Vec<u32>, String> {
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| e.to_string())
}

/// Owned shader module, destroyed on drop
pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    pub fn new(device: Arc<VulkanDevice>, code: &[u32]) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }?;
        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_read_little_endian() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words, vec![0x0723_0203, 0x0001_0000]);
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(parse_spirv(&[0x03, 0x02, 0x23]).is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_spirv(Path::new("no/such/shader.spv")).unwrap_err();
        assert!(err.to_string().contains("no/such/shader.spv"));
    }
}
