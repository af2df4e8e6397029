// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. build.rs compiles the GLSL sources in
// shaders/ and the renderer reads the .spv files at runtime, which is what
// makes hot-reload possible.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

/// Decode SPIR-V bytes into words
///
/// `read_spv` rejects input that is misaligned or lacks the magic number,
/// and byte-swaps big-endian modules.
pub fn read_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).context("Invalid SPIR-V bytecode")
}

/// Read a compiled shader from disk and create a shader module
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader {:?} (run glslc or cargo build)", path))?;
    let code = read_spirv(&bytes).with_context(|| format!("Failed to load shader {:?}", path))?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .with_context(|| format!("Failed to create shader module from {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn words_are_decoded() {
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let words = read_spirv(&bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(read_spirv(&[]).is_err());
    }

    #[test]
    fn misaligned_input_is_rejected() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.push(0);
        assert!(read_spirv(&bytes).is_err());
    }

    #[test]
    fn big_endian_modules_are_swapped() {
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0] {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        assert_eq!(read_spirv(&bytes).unwrap()[0], SPIRV_MAGIC);
    }

    #[test]
    fn glsl_source_is_not_spirv() {
        let err = read_spirv(b"#version 450\n\nvoid main() {}\n\0\0\0").unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.starts_with("Invalid SPIR-V bytecode"));
        assert!(message.contains("magic"));
    }
}
