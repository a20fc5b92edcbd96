// Shader module loading
//
// SPIR-V is produced by build.rs (glslc) next to the GLSL sources and read
// at startup from the configured shader directory.

use anyhow::{Context, Result};
use ash::vk;
use std::io::{Read, Seek};
use std::path::Path;

use super::VulkanDevice;

pub const TRIANGLE_VERT: &str = "triangle.vert.spv";
pub const TRIANGLE_FRAG: &str = "triangle.frag.spv";

/// Decode SPIR-V words, checking size and magic number
pub fn read_spirv<R: Read + Seek>(reader: &mut R) -> Result<Vec<u32>> {
    ash::util::read_spv(reader).context("Invalid SPIR-V")
}

/// Read a compiled shader from disk
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file = std::fs::File::open(path).with_context(|| {
        format!(
            "Failed to open shader {:?} (is glslc installed? see build.rs)",
            path
        )
    })?;
    read_spirv(&mut file).with_context(|| format!("Failed to load shader {:?}", path))
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn reads_little_endian_words() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();

        let decoded = read_spirv(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, words);
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = vec![0x03, 0x02, 0x23, 0x07, 0x00];
        assert!(read_spirv(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn rejects_missing_magic() {
        let bytes = vec![0u8; 20];
        assert!(read_spirv(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn missing_file_mentions_path() {
        let err = load_spirv(Path::new("no/such/shader.spv")).unwrap_err();
        assert!(format!("{:#}", err).contains("shader.spv"));
    }
}
