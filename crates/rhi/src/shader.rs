//! SPIR-V loading and shader modules.
//!
//! [`Shader`] pairs a `VkShaderModule` with its stage and entry point so
//! a pipeline builder can consume it as one value. Shaders are compiled
//! offline; only `.spv` binaries are loaded at runtime.

use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// First word of every valid SPIR-V binary.
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Pipeline stage a shader module plugs into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex stage.
    Vertex,
    /// Fragment stage.
    Fragment,
}

impl ShaderStage {
    /// The equivalent `vk::ShaderStageFlags` bit.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    /// Lowercase stage name for log lines.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A shader module with its stage and entry point. Immutable after
/// creation and safe to share.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
}

impl Shader {
    /// Loads a SPIR-V binary from disk and wraps it in a module.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the binary fails
    /// validation, or module creation fails.
    pub fn from_spirv_file(
        device: Arc<Device>,
        path: &Path,
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::ShaderError(format!("cannot read shader {}: {}", path.display(), e))
        })?;
        debug!("Loaded {} shader {} ({} bytes)", stage, path.display(), bytes.len());

        Self::from_spirv_bytes(device, &bytes, stage, entry_point)
    }

    /// Wraps an in-memory SPIR-V binary in a module.
    ///
    /// # Errors
    ///
    /// Returns an error if the binary is misaligned or carries the wrong
    /// magic number, if the entry point name contains a NUL byte, or if
    /// module creation fails.
    pub fn from_spirv_bytes(
        device: Arc<Device>,
        bytes: &[u8],
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        let code = decode_spirv(bytes)?;

        let entry_point = CString::new(entry_point)
            .map_err(|e| RhiError::ShaderError(format!("invalid entry point name: {}", e)))?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        Ok(Self {
            device,
            module,
            stage,
            entry_point,
        })
    }

    /// Builds the stage create info for pipeline creation. The returned
    /// struct borrows this shader and must not outlive it.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
    }
}

/// Checks alignment and the magic word, then reassembles the binary into
/// the little-endian code words Vulkan expects.
fn decode_spirv(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if bytes.len() < 4 || !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V length must be a positive multiple of 4, got {} bytes",
            bytes.len()
        )));
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect();

    if words[0] != SPIRV_MAGIC {
        return Err(RhiError::ShaderError(format!(
            "bad SPIR-V magic number {:#010x}",
            words[0]
        )));
    }

    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spirv_header() -> Vec<u8> {
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0600, 0, 8, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn stage_maps_to_vk_flags() {
        assert_eq!(ShaderStage::Vertex.to_vk_stage(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn stage_display_names() {
        assert_eq!(ShaderStage::Vertex.to_string(), "vertex");
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
    }

    #[test]
    fn decode_accepts_valid_header() {
        let words = decode_spirv(&spirv_header()).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words.len(), 5);
    }

    #[test]
    fn decode_rejects_misaligned_input() {
        let mut bytes = spirv_header();
        bytes.push(0);
        assert!(decode_spirv(&bytes).is_err());
        assert!(decode_spirv(&[]).is_err());
    }

    #[test]
    fn decode_rejects_wrong_magic() {
        let mut bytes = spirv_header();
        bytes[0] ^= 0xFF;
        let err = decode_spirv(&bytes).unwrap_err();
        assert!(matches!(err, RhiError::ShaderError(_)));
    }
}
