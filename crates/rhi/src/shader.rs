//! SPIR-V shader modules.
//!
//! Shader binaries are read from disk as opaque blobs. The only checks are
//! the ones `ash::util::read_spv` performs: word alignment and the SPIR-V
//! magic number.

use std::ffi::CStr;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Entry point used by every shader the renderer loads.
pub const ENTRY_POINT: &CStr = c"main";

/// Pipeline stage a shader module is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Vulkan shader module wrapper.
///
/// Only needed until the pipeline is built; dropping it afterwards is fine.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl Shader {
    /// Loads a SPIR-V binary from `path`.
    ///
    /// # Errors
    ///
    /// [`RhiError::Shader`] if the file cannot be read or is not SPIR-V.
    pub fn from_spirv_file(device: Arc<Device>, path: &Path, stage: ShaderStage) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);

        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::Shader(format!("failed to read shader file {:?}: {}", path, e))
        })?;

        Self::from_spirv_bytes(device, &bytes, stage)
    }

    pub fn from_spirv_bytes(device: Arc<Device>, bytes: &[u8], stage: ShaderStage) -> RhiResult<Self> {
        let code = decode_spirv(bytes)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        info!("Created {} shader module ({} words)", stage, code.len());

        Ok(Self {
            device,
            module,
            stage,
        })
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Stage description for pipeline creation; borrows from `self`.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

/// Reinterprets a SPIR-V byte blob as little-endian words.
fn decode_spirv(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| RhiError::Shader(format!("invalid SPIR-V ({} bytes): {}", bytes.len(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
    }

    #[test]
    fn test_decode_spirv_words() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());

        let words = decode_spirv(&bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn test_decode_spirv_rejects_misaligned() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.push(0);
        assert!(matches!(decode_spirv(&bytes), Err(RhiError::Shader(_))));
    }

    #[test]
    fn test_decode_spirv_rejects_wrong_magic() {
        let bytes = 0xdead_beefu32.to_le_bytes();
        assert!(matches!(decode_spirv(&bytes), Err(RhiError::Shader(_))));
    }

    #[test]
    fn test_entry_point() {
        assert_eq!(ENTRY_POINT.to_str().unwrap(), "main");
    }
}
