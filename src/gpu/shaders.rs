//! Precompiled SPIR-V for the cube pipeline. Sources live next to the
//! binaries in `shaders/`.
//!
//! Vertex stage: `Position` (location 0, vec3) and `Color` (location 1,
//! vec3) in, one push-constant `mat4` MVP. Fragment stage writes the
//! interpolated color.

use super::{GpuError, GpuResult};
use std::ffi::CStr;
use std::io::Cursor;

pub const VERTEX_SPV: &[u8] = include_bytes!("../../shaders/cube.vert.spv");
pub const FRAGMENT_SPV: &[u8] = include_bytes!("../../shaders/cube.frag.spv");

pub const ENTRY_POINT: &CStr = c"main";

/// Size in bytes of the vertex-stage push constant block.
pub const PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<[f32; 16]>() as u32;

/// Reinterprets a SPIR-V blob as aligned words, checking the magic number.
pub fn spirv_words(bytes: &[u8]) -> GpuResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|err| GpuError::Setup(format!("invalid SPIR-V blob: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn blobs_are_spirv() {
        for blob in [VERTEX_SPV, FRAGMENT_SPV] {
            let words = spirv_words(blob).expect("well-formed blob");
            assert_eq!(words[0], SPIRV_MAGIC);
            assert_eq!(blob.len() % 4, 0);
        }
    }

    #[test]
    fn truncated_blob_is_rejected() {
        assert!(spirv_words(&VERTEX_SPV[..VERTEX_SPV.len() - 1]).is_err());
    }
}
