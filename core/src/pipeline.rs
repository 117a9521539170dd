//! Pipeline data model: vertex input layout, fixed-function state, and the
//! per-pipeline soft-backend executor instantiated from a shader's factory.

use smallvec::SmallVec;

use crate::handle::ShaderHandle;
use crate::shader::SoftShader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float1,
    Float2,
    Float3,
    Float4,
    UByte4,
    UByte4N,
}

impl VertexFormat {
    pub fn component_count(self) -> usize {
        match self {
            VertexFormat::Float1 => 1,
            VertexFormat::Float2 => 2,
            VertexFormat::Float3 => 3,
            VertexFormat::Float4 => 4,
            VertexFormat::UByte4 | VertexFormat::UByte4N => 4,
        }
    }

    pub fn size_bytes(self) -> usize {
        match self {
            VertexFormat::Float1 => 4,
            VertexFormat::Float2 => 8,
            VertexFormat::Float3 => 12,
            VertexFormat::Float4 => 16,
            VertexFormat::UByte4 | VertexFormat::UByte4N => 4,
        }
    }

    /// Decodes one attribute's worth of bytes into `component_count()`
    /// floats, normalizing `UByte4N` to `[0, 1]`.
    pub fn decode(self, bytes: &[u8], out: &mut SmallVec<[f32; 4]>) {
        match self {
            VertexFormat::Float1 | VertexFormat::Float2 | VertexFormat::Float3 | VertexFormat::Float4 => {
                for chunk in bytes.chunks_exact(4).take(self.component_count()) {
                    out.push(f32::from_le_bytes(chunk.try_into().unwrap()));
                }
            }
            VertexFormat::UByte4 => {
                out.extend(bytes[..4].iter().map(|&b| b as f32));
            }
            VertexFormat::UByte4N => {
                out.extend(bytes[..4].iter().map(|&b| b as f32 / 255.0));
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VertexAttribute {
    pub format: VertexFormat,
    pub offset: u32,
    pub location: u32,
}

#[derive(Debug, Clone, Default)]
pub struct VertexInputLayout {
    pub stride: u32,
    pub attributes: SmallVec<[VertexAttribute; 8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Triangles,
    Lines,
    Points,
}

#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub shader: ShaderHandle,
    pub input_layout: VertexInputLayout,
    pub cull_mode: CullMode,
    pub primitive_type: PrimitiveType,
    pub depth_test_enabled: bool,
    pub depth_write_enabled: bool,
    pub blend_enabled: bool,
    pub label: Option<String>,
}

impl Default for PipelineDesc {
    fn default() -> Self {
        PipelineDesc {
            shader: ShaderHandle::invalid(),
            input_layout: VertexInputLayout::default(),
            cull_mode: CullMode::Back,
            primitive_type: PrimitiveType::Triangles,
            depth_test_enabled: true,
            depth_write_enabled: true,
            blend_enabled: false,
            label: None,
        }
    }
}

/// A created pipeline on the soft backend: the immutable description plus
/// the shader's one instantiated executor, built once at creation time by
/// calling the registered shader's soft factory.
pub struct Pipeline {
    pub desc: PipelineDesc,
    pub executor: Box<dyn SoftShader>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ubyte4n_normalizes_to_unit_range() {
        let mut out = SmallVec::new();
        VertexFormat::UByte4N.decode(&[0, 128, 255, 255], &mut out);
        assert_eq!(out.len(), 4);
        assert!((out[2] - 1.0).abs() < 1e-6);
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn default_pipeline_desc_matches_spec_defaults() {
        let desc = PipelineDesc::default();
        assert_eq!(desc.cull_mode, CullMode::Back);
        assert_eq!(desc.primitive_type, PrimitiveType::Triangles);
        assert!(desc.depth_test_enabled);
        assert!(desc.depth_write_enabled);
        assert!(!desc.blend_enabled);
    }
}
