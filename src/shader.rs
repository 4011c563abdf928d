use std::sync::Arc;

use crate::graphics::{preserved, PRESERVED_UNIFORM_DWORD_COUNT};

slotmap::new_key_type! {
    /// Identifies a shader. Also used as the backend's key
    /// for its compiled program.
    pub struct ShaderId;
}

/// The fragment program a shader runs.
///
/// Shader compilation happens outside this crate; backends receive
/// this tag together with the uniform layout and map it to their
/// own compiled form.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Program {
    /// Samples the first source image with nearest filtering
    /// and multiplies by the vertex color.
    Texture,
    /// Outputs the vertex color.
    VertexColor,
    /// Outputs the first four user uniform dwords,
    /// interpreted as premultiplied RGBA `f32`s.
    UniformColor,
}

/// Coordinate unit the shader expects for region uniforms.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShaderUnit {
    Pixels,
    /// Region origins and sizes are divided by the texture size.
    Texels,
}

/// The variables of the preserved uniform block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PreservedUniform {
    DstTextureSize,
    SrcTextureSizes,
    DstRegionOrigin,
    DstRegionSize,
    SrcRegionOrigins,
    SrcRegionSizes,
    ProjectionMatrix,
}

impl PreservedUniform {
    pub const ALL: [PreservedUniform; 7] = [
        PreservedUniform::DstTextureSize,
        PreservedUniform::SrcTextureSizes,
        PreservedUniform::DstRegionOrigin,
        PreservedUniform::DstRegionSize,
        PreservedUniform::SrcRegionOrigins,
        PreservedUniform::SrcRegionSizes,
        PreservedUniform::ProjectionMatrix,
    ];

    pub fn offset(self) -> usize {
        match self {
            PreservedUniform::DstTextureSize => preserved::DST_TEXTURE_SIZE,
            PreservedUniform::SrcTextureSizes => preserved::SRC_TEXTURE_SIZES,
            PreservedUniform::DstRegionOrigin => preserved::DST_REGION_ORIGIN,
            PreservedUniform::DstRegionSize => preserved::DST_REGION_SIZE,
            PreservedUniform::SrcRegionOrigins => preserved::SRC_REGION_ORIGINS,
            PreservedUniform::SrcRegionSizes => preserved::SRC_REGION_SIZES,
            PreservedUniform::ProjectionMatrix => preserved::PROJECTION_MATRIX,
        }
    }

    pub fn dword_count(self) -> usize {
        match self {
            PreservedUniform::DstTextureSize
            | PreservedUniform::DstRegionOrigin
            | PreservedUniform::DstRegionSize => 2,
            PreservedUniform::SrcTextureSizes
            | PreservedUniform::SrcRegionOrigins
            | PreservedUniform::SrcRegionSizes => 8,
            PreservedUniform::ProjectionMatrix => 16,
        }
    }
}

/// One uniform variable in a shader's layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UniformVariable {
    pub dword_count: usize,
    /// Whether the compiled program can read this variable.
    pub used: bool,
}

/// The compiled form of a shader, as far as this crate is concerned:
/// which program it runs, its coordinate unit, and its uniform layout.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderDesc {
    program: Program,
    unit: ShaderUnit,
    /// Layout of all uniforms, starting with the preserved variables.
    uniforms: Vec<UniformVariable>,
}

impl ShaderDesc {
    /// Creates a shader that reads every preserved uniform
    /// and has no user uniforms.
    pub fn new(program: Program, unit: ShaderUnit) -> Self {
        let uniforms = PreservedUniform::ALL
            .iter()
            .map(|var| UniformVariable {
                dword_count: var.dword_count(),
                used: true,
            })
            .collect();
        Self {
            program,
            unit,
            uniforms,
        }
    }

    /// Marks a preserved uniform as unread by the program.
    pub fn without_preserved(mut self, var: PreservedUniform) -> Self {
        // Preserved variables come first, in declaration order.
        self.uniforms[var as usize].used = false;
        self
    }

    /// Appends a user uniform variable.
    pub fn with_uniform(mut self, dword_count: usize, used: bool) -> Self {
        self.uniforms.push(UniformVariable { dword_count, used });
        self
    }

    pub fn program(&self) -> Program {
        self.program
    }

    pub fn unit(&self) -> ShaderUnit {
        self.unit
    }

    pub fn uniforms(&self) -> &[UniformVariable] {
        &self.uniforms
    }

    /// Number of dwords callers supply, excluding the preserved block.
    pub fn user_uniform_dword_count(&self) -> usize {
        self.total_uniform_dword_count() - PRESERVED_UNIFORM_DWORD_COUNT
    }

    pub fn total_uniform_dword_count(&self) -> usize {
        self.uniforms.iter().map(|u| u.dword_count).sum()
    }

    /// Zeroes the dwords of every variable the program never reads,
    /// so that draws differing only in ignored values compare equal.
    pub fn filter_uniforms(&self, uniforms: &mut [u32]) {
        let mut offset = 0;
        for var in &self.uniforms {
            let end = (offset + var.dword_count).min(uniforms.len());
            if !var.used && offset < end {
                uniforms[offset..end].iter_mut().for_each(|u| *u = 0);
            }
            offset += var.dword_count;
        }
    }
}

/// A handle to a shader created through [`Context::new_shader`](crate::Context::new_shader).
///
/// Cloning is cheap.
#[derive(Clone, Debug)]
pub struct Shader {
    id: ShaderId,
    desc: Arc<ShaderDesc>,
}

impl Shader {
    pub(crate) fn new(id: ShaderId, desc: Arc<ShaderDesc>) -> Self {
        Self { id, desc }
    }

    pub fn id(&self) -> ShaderId {
        self.id
    }

    pub fn desc(&self) -> &Arc<ShaderDesc> {
        &self.desc
    }
}

impl PartialEq for Shader {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Shader {}
