use std::{any::Any, fmt};

use glam::UVec2;

use crate::{
    graphics::SHADER_SRC_IMAGE_COUNT,
    rect::Rect,
    shader::{ShaderDesc, ShaderId},
};

pub mod software;

/// Identifies a texture owned by a backend.
///
/// Allocated by the caller so that commands can refer to a texture
/// before the render thread has created it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u32);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}

/// An error reported by a backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("missing texture {0}")]
    MissingTexture(TextureId),
    #[error("missing shader {0:?}")]
    MissingShader(ShaderId),
    #[error("graphics context was lost")]
    ContextLost,
    #[error("region {region:?} is outside of {texture}")]
    InvalidRegion { texture: TextureId, region: Rect },
    #[error("device error: {0}")]
    Device(String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SourceColor,
    OneMinusSourceColor,
    SourceAlpha,
    OneMinusSourceAlpha,
    DestinationColor,
    OneMinusDestinationColor,
    DestinationAlpha,
    OneMinusDestinationAlpha,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlendOperation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Blending of premultiplied source colors onto the destination.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Blend {
    pub src_factor_rgb: BlendFactor,
    pub src_factor_alpha: BlendFactor,
    pub dst_factor_rgb: BlendFactor,
    pub dst_factor_alpha: BlendFactor,
    pub operation_rgb: BlendOperation,
    pub operation_alpha: BlendOperation,
}

impl Blend {
    pub const fn uniform(src: BlendFactor, dst: BlendFactor, operation: BlendOperation) -> Self {
        Self {
            src_factor_rgb: src,
            src_factor_alpha: src,
            dst_factor_rgb: dst,
            dst_factor_alpha: dst,
            operation_rgb: operation,
            operation_alpha: operation,
        }
    }

    /// Overwrites the destination.
    pub const COPY: Blend = Blend::uniform(BlendFactor::One, BlendFactor::Zero, BlendOperation::Add);

    /// Standard premultiplied "over" compositing.
    pub const SOURCE_OVER: Blend = Blend::uniform(
        BlendFactor::One,
        BlendFactor::OneMinusSourceAlpha,
        BlendOperation::Add,
    );

    /// Clears the destination regardless of the source.
    pub const CLEAR: Blend = Blend::uniform(BlendFactor::Zero, BlendFactor::Zero, BlendOperation::Add);
}

impl Default for Blend {
    fn default() -> Self {
        Blend::SOURCE_OVER
    }
}

/// How overlapping triangles within one draw are combined.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FillRule {
    /// Every triangle is drawn.
    FillAll,
    /// Pixels with a nonzero winding count are drawn once.
    NonZero,
    /// Pixels with an odd winding count are drawn once.
    EvenOdd,
}

impl Default for FillRule {
    fn default() -> Self {
        FillRule::FillAll
    }
}

/// A destination sub-region of a draw, together with
/// the number of indices rendered into it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DstRegion {
    pub region: Rect,
    pub index_count: usize,
}

/// A region-scoped pixel upload. `pixels` of `None` clears the region.
#[derive(Clone, Debug, PartialEq)]
pub struct WritePixelsArgs {
    pub region: Rect,
    pub pixels: Option<Vec<u8>>,
}

/// A graphics driver: the only thing that touches the GPU.
///
/// All methods are called on the render thread. Textures are premultiplied
/// RGBA8 and new textures start out transparent.
pub trait Backend: Send + 'static {
    fn begin(&mut self) -> Result<(), BackendError>;

    fn end(&mut self, present: bool) -> Result<(), BackendError>;

    /// Uploads the vertex and index data used by subsequent draws.
    fn set_vertices(&mut self, vertices: &[f32], indices: &[u32]) -> Result<(), BackendError>;

    /// Draws triangles from the current vertex data.
    ///
    /// Each entry in `dst_regions` consumes `index_count` indices,
    /// starting at `index_offset` for the first one.
    #[allow(clippy::too_many_arguments)]
    fn draw_triangles(
        &mut self,
        dst: TextureId,
        srcs: &[Option<TextureId>; SHADER_SRC_IMAGE_COUNT],
        shader: ShaderId,
        dst_regions: &[DstRegion],
        index_offset: usize,
        blend: Blend,
        uniforms: &[u32],
        fill_rule: FillRule,
    ) -> Result<(), BackendError>;

    fn new_image(&mut self, id: TextureId, size: UVec2) -> Result<(), BackendError>;

    /// Creates a texture backed by the window framebuffer.
    fn new_screen_framebuffer_image(&mut self, id: TextureId, size: UVec2)
        -> Result<(), BackendError>;

    fn dispose_image(&mut self, id: TextureId) -> Result<(), BackendError>;

    fn write_pixels(&mut self, id: TextureId, args: &[WritePixelsArgs]) -> Result<(), BackendError>;

    /// Reads back `region` of a texture into `dst`, tightly packed.
    fn read_pixels(&mut self, id: TextureId, region: Rect, dst: &mut [u8])
        -> Result<(), BackendError>;

    fn new_shader(&mut self, id: ShaderId, desc: &ShaderDesc) -> Result<(), BackendError>;

    fn dispose_shader(&mut self, id: ShaderId) -> Result<(), BackendError>;

    /// Waits until the GPU is done with all submitted work.
    fn synchronize(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn set_vsync_enabled(&mut self, enabled: bool);

    fn max_image_size(&self) -> u32;

    /// Whether the screen framebuffer must be cleared explicitly
    /// before it is drawn to.
    fn needs_clearing_screen(&self) -> bool;

    /// Whether the device was lost and every texture and shader is gone.
    fn is_context_lost(&self) -> bool;

    /// Re-initializes the device after a context loss.
    /// Called at the start of restoration.
    fn restore_context(&mut self) -> Result<(), BackendError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
