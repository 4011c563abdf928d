use std::{fmt, ops::Range, sync::Arc};

use glam::{UVec2, Vec2};
use smallvec::SmallVec;

use crate::{
    backend::{Backend, BackendError, Blend, DstRegion, FillRule, TextureId, WritePixelsArgs},
    graphics::SHADER_SRC_IMAGE_COUNT,
    rect::Rect,
    shader::{ShaderDesc, ShaderId},
};

use self::uniforms::UniformArena;

pub mod accumulator;
pub mod manager;
pub(crate) mod pool;
pub mod queue;
pub mod uniforms;

pub use self::{accumulator::VertexAccumulator, manager::CommandQueueManager, queue::CommandQueue};

/// A texture as seen by a queued command: its backend
/// identifier and its size.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureInfo {
    pub id: TextureId,
    pub size: UVec2,
}

/// A queued draw. Consecutive compatible draws are merged into one
/// record by growing its vertex span and destination regions.
///
/// Records are recycled through a pool, so every field is
/// overwritten when one is taken.
#[derive(Debug)]
pub struct DrawTrianglesCommand {
    pub(crate) dst: TextureId,
    pub(crate) srcs: [Option<TextureId>; SHADER_SRC_IMAGE_COUNT],
    pub(crate) shader: ShaderId,
    pub(crate) blend: Blend,
    pub(crate) fill_rule: FillRule,
    pub(crate) dst_regions: SmallVec<[DstRegion; 2]>,
    pub(crate) vertex_float_count: usize,
    /// Location of the uniforms in the queue's arena.
    pub(crate) uniforms: Range<usize>,
    /// Bounding box of destination positions, used to keep
    /// stencil-based fill rules from merging overlapping draws.
    pub(crate) bounds: (Vec2, Vec2),
}

impl Default for DrawTrianglesCommand {
    fn default() -> Self {
        Self {
            dst: TextureId(0),
            srcs: [None; SHADER_SRC_IMAGE_COUNT],
            shader: ShaderId::default(),
            blend: Blend::default(),
            fill_rule: FillRule::default(),
            dst_regions: SmallVec::new(),
            vertex_float_count: 0,
            uniforms: 0..0,
            bounds: (Vec2::ZERO, Vec2::ZERO),
        }
    }
}

impl DrawTrianglesCommand {
    pub fn index_count(&self) -> usize {
        self.dst_regions.iter().map(|r| r.index_count).sum()
    }

    pub fn dst_regions(&self) -> &[DstRegion] {
        &self.dst_regions
    }
}

/// A unit of work for the render thread.
pub enum Command {
    DrawTriangles(Box<DrawTrianglesCommand>),
    /// Region-scoped uploads. Consecutive writes to one
    /// texture are coalesced into a single command.
    WritePixels {
        dst: TextureId,
        args: Vec<WritePixelsArgs>,
    },
    /// Replaces the full contents of a texture. `None` clears it.
    ReplacePixels {
        dst: TextureId,
        size: UVec2,
        pixels: Option<Vec<u8>>,
    },
    /// Reads back a region; the result is sent through `reply`.
    ReadPixels {
        src: TextureId,
        region: Rect,
        reply: flume::Sender<Vec<u8>>,
    },
    NewImage {
        id: TextureId,
        size: UVec2,
        screen: bool,
    },
    DisposeImage(TextureId),
    NewShader {
        id: ShaderId,
        desc: Arc<ShaderDesc>,
    },
    DisposeShader(ShaderId),
    /// Waits for the GPU to finish, e.g. before mapped texture access.
    Synchronize,
}

impl Command {
    /// Whether the flush containing this command must block the producer.
    pub fn needs_sync(&self) -> bool {
        matches!(self, Command::ReadPixels { .. } | Command::Synchronize)
    }

    pub fn vertex_float_count(&self) -> usize {
        match self {
            Command::DrawTriangles(draw) => draw.vertex_float_count,
            _ => 0,
        }
    }

    /// Number of indices this command consumes from the uploaded index block.
    /// Only commands with a nonzero count advance the index offset during a flush.
    pub fn index_count(&self) -> usize {
        match self {
            Command::DrawTriangles(draw) => draw.index_count(),
            _ => 0,
        }
    }

    pub(crate) fn exec(
        &self,
        backend: &mut dyn Backend,
        uniforms: &UniformArena,
        index_offset: usize,
    ) -> Result<(), BackendError> {
        match self {
            Command::DrawTriangles(draw) => backend.draw_triangles(
                draw.dst,
                &draw.srcs,
                draw.shader,
                &draw.dst_regions,
                index_offset,
                draw.blend,
                uniforms.get(draw.uniforms.clone()),
                draw.fill_rule,
            ),
            Command::WritePixels { dst, args } => backend.write_pixels(*dst, args),
            Command::ReplacePixels { dst, size, pixels } => backend.write_pixels(
                *dst,
                &[WritePixelsArgs {
                    region: Rect::from_size(*size),
                    pixels: pixels.clone(),
                }],
            ),
            Command::ReadPixels { src, region, reply } => {
                let mut pixels = vec![0; region.area() * 4];
                backend.read_pixels(*src, *region, &mut pixels)?;
                // The reader may have given up; that is not a backend failure.
                let _ = reply.send(pixels);
                Ok(())
            }
            Command::NewImage { id, size, screen } => {
                if *screen {
                    backend.new_screen_framebuffer_image(*id, *size)
                } else {
                    backend.new_image(*id, *size)
                }
            }
            Command::DisposeImage(id) => backend.dispose_image(*id),
            Command::NewShader { id, desc } => backend.new_shader(*id, desc),
            Command::DisposeShader(id) => backend.dispose_shader(*id),
            Command::Synchronize => backend.synchronize(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::DrawTriangles(draw) => write!(
                f,
                "draw-triangles: dst: {}, shader: {:?}, num of indices: {}, regions: {}, blend: {:?}, fill rule: {:?}",
                draw.dst,
                draw.shader,
                draw.index_count(),
                draw.dst_regions.len(),
                draw.blend,
                draw.fill_rule,
            ),
            Command::WritePixels { dst, args } => {
                write!(f, "write-pixels: dst: {}, num of regions: {}", dst, args.len())
            }
            Command::ReplacePixels { dst, pixels, .. } => write!(
                f,
                "replace-pixels: dst: {}, clear: {}",
                dst,
                pixels.is_none()
            ),
            Command::ReadPixels { src, region, .. } => {
                write!(f, "read-pixels: src: {}, region: {:?}", src, region)
            }
            Command::NewImage { id, size, screen } => write!(
                f,
                "new-image: result: {}, size: {}x{}, screen: {}",
                id, size.x, size.y, screen
            ),
            Command::DisposeImage(id) => write!(f, "dispose-image: target: {}", id),
            Command::NewShader { id, .. } => write!(f, "new-shader: result: {:?}", id),
            Command::DisposeShader(id) => write!(f, "dispose-shader: target: {:?}", id),
            Command::Synchronize => write!(f, "synchronize"),
        }
    }
}
