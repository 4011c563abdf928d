use crate::{
    backend::{Blend, FillRule},
    graphics::SHADER_SRC_IMAGE_COUNT,
    rect::Rect,
    shader::Shader,
};

use super::ImageId;

/// A draw kept for replay, with its own copies of the caller's buffers.
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub srcs: [Option<ImageId>; SHADER_SRC_IMAGE_COUNT],
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
    pub blend: Blend,
    pub dst_region: Rect,
    pub src_regions: [Rect; SHADER_SRC_IMAGE_COUNT],
    pub shader: Shader,
    pub uniforms: Vec<u32>,
    pub fill_rule: FillRule,
}

#[derive(Debug, Clone)]
pub enum Operation {
    Draw(Box<DrawRecord>),
    /// `None` clears the region.
    Write {
        region: Rect,
        pixels: Option<Vec<u8>>,
    },
}

/// One recorded mutation of an image.
///
/// `seq` comes from a counter shared by every image, so operations
/// across images can be put back into submission order.
#[derive(Debug, Clone)]
pub struct HistoryItem {
    pub seq: u64,
    pub op: Operation,
}

impl HistoryItem {
    /// The part of the image this operation may change.
    pub fn dst_region(&self) -> Rect {
        match &self.op {
            Operation::Draw(draw) => draw.dst_region,
            Operation::Write { region, .. } => *region,
        }
    }

    pub fn sources(&self) -> impl Iterator<Item = ImageId> + '_ {
        let srcs: &[Option<ImageId>] = match &self.op {
            Operation::Draw(draw) => &draw.srcs,
            Operation::Write { .. } => &[],
        };
        srcs.iter().flatten().copied()
    }

    pub fn reads(&self, image: ImageId) -> bool {
        self.sources().any(|src| src == image)
    }
}
