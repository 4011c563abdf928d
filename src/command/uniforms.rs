use std::ops::Range;

use crate::{
    graphics::{preserved, PRESERVED_UNIFORM_DWORD_COUNT, SHADER_SRC_IMAGE_COUNT},
    rect::Rect,
    shader::ShaderUnit,
};

use super::TextureInfo;

/// Computes the preserved uniform block for a draw.
///
/// Regions are divided by their texture's size when the shader
/// works in texels. Absent sources produce zeroes.
pub fn preserved_uniforms(
    dst: TextureInfo,
    srcs: &[Option<TextureInfo>; SHADER_SRC_IMAGE_COUNT],
    dst_region: Rect,
    src_regions: &[Rect; SHADER_SRC_IMAGE_COUNT],
    unit: ShaderUnit,
) -> [u32; PRESERVED_UNIFORM_DWORD_COUNT] {
    let mut block = [0f32; PRESERVED_UNIFORM_DWORD_COUNT];
    let dst_size = dst.size.as_vec2();

    block[preserved::DST_TEXTURE_SIZE] = dst_size.x;
    block[preserved::DST_TEXTURE_SIZE + 1] = dst_size.y;

    for (i, src) in srcs.iter().enumerate() {
        if let Some(src) = src {
            block[preserved::SRC_TEXTURE_SIZES + 2 * i] = src.size.x as f32;
            block[preserved::SRC_TEXTURE_SIZES + 2 * i + 1] = src.size.y as f32;
        }
    }

    let (mut origin, mut size) = (dst_region.pos_f32(), dst_region.size_f32());
    if unit == ShaderUnit::Texels {
        origin /= dst_size;
        size /= dst_size;
    }
    block[preserved::DST_REGION_ORIGIN] = origin.x;
    block[preserved::DST_REGION_ORIGIN + 1] = origin.y;
    block[preserved::DST_REGION_SIZE] = size.x;
    block[preserved::DST_REGION_SIZE + 1] = size.y;

    for (i, (src, region)) in srcs.iter().zip(src_regions).enumerate() {
        let (mut origin, mut size) = (region.pos_f32(), region.size_f32());
        if unit == ShaderUnit::Texels {
            match src {
                Some(src) => {
                    origin /= src.size.as_vec2();
                    size /= src.size.as_vec2();
                }
                None => continue,
            }
        }
        block[preserved::SRC_REGION_ORIGINS + 2 * i] = origin.x;
        block[preserved::SRC_REGION_ORIGINS + 2 * i + 1] = origin.y;
        block[preserved::SRC_REGION_SIZES + 2 * i] = size.x;
        block[preserved::SRC_REGION_SIZES + 2 * i + 1] = size.y;
    }

    // Maps destination pixel space to clip space.
    let projection = [
        2. / dst_size.x, 0., 0., 0., //
        0., 2. / dst_size.y, 0., 0., //
        0., 0., 1., 0., //
        -1., -1., 0., 1.,
    ];
    block[preserved::PROJECTION_MATRIX..].copy_from_slice(&projection);

    let mut dwords = [0u32; PRESERVED_UNIFORM_DWORD_COUNT];
    dwords.copy_from_slice(bytemuck::cast_slice(&block));
    dwords
}

/// Transient uniform storage for the commands of a queue.
///
/// Commands hold ranges into the arena; it is released
/// at frame boundaries.
#[derive(Debug, Default)]
pub struct UniformArena {
    data: Vec<u32>,
}

impl UniformArena {
    /// Stores the preserved block followed by `user` uniforms, padded with
    /// zeroes to `user_dword_count`.
    pub fn alloc(
        &mut self,
        preserved: &[u32; PRESERVED_UNIFORM_DWORD_COUNT],
        user: &[u32],
        user_dword_count: usize,
    ) -> Range<usize> {
        let start = self.data.len();
        self.data.extend_from_slice(preserved);
        self.data.extend_from_slice(user);
        self.data
            .resize(start + PRESERVED_UNIFORM_DWORD_COUNT + user_dword_count, 0);
        start..self.data.len()
    }

    pub fn get(&self, range: Range<usize>) -> &[u32] {
        &self.data[range]
    }

    pub fn get_mut(&mut self, range: Range<usize>) -> &mut [u32] {
        &mut self.data[range]
    }

    /// Drops everything from `len` on. Used to undo an allocation
    /// whose draw was merged into the previous one.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }
}
