//! A CPU backend that rasterizes into premultiplied RGBA8 buffers.
//!
//! It implements the full [`Backend`] contract, including fill rules
//! and blend factors, and can simulate a lost context. It is meant
//! for headless use and for testing the layers above it.

use std::any::Any;

use ahash::AHashMap;
use glam::{vec2, vec4, Mat4, UVec2, Vec2, Vec4};

use crate::{
    graphics::{preserved, PRESERVED_UNIFORM_DWORD_COUNT, SHADER_SRC_IMAGE_COUNT, VERTEX_FLOAT_COUNT},
    rect::Rect,
    shader::{Program, ShaderDesc, ShaderId, ShaderUnit},
};

use super::{
    Backend, BackendError, Blend, BlendFactor, BlendOperation, DstRegion, FillRule, TextureId,
    WritePixelsArgs,
};

/// Counters for the calls a [`SoftwareBackend`] has received.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub begins: usize,
    pub ends: usize,
    pub presents: usize,
    pub set_vertices: usize,
    pub draw_calls: usize,
    pub write_pixels: usize,
    pub read_pixels: usize,
}

struct Texture {
    size: UVec2,
    pixels: Vec<u8>,
}

impl Texture {
    fn new(size: UVec2) -> Self {
        Self {
            size,
            pixels: vec![0; size.x as usize * size.y as usize * 4],
        }
    }

    fn bounds(&self) -> Rect {
        Rect::from_size(self.size)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.size.x as usize + x as usize) * 4
    }

    fn texel(&self, x: u32, y: u32) -> Vec4 {
        let i = self.index(x, y);
        let p = &self.pixels[i..i + 4];
        vec4(p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32) / 255.
    }
}

/// The software backend.
pub struct SoftwareBackend {
    textures: AHashMap<TextureId, Texture>,
    shaders: AHashMap<ShaderId, ShaderDesc>,
    vertices: Vec<f32>,
    indices: Vec<u32>,

    max_image_size: u32,
    vsync: bool,
    needs_clearing_screen: bool,
    context_lost: bool,
    fail_next_draw: bool,

    stats: Stats,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            textures: AHashMap::new(),
            shaders: AHashMap::new(),
            vertices: Vec::new(),
            indices: Vec::new(),
            max_image_size: 4096,
            vsync: true,
            needs_clearing_screen: false,
            context_lost: false,
            fail_next_draw: false,
            stats: Stats::default(),
        }
    }

    pub fn with_max_image_size(mut self, size: u32) -> Self {
        self.max_image_size = size;
        self
    }

    pub fn with_needs_clearing_screen(mut self, needs: bool) -> Self {
        self.needs_clearing_screen = needs;
        self
    }

    /// Drops every texture and shader, as a device reset would.
    /// All operations fail with [`BackendError::ContextLost`] until
    /// [`Backend::restore_context`] is called.
    pub fn lose_context(&mut self) {
        log::info!(
            "Simulating context loss ({} textures, {} shaders)",
            self.textures.len(),
            self.shaders.len()
        );
        self.textures.clear();
        self.shaders.clear();
        self.vertices.clear();
        self.indices.clear();
        self.context_lost = true;
    }

    /// Makes the next `draw_triangles` call fail.
    pub fn fail_next_draw(&mut self) {
        self.fail_next_draw = true;
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn vsync_enabled(&self) -> bool {
        self.vsync
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn has_texture(&self, id: TextureId) -> bool {
        self.textures.contains_key(&id)
    }

    /// The raw contents of a texture.
    pub fn pixels(&self, id: TextureId) -> Option<&[u8]> {
        self.textures.get(&id).map(|t| t.pixels.as_slice())
    }

    fn check_context(&self) -> Result<(), BackendError> {
        if self.context_lost {
            Err(BackendError::ContextLost)
        } else {
            Ok(())
        }
    }

    fn vertex(&self, index: u32, projection: Mat4, dst_size: Vec2) -> Result<Vertex, BackendError> {
        let start = index as usize * VERTEX_FLOAT_COUNT;
        let v = self
            .vertices
            .get(start..start + VERTEX_FLOAT_COUNT)
            .ok_or_else(|| BackendError::Device(format!("vertex {} out of range", index)))?;
        let clip = projection * vec4(v[0], v[1], 0., 1.);
        Ok(Vertex {
            pos: (vec2(clip.x, clip.y) + Vec2::ONE) * 0.5 * dst_size,
            src: vec2(v[2], v[3]),
            color: vec4(v[4], v[5], v[6], v[7]),
        })
    }
}

#[derive(Copy, Clone, Debug)]
struct Vertex {
    pos: Vec2,
    src: Vec2,
    color: Vec4,
}

impl Vertex {
    fn interpolate(tri: &[Vertex; 3], w: [f32; 3]) -> Vertex {
        Vertex {
            pos: tri[0].pos * w[0] + tri[1].pos * w[1] + tri[2].pos * w[2],
            src: tri[0].src * w[0] + tri[1].src * w[1] + tri[2].src * w[2],
            color: tri[0].color * w[0] + tri[1].color * w[1] + tri[2].color * w[2],
        }
    }
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Top-left fill convention, so that pixel centers on an edge
/// shared by two triangles are covered exactly once.
fn is_top_left(a: Vec2, b: Vec2) -> bool {
    let d = b - a;
    (d.y == 0. && d.x > 0.) || d.y < 0.
}

fn covers(w: f32, a: Vec2, b: Vec2) -> bool {
    w > 0. || (w == 0. && is_top_left(a, b))
}

/// Calls `f` with the pixel position and barycentric weights of every
/// pixel center covered by the triangle, clipped to `clip`.
///
/// Returns the orientation of the triangle (+1, -1, or 0 if degenerate).
fn rasterize(tri: &[Vertex; 3], clip: Rect, mut f: impl FnMut(u32, u32, [f32; 3])) -> i32 {
    let mut order = [0, 1, 2];
    let mut area = edge(tri[0].pos, tri[1].pos, tri[2].pos);
    if area == 0. {
        return 0;
    }
    let winding = if area > 0. { 1 } else { -1 };
    if area < 0. {
        order.swap(1, 2);
        area = -area;
    }
    let [p0, p1, p2] = order.map(|i| tri[i].pos);

    let min = p0.min(p1).min(p2);
    let max = p0.max(p1).max(p2);
    let x0 = min.x.floor().max(clip.pos.x as f32);
    let y0 = min.y.floor().max(clip.pos.y as f32);
    let x1 = max.x.ceil().min(clip.max().x as f32);
    let y1 = max.y.ceil().min(clip.max().y as f32);
    if x1 <= x0 || y1 <= y0 {
        return winding;
    }

    for y in y0 as u32..y1 as u32 {
        for x in x0 as u32..x1 as u32 {
            let p = vec2(x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(p1, p2, p);
            let w1 = edge(p2, p0, p);
            let w2 = edge(p0, p1, p);
            if covers(w0, p1, p2) && covers(w1, p2, p0) && covers(w2, p0, p1) {
                let mut weights = [0.; 3];
                weights[order[0]] = w0 / area;
                weights[order[1]] = w1 / area;
                weights[order[2]] = w2 / area;
                f(x, y, weights);
            }
        }
    }
    winding
}

fn uniform_f32(uniforms: &[u32], index: usize) -> f32 {
    uniforms.get(index).copied().map(f32::from_bits).unwrap_or(0.)
}

fn uniform_vec2(uniforms: &[u32], index: usize) -> Vec2 {
    vec2(uniform_f32(uniforms, index), uniform_f32(uniforms, index + 1))
}

/// Per-draw state needed to color one pixel.
struct Shading<'a> {
    desc: &'a ShaderDesc,
    uniforms: &'a [u32],
    sources: &'a [Option<Texture>; SHADER_SRC_IMAGE_COUNT],
}

impl Shading<'_> {
    /// The readable region of the first source, in pixels.
    fn src_region(&self, texture: &Texture) -> Rect {
        let mut origin = uniform_vec2(self.uniforms, preserved::SRC_REGION_ORIGINS);
        let mut size = uniform_vec2(self.uniforms, preserved::SRC_REGION_SIZES);
        if self.desc.unit() == ShaderUnit::Texels {
            let texture_size = texture.size.as_vec2();
            origin *= texture_size;
            size *= texture_size;
        }
        if size.x <= 0. || size.y <= 0. {
            return texture.bounds();
        }
        let origin = origin.round().max(Vec2::ZERO);
        let size = size.round().max(Vec2::ZERO);
        Rect::new(origin.as_uvec2(), size.as_uvec2()).intersection(texture.bounds())
    }

    fn color(&self, v: &Vertex) -> Vec4 {
        match self.desc.program() {
            Program::Texture => {
                let texture = match &self.sources[0] {
                    Some(t) => t,
                    None => return Vec4::ZERO,
                };
                let region = self.src_region(texture);
                let s = v.src.floor();
                if s.x < region.pos.x as f32
                    || s.y < region.pos.y as f32
                    || s.x >= region.max().x as f32
                    || s.y >= region.max().y as f32
                {
                    return Vec4::ZERO;
                }
                texture.texel(s.x as u32, s.y as u32) * v.color
            }
            Program::VertexColor => v.color,
            Program::UniformColor => {
                let base = PRESERVED_UNIFORM_DWORD_COUNT;
                vec4(
                    uniform_f32(self.uniforms, base),
                    uniform_f32(self.uniforms, base + 1),
                    uniform_f32(self.uniforms, base + 2),
                    uniform_f32(self.uniforms, base + 3),
                )
            }
        }
    }
}

fn factor(factor: BlendFactor, src: Vec4, dst: Vec4) -> Vec4 {
    match factor {
        BlendFactor::Zero => Vec4::ZERO,
        BlendFactor::One => Vec4::ONE,
        BlendFactor::SourceColor => src,
        BlendFactor::OneMinusSourceColor => Vec4::ONE - src,
        BlendFactor::SourceAlpha => Vec4::splat(src.w),
        BlendFactor::OneMinusSourceAlpha => Vec4::splat(1. - src.w),
        BlendFactor::DestinationColor => dst,
        BlendFactor::OneMinusDestinationColor => Vec4::ONE - dst,
        BlendFactor::DestinationAlpha => Vec4::splat(dst.w),
        BlendFactor::OneMinusDestinationAlpha => Vec4::splat(1. - dst.w),
    }
}

fn operate(op: BlendOperation, s: Vec4, d: Vec4, src: Vec4, dst: Vec4) -> Vec4 {
    match op {
        BlendOperation::Add => s + d,
        BlendOperation::Subtract => s - d,
        BlendOperation::ReverseSubtract => d - s,
        BlendOperation::Min => src.min(dst),
        BlendOperation::Max => src.max(dst),
    }
}

fn blend(blend: Blend, src: Vec4, dst: Vec4) -> Vec4 {
    let rgb = operate(
        blend.operation_rgb,
        src * factor(blend.src_factor_rgb, src, dst),
        dst * factor(blend.dst_factor_rgb, src, dst),
        src,
        dst,
    );
    let alpha = operate(
        blend.operation_alpha,
        src * factor(blend.src_factor_alpha, src, dst),
        dst * factor(blend.dst_factor_alpha, src, dst),
        src,
        dst,
    );
    vec4(rgb.x, rgb.y, rgb.z, alpha.w).clamp(Vec4::ZERO, Vec4::ONE)
}

fn store(texture: &mut Texture, x: u32, y: u32, color: Vec4) {
    let i = texture.index(x, y);
    for (c, out) in color.to_array().iter().zip(&mut texture.pixels[i..i + 4]) {
        *out = (c * 255.).round() as u8;
    }
}

impl Backend for SoftwareBackend {
    fn begin(&mut self) -> Result<(), BackendError> {
        self.stats.begins += 1;
        self.check_context()
    }

    fn end(&mut self, present: bool) -> Result<(), BackendError> {
        self.stats.ends += 1;
        self.check_context()?;
        if present {
            self.stats.presents += 1;
        }
        Ok(())
    }

    fn set_vertices(&mut self, vertices: &[f32], indices: &[u32]) -> Result<(), BackendError> {
        self.check_context()?;
        self.stats.set_vertices += 1;
        self.vertices.clear();
        self.vertices.extend_from_slice(vertices);
        self.indices.clear();
        self.indices.extend_from_slice(indices);
        Ok(())
    }

    fn draw_triangles(
        &mut self,
        dst: TextureId,
        srcs: &[Option<TextureId>; SHADER_SRC_IMAGE_COUNT],
        shader: ShaderId,
        dst_regions: &[DstRegion],
        index_offset: usize,
        blend_mode: Blend,
        uniforms: &[u32],
        fill_rule: FillRule,
    ) -> Result<(), BackendError> {
        self.check_context()?;
        self.stats.draw_calls += 1;
        if std::mem::take(&mut self.fail_next_draw) {
            return Err(BackendError::Device("injected draw failure".into()));
        }
        if uniforms.len() < PRESERVED_UNIFORM_DWORD_COUNT {
            return Err(BackendError::Device(format!(
                "expected at least {} uniform dwords, got {}",
                PRESERVED_UNIFORM_DWORD_COUNT,
                uniforms.len()
            )));
        }

        let desc = self
            .shaders
            .get(&shader)
            .ok_or(BackendError::MissingShader(shader))?
            .clone();

        // Sources are snapshotted so a texture can be drawn into itself.
        let mut sources: [Option<Texture>; SHADER_SRC_IMAGE_COUNT] = Default::default();
        for (slot, src) in sources.iter_mut().zip(srcs) {
            if let Some(id) = src {
                let texture = self
                    .textures
                    .get(id)
                    .ok_or(BackendError::MissingTexture(*id))?;
                *slot = Some(Texture {
                    size: texture.size,
                    pixels: texture.pixels.clone(),
                });
            }
        }

        let dst_size = self
            .textures
            .get(&dst)
            .ok_or(BackendError::MissingTexture(dst))?
            .size;
        let start = preserved::PROJECTION_MATRIX;
        let mut matrix = [0f32; 16];
        for (m, u) in matrix.iter_mut().zip(&uniforms[start..start + 16]) {
            *m = f32::from_bits(*u);
        }
        let projection = Mat4::from_cols_array(&matrix);

        // Resolve all triangles up front; `self.textures` is borrowed mutably below.
        let mut regions = Vec::with_capacity(dst_regions.len());
        let mut offset = index_offset;
        for dst_region in dst_regions {
            let indices = self
                .indices
                .get(offset..offset + dst_region.index_count)
                .ok_or_else(|| {
                    BackendError::Device(format!(
                        "index range {}..{} out of bounds",
                        offset,
                        offset + dst_region.index_count
                    ))
                })?;
            offset += dst_region.index_count;

            let mut triangles = Vec::with_capacity(indices.len() / 3);
            for tri in indices.chunks_exact(3) {
                triangles.push([
                    self.vertex(tri[0], projection, dst_size.as_vec2())?,
                    self.vertex(tri[1], projection, dst_size.as_vec2())?,
                    self.vertex(tri[2], projection, dst_size.as_vec2())?,
                ]);
            }
            regions.push((dst_region.region, triangles));
        }

        let shading = Shading {
            desc: &desc,
            uniforms,
            sources: &sources,
        };
        let target = self
            .textures
            .get_mut(&dst)
            .ok_or(BackendError::MissingTexture(dst))?;

        for (region, triangles) in regions {
            let clip = region.intersection(target.bounds());
            if clip.is_empty() {
                continue;
            }
            match fill_rule {
                FillRule::FillAll => {
                    for tri in &triangles {
                        rasterize(tri, clip, |x, y, w| {
                            let color = shading.color(&Vertex::interpolate(tri, w));
                            let out = blend(blend_mode, color, target.texel(x, y));
                            store(target, x, y, out);
                        });
                    }
                }
                FillRule::NonZero | FillRule::EvenOdd => {
                    let stride = clip.width() as usize;
                    let mut winding = vec![0i32; clip.area()];
                    let mut first_hit: Vec<Option<(usize, [f32; 3])>> = vec![None; clip.area()];
                    for (t, tri) in triangles.iter().enumerate() {
                        let mut covered = Vec::new();
                        let sign = rasterize(tri, clip, |x, y, w| covered.push((x, y, w)));
                        for (x, y, w) in covered {
                            let i = (y - clip.pos.y) as usize * stride + (x - clip.pos.x) as usize;
                            winding[i] += sign;
                            first_hit[i].get_or_insert((t, w));
                        }
                    }
                    for (i, hit) in first_hit.iter().enumerate() {
                        let filled = match fill_rule {
                            FillRule::NonZero => winding[i] != 0,
                            _ => winding[i] % 2 != 0,
                        };
                        if let (true, Some((t, w))) = (filled, hit) {
                            let x = clip.pos.x + (i % stride) as u32;
                            let y = clip.pos.y + (i / stride) as u32;
                            let color = shading.color(&Vertex::interpolate(&triangles[*t], *w));
                            let out = blend(blend_mode, color, target.texel(x, y));
                            store(target, x, y, out);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn new_image(&mut self, id: TextureId, size: UVec2) -> Result<(), BackendError> {
        self.check_context()?;
        if size.x > self.max_image_size || size.y > self.max_image_size {
            return Err(BackendError::Device(format!(
                "texture size {}x{} exceeds the maximum of {}",
                size.x, size.y, self.max_image_size
            )));
        }
        self.textures.insert(id, Texture::new(size));
        Ok(())
    }

    fn new_screen_framebuffer_image(
        &mut self,
        id: TextureId,
        size: UVec2,
    ) -> Result<(), BackendError> {
        // The screen is an ordinary buffer here.
        self.new_image(id, size)
    }

    fn dispose_image(&mut self, id: TextureId) -> Result<(), BackendError> {
        self.check_context()?;
        self.textures
            .remove(&id)
            .map(|_| ())
            .ok_or(BackendError::MissingTexture(id))
    }

    fn write_pixels(&mut self, id: TextureId, args: &[WritePixelsArgs]) -> Result<(), BackendError> {
        self.check_context()?;
        self.stats.write_pixels += 1;
        let texture = self
            .textures
            .get_mut(&id)
            .ok_or(BackendError::MissingTexture(id))?;
        for arg in args {
            let region = arg.region;
            let valid = texture.bounds().contains_rect(region)
                && arg
                    .pixels
                    .as_ref()
                    .map_or(true, |p| p.len() == region.area() * 4);
            if !valid {
                return Err(BackendError::InvalidRegion {
                    texture: id,
                    region,
                });
            }
            let row_len = region.width() as usize * 4;
            for row in 0..region.height() {
                let start = texture.index(region.pos.x, region.pos.y + row);
                let dst = &mut texture.pixels[start..start + row_len];
                match &arg.pixels {
                    Some(pixels) => {
                        let offset = row as usize * row_len;
                        dst.copy_from_slice(&pixels[offset..offset + row_len]);
                    }
                    None => dst.iter_mut().for_each(|b| *b = 0),
                }
            }
        }
        Ok(())
    }

    fn read_pixels(&mut self, id: TextureId, region: Rect, dst: &mut [u8]) -> Result<(), BackendError> {
        self.check_context()?;
        self.stats.read_pixels += 1;
        let texture = self.textures.get(&id).ok_or(BackendError::MissingTexture(id))?;
        if !texture.bounds().contains_rect(region) || dst.len() != region.area() * 4 {
            return Err(BackendError::InvalidRegion {
                texture: id,
                region,
            });
        }
        let row_len = region.width() as usize * 4;
        for row in 0..region.height() {
            let start = texture.index(region.pos.x, region.pos.y + row);
            let offset = row as usize * row_len;
            dst[offset..offset + row_len].copy_from_slice(&texture.pixels[start..start + row_len]);
        }
        Ok(())
    }

    fn new_shader(&mut self, id: ShaderId, desc: &ShaderDesc) -> Result<(), BackendError> {
        self.check_context()?;
        self.shaders.insert(id, desc.clone());
        Ok(())
    }

    fn dispose_shader(&mut self, id: ShaderId) -> Result<(), BackendError> {
        self.check_context()?;
        self.shaders
            .remove(&id)
            .map(|_| ())
            .ok_or(BackendError::MissingShader(id))
    }

    fn set_vsync_enabled(&mut self, enabled: bool) {
        self.vsync = enabled;
    }

    fn max_image_size(&self) -> u32 {
        self.max_image_size
    }

    fn needs_clearing_screen(&self) -> bool {
        self.needs_clearing_screen
    }

    fn is_context_lost(&self) -> bool {
        self.context_lost
    }

    fn restore_context(&mut self) -> Result<(), BackendError> {
        self.textures.clear();
        self.shaders.clear();
        self.context_lost = false;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
