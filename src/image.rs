use glam::UVec2;

use crate::{
    backend::{Blend, FillRule, TextureId},
    error::Result,
    graphics::SHADER_SRC_IMAGE_COUNT,
    images::{DrawArgs, Hint, ImageId, ImageState, ImageType},
    rect::Rect,
    shader::Shader,
    Context,
};

/// A draw into an [`Image`]. Built with [`DrawTriangles::new`] and
/// the chained setters, then passed to [`Image::draw_triangles`].
///
/// Vertices use the 12-float layout described in [`graphics`](crate::graphics);
/// indices refer to vertices of this draw only.
#[derive(Clone)]
pub struct DrawTriangles<'a> {
    srcs: [Option<&'a Image>; SHADER_SRC_IMAGE_COUNT],
    vertices: &'a [f32],
    indices: &'a [u32],
    blend: Blend,
    dst_region: Option<Rect>,
    src_regions: [Rect; SHADER_SRC_IMAGE_COUNT],
    shader: &'a Shader,
    uniforms: &'a [u32],
    fill_rule: FillRule,
    hint: Hint,
}

impl<'a> DrawTriangles<'a> {
    pub fn new(shader: &'a Shader, vertices: &'a [f32], indices: &'a [u32]) -> Self {
        Self {
            srcs: [None; SHADER_SRC_IMAGE_COUNT],
            vertices,
            indices,
            blend: Blend::default(),
            dst_region: None,
            src_regions: [Rect::default(); SHADER_SRC_IMAGE_COUNT],
            shader,
            uniforms: &[],
            fill_rule: FillRule::default(),
            hint: Hint::None,
        }
    }

    /// Binds `image` to source slot `slot`.
    pub fn source(mut self, slot: usize, image: &'a Image) -> Self {
        self.srcs[slot] = Some(image);
        self
    }

    /// Limits sampling of source `slot` to `region`. By default the
    /// whole source is readable.
    pub fn source_region(mut self, slot: usize, region: Rect) -> Self {
        self.src_regions[slot] = region;
        self
    }

    pub fn blend(mut self, blend: Blend) -> Self {
        self.blend = blend;
        self
    }

    /// Clips the draw to `region` of the destination. Defaults to the
    /// whole image.
    pub fn dst_region(mut self, region: Rect) -> Self {
        self.dst_region = Some(region);
        self
    }

    /// Sets the shader's user uniforms.
    pub fn uniforms(mut self, uniforms: &'a [u32]) -> Self {
        self.uniforms = uniforms;
        self
    }

    pub fn fill_rule(mut self, fill_rule: FillRule) -> Self {
        self.fill_rule = fill_rule;
        self
    }

    pub fn hint(mut self, hint: Hint) -> Self {
        self.hint = hint;
        self
    }
}

/// A handle to an image owned by a [`Context`].
///
/// Dropping the handle disposes the image.
pub struct Image {
    id: ImageId,
    cx: Context,
}

impl Image {
    pub(crate) fn new(cx: Context, id: ImageId) -> Self {
        Self { id, cx }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn size(&self) -> UVec2 {
        self.cx.state().images.entry(self.id).size
    }

    pub fn width(&self) -> u32 {
        self.size().x
    }

    pub fn height(&self) -> u32 {
        self.size().y
    }

    pub fn image_type(&self) -> ImageType {
        self.cx.state().images.entry(self.id).ty
    }

    pub fn state(&self) -> ImageState {
        self.cx.state().images.entry(self.id).state()
    }

    /// The backend texture currently holding this image.
    /// Changes when the image is extended.
    pub fn texture(&self) -> TextureId {
        self.cx.state().images.entry(self.id).texture
    }

    /// Writes RGBA8 pixels into `region`. An empty slice clears it.
    ///
    /// The pixels are copied; the caller may reuse the buffer.
    ///
    /// # Panics
    /// Panics if `region` is empty or outside the image, or if a
    /// non-empty `pixels` does not hold exactly `4 * area` bytes.
    pub fn write_pixels(&self, pixels: &[u8], region: Rect) {
        let pixels = if pixels.is_empty() { None } else { Some(pixels) };
        let mut state = self.cx.state();
        let state = &mut *state;
        state
            .images
            .write_pixels(state.manager.queue(), self.id, pixels, region);
    }

    pub fn clear_pixels(&self, region: Rect) {
        self.write_pixels(&[], region);
    }

    /// Queues a draw into this image.
    ///
    /// # Panics
    /// Panics if a source belongs to another context, or if the
    /// vertices or uniforms exceed what one draw can hold.
    pub fn draw_triangles(&self, draw: DrawTriangles) {
        for src in draw.srcs.iter().flatten() {
            assert!(src.cx.ptr_eq(&self.cx), "source image belongs to another context");
        }
        let dst_region = draw.dst_region.unwrap_or_else(|| Rect::from_size(self.size()));
        let mut state = self.cx.state();
        let state = &mut *state;
        state.images.draw_triangles(
            state.manager.queue(),
            self.id,
            DrawArgs {
                srcs: draw.srcs.map(|src| src.map(|src| src.id)),
                vertices: draw.vertices,
                indices: draw.indices,
                blend: draw.blend,
                dst_region,
                src_regions: draw.src_regions,
                shader: draw.shader,
                uniforms: draw.uniforms,
                fill_rule: draw.fill_rule,
                hint: draw.hint,
            },
        );
    }

    /// Reads `region` into `dst` as RGBA8.
    ///
    /// Served from the CPU copy when it is current; otherwise the
    /// pending commands are flushed and the GPU contents read back.
    pub fn read_pixels(&self, dst: &mut [u8], region: Rect) -> Result<()> {
        let mut state = self.cx.state();
        let state = &mut *state;
        state.images.read_pixels(
            &mut state.manager,
            self.cx.render_thread(),
            self.id,
            dst,
            region,
        )
    }

    /// Grows the image to `width` x `height`, keeping its contents at
    /// the top-left corner.
    pub fn extend(&mut self, width: u32, height: u32) {
        let shader = self.cx.nearest_filter_shader().clone();
        let mut state = self.cx.state();
        let state = &mut *state;
        self.id = state.images.extend(
            state.manager.queue(),
            self.id,
            glam::uvec2(width, height),
            &shader,
        );
    }

    /// Disposes the image. Same as dropping it.
    pub fn dispose(self) {}

    #[cfg(test)]
    pub(crate) fn history_len(&self) -> usize {
        self.cx.state().images.entry(self.id).history.len()
    }

    #[cfg(test)]
    pub(crate) fn stale_regions(&self) -> Vec<Rect> {
        self.cx.state().images.entry(self.id).stale_regions()
    }

    #[cfg(test)]
    pub(crate) fn base_pixels(&self) -> Option<Vec<u8>> {
        self.cx
            .state()
            .images
            .entry(self.id)
            .base
            .as_bytes()
            .map(<[u8]>::to_vec)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let mut state = self.cx.state();
        let state = &mut *state;
        state.images.dispose(state.manager.queue(), self.id);
    }
}
