//! Restorable image bookkeeping.
//!
//! Every regular image keeps enough on the CPU to rebuild its texture
//! after a context loss: a base pixel buffer plus the operations
//! recorded since that base was taken. When an operation cannot be
//! replayed the image is marked for resolution, and its contents are
//! read back from the GPU at the next frame boundary.

use glam::UVec2;
use slotmap::SlotMap;

use crate::{
    backend::{Blend, FillRule, TextureId},
    command::{Command, CommandQueue, CommandQueueManager, TextureInfo},
    error::{Error, Result},
    graphics::{self, SHADER_SRC_IMAGE_COUNT},
    rect::Rect,
    shader::{Shader, ShaderId},
    thread::RenderThread,
};

use self::{
    history::{DrawRecord, HistoryItem, Operation},
    pixels::BasePixels,
};

pub mod graph;
pub mod history;
pub mod pixels;
pub(crate) mod restore;

#[cfg(test)]
mod tests;

slotmap::new_key_type! {
    /// Identifies an image in the restoration registry.
    pub struct ImageId;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ImageType {
    /// Contents are preserved across context loss.
    Regular,
    /// Contents are cleared on restoration. Cheap for images
    /// redrawn every frame.
    Volatile,
    /// The framebuffer. Never restored, never used as a source of
    /// a recorded draw.
    Screen,
}

/// Where a regular image stands with respect to restorability.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImageState {
    /// Nothing written yet; restores as transparent.
    Fresh,
    /// Contents are fully described by the base pixels.
    HasBasePixels,
    /// Some regions were changed by recorded operations, or are
    /// known only to the GPU.
    Stale,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Hint {
    #[default]
    None,
    /// The draw replaces every pixel of its destination region, so
    /// earlier operations confined to that region can be dropped.
    OverwriteDstRegion,
}

/// A draw as passed into the registry.
pub(crate) struct DrawArgs<'a> {
    pub srcs: [Option<ImageId>; SHADER_SRC_IMAGE_COUNT],
    pub vertices: &'a [f32],
    pub indices: &'a [u32],
    pub blend: Blend,
    pub dst_region: Rect,
    pub src_regions: [Rect; SHADER_SRC_IMAGE_COUNT],
    pub shader: &'a Shader,
    pub uniforms: &'a [u32],
    pub fill_rule: FillRule,
    pub hint: Hint,
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub texture: TextureId,
    pub size: UVec2,
    pub ty: ImageType,
    pub base: BasePixels,
    pub history: Vec<HistoryItem>,
    /// Contents exist only on the GPU and must be read back
    /// before the next restoration.
    pub needs_resolve: bool,
}

impl Entry {
    fn new(texture: TextureId, size: UVec2, ty: ImageType) -> Self {
        Self {
            texture,
            size,
            ty,
            base: BasePixels::new(size),
            history: Vec::new(),
            needs_resolve: false,
        }
    }

    pub fn info(&self) -> TextureInfo {
        TextureInfo {
            id: self.texture,
            size: self.size,
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.size)
    }

    pub fn state(&self) -> ImageState {
        if self.needs_resolve || !self.history.is_empty() {
            ImageState::Stale
        } else if self.base.has_data() {
            ImageState::HasBasePixels
        } else {
            ImageState::Fresh
        }
    }

    /// Regions whose contents the base pixels do not describe.
    pub fn stale_regions(&self) -> Vec<Rect> {
        if self.needs_resolve {
            vec![self.bounds()]
        } else {
            self.history.iter().map(HistoryItem::dst_region).collect()
        }
    }

    fn reads(&self, image: ImageId, mut pred: impl FnMut(u64) -> bool) -> bool {
        self.history.iter().any(|item| pred(item.seq) && item.reads(image))
    }
}

/// All live images and their restoration state.
pub(crate) struct Images {
    pub entries: SlotMap<ImageId, Entry>,
    next_seq: u64,
    next_texture: u32,
    restorable: bool,
    max_history_len: usize,
}

impl Images {
    pub fn new(restorable: bool, max_history_len: usize) -> Self {
        Self {
            entries: SlotMap::with_key(),
            next_seq: 0,
            next_texture: 0,
            restorable,
            max_history_len,
        }
    }

    pub fn entry(&self, id: ImageId) -> &Entry {
        match self.entries.get(id) {
            Some(entry) => entry,
            None => panic!("image {:?} was disposed", id),
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn alloc_texture(&mut self) -> TextureId {
        self.next_texture += 1;
        TextureId(self.next_texture)
    }

    pub fn new_image(&mut self, queue: &mut CommandQueue, size: UVec2, ty: ImageType) -> ImageId {
        let texture = self.alloc_texture();
        queue.enqueue(Command::NewImage {
            id: texture,
            size,
            screen: ty == ImageType::Screen,
        });
        self.entries.insert(Entry::new(texture, size, ty))
    }

    /// Writes `pixels` into `region` of the image. `None` clears it.
    pub fn write_pixels(
        &mut self,
        queue: &mut CommandQueue,
        id: ImageId,
        pixels: Option<&[u8]>,
        region: Rect,
    ) {
        let entry = self.entry(id);
        assert!(!region.is_empty(), "cannot write an empty region");
        assert!(
            entry.bounds().contains_rect(region),
            "write region {:?} is outside of the {}x{} image",
            region,
            entry.size.x,
            entry.size.y
        );
        if let Some(pixels) = pixels {
            assert_eq!(
                pixels.len(),
                region.area() * 4,
                "pixel buffer does not match the region {:?}",
                region
            );
        }
        queue.enqueue_write_pixels(entry.texture, region, pixels.map(<[u8]>::to_vec));

        if !self.restorable || entry.ty != ImageType::Regular {
            return;
        }
        let whole = region == entry.bounds();
        let seq = self.next_seq();

        if whole {
            let pixels = match pixels {
                Some(pixels) => pixels.to_vec(),
                None => vec![0; region.area() * 4],
            };
            self.rebase(id, pixels);
            return;
        }
        if self.entries[id].needs_resolve {
            return;
        }

        if let Some(first) = self.discard_superseded(id, region) {
            self.invalidate_readers(id, |read| read > first);
            if self.entries[id].needs_resolve {
                return;
            }
        }

        if self.entries[id].history.is_empty() && !self.has_readers(id) {
            self.entries[id].base.write(region, pixels);
        } else {
            self.record(
                id,
                HistoryItem {
                    seq,
                    op: Operation::Write {
                        region,
                        pixels: pixels.map(<[u8]>::to_vec),
                    },
                },
            );
        }
    }

    pub fn draw_triangles(&mut self, queue: &mut CommandQueue, dst: ImageId, args: DrawArgs) {
        if args.vertices.is_empty() {
            return;
        }
        let dst_entry = self.entry(dst);
        let dst_info = dst_entry.info();
        let dst_ty = dst_entry.ty;
        let srcs = args.srcs.map(|src| src.map(|src| self.entry(src).info()));
        queue.enqueue_draw_triangles(
            dst_info,
            srcs,
            args.vertices,
            args.indices,
            args.blend,
            args.dst_region,
            args.src_regions,
            args.shader,
            args.uniforms,
            args.fill_rule,
        );

        if !self.restorable || dst_ty != ImageType::Regular {
            return;
        }
        let seq = self.next_seq();
        if self.entries[dst].needs_resolve {
            return;
        }

        let unreplayable = args.srcs.iter().flatten().any(|&src| {
            let src = &self.entries[src];
            src.ty != ImageType::Regular || src.needs_resolve
        });
        if unreplayable {
            self.invalidate(dst);
            return;
        }

        // A draw sampling its own destination reads what the hint
        // would drop.
        if args.hint == Hint::OverwriteDstRegion && !args.srcs.contains(&Some(dst)) {
            if let Some(first) = self.discard_superseded(dst, args.dst_region) {
                self.invalidate_readers(dst, |read| read > first);
                if self.entries[dst].needs_resolve {
                    return;
                }
            }
        }

        self.record(
            dst,
            HistoryItem {
                seq,
                op: Operation::Draw(Box::new(DrawRecord {
                    srcs: args.srcs,
                    vertices: args.vertices.to_vec(),
                    indices: args.indices.to_vec(),
                    blend: args.blend,
                    dst_region: args.dst_region,
                    src_regions: args.src_regions,
                    shader: args.shader.clone(),
                    uniforms: args.uniforms.to_vec(),
                    fill_rule: args.fill_rule,
                })),
            },
        );
    }

    /// Reads `region` into `dst`, resolving the image first if the
    /// region is not described by its base pixels.
    pub fn read_pixels(
        &mut self,
        manager: &mut CommandQueueManager,
        thread: &RenderThread,
        id: ImageId,
        dst: &mut [u8],
        region: Rect,
    ) -> Result<()> {
        let entry = self.entry(id);
        assert!(
            entry.bounds().contains_rect(region),
            "read region {:?} is outside of the {}x{} image",
            region,
            entry.size.x,
            entry.size.y
        );
        assert_eq!(dst.len(), region.area() * 4, "buffer does not match the region");

        if !self.restorable || entry.ty != ImageType::Regular {
            let pixels = read_back(manager, thread, entry.texture, region)?;
            dst.copy_from_slice(&pixels);
            return Ok(());
        }

        if entry.stale_regions().iter().any(|r| r.overlaps(region)) {
            let texture = entry.texture;
            let bounds = entry.bounds();
            log::debug!("Resolving {} to serve a read", texture);
            let pixels = read_back(manager, thread, texture, bounds)?;
            self.rebase(id, pixels);
        }
        self.entries[id].base.read(region, dst);
        Ok(())
    }

    /// Reads back every image marked for resolution.
    ///
    /// Resolving an image can invalidate images that read it earlier,
    /// so this runs until nothing is left.
    pub fn resolve_stale_images(
        &mut self,
        manager: &mut CommandQueueManager,
        thread: &RenderThread,
    ) -> Result<()> {
        loop {
            let pending: Vec<(ImageId, flume::Receiver<Vec<u8>>)> = self
                .entries
                .iter()
                .filter(|(_, entry)| entry.needs_resolve && entry.ty == ImageType::Regular)
                .map(|(id, entry)| {
                    let (reply, result) = flume::bounded(1);
                    manager.queue().enqueue(Command::ReadPixels {
                        src: entry.texture,
                        region: entry.bounds(),
                        reply,
                    });
                    (id, result)
                })
                .collect();
            if pending.is_empty() {
                return Ok(());
            }

            log::debug!("Resolving {} stale image(s)", pending.len());
            manager.flush(thread, false)?;
            for (id, result) in pending {
                let pixels = result.recv().map_err(|_| Error::RenderThreadGone)?;
                self.rebase(id, pixels);
            }
        }
    }

    pub fn dispose(&mut self, queue: &mut CommandQueue, id: ImageId) {
        let entry = match self.entries.remove(id) {
            Some(entry) => entry,
            None => return,
        };
        queue.enqueue(Command::DisposeImage(entry.texture));
        self.invalidate_readers(id, |_| true);
    }

    /// Moves the image to a larger texture, copying its contents.
    ///
    /// Returns the image's new identifier; references in other
    /// images' histories are rewritten to it.
    pub fn extend(
        &mut self,
        queue: &mut CommandQueue,
        id: ImageId,
        size: UVec2,
        copy_shader: &Shader,
    ) -> ImageId {
        let mut entry = match self.entries.remove(id) {
            Some(entry) => entry,
            None => panic!("image {:?} was disposed", id),
        };
        assert!(
            size.x >= entry.size.x && size.y >= entry.size.y,
            "cannot shrink a {}x{} image to {}x{}",
            entry.size.x,
            entry.size.y,
            size.x,
            size.y
        );
        let texture = self.alloc_texture();

        queue.enqueue(Command::NewImage {
            id: texture,
            size,
            screen: entry.ty == ImageType::Screen,
        });
        let old = entry.bounds();
        queue.enqueue_draw_triangles(
            TextureInfo { id: texture, size },
            [Some(entry.info()), None, None, None],
            &graphics::quad_vertices(old, old, [1.; 4]),
            &graphics::quad_indices(),
            Blend::COPY,
            old,
            [Rect::default(); SHADER_SRC_IMAGE_COUNT],
            copy_shader,
            &[],
            FillRule::FillAll,
        );
        queue.enqueue(Command::DisposeImage(entry.texture));

        log::debug!("Extended {} to {} ({}x{})", entry.texture, texture, size.x, size.y);
        entry.texture = texture;
        entry.size = size;
        entry.base.extend(size);
        let new_id = self.entries.insert(entry);

        for other in self.entries.values_mut() {
            for item in &mut other.history {
                if let Operation::Draw(draw) = &mut item.op {
                    for src in draw.srcs.iter_mut().flatten() {
                        if *src == id {
                            *src = new_id;
                        }
                    }
                }
            }
        }
        new_id
    }

    /// Marks every image that replays draws with `shader` for resolution.
    pub fn invalidate_shader_users(&mut self, shader: ShaderId) {
        let users: Vec<ImageId> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.history.iter().any(|item| {
                    matches!(&item.op, Operation::Draw(draw) if draw.shader.id() == shader)
                })
            })
            .map(|(id, _)| id)
            .collect();
        for id in users {
            self.invalidate(id);
        }
    }

    pub fn unresolved_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.needs_resolve).count()
    }

    fn record(&mut self, id: ImageId, item: HistoryItem) {
        let max_history_len = self.max_history_len;
        let entry = &mut self.entries[id];
        if entry.history.len() >= max_history_len {
            log::warn!(
                "{} recorded more than {} operations; it will be read back instead",
                entry.texture,
                max_history_len
            );
            self.invalidate(id);
            return;
        }
        entry.history.push(item);
    }

    /// Makes `pixels` the image's base and forgets its history.
    /// Images that read the old contents can no longer replay.
    fn rebase(&mut self, id: ImageId, pixels: Vec<u8>) {
        let entry = &mut self.entries[id];
        entry.base.replace(pixels);
        entry.history.clear();
        entry.needs_resolve = false;
        self.invalidate_readers(id, |_| true);
    }

    /// Drops recorded operations confined to `region` and returns the
    /// earliest sequence number dropped.
    fn discard_superseded(&mut self, id: ImageId, region: Rect) -> Option<u64> {
        let history = &mut self.entries[id].history;
        let mut first = None;
        history.retain(|item| {
            if region.contains_rect(item.dst_region()) {
                first = Some(first.map_or(item.seq, |f: u64| f.min(item.seq)));
                false
            } else {
                true
            }
        });
        first
    }

    fn has_readers(&self, id: ImageId) -> bool {
        self.entries.values().any(|entry| entry.reads(id, |_| true))
    }

    fn invalidate_readers(&mut self, id: ImageId, mut pred: impl FnMut(u64) -> bool) {
        let readers: Vec<ImageId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.reads(id, &mut pred))
            .map(|(reader, _)| reader)
            .collect();
        for reader in readers {
            self.invalidate(reader);
        }
    }

    /// Marks the image for resolution, along with everything that
    /// transitively read it.
    fn invalidate(&mut self, id: ImageId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let entry = match self.entries.get_mut(id) {
                Some(entry) if !entry.needs_resolve && entry.ty == ImageType::Regular => entry,
                _ => continue,
            };
            log::warn!("{} can no longer be replayed and will be read back", entry.texture);
            entry.needs_resolve = true;
            entry.history.clear();
            pending.extend(
                self.entries
                    .iter()
                    .filter(|(_, other)| other.reads(id, |_| true))
                    .map(|(reader, _)| reader),
            );
        }
    }
}

/// Reads `region` of a texture straight from the GPU.
fn read_back(
    manager: &mut CommandQueueManager,
    thread: &RenderThread,
    texture: TextureId,
    region: Rect,
) -> Result<Vec<u8>> {
    let (reply, result) = flume::bounded(1);
    manager.queue().enqueue(Command::ReadPixels {
        src: texture,
        region,
        reply,
    });
    manager.flush(thread, false)?;
    result.recv().map_err(|_| Error::RenderThreadGone)
}
