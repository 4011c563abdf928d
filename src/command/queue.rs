use std::sync::Arc;

use glam::{vec2, Vec2};

use crate::{
    backend::{Backend, Blend, DstRegion, FillRule, TextureId, WritePixelsArgs},
    error::Error,
    graphics::{SHADER_SRC_IMAGE_COUNT, VERTEX_FLOAT_COUNT},
    rect::Rect,
    shader::Shader,
};

use super::{
    accumulator::VertexAccumulator,
    pool::DrawCommandPool,
    uniforms::{preserved_uniforms, UniformArena},
    Command, DrawTrianglesCommand, TextureInfo,
};

type Finalizer = Box<dyn FnOnce() + Send>;

/// Commands and geometry waiting to be flushed to a backend.
///
/// Owned by exactly one thread at a time: the producer fills the
/// current queue, then hands it to the render thread to flush.
pub struct CommandQueue {
    accumulator: VertexAccumulator,
    commands: Vec<Command>,
    uniforms: UniformArena,
    draw_commands: Arc<DrawCommandPool>,
    finalizers: Vec<Finalizer>,
    /// First error of a failed asynchronous flush.
    err: Option<Error>,
}

fn bounds(vertices: &[f32]) -> (Vec2, Vec2) {
    let mut min = Vec2::splat(f32::INFINITY);
    let mut max = Vec2::splat(f32::NEG_INFINITY);
    for v in vertices.chunks_exact(VERTEX_FLOAT_COUNT) {
        let p = vec2(v[0], v[1]);
        min = min.min(p);
        max = max.max(p);
    }
    (min, max)
}

fn bounds_overlap(a: (Vec2, Vec2), b: (Vec2, Vec2)) -> bool {
    a.0.x < b.1.x && b.0.x < a.1.x && a.0.y < b.1.y && b.0.y < a.1.y
}

impl CommandQueue {
    pub(crate) fn new(max_vertex_count: usize, draw_commands: Arc<DrawCommandPool>) -> Self {
        Self {
            accumulator: VertexAccumulator::new(max_vertex_count),
            commands: Vec::new(),
            uniforms: UniformArena::default(),
            draw_commands,
            finalizers: Vec::new(),
            err: None,
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Whether flushing this queue must block the producer.
    pub fn needs_sync(&self) -> bool {
        self.commands.iter().any(Command::needs_sync)
    }

    pub fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    pub(crate) fn set_error(&mut self, err: Error) {
        self.err.get_or_insert(err);
    }

    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.err.take()
    }

    /// Queues a draw, merging it into the previous draw when possible.
    ///
    /// `uniforms` holds the user uniforms only; the preserved block
    /// is computed here.
    ///
    /// # Panics
    /// Panics if `vertices` holds more floats than one vertex buffer
    /// generation can address, or if `uniforms` is longer than the
    /// shader declares.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_draw_triangles(
        &mut self,
        dst: TextureInfo,
        srcs: [Option<TextureInfo>; SHADER_SRC_IMAGE_COUNT],
        vertices: &[f32],
        indices: &[u32],
        blend: Blend,
        dst_region: Rect,
        src_regions: [Rect; SHADER_SRC_IMAGE_COUNT],
        shader: &Shader,
        uniforms: &[u32],
        fill_rule: FillRule,
    ) {
        let max_floats = self.accumulator.max_vertex_float_count();
        assert!(
            vertices.len() <= max_floats,
            "the number of vertex floats ({}) exceeds the maximum ({})",
            vertices.len(),
            max_floats
        );
        let desc = shader.desc();
        let user_dwords = desc.user_uniform_dword_count();
        assert!(
            uniforms.len() <= user_dwords,
            "shader declares {} uniform dwords but {} were given",
            user_dwords,
            uniforms.len()
        );

        let split = self.accumulator.push(vertices, indices);

        let block = preserved_uniforms(dst, &srcs, dst_region, &src_regions, desc.unit());
        let range = self.uniforms.alloc(&block, uniforms, user_dwords);
        desc.filter_uniforms(self.uniforms.get_mut(range.clone()));

        let src_ids = srcs.map(|s| s.map(|s| s.id));
        let new_bounds = bounds(vertices);

        if !split {
            if let Some(Command::DrawTriangles(last)) = self.commands.last_mut() {
                // A draw that samples its destination must see the
                // results of the previous draw.
                let compatible = last.dst == dst.id
                    && !src_ids.contains(&Some(dst.id))
                    && last.srcs == src_ids
                    && last.shader == shader.id()
                    && last.blend == blend
                    && last.fill_rule == fill_rule
                    && self.uniforms.get(last.uniforms.clone()) == self.uniforms.get(range.clone())
                    && (fill_rule == FillRule::FillAll || !bounds_overlap(last.bounds, new_bounds));
                if compatible {
                    last.vertex_float_count += vertices.len();
                    last.bounds = (last.bounds.0.min(new_bounds.0), last.bounds.1.max(new_bounds.1));
                    match last.dst_regions.last_mut() {
                        Some(region) if region.region == dst_region => {
                            region.index_count += indices.len();
                        }
                        _ => last.dst_regions.push(DstRegion {
                            region: dst_region,
                            index_count: indices.len(),
                        }),
                    }
                    self.uniforms.truncate(range.start);
                    return;
                }
            }
        }

        let mut command = self.draw_commands.get();
        command.dst = dst.id;
        command.srcs = src_ids;
        command.shader = shader.id();
        command.blend = blend;
        command.fill_rule = fill_rule;
        command.dst_regions.clear();
        command.dst_regions.push(DstRegion {
            region: dst_region,
            index_count: indices.len(),
        });
        command.vertex_float_count = vertices.len();
        command.uniforms = range;
        command.bounds = new_bounds;
        self.commands.push(Command::DrawTriangles(command));
    }

    /// Queues a pixel upload. `None` clears the region.
    ///
    /// Consecutive uploads to the same texture share one command.
    pub fn enqueue_write_pixels(&mut self, dst: TextureId, region: Rect, pixels: Option<Vec<u8>>) {
        let arg = WritePixelsArgs { region, pixels };
        if let Some(Command::WritePixels { dst: last, args }) = self.commands.last_mut() {
            if *last == dst {
                args.push(arg);
                return;
            }
        }
        self.commands.push(Command::WritePixels {
            dst,
            args: vec![arg],
        });
    }

    /// Queues any other command.
    pub fn enqueue(&mut self, command: Command) {
        if let Command::WritePixels { dst, args } = command {
            for arg in args {
                self.enqueue_write_pixels(dst, arg.region, arg.pixels);
            }
            return;
        }
        self.commands.push(command);
    }

    /// Registers a callback to run on the render thread after the next
    /// frame-boundary flush.
    pub fn add_finalizer(&mut self, f: impl FnOnce() + Send + 'static) {
        self.finalizers.push(Box::new(f));
    }

    /// Takes over the finalizers of a queue about to be flushed
    /// without ending the frame.
    pub(crate) fn adopt_finalizers(&mut self, from: &mut CommandQueue) {
        self.finalizers.append(&mut from.finalizers);
    }

    /// Executes every queued command against `backend`.
    ///
    /// Must run on the render thread. The queue is emptied whether or
    /// not execution succeeds.
    pub fn flush(&mut self, backend: &mut dyn Backend, end_frame: bool) -> Result<(), Error> {
        if self.commands.is_empty() && !end_frame {
            return Ok(());
        }
        log::debug!(
            "Flushing {} commands ({} vertex floats, end of frame: {})",
            self.commands.len(),
            self.accumulator.vertices().len(),
            end_frame
        );

        let result = self.execute(backend, end_frame);
        self.cleanup(end_frame);
        result
    }

    fn execute(&mut self, backend: &mut dyn Backend, end_frame: bool) -> Result<(), Error> {
        backend.begin()?;
        let result = self.execute_runs(backend);
        // Always close the frame, even when a command failed.
        let end = backend.end(end_frame);
        result?;
        end?;
        Ok(())
    }

    /// Executes commands in runs that each fit into one vertex buffer
    /// generation, uploading every run's geometry once.
    fn execute_runs(&self, backend: &mut dyn Backend) -> Result<(), Error> {
        let max_floats = self.accumulator.max_vertex_float_count();
        let vertices = self.accumulator.vertices();
        let indices = self.accumulator.indices();

        let (mut vertex_start, mut index_start) = (0, 0);
        let mut start = 0;
        while start < self.commands.len() {
            let (mut run_floats, mut run_indices) = (0, 0);
            let mut end = start;
            while let Some(command) = self.commands.get(end) {
                let floats = command.vertex_float_count();
                if end > start && run_floats + floats > max_floats {
                    break;
                }
                run_floats += floats;
                run_indices += command.index_count();
                end += 1;
            }

            if run_floats > 0 {
                backend.set_vertices(
                    &vertices[vertex_start..vertex_start + run_floats],
                    &indices[index_start..index_start + run_indices],
                )?;
            }

            // Offsets are relative to this run's index block and only
            // advance for commands that consume indices.
            let mut index_offset = 0;
            for command in &self.commands[start..end] {
                log::trace!("{}", command);
                command.exec(backend, &self.uniforms, index_offset)?;
                index_offset += command.index_count();
            }

            vertex_start += run_floats;
            index_start += run_indices;
            start = end;
        }
        Ok(())
    }

    fn cleanup(&mut self, end_frame: bool) {
        let draws = self.commands.drain(..).filter_map(|c| match c {
            Command::DrawTriangles(draw) => Some(draw),
            _ => None,
        });
        self.draw_commands.put(draws);
        self.accumulator.clear();
        if end_frame {
            for finalizer in self.finalizers.drain(..) {
                finalizer();
            }
            self.uniforms.reset();
        }
    }

    /// Drops every pending command without executing it.
    pub(crate) fn discard(&mut self) {
        if !self.commands.is_empty() {
            log::debug!("Discarding {} pending commands", self.commands.len());
        }
        self.cleanup(false);
        self.uniforms.reset();
    }
}
