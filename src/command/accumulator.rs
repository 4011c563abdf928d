use crate::graphics::{MAX_VERTEX_COUNT, VERTEX_FLOAT_COUNT};

/// Flat vertex and index buffers for one flush cycle.
///
/// The buffers are split into generations. Each generation is
/// uploaded to the backend on its own, so indices are relative
/// to the start of their generation and a generation never holds
/// more than `max_vertex_count` vertices.
#[derive(Debug)]
pub struct VertexAccumulator {
    vertices: Vec<f32>,
    indices: Vec<u32>,
    /// Floats in the current generation.
    generation_floats: usize,
    max_vertex_count: usize,
}

impl Default for VertexAccumulator {
    fn default() -> Self {
        Self::new(MAX_VERTEX_COUNT)
    }
}

impl VertexAccumulator {
    pub fn new(max_vertex_count: usize) -> Self {
        assert!(
            max_vertex_count > 0 && max_vertex_count <= MAX_VERTEX_COUNT,
            "max vertex count must be in 1..={}",
            MAX_VERTEX_COUNT
        );
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            generation_floats: 0,
            max_vertex_count,
        }
    }

    pub fn max_vertex_count(&self) -> usize {
        self.max_vertex_count
    }

    pub fn max_vertex_float_count(&self) -> usize {
        self.max_vertex_count * VERTEX_FLOAT_COUNT
    }

    /// Returns whether adding `additional_vertex_count` vertices
    /// would overflow the current generation.
    pub fn must_split(&self, additional_vertex_count: usize) -> bool {
        self.generation_floats / VERTEX_FLOAT_COUNT + additional_vertex_count
            > self.max_vertex_count
    }

    /// Appends vertices verbatim and indices shifted by `index_offset`.
    pub fn append(&mut self, vertices: &[f32], indices: &[u32], index_offset: u32) {
        self.vertices.extend_from_slice(vertices);
        self.indices.extend(indices.iter().map(|i| i + index_offset));
        self.generation_floats += vertices.len();
    }

    /// Appends a draw's geometry, starting a new generation first if it
    /// does not fit in the current one. Returns whether a split happened.
    pub fn push(&mut self, vertices: &[f32], indices: &[u32]) -> bool {
        debug_assert_eq!(vertices.len() % VERTEX_FLOAT_COUNT, 0);
        let split = self.must_split(vertices.len() / VERTEX_FLOAT_COUNT);
        if split {
            self.generation_floats = 0;
        }
        let offset = (self.generation_floats / VERTEX_FLOAT_COUNT) as u32;
        self.append(vertices, indices, offset);
        split
    }

    pub fn vertices(&self) -> &[f32] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.generation_floats = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertices(count: usize) -> Vec<f32> {
        vec![0.; count * VERTEX_FLOAT_COUNT]
    }

    #[test]
    fn indices_are_offset_within_a_generation() {
        let mut acc = VertexAccumulator::default();
        assert!(!acc.push(&vertices(4), &[0, 1, 2, 1, 2, 3]));
        assert!(!acc.push(&vertices(4), &[0, 1, 2, 1, 2, 3]));
        assert_eq!(&acc.indices()[6..], &[4, 5, 6, 5, 6, 7]);
        assert_eq!(acc.vertices().len(), 8 * VERTEX_FLOAT_COUNT);
    }

    #[test]
    fn split_resets_offset() {
        let mut acc = VertexAccumulator::new(6);
        assert!(!acc.push(&vertices(4), &[0, 1, 2]));
        assert!(acc.must_split(4));
        assert!(!acc.must_split(2));
        assert!(acc.push(&vertices(4), &[0, 1, 2]));
        assert_eq!(&acc.indices()[3..], &[0, 1, 2]);
        // The new generation continues accumulating from zero.
        assert!(!acc.push(&vertices(2), &[0, 1]));
        assert_eq!(&acc.indices()[6..], &[4, 5]);
    }

    #[test]
    fn append_adds_explicit_offset() {
        let mut acc = VertexAccumulator::default();
        acc.append(&vertices(1), &[0, 2], 10);
        assert_eq!(acc.indices(), &[10, 12]);
    }

    #[test]
    fn clear_starts_fresh() {
        let mut acc = VertexAccumulator::new(4);
        acc.push(&vertices(4), &[0]);
        acc.clear();
        assert!(acc.is_empty());
        assert!(!acc.must_split(4));
    }
}
