use glam::UVec2;

use crate::rect::Rect;

/// CPU-side RGBA8 copy of an image's contents at the point its
/// recorded history begins.
///
/// The buffer is allocated on first write; until then the image is
/// considered fully transparent.
#[derive(Debug, Clone, Default)]
pub struct BasePixels {
    size: UVec2,
    data: Option<Vec<u8>>,
}

impl BasePixels {
    pub fn new(size: UVec2) -> Self {
        Self { size, data: None }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    fn data_mut(&mut self) -> &mut Vec<u8> {
        let len = self.size.x as usize * self.size.y as usize * 4;
        self.data.get_or_insert_with(|| vec![0; len])
    }

    /// Replaces the whole buffer.
    pub fn replace(&mut self, pixels: Vec<u8>) {
        debug_assert_eq!(pixels.len(), self.size.x as usize * self.size.y as usize * 4);
        self.data = Some(pixels);
    }

    /// Copies `pixels` into `region`, or zeroes it when `pixels` is `None`.
    pub fn write(&mut self, region: Rect, pixels: Option<&[u8]>) {
        let stride = self.size.x as usize * 4;
        let row_len = region.width() as usize * 4;
        let data = self.data_mut();
        for row in 0..region.height() as usize {
            let start = (region.pos.y as usize + row) * stride + region.pos.x as usize * 4;
            let dst = &mut data[start..start + row_len];
            match pixels {
                Some(pixels) => dst.copy_from_slice(&pixels[row * row_len..(row + 1) * row_len]),
                None => dst.fill(0),
            }
        }
    }

    /// Copies `region` into `dst`. Unallocated pixels read as zero.
    pub fn read(&self, region: Rect, dst: &mut [u8]) {
        let data = match &self.data {
            Some(data) => data,
            None => {
                dst.fill(0);
                return;
            }
        };
        let stride = self.size.x as usize * 4;
        let row_len = region.width() as usize * 4;
        for row in 0..region.height() as usize {
            let start = (region.pos.y as usize + row) * stride + region.pos.x as usize * 4;
            dst[row * row_len..(row + 1) * row_len].copy_from_slice(&data[start..start + row_len]);
        }
    }

    /// Grows the buffer, keeping existing pixels at the top-left corner.
    pub fn extend(&mut self, size: UVec2) {
        let old_size = self.size;
        self.size = size;
        if let Some(old) = self.data.take() {
            self.write(Rect::from_size(old_size), Some(&old));
        }
    }
}
