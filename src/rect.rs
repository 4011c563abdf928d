use glam::{uvec2, UVec2, Vec2};

/// An integer rectangle in pixel space.
///
/// Used for destination and source regions, dirty
/// regions, and read/write windows.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// The position of the top-left corner
    /// of this rectangle.
    pub pos: UVec2,
    /// The side lengths of this rectangle.
    pub size: UVec2,
}

impl Rect {
    pub fn new(pos: UVec2, size: UVec2) -> Self {
        Self { pos, size }
    }

    pub fn from_xywh(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self::new(uvec2(x, y), uvec2(width, height))
    }

    /// The rectangle covering an entire image of the given size.
    pub fn from_size(size: UVec2) -> Self {
        Self::new(UVec2::ZERO, size)
    }

    /// The exclusive bottom-right corner.
    pub fn max(self) -> UVec2 {
        self.pos + self.size
    }

    pub fn width(self) -> u32 {
        self.size.x
    }

    pub fn height(self) -> u32 {
        self.size.y
    }

    pub fn area(self) -> usize {
        self.size.x as usize * self.size.y as usize
    }

    pub fn is_empty(self) -> bool {
        self.size.x == 0 || self.size.y == 0
    }

    /// Returns whether `other` lies entirely inside `self`.
    ///
    /// Empty rectangles are contained in everything.
    pub fn contains_rect(self, other: Rect) -> bool {
        if other.is_empty() {
            return true;
        }
        let (outer, inner) = (self.wide_max(), other.wide_max());
        other.pos.x >= self.pos.x
            && other.pos.y >= self.pos.y
            && inner.0 <= outer.0
            && inner.1 <= outer.1
    }

    /// The exclusive bottom-right corner, without overflow.
    fn wide_max(self) -> (u64, u64) {
        (
            u64::from(self.pos.x) + u64::from(self.size.x),
            u64::from(self.pos.y) + u64::from(self.size.y),
        )
    }

    pub fn overlaps(self, other: Rect) -> bool {
        !self.intersection(other).is_empty()
    }

    pub fn intersection(self, other: Rect) -> Rect {
        let min = self.pos.max(other.pos);
        let max = self.max().min(other.max());
        if max.x <= min.x || max.y <= min.y {
            return Rect::default();
        }
        Rect::new(min, max - min)
    }

    /// The smallest rectangle containing both.
    pub fn union(self, other: Rect) -> Rect {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let min = self.pos.min(other.pos);
        let max = self.max().max(other.max());
        Rect::new(min, max - min)
    }

    pub fn pos_f32(self) -> Vec2 {
        self.pos.as_vec2()
    }

    pub fn size_f32(self) -> Vec2 {
        self.size.as_vec2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_of_disjoint_rects_is_empty() {
        let a = Rect::from_xywh(0, 0, 2, 2);
        let b = Rect::from_xywh(2, 0, 2, 2);
        assert!(a.intersection(b).is_empty());
        assert!(!a.overlaps(b));
    }

    #[test]
    fn intersection_and_union() {
        let a = Rect::from_xywh(0, 0, 4, 4);
        let b = Rect::from_xywh(2, 1, 4, 4);
        assert_eq!(a.intersection(b), Rect::from_xywh(2, 1, 2, 3));
        assert_eq!(a.union(b), Rect::from_xywh(0, 0, 6, 5));
    }

    #[test]
    fn containment() {
        let outer = Rect::from_xywh(1, 1, 4, 4);
        assert!(outer.contains_rect(Rect::from_xywh(1, 1, 4, 4)));
        assert!(outer.contains_rect(Rect::from_xywh(2, 2, 1, 1)));
        assert!(!outer.contains_rect(Rect::from_xywh(0, 1, 2, 2)));
        assert!(outer.contains_rect(Rect::default()));
    }

    #[test]
    fn containment_near_the_numeric_limit() {
        let image = Rect::from_xywh(0, 0, 4, 4);
        assert!(!image.contains_rect(Rect::from_xywh(u32::MAX, 0, 2, 1)));
        assert!(!image.contains_rect(Rect::from_xywh(2, 2, u32::MAX, u32::MAX)));
    }
}
