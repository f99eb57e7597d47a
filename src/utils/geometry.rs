/// A size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    /// Width
    pub w: i32,
    /// Height
    pub h: i32,
}

impl Size {
    /// Create a new size
    pub const fn new(w: i32, h: i32) -> Self {
        Size { w, h }
    }

    /// Whether this size covers no pixels
    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }
}

impl From<(i32, i32)> for Size {
    fn from((w, h): (i32, i32)) -> Self {
        Size { w, h }
    }
}

/// An axis-aligned rectangle, origin in the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rectangle {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width
    pub width: i32,
    /// Height
    pub height: i32,
}

impl Rectangle {
    /// Create a rectangle from its location and size
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Rectangle { x, y, width, height }
    }

    /// A rectangle at the origin covering `size`
    pub const fn from_size(size: Size) -> Self {
        Rectangle {
            x: 0,
            y: 0,
            width: size.w,
            height: size.h,
        }
    }

    /// Size of this rectangle
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Whether this rectangle covers no pixels
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Convert into a bottom-left origin for a framebuffer of the given height.
    ///
    /// GL window-system calls expect this orientation.
    pub fn flipped_y(&self, framebuffer_height: i32) -> Rectangle {
        Rectangle {
            y: framebuffer_height - self.y - self.height,
            ..*self
        }
    }

    /// Smallest rectangle containing both `self` and `other`
    pub fn merge(self, other: Rectangle) -> Rectangle {
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = (self.x + self.width).max(other.x + other.width);
        let y2 = (self.y + self.height).max(other.y + other.height);
        Rectangle::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Bounding box of a list of rectangles, `None` if the list is empty
    pub fn bounding_box(rects: impl IntoIterator<Item = Rectangle>) -> Option<Rectangle> {
        rects.into_iter().reduce(Rectangle::merge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_converts_to_bottom_left_origin() {
        let rect = Rectangle::new(10, 20, 30, 40);
        assert_eq!(rect.flipped_y(600), Rectangle::new(10, 540, 30, 40));
        // flipping twice is the identity
        assert_eq!(rect.flipped_y(600).flipped_y(600), rect);
    }

    #[test]
    fn bounding_box_covers_all_inputs() {
        let rects = [
            Rectangle::new(5, 5, 10, 10),
            Rectangle::new(-2, 8, 3, 1),
            Rectangle::new(20, 0, 1, 30),
        ];
        let bbox = Rectangle::bounding_box(rects).unwrap();
        assert_eq!(bbox, Rectangle::new(-2, 0, 23, 30));
        assert!(Rectangle::bounding_box(std::iter::empty()).is_none());
    }
}
