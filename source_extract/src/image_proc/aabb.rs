//! Axis-aligned bounding boxes in image coordinates.
//!
//! Bounds are inclusive. A freshly created box is empty (min > max) and
//! becomes valid once the first point is added with
//! [`BoundingBox::expand_to_include`].

/// Inclusive pixel bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    /// Minimum column (inclusive)
    pub xmin: u32,
    /// Maximum column (inclusive)
    pub xmax: u32,
    /// Minimum row (inclusive)
    pub ymin: u32,
    /// Maximum row (inclusive)
    pub ymax: u32,
}

impl BoundingBox {
    /// Create an empty box with inverted bounds.
    pub fn new() -> Self {
        Self {
            xmin: u32::MAX,
            xmax: 0,
            ymin: u32::MAX,
            ymax: 0,
        }
    }

    /// Create a box from explicit inclusive bounds.
    pub fn from_coords(xmin: u32, ymin: u32, xmax: u32, ymax: u32) -> Self {
        Self {
            xmin,
            xmax,
            ymin,
            ymax,
        }
    }

    /// True until a point has been added.
    pub fn is_empty(&self) -> bool {
        self.xmin > self.xmax || self.ymin > self.ymax
    }

    /// Grow the box to contain `(x, y)`.
    #[inline]
    pub fn expand_to_include(&mut self, x: u32, y: u32) {
        self.xmin = self.xmin.min(x);
        self.xmax = self.xmax.max(x);
        self.ymin = self.ymin.min(y);
        self.ymax = self.ymax.max(y);
    }

    pub fn width(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.xmax - self.xmin) as usize + 1
        }
    }

    pub fn height(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.ymax - self.ymin) as usize + 1
        }
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.xmin && x <= self.xmax && y >= self.ymin && y <= self.ymax
    }

    /// Row-major offset of `(x, y)` inside the box.
    ///
    /// Returns `None` for points outside the box.
    #[inline]
    pub fn offset_of(&self, x: u32, y: u32) -> Option<usize> {
        self.contains(x, y)
            .then(|| (y - self.ymin) as usize * self.width() + (x - self.xmin) as usize)
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::new()
    }
}
