//! Rectangular scan regions and their boundary policy.
//!
//! A region is either the whole frame or one tile of it. Whether a
//! component touching a region edge is truncated (the edge is a real image
//! edge) or merely crosses into a neighbouring tile is decided by the
//! caller when the region is built; the labeling engine only records which
//! kind of edge was touched.

use std::fmt;

use bitflags::bitflags;

use super::aabb::BoundingBox;
use crate::detection::ObjectFlags;
use crate::error::{ExtractError, Result};

bitflags! {
    /// Region sides that coincide with the physical image boundary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageEdges: u8 {
        /// Column `x0`
        const LEFT = 1 << 0;
        /// Column `x0 + width - 1`
        const RIGHT = 1 << 1;
        /// Row `y0` (the scan starts here)
        const BOTTOM = 1 << 2;
        /// Row `y0 + height - 1`
        const TOP = 1 << 3;
    }
}

/// A rectangle of the image handed to the labeling engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRegion {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
    /// Which sides are true image edges.
    pub edges: ImageEdges,
}

impl SubRegion {
    /// Build a region, rejecting empty or overflowing rectangles.
    pub fn new(x0: usize, y0: usize, width: usize, height: usize, edges: ImageEdges) -> Result<Self> {
        let region = Self {
            x0,
            y0,
            width,
            height,
            edges,
        };
        region.validate()?;
        Ok(region)
    }

    /// The whole image; every side is a true edge.
    pub fn full_frame(width: usize, height: usize) -> Result<Self> {
        Self::new(0, 0, width, height, ImageEdges::all())
    }

    /// One tile of a `image_width` x `image_height` frame.
    ///
    /// Sides that coincide with the frame are marked as true edges, the
    /// others as tiling boundaries.
    pub fn tile(
        x0: usize,
        y0: usize,
        width: usize,
        height: usize,
        image_width: usize,
        image_height: usize,
    ) -> Result<Self> {
        if x0 + width > image_width || y0 + height > image_height {
            return Err(ExtractError::MalformedSubRegion(format!(
                "tile {width}x{height}+{x0}+{y0} exceeds image {image_width}x{image_height}"
            )));
        }
        let mut edges = ImageEdges::empty();
        edges.set(ImageEdges::LEFT, x0 == 0);
        edges.set(ImageEdges::BOTTOM, y0 == 0);
        edges.set(ImageEdges::RIGHT, x0 + width == image_width);
        edges.set(ImageEdges::TOP, y0 + height == image_height);
        Self::new(x0, y0, width, height, edges)
    }

    /// Reject zero-area regions and coordinates outside the pixel index range.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ExtractError::MalformedSubRegion(format!(
                "zero-area region {self}"
            )));
        }
        let max = u32::MAX as usize;
        if self.x0.checked_add(self.width).map_or(true, |end| end > max)
            || self.y0.checked_add(self.height).map_or(true, |end| end > max)
        {
            return Err(ExtractError::MalformedSubRegion(format!(
                "region {self} exceeds the addressable pixel range"
            )));
        }
        Ok(())
    }

    pub fn x_end(&self) -> usize {
        self.x0 + self.width
    }

    pub fn y_end(&self) -> usize {
        self.y0 + self.height
    }

    /// Boundary flags for a pixel at column offset `col` of row `y`.
    #[inline]
    pub fn pixel_flags(&self, col: usize, y: usize) -> ObjectFlags {
        let mut touched = ImageEdges::empty();
        touched.set(ImageEdges::LEFT, col == 0);
        touched.set(ImageEdges::RIGHT, col + 1 == self.width);
        touched.set(ImageEdges::BOTTOM, y == self.y0);
        touched.set(ImageEdges::TOP, y + 1 == self.y_end());
        self.classify(touched)
    }

    /// Boundary flags for a component with bounding box `bbox`.
    pub fn boundary_flags(&self, bbox: &BoundingBox) -> ObjectFlags {
        if bbox.is_empty() {
            return ObjectFlags::empty();
        }
        let mut touched = ImageEdges::empty();
        touched.set(ImageEdges::LEFT, bbox.xmin as usize <= self.x0);
        touched.set(ImageEdges::RIGHT, bbox.xmax as usize + 1 >= self.x_end());
        touched.set(ImageEdges::BOTTOM, bbox.ymin as usize <= self.y0);
        touched.set(ImageEdges::TOP, bbox.ymax as usize + 1 >= self.y_end());
        self.classify(touched)
    }

    fn classify(&self, touched: ImageEdges) -> ObjectFlags {
        let mut flags = ObjectFlags::empty();
        if touched.intersects(self.edges) {
            flags |= ObjectFlags::TRUNCATED;
        }
        if !(touched - self.edges).is_empty() {
            flags |= ObjectFlags::TILE_EDGE;
        }
        flags
    }
}

impl fmt::Display for SubRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x0, self.y0)
    }
}
