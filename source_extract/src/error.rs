//! Error types for the extraction pipeline.
//!
//! Only conditions that abort a session are errors. Truncation at region
//! edges and degenerate deblending ladders are ordinary outcomes and are
//! recorded on the objects themselves (see [`crate::detection::ObjectFlags`]).

use std::fmt;

use thiserror::Error;

/// Bounded resource that ran out during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Pixel nodes in a [`crate::pixel_list::PixelArena`].
    PixelArena,
    /// Open-component slots in the labeling buffers.
    LabelingBuffers,
    /// Simultaneous child candidates on one deblending level.
    DeblendCandidates,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Resource::PixelArena => write!(f, "pixel arena"),
            Resource::LabelingBuffers => write!(f, "labeling buffers"),
            Resource::DeblendCandidates => write!(f, "deblend candidates"),
        }
    }
}

/// Errors surfaced by the extraction pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// A bounded pool was exhausted. Re-run with larger bounds.
    #[error("{resource} exhausted: {requested} requested, capacity {capacity}")]
    OutOfCapacity {
        /// Which pool ran out.
        resource: Resource,
        /// Size that was needed.
        requested: usize,
        /// Configured bound.
        capacity: usize,
    },

    /// The caller supplied inconsistent bounds or shapes.
    #[error("malformed sub-region: {0}")]
    MalformedSubRegion(String),

    /// Filter kernel cannot be applied.
    #[error("invalid kernel: {rows}x{cols} (dimensions must be odd and non-zero)")]
    InvalidKernel {
        /// Kernel height.
        rows: usize,
        /// Kernel width.
        cols: usize,
    },

    /// Configuration values out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ExtractError {
    /// Shorthand for an arena overflow.
    pub(crate) fn arena_full(requested: usize, capacity: usize) -> Self {
        ExtractError::OutOfCapacity {
            resource: Resource::PixelArena,
            requested,
            capacity,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ExtractError>;
