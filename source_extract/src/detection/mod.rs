//! Source detection: labeling, deblending and object statistics.
//!
//! # Module Organization
//!
//! - **lutz**: single-pass connected-component labeling with O(width) state
//! - **ladder**: threshold ladders for deblending
//! - **deblend**: multi-threshold tree build, cut and pixel gather-up
//! - **analyse**: moments, ellipse, fluxes and ladder depth
//! - **clean**: removal of detections swamped by a brighter neighbour
//! - **object**: object records, flags and the lists owning their pixels
//! - **extract**: the two-stage driver tying it together

pub mod analyse;
pub mod clean;
pub mod deblend;
pub mod extract;
pub mod ladder;
pub mod lutz;
pub mod object;

pub use analyse::{analyse, analyse_mthresh, mean_threshold, preanalyse, MthreshDecision, SkipReason};
pub use deblend::{
    cut_tree, ContrastReference, DeblendNode, DeblendOutcome, DeblendSession, PixelAllocation,
};
pub use clean::{clean, CLEAN_ZONE};
pub use extract::{
    extract, extract_masked, extract_region, extract_rows, extract_rows_masked, Noise, SessionLayout,
};
pub use ladder::LadderSpacing;
pub use lutz::{label_image, LutzBuffers, LutzComponent, LutzScan};
pub use object::{AnyObjectList, Object, ObjectFlags, ObjectList};
