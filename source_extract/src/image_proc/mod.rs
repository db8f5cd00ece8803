//! Image-side front-end: regions, row windows and kernel filtering.

pub mod aabb;
pub mod filter;
pub mod region;
pub mod row_window;

pub use aabb::BoundingBox;
pub use filter::{default_kernel, gaussian_kernel, EdgeMode, Filter, NoiseKind};
pub use region::{ImageEdges, SubRegion};
pub use row_window::{as_f32, ArrayRows, ConstantRows, MaskedRows, RowSource, RowWindow};
