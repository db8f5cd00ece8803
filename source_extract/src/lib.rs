//! Source extraction for astronomical images.
//!
//! Connected regions above a detection threshold are found in one upward
//! raster pass (Lutz labeling), split into distinct sources by re-labeling
//! each region over a ladder of thresholds (deblending), and summarised into
//! object records. Detections swamped by a brighter neighbour's profile are
//! cleaned away. Pixels of every object live in a pooled, index-linked
//! arena whose record shape is picked once per run.
//!
//! ```no_run
//! use source_extract::{extract, ExtractionConfig, Noise};
//! use ndarray::Array2;
//!
//! let image = Array2::<f32>::zeros((64, 64));
//! let config = ExtractionConfig::absolute(5.0);
//! let objects = extract(image.view(), Noise::None, &config).unwrap();
//! for object in objects.objects() {
//!     println!("{:.2} {:.2} {}", object.mx, object.my, object.flux);
//! }
//! ```

pub mod config;
pub mod detection;
pub mod error;
pub mod image_proc;
pub mod pixel_list;

pub use config::{DeblendConfig, ExtractionConfig, FilterConfig, ThresholdMode};
pub use detection::{
    extract, extract_masked, extract_region, extract_rows, extract_rows_masked, AnyObjectList, Noise,
    Object, ObjectFlags, ObjectList,
};
pub use error::{ExtractError, Resource, Result};
pub use image_proc::{EdgeMode, NoiseKind, SubRegion};
pub use pixel_list::{PixelArena, PixelSchema};
