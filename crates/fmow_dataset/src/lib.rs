//! Sample preparation for the Functional Map of the World corpus.
//!
//! This crate provides utilities for:
//! - Indexing the train split (per-category walk, capped random subsample)
//! - Indexing the test split (one sample per bounding box)
//! - Cropping each labeled box with a pixel margin and deriving its class label
//! - Chaining `Rescale`, `Normalize` and `ToTensor` over the cropped samples
//! - Checking a dataset tree for missing or malformed sidecars

// Module declarations
pub mod config;
pub mod dataset;
pub mod extract;
pub mod index;
pub mod transform;
pub mod types;
pub mod validation;

// Re-export public API
pub use config::FmowConfig;
pub use dataset::FmowDataset;
pub use extract::{crop_rect, extract, label_for, load_grayscale, load_metadata};
pub use index::{discover_images, rng_from_seed, SampleIndex, RGB_SUFFIX};
pub use transform::{
    NormStat, Normalize, NormalizeConfig, Rescale, ToTensor, Transform, TransformConfig,
    TransformPipeline, TransformPipelineBuilder,
};
pub use types::*;
pub use validation::{scan_root, validate_root, validate_scan};
