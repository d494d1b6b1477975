//! Core types, error definitions, and data structures for fmow_dataset.

use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, FmowDatasetError>;

#[derive(Debug, Error)]
pub enum FmowDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("config parse error at {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Config(String),
    #[error("category {category:?} from {path} is not in fmow_class_names_mini")]
    UnknownCategory { category: String, path: PathBuf },
    #[error("no bounding boxes in {path}")]
    NoBoundingBox { path: PathBuf },
    #[error("box position {position} out of range for {path} ({count} boxes)")]
    BoxOutOfRange {
        path: PathBuf,
        position: usize,
        count: usize,
    },
    #[error("crop {rect:?} is empty for {path} (image {height}x{width})")]
    EmptyCrop {
        path: PathBuf,
        rect: [i64; 4],
        height: usize,
        width: usize,
    },
    #[error("sample index {index} out of range for dataset of {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("{transform} expects {expected:?} layout, got {found:?}")]
    Layout {
        transform: &'static str,
        expected: Layout,
        found: Layout,
    },
    #[error("{transform}: {msg}")]
    Shape { transform: &'static str, msg: String },
}

/// Which half of the corpus a dataset was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

/// One annotated object inside a metadata sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxRecord {
    /// Pixel rectangle `[x, y, width, height]`.
    #[serde(rename = "box")]
    pub rect: [i64; 4],
    pub category: String,
}

impl BoxRecord {
    pub fn x(&self) -> i64 {
        self.rect[0]
    }
    pub fn y(&self) -> i64 {
        self.rect[1]
    }
    pub fn width(&self) -> i64 {
        self.rect[2]
    }
    pub fn height(&self) -> i64 {
        self.rect[3]
    }
}

/// `bounding_boxes` is written either as a bare record or as a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum BoundingBoxes {
    Many(Vec<BoxRecord>),
    One(BoxRecord),
}

impl BoundingBoxes {
    pub(crate) fn into_vec(self) -> Vec<BoxRecord> {
        match self {
            BoundingBoxes::Many(boxes) => boxes,
            BoundingBoxes::One(record) => vec![record],
        }
    }
}

// Internal type for JSON deserialization; every other sidecar field is ignored.
#[derive(Deserialize)]
pub(crate) struct MetadataEntry {
    pub(crate) bounding_boxes: BoundingBoxes,
}

/// How a sample picks its box out of the sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxSelector {
    /// Train samples always use the first box.
    First,
    /// Test samples carry the position of the box they were indexed from.
    At(usize),
}

impl BoxSelector {
    pub fn position(&self) -> usize {
        match self {
            BoxSelector::First => 0,
            BoxSelector::At(position) => *position,
        }
    }
}

/// Locator stored in a sample index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRef {
    pub image: PathBuf,
    pub selector: BoxSelector,
}

impl SampleRef {
    /// Sidecar path: same base name, `json` extension.
    pub fn metadata_path(&self) -> PathBuf {
        self.image.with_extension("json")
    }
}

impl fmt::Display for SampleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.selector {
            BoxSelector::First => write!(f, "{}", self.image.display()),
            BoxSelector::At(position) => write!(f, "{}:{}", self.image.display(), position),
        }
    }
}

/// Axis order of a sample image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    /// `(height, width, channel)`, as produced by extraction.
    Hwc,
    /// `(channel, height, width)`, as produced by `ToTensor`.
    Chw,
}

/// Image/label pair flowing through the transform chain.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Grayscale pixels; values start in `0..=255`.
    pub image: Array3<f32>,
    /// Single-element class index.
    pub label: Array1<i64>,
    pub layout: Layout,
}

impl Sample {
    pub fn new(image: Array3<f32>, label: i64) -> Self {
        Self {
            image,
            label: Array1::from_elem(1, label),
            layout: Layout::Hwc,
        }
    }

    /// Spatial `(height, width)` regardless of layout.
    pub fn spatial_dims(&self) -> (usize, usize) {
        let (a, b, c) = self.image.dim();
        match self.layout {
            Layout::Hwc => (a, b),
            Layout::Chw => (b, c),
        }
    }

    pub fn into_pair(self) -> (Array3<f32>, Array1<i64>) {
        (self.image, self.label)
    }
}

/// Clamped crop rectangle in row/column index space (half-open).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl CropRect {
    pub fn height(&self) -> usize {
        self.row_end - self.row_start
    }
    pub fn width(&self) -> usize {
        self.col_end - self.col_start
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryCount {
    /// Images found on disk (train) or boxes read from sidecars (test).
    pub discovered: usize,
    /// Entries that survived subsampling.
    pub kept: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSummary {
    pub split: Split,
    /// Number of index entries.
    pub samples: usize,
    /// Distinct image files behind those entries.
    pub images: usize,
    pub per_category: BTreeMap<String, CategoryCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Warn,
    Fail,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Pass => "pass",
            ValidationOutcome::Warn => "warn",
            ValidationOutcome::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub max_skipped: Option<usize>,
    pub max_skipped_ratio: Option<f32>,
    pub max_unknown_category: Option<usize>,
}

impl ValidationThresholds {
    pub fn from_env() -> Self {
        fn parse_usize(key: &str) -> Option<usize> {
            std::env::var(key).ok()?.parse().ok()
        }
        fn parse_ratio(key: &str) -> Option<f32> {
            std::env::var(key).ok()?.parse().ok()
        }
        ValidationThresholds {
            max_skipped: parse_usize("FMOW_DATASET_MAX_SKIPPED"),
            max_skipped_ratio: parse_ratio("FMOW_DATASET_MAX_SKIPPED_RATIO"),
            max_unknown_category: parse_usize("FMOW_DATASET_MAX_UNKNOWN_CATEGORY"),
        }
    }
}

/// Per-split counts gathered by [`crate::validation::scan_root`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitScan {
    pub images: usize,
    pub boxes: usize,
    pub missing_metadata: usize,
    pub invalid_metadata: usize,
    pub empty_boxes: usize,
    pub unknown_category: usize,
}

impl SplitScan {
    pub fn skipped(&self) -> usize {
        self.missing_metadata + self.invalid_metadata + self.empty_boxes
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetScan {
    pub train: SplitScan,
    pub test: SplitScan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub scan: DatasetScan,
}
