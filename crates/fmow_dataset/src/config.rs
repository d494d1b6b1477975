//! Typed project parameters, loaded from TOML.

use crate::transform::TransformConfig;
use crate::types::{DatasetResult, FmowDatasetError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_NAME: &str = "fmow.toml";
pub const DEFAULT_TRAIN_CAP: usize = 50_000;
pub const DEFAULT_CROP_BUFFER: u32 = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FmowConfig {
    /// Dataset root holding `train/` and `test/`.
    pub dataset: PathBuf,
    /// Label space: a box's label is its category's position in this list.
    pub fmow_class_names_mini: Vec<String>,
    /// Full fMoW category list. Kept for reference; labels never use it.
    #[serde(default)]
    pub fmow_class_names: Vec<String>,
    /// Upper bound on the number of train samples kept after subsampling.
    #[serde(default = "default_train_cap")]
    pub train_cap: usize,
    /// Margin in pixels added on every side of a box before cropping.
    #[serde(default = "default_crop_buffer")]
    pub crop_buffer: u32,
    /// Seed for train subsampling; drawn from the OS when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub transform: TransformConfig,
}

fn default_train_cap() -> usize {
    DEFAULT_TRAIN_CAP
}

fn default_crop_buffer() -> u32 {
    DEFAULT_CROP_BUFFER
}

impl FmowConfig {
    pub fn new(dataset: impl Into<PathBuf>, fmow_class_names_mini: Vec<String>) -> Self {
        Self {
            dataset: dataset.into(),
            fmow_class_names_mini,
            fmow_class_names: Vec::new(),
            train_cap: DEFAULT_TRAIN_CAP,
            crop_buffer: DEFAULT_CROP_BUFFER,
            seed: None,
            transform: TransformConfig::default(),
        }
    }

    /// Load from `$FMOW_CONFIG`, falling back to `fmow.toml` in the working directory.
    pub fn load() -> DatasetResult<Self> {
        match std::env::var("FMOW_CONFIG") {
            Ok(path) => Self::from_path(Path::new(&path)),
            Err(_) => Self::from_path(Path::new(DEFAULT_CONFIG_NAME)),
        }
    }

    pub fn from_path(path: &Path) -> DatasetResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| FmowDatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut cfg: FmowConfig = toml::from_str(&raw).map_err(|e| FmowDatasetError::Toml {
            path: path.to_path_buf(),
            source: e,
        })?;
        if let Some(raw_root) = cfg.dataset.to_str() {
            cfg.dataset = expand_path(raw_root);
        }
        Ok(cfg)
    }

    /// Checks run once by every index/dataset constructor.
    pub fn validate(&self) -> DatasetResult<()> {
        if !self.dataset.is_dir() {
            return Err(FmowDatasetError::Config(format!(
                "dataset root {} is not a directory",
                self.dataset.display()
            )));
        }
        if self.fmow_class_names_mini.is_empty() {
            return Err(FmowDatasetError::Config(
                "fmow_class_names_mini is empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for name in &self.fmow_class_names_mini {
            if name.trim().is_empty() {
                return Err(FmowDatasetError::Config(
                    "fmow_class_names_mini contains an empty name".to_string(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(FmowDatasetError::Config(format!(
                    "fmow_class_names_mini lists {name:?} twice"
                )));
            }
        }
        if self.train_cap == 0 {
            return Err(FmowDatasetError::Config("train_cap must be > 0".to_string()));
        }
        self.transform.validate()
    }

    pub fn train_root(&self) -> PathBuf {
        self.dataset.join("train")
    }

    pub fn test_root(&self) -> PathBuf {
        self.dataset.join("test")
    }

    pub fn category_index(&self, category: &str) -> Option<usize> {
        self.fmow_class_names_mini.iter().position(|c| c == category)
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

fn expand_env(input: &str) -> String {
    let mut out = String::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&format!("${{{key}}}")),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
