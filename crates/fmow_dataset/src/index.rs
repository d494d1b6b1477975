//! Corpus discovery: build the immutable `index -> sample` maps for the train and test splits.

use crate::config::FmowConfig;
use crate::extract::load_metadata;
use crate::types::{
    BoxSelector, CategoryCount, DatasetResult, IndexSummary, SampleRef, Split,
};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File-name suffix of the RGB images the corpus ships.
pub const RGB_SUFFIX: &str = "_rgb.jpg";

/// Seeded when `seed` is set, otherwise drawn from the thread RNG.
pub fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

/// Recursively list `*_rgb.jpg` files under `dir` in file-name order.
///
/// Unreadable entries are skipped with a warning; a missing `dir` yields nothing.
pub fn discover_images(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        warn!("{} does not exist; indexing nothing from it", dir.display());
        return Vec::new();
    }
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping unreadable entry under {}: {err}", dir.display());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let is_rgb = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(RGB_SUFFIX));
        if is_rgb {
            found.push(entry.into_path());
        }
    }
    found
}

/// Dense `0..len` map from sample index to locator. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct SampleIndex {
    split: Split,
    entries: Vec<SampleRef>,
    summary: IndexSummary,
}

impl SampleIndex {
    /// Walk `<root>/train/<category>` for each configured category, then keep a uniform
    /// random subset of at most `train_cap` images, numbered in draw order.
    pub fn build_train<R: Rng + ?Sized>(cfg: &FmowConfig, rng: &mut R) -> DatasetResult<Self> {
        cfg.validate()?;
        let train_root = cfg.train_root();
        let mut discovered: Vec<(usize, PathBuf)> = Vec::new();
        let mut per_category: BTreeMap<String, CategoryCount> = BTreeMap::new();
        for (cat_idx, category) in cfg.fmow_class_names_mini.iter().enumerate() {
            let images = discover_images(&train_root.join(category));
            per_category.entry(category.clone()).or_default().discovered = images.len();
            discovered.extend(images.into_iter().map(|p| (cat_idx, p)));
        }

        let size = cfg.train_cap.min(discovered.len());
        let mut entries = Vec::with_capacity(size);
        if size > 0 {
            for pick in rand::seq::index::sample(rng, discovered.len(), size) {
                let (cat_idx, image) = &discovered[pick];
                let category = &cfg.fmow_class_names_mini[*cat_idx];
                per_category.entry(category.clone()).or_default().kept += 1;
                entries.push(SampleRef {
                    image: image.clone(),
                    selector: BoxSelector::First,
                });
            }
        }
        info!(
            "train index: kept {} of {} images (cap {})",
            entries.len(),
            discovered.len(),
            cfg.train_cap
        );

        let summary = IndexSummary {
            split: Split::Train,
            samples: entries.len(),
            images: entries.len(),
            per_category,
        };
        Ok(Self {
            split: Split::Train,
            entries,
            summary,
        })
    }

    /// [`Self::build_train`] with the RNG seeded from `cfg.seed`.
    pub fn build_train_from_config(cfg: &FmowConfig) -> DatasetResult<Self> {
        let mut rng = rng_from_seed(cfg.seed);
        Self::build_train(cfg, &mut rng)
    }

    /// One entry per bounding box of every test image with a readable sidecar.
    pub fn build_test(cfg: &FmowConfig) -> DatasetResult<Self> {
        cfg.validate()?;
        let mut entries = Vec::new();
        let mut per_category: BTreeMap<String, CategoryCount> = BTreeMap::new();
        let mut images = 0usize;
        for image in discover_images(&cfg.test_root()) {
            let metadata_path = image.with_extension("json");
            let boxes = match load_metadata(&metadata_path) {
                Ok(boxes) => boxes,
                Err(err) => {
                    warn!("skipping {}: {err}", image.display());
                    continue;
                }
            };
            if !boxes.is_empty() {
                images += 1;
            }
            for (position, record) in boxes.iter().enumerate() {
                let count = per_category.entry(record.category.clone()).or_default();
                count.discovered += 1;
                count.kept += 1;
                entries.push(SampleRef {
                    image: image.clone(),
                    selector: BoxSelector::At(position),
                });
            }
        }
        info!("test index: {} boxes across {} images", entries.len(), images);

        let summary = IndexSummary {
            split: Split::Test,
            samples: entries.len(),
            images,
            per_category,
        };
        Ok(Self {
            split: Split::Test,
            entries,
            summary,
        })
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SampleRef> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleRef> {
        self.entries.iter()
    }

    pub fn summary(&self) -> &IndexSummary {
        &self.summary
    }

    /// Distinct image files referenced by the index.
    pub fn distinct_images(&self) -> BTreeSet<&Path> {
        self.entries.iter().map(|e| e.image.as_path()).collect()
    }
}
