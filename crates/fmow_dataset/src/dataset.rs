//! Index access: `(image, label)` pairs with the transform chain applied.

use crate::config::FmowConfig;
use crate::extract::extract;
use crate::index::SampleIndex;
use crate::transform::TransformPipeline;
use crate::types::{DatasetResult, FmowDatasetError, Sample, SampleRef, Split};
use ndarray::{Array1, Array3};
use rand::Rng;

/// A built index plus everything needed to materialize its samples.
///
/// Holds no mutable state, so one instance can serve several loader threads.
#[derive(Debug, Clone)]
pub struct FmowDataset {
    cfg: FmowConfig,
    index: SampleIndex,
    transform: TransformPipeline,
}

impl FmowDataset {
    pub fn new(cfg: FmowConfig, index: SampleIndex, transform: TransformPipeline) -> Self {
        Self {
            cfg,
            index,
            transform,
        }
    }

    /// Train split with the chain described by `cfg.transform` and the RNG seeded from `cfg.seed`.
    pub fn train(cfg: FmowConfig) -> DatasetResult<Self> {
        let index = SampleIndex::build_train_from_config(&cfg)?;
        let transform = TransformPipeline::from_config(&cfg.transform);
        Ok(Self::new(cfg, index, transform))
    }

    pub fn train_with<R: Rng + ?Sized>(
        cfg: FmowConfig,
        rng: &mut R,
        transform: TransformPipeline,
    ) -> DatasetResult<Self> {
        let index = SampleIndex::build_train(&cfg, rng)?;
        Ok(Self::new(cfg, index, transform))
    }

    pub fn test(cfg: FmowConfig) -> DatasetResult<Self> {
        let transform = TransformPipeline::from_config(&cfg.transform);
        Self::test_with(cfg, transform)
    }

    pub fn test_with(cfg: FmowConfig, transform: TransformPipeline) -> DatasetResult<Self> {
        let index = SampleIndex::build_test(&cfg)?;
        Ok(Self::new(cfg, index, transform))
    }

    pub fn split(&self) -> Split {
        self.index.split()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn config(&self) -> &FmowConfig {
        &self.cfg
    }

    pub fn index(&self) -> &SampleIndex {
        &self.index
    }

    pub fn transform(&self) -> &TransformPipeline {
        &self.transform
    }

    pub fn locate(&self, index: usize) -> DatasetResult<&SampleRef> {
        self.index
            .get(index)
            .ok_or(FmowDatasetError::IndexOutOfRange {
                index,
                len: self.index.len(),
            })
    }

    /// Cropped grayscale sample before any transform.
    pub fn raw(&self, index: usize) -> DatasetResult<Sample> {
        extract(&self.cfg, self.locate(index)?)
    }

    /// Cropped sample with the transform chain applied.
    pub fn get(&self, index: usize) -> DatasetResult<Sample> {
        self.transform.apply(self.raw(index)?)
    }

    /// `get` split into the `(image, label)` pair handed to a training loop.
    pub fn get_pair(&self, index: usize) -> DatasetResult<(Array3<f32>, Array1<i64>)> {
        self.get(index).map(Sample::into_pair)
    }

    pub fn iter(&self) -> impl Iterator<Item = DatasetResult<Sample>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}
