//! Sample preprocessing: `Rescale`, `Normalize`, `ToTensor` and the pipeline that chains them.

use crate::types::{DatasetResult, FmowDatasetError, Layout, Sample};
use image::imageops::FilterType;
use image::{ImageBuffer, Luma};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// `[transform]` section of the project config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Resize target as `(height, width)`.
    #[serde(default)]
    pub rescale: Option<(u32, u32)>,
    #[serde(default)]
    pub normalize: Option<NormalizeConfig>,
    #[serde(default)]
    pub to_tensor: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NormalizeConfig {
    pub mean: f32,
    pub std: f32,
}

impl TransformConfig {
    pub fn validate(&self) -> DatasetResult<()> {
        if let Some((h, w)) = self.rescale {
            if h == 0 || w == 0 {
                return Err(FmowDatasetError::Config(format!(
                    "transform.rescale must be positive, got ({h}, {w})"
                )));
            }
        }
        if let Some(norm) = self.normalize {
            if !norm.mean.is_finite() || !norm.std.is_finite() || norm.std == 0.0 {
                return Err(FmowDatasetError::Config(format!(
                    "transform.normalize needs finite mean and non-zero std, got {norm:?}"
                )));
            }
        }
        Ok(())
    }
}

/// One step of the chain. Implementations hold no per-call state.
pub trait Transform: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, sample: Sample) -> DatasetResult<Sample>;
}

fn expect_hwc(transform: &'static str, sample: &Sample) -> DatasetResult<()> {
    if sample.layout != Layout::Hwc {
        return Err(FmowDatasetError::Layout {
            transform,
            expected: Layout::Hwc,
            found: sample.layout,
        });
    }
    Ok(())
}

/// Resize the image to exactly `(height, width)` with bilinear filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rescale {
    pub height: u32,
    pub width: u32,
}

impl Rescale {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }
}

impl Transform for Rescale {
    fn name(&self) -> &'static str {
        "Rescale"
    }

    fn apply(&self, sample: Sample) -> DatasetResult<Sample> {
        expect_hwc(self.name(), &sample)?;
        let (h, w, c) = sample.image.dim();
        if c != 1 {
            return Err(FmowDatasetError::Shape {
                transform: self.name(),
                msg: format!("expected a single channel, got {c}"),
            });
        }
        if h == 0 || w == 0 || self.height == 0 || self.width == 0 {
            return Err(FmowDatasetError::Shape {
                transform: self.name(),
                msg: format!("cannot resize {h}x{w} to {}x{}", self.height, self.width),
            });
        }

        // imageops clamps f32 subpixels to [0, 1]; resample in that range and map back.
        let lo = sample.image.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = sample.image.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let span = if hi > lo { hi - lo } else { 1.0 };
        let pixels: Vec<f32> = sample.image.iter().map(|v| (v - lo) / span).collect();
        let buffer = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(w as u32, h as u32, pixels)
            .ok_or_else(|| FmowDatasetError::Shape {
                transform: self.name(),
                msg: format!("pixel buffer does not match {h}x{w}"),
            })?;
        let resized =
            image::imageops::resize(&buffer, self.width, self.height, FilterType::Triangle);
        let raw: Vec<f32> = resized.into_raw().into_iter().map(|v| v * span + lo).collect();

        let image = Array3::from_shape_vec((self.height as usize, self.width as usize, 1), raw)
            .map_err(|e| FmowDatasetError::Shape {
                transform: self.name(),
                msg: e.to_string(),
            })?;
        Ok(Sample { image, ..sample })
    }
}

/// Scalar or per-pixel statistic used by [`Normalize`].
#[derive(Debug, Clone, PartialEq)]
pub enum NormStat {
    Scalar(f32),
    /// Must broadcast to the image's `(height, width, 1)` shape.
    Array(Array3<f32>),
}

/// `(pixel - mean) / std` over the whole image.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalize {
    pub mean: NormStat,
    pub std: NormStat,
}

impl Normalize {
    pub fn new(mean: f32, std: f32) -> Self {
        Self {
            mean: NormStat::Scalar(mean),
            std: NormStat::Scalar(std),
        }
    }

    pub fn per_pixel(mean: Array3<f32>, std: Array3<f32>) -> Self {
        Self {
            mean: NormStat::Array(mean),
            std: NormStat::Array(std),
        }
    }

    fn broadcast_err(
        &self,
        what: &str,
        stat: &Array3<f32>,
        image: &Array3<f32>,
    ) -> FmowDatasetError {
        FmowDatasetError::Shape {
            transform: self.name(),
            msg: format!(
                "{what} of shape {:?} does not broadcast to image {:?}",
                stat.shape(),
                image.shape()
            ),
        }
    }
}

impl Transform for Normalize {
    fn name(&self) -> &'static str {
        "Normalize"
    }

    fn apply(&self, sample: Sample) -> DatasetResult<Sample> {
        expect_hwc(self.name(), &sample)?;
        let mut image = sample.image;
        match &self.mean {
            NormStat::Scalar(mean) => image.mapv_inplace(|v| v - mean),
            NormStat::Array(mean) => {
                let mean = mean
                    .broadcast(image.dim())
                    .ok_or_else(|| self.broadcast_err("mean", mean, &image))?;
                image -= &mean;
            }
        }
        match &self.std {
            NormStat::Scalar(std) => {
                if *std == 0.0 {
                    return Err(FmowDatasetError::Shape {
                        transform: self.name(),
                        msg: "std must be non-zero".to_string(),
                    });
                }
                image.mapv_inplace(|v| v / std);
            }
            NormStat::Array(std) => {
                let std = std
                    .broadcast(image.dim())
                    .ok_or_else(|| self.broadcast_err("std", std, &image))?;
                image /= &std;
            }
        }
        Ok(Sample { image, ..sample })
    }
}

/// Move the channel axis first. Must be the last step of a chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToTensor;

impl Transform for ToTensor {
    fn name(&self) -> &'static str {
        "ToTensor"
    }

    fn apply(&self, sample: Sample) -> DatasetResult<Sample> {
        expect_hwc(self.name(), &sample)?;
        let image = sample
            .image
            .permuted_axes([2, 0, 1])
            .as_standard_layout()
            .into_owned();
        Ok(Sample {
            image,
            label: sample.label,
            layout: Layout::Chw,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransformPipeline {
    steps: Vec<Arc<dyn Transform>>,
}

impl TransformPipeline {
    /// Fixed `Rescale -> Normalize -> ToTensor` order, skipping disabled steps.
    pub fn from_config(cfg: &TransformConfig) -> Self {
        let mut builder = TransformPipelineBuilder::new();
        if let Some((h, w)) = cfg.rescale {
            builder = builder.rescale(h, w);
        }
        if let Some(norm) = cfg.normalize {
            builder = builder.normalize(norm.mean, norm.std);
        }
        if cfg.to_tensor {
            builder = builder.to_tensor();
        }
        builder.build()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn describe(&self) -> String {
        if self.steps.is_empty() {
            return "identity".to_string();
        }
        self.steps
            .iter()
            .map(|s| format!("{s:?}"))
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn apply(&self, sample: Sample) -> DatasetResult<Sample> {
        self.steps.iter().try_fold(sample, |acc, step| step.apply(acc))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransformPipelineBuilder {
    inner: TransformPipeline,
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn rescale(self, height: u32, width: u32) -> Self {
        self.then(Rescale::new(height, width))
    }
    pub fn normalize(self, mean: f32, std: f32) -> Self {
        self.then(Normalize::new(mean, std))
    }
    pub fn normalize_per_pixel(self, mean: Array3<f32>, std: Array3<f32>) -> Self {
        self.then(Normalize::per_pixel(mean, std))
    }
    pub fn to_tensor(self) -> Self {
        self.then(ToTensor)
    }
    pub fn then(mut self, step: impl Transform + 'static) -> Self {
        self.inner.steps.push(Arc::new(step));
        self
    }
    pub fn build(self) -> TransformPipeline {
        self.inner
    }
}

#[cfg(test)]
mod transform_tests {
    use super::*;
    use ndarray::Array3;

    fn ramp(h: usize, w: usize) -> Sample {
        let image = Array3::from_shape_fn((h, w, 1), |(r, c, _)| (r * w + c) as f32);
        Sample::new(image, 3)
    }

    #[test]
    fn rescale_hits_target_shape() {
        for (h, w) in [(46, 46), (7, 130), (1, 1)] {
            let out = Rescale::new(32, 24).apply(ramp(h, w)).unwrap();
            assert_eq!(out.image.dim(), (32, 24, 1));
            assert_eq!(out.label[0], 3);
        }
    }

    #[test]
    fn rescale_keeps_pixel_range() {
        let out = Rescale::new(10, 10).apply(ramp(20, 20)).unwrap();
        let max = out.image.iter().copied().fold(f32::MIN, f32::max);
        let min = out.image.iter().copied().fold(f32::MAX, f32::min);
        assert!(max > 1.0, "values were clamped: max={max}");
        assert!(min >= 0.0 && max <= 399.0 + 1e-3);
    }

    #[test]
    fn rescale_constant_image_stays_constant() {
        let sample = Sample::new(Array3::from_elem((5, 9, 1), 200.0), 0);
        let out = Rescale::new(3, 3).apply(sample).unwrap();
        assert!(out.image.iter().all(|v| (v - 200.0).abs() < 1e-3));
    }

    #[test]
    fn normalize_scalar() {
        let sample = Sample::new(Array3::from_elem((2, 2, 1), 10.0), 1);
        let out = Normalize::new(4.0, 2.0).apply(sample).unwrap();
        assert!(out.image.iter().all(|v| (v - 3.0).abs() < 1e-6));
    }

    #[test]
    fn normalize_per_pixel_rejects_mismatched_shape() {
        let sample = ramp(4, 4);
        let bad = Normalize::per_pixel(Array3::zeros((3, 3, 1)), Array3::ones((3, 3, 1)));
        assert!(matches!(
            bad.apply(sample.clone()),
            Err(FmowDatasetError::Shape { .. })
        ));
        let ok = Normalize::per_pixel(Array3::zeros((4, 4, 1)), Array3::from_elem((1, 1, 1), 2.0));
        let out = ok.apply(sample).unwrap();
        assert_eq!(out.image[[1, 1, 0]], 2.5);
    }

    #[test]
    fn to_tensor_moves_channel_first() {
        let out = ToTensor.apply(ramp(3, 5)).unwrap();
        assert_eq!(out.image.dim(), (1, 3, 5));
        assert_eq!(out.layout, Layout::Chw);
        assert_eq!(out.image[[0, 2, 4]], 14.0);
        assert_eq!(out.spatial_dims(), (3, 5));
    }

    #[test]
    fn to_tensor_before_normalize_fails() {
        let pipeline = TransformPipelineBuilder::new()
            .to_tensor()
            .normalize(0.0, 1.0)
            .build();
        let err = pipeline.apply(ramp(4, 4)).unwrap_err();
        assert!(matches!(
            err,
            FmowDatasetError::Layout {
                transform: "Normalize",
                ..
            }
        ));
    }

    #[test]
    fn pipeline_from_config_runs_in_order() {
        let cfg = TransformConfig {
            rescale: Some((8, 16)),
            normalize: Some(NormalizeConfig {
                mean: 100.0,
                std: 50.0,
            }),
            to_tensor: true,
        };
        let pipeline = TransformPipeline::from_config(&cfg);
        assert_eq!(pipeline.len(), 3);
        assert!(pipeline.describe().starts_with("Rescale"));
        let out = pipeline.apply(ramp(30, 30)).unwrap();
        assert_eq!(out.image.dim(), (1, 8, 16));
        assert_eq!(out.label.to_vec(), vec![3]);
    }

    #[test]
    fn config_validation() {
        let bad = TransformConfig {
            rescale: Some((0, 4)),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad_std = TransformConfig {
            normalize: Some(NormalizeConfig { mean: 0.0, std: 0.0 }),
            ..Default::default()
        };
        assert!(bad_std.validate().is_err());
        assert!(TransformConfig::default().validate().is_ok());
        assert!(TransformPipeline::from_config(&TransformConfig::default()).is_empty());
    }
}
