//! Per-sample loading: read the grayscale image and its sidecar, crop the box, derive the label.

use crate::config::FmowConfig;
use crate::types::{
    BoxRecord, BoxSelector, CropRect, DatasetResult, FmowDatasetError, MetadataEntry, Sample,
    SampleRef,
};
use log::debug;
use ndarray::{s, Array2, Axis};
use std::fs;
use std::path::Path;

/// Parse a sidecar into its ordered box list; a bare record becomes a one-element list.
pub fn load_metadata(path: &Path) -> DatasetResult<Vec<BoxRecord>> {
    let raw = fs::read(path).map_err(|e| FmowDatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let meta: MetadataEntry = serde_json::from_slice(&raw).map_err(|e| FmowDatasetError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(meta.bounding_boxes.into_vec())
}

/// BT.601 luma weights for R, G and B.
const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

/// Grayscale pixels as `(height, width)` in `0..=255`, BT.601 luma rounded to whole levels.
pub fn load_grayscale(path: &Path) -> DatasetResult<Array2<f32>> {
    let img = image::open(path)
        .map_err(|e| FmowDatasetError::Image {
            path: path.to_path_buf(),
            source: e,
        })?
        .to_rgb8();
    let (width, height) = img.dimensions();
    let pixels: Vec<f32> = img
        .pixels()
        .map(|p| {
            let luma: f32 = p
                .0
                .iter()
                .zip(LUMA_WEIGHTS)
                .map(|(&c, w)| f32::from(c) * w)
                .sum();
            luma.round().clamp(0.0, 255.0)
        })
        .collect();
    Array2::from_shape_vec((height as usize, width as usize), pixels).map_err(|e| {
        FmowDatasetError::Shape {
            transform: "load",
            msg: format!("{}: {e}", path.display()),
        }
    })
}

/// Expand `record` by `buffer` pixels on every side and clamp to the image.
///
/// `rect` in the error is the unclamped `[row_start, row_end, col_start, col_end]`,
/// saturated at the `i64` bounds for boxes with extreme coordinates.
pub fn crop_rect(
    record: &BoxRecord,
    buffer: u32,
    height: usize,
    width: usize,
    path: &Path,
) -> DatasetResult<CropRect> {
    let buffer = i64::from(buffer);
    let r1 = record.y().saturating_sub(buffer);
    let r2 = record.y().saturating_add(record.height()).saturating_add(buffer);
    let c1 = record.x().saturating_sub(buffer);
    let c2 = record.x().saturating_add(record.width()).saturating_add(buffer);

    let row_start = r1.max(0);
    let row_end = r2.min(height as i64);
    let col_start = c1.max(0);
    let col_end = c2.min(width as i64);
    if row_start >= row_end || col_start >= col_end {
        return Err(FmowDatasetError::EmptyCrop {
            path: path.to_path_buf(),
            rect: [r1, r2, c1, c2],
            height,
            width,
        });
    }
    Ok(CropRect {
        row_start: row_start as usize,
        row_end: row_end as usize,
        col_start: col_start as usize,
        col_end: col_end as usize,
    })
}

/// Position of `category` in the configured label space.
pub fn label_for(cfg: &FmowConfig, category: &str, path: &Path) -> DatasetResult<i64> {
    cfg.category_index(category)
        .map(|idx| idx as i64)
        .ok_or_else(|| FmowDatasetError::UnknownCategory {
            category: category.to_string(),
            path: path.to_path_buf(),
        })
}

/// Crop an already-decoded image; result is `(h, w, 1)`.
pub fn crop_sample(
    cfg: &FmowConfig,
    image: &Array2<f32>,
    record: &BoxRecord,
    path: &Path,
) -> DatasetResult<Sample> {
    let (height, width) = image.dim();
    let rect = crop_rect(record, cfg.crop_buffer, height, width, path)?;
    let label = label_for(cfg, &record.category, path)?;
    let cropped = image
        .slice(s![rect.row_start..rect.row_end, rect.col_start..rect.col_end])
        .to_owned()
        .insert_axis(Axis(2));
    Ok(Sample::new(cropped, label))
}

/// Boxes a sample leaves unused. Test samples index every box separately, so only train drops any.
fn ignored_boxes(selector: BoxSelector, count: usize) -> usize {
    match selector {
        BoxSelector::First => count.saturating_sub(1),
        BoxSelector::At(_) => 0,
    }
}

/// Load, crop and label the sample behind `sample_ref`. Nothing is cached.
pub fn extract(cfg: &FmowConfig, sample_ref: &SampleRef) -> DatasetResult<Sample> {
    let metadata_path = sample_ref.metadata_path();
    let boxes = load_metadata(&metadata_path)?;
    let position = sample_ref.selector.position();
    let record = boxes.get(position).ok_or_else(|| {
        if boxes.is_empty() {
            FmowDatasetError::NoBoundingBox {
                path: metadata_path.clone(),
            }
        } else {
            FmowDatasetError::BoxOutOfRange {
                path: metadata_path.clone(),
                position,
                count: boxes.len(),
            }
        }
    })?;
    let ignored = ignored_boxes(sample_ref.selector, boxes.len());
    if ignored > 0 {
        debug!(
            "{} has {} boxes; using box 0 ({}), ignoring {ignored}",
            metadata_path.display(),
            boxes.len(),
            record.category
        );
    }
    let image = load_grayscale(&sample_ref.image)?;
    crop_sample(cfg, &image, record, &sample_ref.image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;

    fn record(rect: [i64; 4], category: &str) -> BoxRecord {
        BoxRecord {
            rect,
            category: category.to_string(),
        }
    }

    fn cfg() -> FmowConfig {
        FmowConfig::new(
            "/unused",
            ["barn", "dam", "port", "airport"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    #[test]
    fn crop_clamps_at_origin() {
        let rect =
            crop_rect(&record([10, 10, 20, 20], "airport"), 16, 50, 80, Path::new("x")).unwrap();
        assert_eq!(
            rect,
            CropRect {
                row_start: 0,
                row_end: 46,
                col_start: 0,
                col_end: 46
            }
        );
    }

    #[test]
    fn crop_clamps_at_far_edge() {
        let rect =
            crop_rect(&record([70, 40, 20, 20], "dam"), 16, 50, 80, Path::new("x")).unwrap();
        assert_eq!((rect.row_start, rect.row_end), (24, 50));
        assert_eq!((rect.col_start, rect.col_end), (54, 80));
    }

    #[test]
    fn crop_outside_image_is_an_error() {
        let err =
            crop_rect(&record([500, 500, 5, 5], "dam"), 16, 50, 80, Path::new("x")).unwrap_err();
        assert!(matches!(err, FmowDatasetError::EmptyCrop { .. }));
    }

    #[test]
    fn crop_with_extreme_coordinates_is_an_error() {
        let far = record([0, i64::MAX - 5, 10, 10], "dam");
        match crop_rect(&far, 16, 50, 80, Path::new("x")) {
            Err(FmowDatasetError::EmptyCrop { rect, .. }) => {
                assert_eq!(rect[0], i64::MAX - 21);
                assert_eq!(rect[1], i64::MAX);
            }
            other => panic!("expected EmptyCrop, got {other:?}"),
        }

        let negative = record([i64::MIN + 3, 0, 10, 10], "dam");
        let rect = crop_rect(&negative, 16, 50, 80, Path::new("x"));
        assert!(matches!(rect, Err(FmowDatasetError::EmptyCrop { .. })));

        let huge = record([i64::MAX, i64::MAX, i64::MAX, i64::MAX], "dam");
        let rect = crop_rect(&huge, u32::MAX, 50, 80, Path::new("x"));
        assert!(matches!(rect, Err(FmowDatasetError::EmptyCrop { .. })));
    }

    #[test]
    fn crop_sample_shape_and_label() {
        let image = Array2::from_shape_fn((50, 80), |(r, c)| (r + c) as f32);
        let airport = record([10, 10, 20, 20], "airport");
        let sample = crop_sample(&cfg(), &image, &airport, Path::new("x")).unwrap();
        assert_eq!(sample.image.dim(), (46, 46, 1));
        assert_eq!(sample.label.to_vec(), vec![3]);
        assert_eq!(sample.image[[5, 7, 0]], 12.0);
    }

    #[test]
    fn unknown_category_fails() {
        let image = Array2::zeros((50, 80));
        let stadium = record([10, 10, 20, 20], "stadium");
        let err = crop_sample(&cfg(), &image, &stadium, Path::new("x")).unwrap_err();
        assert!(matches!(err, FmowDatasetError::UnknownCategory { .. }));
    }

    #[test]
    fn metadata_accepts_record_or_list() {
        let tmp = tempfile::tempdir().unwrap();
        let one = tmp.path().join("one_rgb.json");
        std::fs::write(
            &one,
            r#"{"gsd": 0.5, "bounding_boxes": {"box": [1, 2, 3, 4], "category": "dam", "ID": 7}}"#,
        )
        .unwrap();
        let many = tmp.path().join("many_rgb.json");
        std::fs::write(
            &many,
            r#"{"bounding_boxes": [
                {"box": [1, 2, 3, 4], "category": "dam"},
                {"box": [5, 6, 7, 8], "category": "port"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(load_metadata(&one).unwrap(), vec![record([1, 2, 3, 4], "dam")]);
        let boxes = load_metadata(&many).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[1].category, "port");

        let broken = tmp.path().join("broken_rgb.json");
        std::fs::write(&broken, "{not json").unwrap();
        assert!(matches!(load_metadata(&broken), Err(FmowDatasetError::Json { .. })));
    }

    #[test]
    fn only_train_samples_ignore_boxes() {
        assert_eq!(ignored_boxes(BoxSelector::First, 3), 2);
        assert_eq!(ignored_boxes(BoxSelector::First, 1), 0);
        assert_eq!(ignored_boxes(BoxSelector::First, 0), 0);
        assert_eq!(ignored_boxes(BoxSelector::At(0), 3), 0);
        assert_eq!(ignored_boxes(BoxSelector::At(2), 3), 0);
    }

    #[test]
    fn grayscale_uses_bt601_weights() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stripes_rgb.png");
        let mut img = RgbImage::new(4, 2);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(2, 0, Rgb([0, 0, 255]));
        img.put_pixel(3, 0, Rgb([255, 255, 255]));
        img.put_pixel(0, 1, Rgb([100, 150, 200]));
        img.save(&path).unwrap();

        let gray = load_grayscale(&path).unwrap();
        assert_eq!(gray.dim(), (2, 4));
        assert_eq!(gray.row(0).to_vec(), vec![76.0, 150.0, 29.0, 255.0]);
        // 140.75 before rounding
        assert_eq!(gray[[1, 0]], 141.0);
        assert_eq!(gray[[1, 3]], 0.0);
    }

    #[test]
    fn missing_files_fail_extraction() {
        let sample_ref = SampleRef {
            image: PathBuf::from("/definitely/not/here_rgb.jpg"),
            selector: BoxSelector::First,
        };
        assert!(matches!(extract(&cfg(), &sample_ref), Err(FmowDatasetError::Io { .. })));
    }
}
