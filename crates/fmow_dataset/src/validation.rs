//! Dataset tree checks: sidecar health and label-space coverage.

use crate::config::FmowConfig;
use crate::extract::load_metadata;
use crate::index::discover_images;
use crate::types::{
    DatasetResult, DatasetScan, FmowDatasetError, SplitScan, ValidationOutcome,
    ValidationReport, ValidationThresholds,
};
use std::path::PathBuf;

fn scan_images(cfg: &FmowConfig, images: Vec<PathBuf>, first_box_only: bool) -> SplitScan {
    let mut scan = SplitScan::default();
    for image in images {
        scan.images += 1;
        let metadata_path = image.with_extension("json");
        let boxes = match load_metadata(&metadata_path) {
            Ok(boxes) => boxes,
            Err(FmowDatasetError::Io { .. }) => {
                scan.missing_metadata += 1;
                continue;
            }
            Err(_) => {
                scan.invalid_metadata += 1;
                continue;
            }
        };
        if boxes.is_empty() {
            scan.empty_boxes += 1;
            continue;
        }
        let used = if first_box_only { &boxes[..1] } else { &boxes[..] };
        scan.boxes += used.len();
        scan.unknown_category += used
            .iter()
            .filter(|b| cfg.category_index(&b.category).is_none())
            .count();
    }
    scan
}

/// Walk both splits the way the indexers do and count what extraction would trip over.
pub fn scan_root(cfg: &FmowConfig) -> DatasetResult<DatasetScan> {
    cfg.validate()?;
    let train_root = cfg.train_root();
    let train_images = cfg
        .fmow_class_names_mini
        .iter()
        .flat_map(|category| discover_images(&train_root.join(category)))
        .collect();
    Ok(DatasetScan {
        train: scan_images(cfg, train_images, true),
        test: scan_images(cfg, discover_images(&cfg.test_root()), false),
    })
}

fn apply_thresholds(
    label: &str,
    count: usize,
    ratio: f32,
    max_count: Option<usize>,
    max_ratio: Option<f32>,
    outcome: &mut ValidationOutcome,
    reasons: &mut Vec<String>,
) {
    if let Some(max) = max_count {
        if count > max {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!("{label}: {count} exceeds max {max}"));
        }
    }
    if let Some(max_r) = max_ratio {
        if ratio > max_r {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!(
                "{label}: ratio {:.3} exceeds max {:.3}",
                ratio, max_r
            ));
        }
    }
    if count > 0 {
        if *outcome == ValidationOutcome::Pass {
            *outcome = ValidationOutcome::Warn;
        }
        reasons.push(format!("{label}: {count} observed"));
    }
}

pub fn validate_scan(scan: DatasetScan, thresholds: &ValidationThresholds) -> ValidationReport {
    let mut outcome = ValidationOutcome::Pass;
    let mut reasons = Vec::new();
    for (name, split) in [("train", &scan.train), ("test", &scan.test)] {
        let denom = split.images.max(1) as f32;
        let skipped = split.skipped();
        apply_thresholds(
            &format!("{name} skipped (missing/invalid/empty sidecar)"),
            skipped,
            skipped as f32 / denom,
            thresholds.max_skipped,
            thresholds.max_skipped_ratio,
            &mut outcome,
            &mut reasons,
        );
        apply_thresholds(
            &format!("{name} unknown category"),
            split.unknown_category,
            split.unknown_category as f32 / split.boxes.max(1) as f32,
            thresholds.max_unknown_category,
            None,
            &mut outcome,
            &mut reasons,
        );
    }
    ValidationReport {
        outcome,
        reasons,
        scan,
    }
}

pub fn validate_root(
    cfg: &FmowConfig,
    thresholds: &ValidationThresholds,
) -> DatasetResult<ValidationReport> {
    let scan = scan_root(cfg)?;
    Ok(validate_scan(scan, thresholds))
}
