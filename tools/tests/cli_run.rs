use clap::Parser;
use fmow_tools::{run, Cli, CliReport};
use image::{GrayImage, Luma};
use std::fs;
use std::path::{Path, PathBuf};

fn write_sample(dir: &Path, stem: &str, sidecar: &str) -> PathBuf {
    fs::create_dir_all(dir).expect("create sample dir");
    let img = GrayImage::from_fn(64, 40, |x, y| Luma([((x + y) * 2) as u8]));
    let image_path = dir.join(format!("{stem}_rgb.jpg"));
    img.save(&image_path).expect("write jpeg");
    fs::write(dir.join(format!("{stem}_rgb.json")), sidecar).expect("write sidecar");
    image_path
}

fn write_dataset(root: &Path) -> PathBuf {
    for (i, category) in ["airport", "dam"].iter().enumerate() {
        for j in 0..3 {
            write_sample(
                &root.join(format!("train/{category}/{category}_{j}")),
                &format!("{category}_{j}_{i}"),
                &format!(
                    r#"{{"bounding_boxes": [{{"box": [8, 6, 12, 10], "category": "{category}"}}]}}"#
                ),
            );
        }
    }
    write_sample(
        &root.join("test/t_0"),
        "t_0_0",
        r#"{"bounding_boxes": [
            {"box": [1, 1, 5, 5], "category": "dam"},
            {"box": [30, 20, 9, 9], "category": "airport"}
        ]}"#,
    );
    let config = root.join("fmow.toml");
    fs::write(
        &config,
        format!(
            concat!(
                "dataset = \"{}\"\n",
                "fmow_class_names_mini = [\"airport\", \"dam\"]\n",
                "train_cap = 4\nseed = 1\n\n",
                "[transform]\nrescale = [12, 12]\nto_tensor = true\n",
            ),
            root.display()
        ),
    )
    .expect("write config");
    config
}

fn parse(config: &Path, rest: &[&str]) -> Cli {
    let mut args = vec!["fmow_index", "--config", config.to_str().unwrap()];
    args.extend_from_slice(rest);
    Cli::parse_from(args)
}

#[test]
fn summary_reports_both_splits() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_dataset(tmp.path());
    let CliReport::Summary(summaries) = run(parse(&config, &["summary"])).unwrap() else {
        panic!("expected summary report");
    };
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].samples, 4);
    assert_eq!(summaries[0].per_category["airport"].discovered, 3);
    assert_eq!(summaries[1].samples, 2);
    assert_eq!(summaries[1].images, 1);
}

#[test]
fn inspect_runs_configured_transforms() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_dataset(tmp.path());
    let report = run(parse(&config, &["inspect", "--split", "test", "--index", "1"])).unwrap();
    let CliReport::Inspect(report) = report else {
        panic!("expected inspect report");
    };
    assert_eq!(report.category.as_deref(), Some("airport"));
    assert_eq!(report.label, vec![0]);
    assert_eq!(report.raw_shape, vec![40 - 4, 55 - 14, 1]);
    assert_eq!(report.shape, vec![1, 12, 12]);
    assert!(report.locator.ends_with(":1"));

    let out_of_range = run(parse(&config, &["inspect", "--split", "test", "--index", "9"]));
    assert!(out_of_range.is_err());
}

#[test]
fn seed_flag_overrides_config() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_dataset(tmp.path());
    let cli = parse(&config, &["--seed", "99", "summary", "--split", "train"]);
    let cfg = fmow_tools::cli::load_config(&cli).unwrap();
    assert_eq!(cfg.seed, Some(99));
}

#[test]
fn validate_fails_on_threshold() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_dataset(tmp.path());
    fs::write(tmp.path().join("test/t_0/t_0_0_rgb.json"), "nope").unwrap();
    let report = run(parse(&config, &["validate", "--max-skipped", "0"])).unwrap();
    assert!(report.failed());
    let lenient = run(parse(&config, &["validate"])).unwrap();
    assert!(!lenient.failed());
}
