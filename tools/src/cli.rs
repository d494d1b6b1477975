//! `fmow_index` argument parsing and command execution.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use fmow_dataset::{
    validate_root, FmowConfig, FmowDataset, IndexSummary, Layout, Split, ValidationOutcome,
    ValidationReport, ValidationThresholds,
};
use log::info;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SplitArg {
    Train,
    Test,
}

impl From<SplitArg> for Split {
    fn from(value: SplitArg) -> Self {
        match value {
            SplitArg::Train => Split::Train,
            SplitArg::Test => Split::Test,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "fmow_index",
    about = "Index, inspect and validate a Functional Map of the World dataset tree"
)]
pub struct Cli {
    /// Config file (defaults to $FMOW_CONFIG, then ./fmow.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Override the train subsampling seed from the config.
    #[arg(long, global = true)]
    pub seed: Option<u64>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the index for one or both splits and print their summaries.
    Summary {
        /// Only this split (both when omitted).
        #[arg(long, value_enum)]
        split: Option<SplitArg>,
    },
    /// Extract one sample, run the configured transforms and print what came out.
    Inspect {
        #[arg(long, value_enum, default_value_t = SplitArg::Train)]
        split: SplitArg,
        /// Sample index within the split.
        #[arg(long)]
        index: usize,
    },
    /// Scan both splits for missing/malformed sidecars and unknown categories.
    Validate {
        #[arg(long)]
        max_skipped: Option<usize>,
        #[arg(long)]
        max_skipped_ratio: Option<f32>,
        #[arg(long)]
        max_unknown_category: Option<usize>,
    },
}

#[derive(Debug, Serialize)]
pub struct InspectReport {
    pub split: Split,
    pub index: usize,
    pub locator: String,
    pub category: Option<String>,
    pub raw_shape: Vec<usize>,
    pub shape: Vec<usize>,
    pub layout: Layout,
    pub label: Vec<i64>,
    pub transform: String,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CliReport {
    Summary(Vec<IndexSummary>),
    Inspect(Box<InspectReport>),
    Validate(ValidationReport),
}

impl CliReport {
    pub fn failed(&self) -> bool {
        matches!(self, CliReport::Validate(r) if r.outcome == ValidationOutcome::Fail)
    }
}

pub fn load_config(cli: &Cli) -> anyhow::Result<FmowConfig> {
    let mut cfg = match &cli.config {
        Some(path) => FmowConfig::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FmowConfig::load().context("loading config from $FMOW_CONFIG or ./fmow.toml")?,
    };
    if cli.seed.is_some() {
        cfg.seed = cli.seed;
    }
    Ok(cfg)
}

fn build(cfg: FmowConfig, split: Split) -> anyhow::Result<FmowDataset> {
    let dataset = match split {
        Split::Train => FmowDataset::train(cfg)?,
        Split::Test => FmowDataset::test(cfg)?,
    };
    Ok(dataset)
}

pub fn run(cli: Cli) -> anyhow::Result<CliReport> {
    let cfg = load_config(&cli)?;
    match cli.command {
        Command::Summary { split } => {
            let splits = match split {
                Some(s) => vec![Split::from(s)],
                None => vec![Split::Train, Split::Test],
            };
            let mut summaries = Vec::with_capacity(splits.len());
            for split in splits {
                let dataset = build(cfg.clone(), split)?;
                summaries.push(dataset.index().summary().clone());
            }
            Ok(CliReport::Summary(summaries))
        }
        Command::Inspect { split, index } => {
            let dataset = build(cfg, split.into())?;
            info!("transform chain: {}", dataset.transform().describe());
            let locator = dataset.locate(index)?;
            let category = fmow_dataset::load_metadata(&locator.metadata_path())
                .ok()
                .and_then(|boxes| boxes.into_iter().nth(locator.selector.position()))
                .map(|b| b.category);
            let raw = dataset
                .raw(index)
                .with_context(|| format!("extracting {locator}"))?;
            let raw_shape = raw.image.shape().to_vec();
            let sample = dataset.transform().apply(raw)?;
            let count = sample.image.len().max(1) as f32;
            Ok(CliReport::Inspect(Box::new(InspectReport {
                split: dataset.split(),
                index,
                locator: locator.to_string(),
                category,
                raw_shape,
                shape: sample.image.shape().to_vec(),
                layout: sample.layout,
                label: sample.label.to_vec(),
                transform: dataset.transform().describe(),
                min: sample.image.iter().copied().fold(f32::INFINITY, f32::min),
                max: sample.image.iter().copied().fold(f32::NEG_INFINITY, f32::max),
                mean: sample.image.sum() / count,
            })))
        }
        Command::Validate {
            max_skipped,
            max_skipped_ratio,
            max_unknown_category,
        } => {
            let mut thresholds = ValidationThresholds::from_env();
            if max_skipped.is_some() {
                thresholds.max_skipped = max_skipped;
            }
            if max_skipped_ratio.is_some() {
                thresholds.max_skipped_ratio = max_skipped_ratio;
            }
            if max_unknown_category.is_some() {
                thresholds.max_unknown_category = max_unknown_category;
            }
            let report = validate_root(&cfg, &thresholds)?;
            info!("validation outcome: {}", report.outcome.as_str());
            Ok(CliReport::Validate(report))
        }
    }
}
