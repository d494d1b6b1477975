use clap::Parser;
use fmow_tools::cli::{run, Cli};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();
    let cli = Cli::parse();
    let report = run(cli)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.failed() {
        std::process::exit(1);
    }
    Ok(())
}
