pub mod cli;

pub use cli::{run, Cli, CliReport, Command, SplitArg};
