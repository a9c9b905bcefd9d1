//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Mirror a wiki space's page tree to local PDFs and attachments.
///
/// Behavior is driven by a YAML config file (`config.yaml` in the working
/// directory unless `--config` is given). Re-running against the same
/// download directory resumes: pages whose PDF already exists are skipped.
#[derive(Parser, Debug)]
#[command(name = "space-export")]
#[command(author, version)]
pub struct Args {
    /// Path to the YAML config file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output (overrides -v)
    #[arg(short, long)]
    pub quiet: bool,
}
