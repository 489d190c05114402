use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ocr_minion::config::Config;

#[derive(Parser, Debug)]
#[command(name = "ocr-minion")]
#[command(version, about = "Distributed OCR worker", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $OCRM_CONFIG or config/ocr-minion.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process OCR tasks until interrupted (default)
    Run(RunArgs),
    /// Load and validate configuration, print the effective settings and exit
    CheckConfig,
}

#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Request the always-available practice task
    #[arg(long)]
    pub demo: bool,

    /// Download the next task while the current one is recognised
    #[arg(long)]
    pub prefetch: bool,

    /// Directory for downloaded images and OCR output
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
}

impl RunArgs {
    /// Flags only switch features on; absent flags keep the loaded value
    pub fn apply(&self, config: &mut Config) {
        if self.demo {
            config.client.demo = true;
        }
        if self.prefetch {
            config.worker.prefetch = true;
        }
        if let Some(work_dir) = &self.work_dir {
            config.worker.work_dir = work_dir.clone();
        }
    }
}
