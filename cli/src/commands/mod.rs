pub mod config;
pub mod run;
pub mod serve;

use crate::ux_error;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "glossa",
    author,
    version,
    about = "Glossa - language tasks on-device, in the cloud, or offline",
    long_about = "Runs translation, language detection, summarization, rewriting and \
                  vocabulary analysis.\n\nTasks try the local model first, then the cloud \
                  model, then built-in heuristics.\nConfiguration comes from defaults, an \
                  optional file, and GLOSSA_* environment variables."
)]
pub struct Cli {
    #[arg(long, global = true, env = "GLOSSA_CONFIG", help = "Configuration file (.toml, .yaml)")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run a single task and print the result")]
    Run(run::RunArgs),

    #[command(about = "Answer JSON request envelopes from stdin, one per line")]
    Serve(serve::ServeArgs),

    #[command(about = "Print the effective configuration")]
    Config(config::ConfigArgs)
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<::config::Config> {
    match ::config::load(path) {
        Ok(config) => Ok(config),
        Err(e) => {
            let err = ux_error::invalid_config(path, &e);
            err.display();
            Err(anyhow::anyhow!("Invalid configuration"))
        }
    }
}
