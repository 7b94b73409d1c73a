use std::error::Error;
use std::fs;
use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use commands::{
    readpb::{self, ReadpbArgs},
    run::{self, RunArgs},
    stepping::{self, SteppingArgs},
};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "pbx", about = "Distributed CAT-GTR mixture sampler")]
struct Cli {
    /// Log verbosity (trace, debug, info, warn, error); `RUST_LOG` wins when set.
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sampler from a YAML configuration and a JSON alignment.
    Run(RunArgs),
    /// Estimate per-site marginal likelihoods with a stepping-stone pass.
    Stepping(SteppingArgs),
    /// Post-process a chain written by `pbx run`.
    Readpb(ReadpbArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);
    let outcome = match cli.command {
        Command::Run(args) => run::run(&args),
        Command::Stepping(args) => stepping::run(&args),
        Command::Readpb(args) => readpb::run(&args),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "pbx failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: tracing::Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub(crate) fn write_json<P: AsRef<Path>, T: serde::Serialize>(
    path: P,
    value: &T,
) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}
