//! stack-align CLI: batch alignment measurement of pressed cell stacks.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use stack_align::{rerun_recovery, run, RunConfig, RunSummary};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "stack-align")]
#[command(about = "Measure part misalignment in stacked cell assemblies from press-camera frames")]
#[command(version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    /// Emit JSON log lines (requires the `tracing` feature).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect, recover, calibrate, align and export.
    Run(RunArgs),

    /// Re-run recovery on saved crops and re-export.
    Recover(RunArgs),

    /// Write the default configuration to PATH.
    InitConfig {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// JSON run configuration; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frame directory (overrides the config).
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output directory (overrides the config).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Process frames sequentially.
    #[arg(long)]
    sequential: bool,

    /// Do not write overlay images.
    #[arg(long)]
    no_overlay: bool,

    /// Worker threads for the parallel pass (bounds peak memory).
    #[arg(long)]
    threads: Option<usize>,
}

impl RunArgs {
    fn to_config(&self) -> CliResult<RunConfig> {
        let mut cfg = match &self.config {
            Some(path) => RunConfig::load_json(path)?,
            None => RunConfig::default(),
        };
        if let Some(input) = &self.input {
            cfg.input_dir = input.clone();
        }
        if let Some(output) = &self.output {
            cfg.output_dir = Some(output.clone());
        }
        if self.sequential {
            cfg.parallel = false;
        }
        if self.no_overlay {
            cfg.overlay.enabled = false;
        }
        if self.threads.is_some() {
            cfg.threads = self.threads;
        }
        Ok(cfg)
    }
}

fn init_logging(level: LevelFilter, json: bool) -> CliResult<()> {
    #[cfg(feature = "tracing")]
    {
        let _ = level;
        stack_align::core::init_tracing(json);
        Ok(())
    }
    #[cfg(not(feature = "tracing"))]
    {
        if json {
            eprintln!("--log-json needs the `tracing` feature; using plain logs");
        }
        stack_align::core::init_with_level(level)?;
        Ok(())
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "{} frames, {} measurements ({} undefined, {} recovered), {} rejected candidates, {:.5} mm/px",
        summary.frames,
        summary.measurements,
        summary.sentinels,
        summary.recovered,
        summary.rejected_candidates,
        summary.mm_per_px
    );
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match try_main(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn try_main(cli: Cli) -> CliResult<()> {
    init_logging(cli.log_level, cli.log_json)?;

    match cli.command {
        Commands::Run(args) => print_summary(&run(args.to_config()?)?),
        Commands::Recover(args) => print_summary(&rerun_recovery(args.to_config()?)?),
        Commands::InitConfig { path } => {
            RunConfig::default().write_json(&path)?;
            println!("wrote {}", path.display());
        }
    }
    Ok(())
}
