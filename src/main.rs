use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use convnwb_rs::{
    config::Config,
    convert::convert_data,
    io::SessionId,
    parser::{parse_lines_sync, process_session},
    prepare::prepare_data,
    run::run_all_conversions,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

/// Convert task logs and recordings into NWB containers.
#[derive(Debug, Parser)]
#[command(name = "convnwb", version)]
struct Cli {
    /// JSON settings file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print status messages, regardless of the VERBOSE setting.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse a single task log and print a summary.
    Parse {
        log: PathBuf,

        /// Sync file to parse into the same task record.
        #[arg(long)]
        sync: Option<PathBuf>,

        /// Derive speed from the position data.
        #[arg(long)]
        process: bool,

        /// Write the task record as JSON.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Parse and save the task record of one session.
    Prepare {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        session: String,
    },
    /// Convert one prepared session.
    Convert {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        session: String,
    },
    /// Prepare and convert every session of the configured experiment.
    RunAll,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Config::default(),
    };

    let level = if cli.verbose || config.settings.verbose {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Command::Parse {
            log,
            sync,
            process,
            output,
        } => {
            let mut report = process_session(&log, &config.event_table(), process)?;
            if let Some(sync) = sync {
                report.task = parse_lines_sync(&sync, Some(report.task))?;
            }
            report.print_summary();

            if let Some(output) = output {
                let writer = BufWriter::new(File::create(&output)?);
                serde_json::to_writer_pretty(writer, &report.task)?;
                println!("\nTask record written to {}", output.display());
            }
        }
        Command::Prepare { subject, session } => {
            let session = SessionId::new(&subject, &config.experiment, &session);
            let (path, report) = prepare_data(&config, &session)?;
            println!(
                "Task record saved to {} ({} diagnostics)",
                path.display(),
                report.diagnostics.len()
            );
        }
        Command::Convert { subject, session } => {
            let session = SessionId::new(&subject, &config.experiment, &session);
            let path = convert_data(&config, &session)
                .with_context(|| format!("conversion failed for {}", session.name()))?;
            println!("Converted file saved to {}", path.display());
        }
        Command::RunAll => {
            let summary = run_all_conversions(&config)?;
            println!(
                "Converted {} sessions, skipped {} sessions and {} subjects",
                summary.converted.len(),
                summary.skipped_sessions.len(),
                summary.skipped_subjects.len()
            );
        }
    }

    Ok(())
}
