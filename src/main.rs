use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use subscriber_etl::{ChangelogWriter, Pipeline, PipelineConfig, RunOutcome};

#[derive(Parser)]
#[command(name = "subscriber-etl", version, about = "Validate, clean, and version the subscriber snapshot")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full validate → clean → aggregate → changelog pipeline
    Run {
        /// Raw snapshot database
        #[arg(long, default_value = "dev/subscribers.db")]
        source: PathBuf,

        /// Directory receiving the aggregated database and changelog
        #[arg(long, default_value = "dev")]
        out_dir: PathBuf,

        /// Fail the run when quarantined/input exceeds this ratio
        #[arg(long, default_value_t = PipelineConfig::DEFAULT_MAX_QUARANTINE_RATIO)]
        max_quarantine_ratio: f64,

        /// Reference date for derived fields (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Print the changelog, newest entry last
    Changelog {
        #[arg(long, default_value = "dev")]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("subscriber_etl=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            source,
            out_dir,
            max_quarantine_ratio,
            as_of,
        } => {
            let mut config = PipelineConfig::new(source, out_dir);
            config.max_quarantine_ratio = max_quarantine_ratio;
            if let Some(as_of) = as_of {
                config.as_of = as_of;
            }
            run(config)
        }
        Command::Changelog { out_dir } => show_changelog(&out_dir),
    }
}

fn run(config: PipelineConfig) -> Result<()> {
    let mut pipeline = Pipeline::new(config);

    match pipeline.run() {
        Ok(report) => {
            println!("✓ {}", report.summary());
            if let RunOutcome::Committed { version } = report.outcome {
                // Promotion signal consumed by the human-gated copy step
                println!("run completed successfully with version {version}");
            }
            Ok(())
        }
        Err(failure) => {
            eprintln!("❌ {failure}");
            process::exit(1);
        }
    }
}

fn show_changelog(out_dir: &std::path::Path) -> Result<()> {
    let path = out_dir.join(subscriber_etl::store::CHANGELOG_FILE);
    let entries = ChangelogWriter::load(&path)?;

    if entries.is_empty() {
        println!("no changelog entries yet ({})", path.display());
        return Ok(());
    }

    for entry in &entries {
        println!("{}", entry.summary());
    }

    Ok(())
}
