use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use tessera::store::MemoryCase;
use tessera::task::{IngestSettings, IngestTask};
use tessera::types::Severity;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Forensic export ingestion and correlation engine")]
struct Cli {
    /// Directory produced by the export tool (images, reports, export tables).
    #[arg(short, long)]
    source: PathBuf,

    /// Working directory the source tree is copied into.
    #[arg(short, long)]
    dest: PathBuf,

    /// Device identifier recorded on every data source this run creates.
    #[arg(long, default_value = "tessera-device")]
    device_id: String,

    /// Time zone recorded on disk image sources.
    #[arg(long, default_value = "UTC")]
    time_zone: String,

    /// Print the resulting case contents as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let case = MemoryCase::new();
    let settings = IngestSettings {
        device_id: cli.device_id,
        time_zone: cli.time_zone,
        source: cli.source,
        dest: cli.dest,
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .context("invalid progress template")?,
    );
    spinner.enable_steady_tick(Duration::from_millis(100));

    let progress_spinner = spinner.clone();
    let progress = move |text: &str| {
        progress_spinner.set_message(text.to_string());
    };

    let task = IngestTask::new(settings, &case, &progress);
    let (tx, rx) = mpsc::channel();
    task.run(Box::new(move |result| {
        let _ = tx.send(result);
    }));
    let result = rx.recv().context("ingest task dropped its result")?;

    spinner.finish_and_clear();

    println!(
        "{} {}",
        style("Ingest finished:").bold(),
        match result.severity {
            Severity::NoErrors => style(result.severity.to_string()).green(),
            Severity::NonCritical => style(result.severity.to_string()).yellow(),
            Severity::Critical => style(result.severity.to_string()).red(),
        }
    );
    for source in &result.new_data_sources {
        println!("  data source {} ({:?}): {}", source.id, source.kind, source.path);
    }
    for error in &result.errors {
        println!("  {} {error}", style("error:").yellow());
    }

    if cli.json {
        let snapshot = case.snapshot();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!(
            "{} files, {} artifacts, {} reports",
            case.snapshot().files,
            case.artifact_count(),
            case.report_count()
        );
    }

    if result.severity == Severity::Critical {
        std::process::exit(2);
    }
    Ok(())
}
