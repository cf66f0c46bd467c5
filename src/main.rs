use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use minder_export::{
    ALL_GROUPS, Client, DatasetOutcome, DatasetSelection, ExportReport, TimeRange,
    parse_timestamp,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "minder-export", version, about = "Export and incrementally sync Minder research datasets")]
struct Cli {
    /// Base API URL
    #[arg(long, env = "MINDER_API_URL", global = true)]
    url: Option<String>,

    /// Access token
    #[arg(long, env = "MINDER_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long, global = true)]
    no_verify: bool,

    /// Seconds to wait between job status polls
    #[arg(long, default_value_t = 30, global = true)]
    poll_interval: u64,

    /// Hide the spinner while waiting for jobs
    #[arg(long, global = true)]
    no_progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List measurement groups
    Groups,
    /// List datasets of one group, or of every group
    Datasets {
        #[arg(long, default_value = ALL_GROUPS)]
        group: String,
    },
    /// List previously scheduled export jobs
    Jobs,
    /// Schedule one export job and append its results
    Export {
        #[arg(long, value_parser = parse_time)]
        since: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_time)]
        until: Option<DateTime<Utc>>,
        /// Dataset to export (repeatable); all datasets when omitted
        #[arg(long = "dataset")]
        datasets: Vec<String>,
        #[arg(long, default_value = "./data/raw_data")]
        save_path: PathBuf,
    },
    /// Bring existing dataset files up to date
    Refresh {
        #[arg(long, value_parser = parse_time)]
        until: Option<DateTime<Utc>>,
        /// Dataset to refresh (repeatable)
        #[arg(long = "dataset")]
        datasets: Vec<String>,
        #[arg(long, default_value = "./data/raw_data")]
        save_path: PathBuf,
    },
    /// Download the results of an existing job
    Download {
        /// Job id, or `latest`
        #[arg(long, default_value = "latest")]
        job: String,
        #[arg(long, default_value = "./data/raw_data")]
        save_path: PathBuf,
    },
}

fn parse_time(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_timestamp(s).map_err(|e| e.to_string())
}

fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("minder_export=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn print_report(report: &ExportReport) -> Result<()> {
    for (dataset, outcome) in &report.datasets {
        match outcome {
            DatasetOutcome::Written {
                rows,
                dropped_duplicate,
            } => println!(
                "{:<28} ok      {} row(s){}",
                dataset,
                rows,
                if *dropped_duplicate { " (boundary duplicate dropped)" } else { "" }
            ),
            DatasetOutcome::JobFailed(reason) => {
                println!("{:<28} failed  job failed: {}", dataset, reason)
            }
            DatasetOutcome::RetrievalFailed(e) | DatasetOutcome::WriteFailed(e) => {
                println!("{:<28} failed  {}", dataset, e)
            }
        }
    }

    let failed = report.failed();
    if !failed.is_empty() {
        bail!("{} dataset(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let verify = if cli.no_verify { Some(false) } else { None };
    let client = Client::new(cli.url, cli.token, verify)
        .context("failed to configure the export client")?
        .with_poll_interval(Duration::from_secs(cli.poll_interval))
        .with_progress(!cli.no_progress);

    match cli.command {
        Command::Groups => {
            for group in client.group_names()? {
                println!("{}", group);
            }
        }
        Command::Datasets { group } => {
            for dataset in client.catalog()?.datasets(&group)? {
                println!("{}", dataset);
            }
        }
        Command::Jobs => {
            for job in client.jobs()? {
                let types: Vec<&str> = job.job_record.output.dataset_types().collect();
                println!(
                    "{}  {}  {}",
                    job.id,
                    job.job_record.transaction_time.as_deref().unwrap_or("-"),
                    types.join(" ")
                );
            }
        }
        Command::Export {
            since,
            until,
            datasets,
            save_path,
        } => {
            let selection = if datasets.is_empty() {
                DatasetSelection::All
            } else {
                DatasetSelection::only(datasets)
            };
            let report = client.export_all(&selection, &TimeRange::new(since, until), &save_path)?;
            print_report(&report)?;
        }
        Command::Refresh {
            until,
            datasets,
            save_path,
        } => {
            let report = client.refresh(until, &datasets, &save_path)?;
            print_report(&report)?;
        }
        Command::Download { job, save_path } => {
            let report = client.download_job(&job, &save_path)?;
            print_report(&report)?;
        }
    }

    Ok(())
}
