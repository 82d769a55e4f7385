//! Secfeed Ingest - vulnerability feed ingestion tool

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secfeed_common::logging::{init_logging, LogConfig, LogLevel};
use secfeed_common::FieldKind;
use secfeed_ingest::consolidate::{consolidate, ConsolidateOptions};
use secfeed_ingest::csv_io::{read_header, read_records_from_path, write_records_to_path};
use secfeed_ingest::feeds::{ghsa, kev, nvd};
use secfeed_ingest::mapping::{FieldMapping, Naming};
use secfeed_ingest::{
    reconcile, CsvTableStore, FeedContext, HttpTransport, IngestConfig, RunSummary,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "secfeed-ingest")]
#[command(author, version, about = "Vulnerability feed ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Hide page progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync NIST_CVE and NIST_CVSS from the NVD CVE API
    Nvd,

    /// Sync GitHub security advisories and their identifiers
    Ghsa {
        /// Ignore stored advisories and pull the full catalogue
        #[arg(long)]
        full: bool,
    },

    /// Sync affected package ranges of GitHub security advisories
    GhsaVulns,

    /// Sync the CISA Known Exploited Vulnerabilities catalogue
    Kev,

    /// Run every feed: kev, nvd, ghsa, ghsa-vulns
    All,

    /// Concatenate partial CSV files that share a header
    Consolidate {
        /// Destination file (must not exist)
        destination: PathBuf,

        /// Partial files, in order
        #[arg(required = true)]
        parts: Vec<PathBuf>,

        /// Delete the partial files afterwards
        #[arg(long)]
        remove_parts: bool,
    },

    /// Diff two CSV files on a composite key
    Reconcile {
        /// Records as currently stored
        current: PathBuf,

        /// Records as freshly retrieved
        incoming: PathBuf,

        /// Key columns
        #[arg(short, long, value_delimiter = ',', required = true)]
        key: Vec<String>,

        /// Directory receiving new.csv and changed.csv
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("secfeed-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Consolidate {
            destination,
            parts,
            remove_parts,
        } => {
            let summary = consolidate(&destination, &parts[..], &ConsolidateOptions { remove_parts })?;
            info!(
                destination = %summary.destination.display(),
                parts = summary.parts,
                rows = summary.rows,
                "Consolidation complete"
            );
        },
        Command::Reconcile {
            current,
            incoming,
            key,
            output,
        } => reconcile_files(&current, &incoming, &key, &output)?,
        feed => {
            let config = IngestConfig::from_env()?;
            let transport = Arc::new(HttpTransport::new(&config.http)?);
            let store = Arc::new(CsvTableStore::new(&config.store_dir));
            let ctx = FeedContext::new(config, transport, store).with_progress(!cli.no_progress);
            run_feed(&ctx, feed).await?;
        },
    }

    info!("Ingestion complete");
    Ok(())
}

async fn run_feed(ctx: &FeedContext, command: Command) -> Result<()> {
    let summaries = match command {
        Command::Nvd => vec![nvd::run(ctx).await?],
        Command::Ghsa { full } => vec![ghsa::run_advisories(ctx, full).await?],
        Command::GhsaVulns => vec![ghsa::run_vulnerabilities(ctx).await?],
        Command::Kev => vec![kev::run(ctx).await?],
        Command::All => vec![
            kev::run(ctx).await?,
            nvd::run(ctx).await?,
            ghsa::run_advisories(ctx, false).await?,
            ghsa::run_vulnerabilities(ctx).await?,
        ],
        Command::Consolidate { .. } | Command::Reconcile { .. } => {
            bail!("not a feed command")
        },
    };
    summaries.iter().for_each(report);
    Ok(())
}

fn report(summary: &RunSummary) {
    info!(
        feed = %summary.feed,
        pages_written = summary.fetch.pages_written,
        pages_resumed = summary.fetch.pages_resumed,
        archive = ?summary.archive,
        "Feed finished"
    );
    for table in &summary.tables {
        info!(
            feed = %summary.feed,
            table = %table.table,
            inserted = table.inserted,
            updated = table.updated,
            unchanged = table.unchanged,
            dropped = table.dropped,
            "Table synced"
        );
    }
}

fn reconcile_files(current: &Path, incoming: &Path, key: &[String], output: &Path) -> Result<()> {
    let header = read_header(incoming)
        .with_context(|| format!("Failed to read header of {}", incoming.display()))?;
    let specs: Vec<(&str, FieldKind)> = header.iter().map(|c| (c.as_str(), FieldKind::Text)).collect();
    let mapping = FieldMapping::identity(&specs);

    let current_records = read_records_from_path(current, &mapping, Naming::Internal)?;
    let incoming_records = read_records_from_path(incoming, &mapping, Naming::Internal)?;
    let result = reconcile(&current_records, &incoming_records, key)?;

    std::fs::create_dir_all(output)?;
    for (name, records) in [("new.csv", &result.new), ("changed.csv", &result.changed)] {
        let path = output.join(name);
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        write_records_to_path(&path, &mapping, Naming::Internal, records)?;
        info!(path = %path.display(), rows = records.len(), "Wrote reconciliation output");
    }
    Ok(())
}
