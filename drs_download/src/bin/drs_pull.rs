use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use drs_download::{
    entries_for_ids, load_manifest, DownloadConfig, DownloadSession, DownloadState, DownloadStatus, ManifestEntry,
    ProgressCallback, TransferProgress,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drs-pull", version, about = "Download DRS objects from Gen3 data commons")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CommonArgs {
    /// Home commons hostname or URL. Falls back to GEN3_ENDPOINT.
    #[arg(long)]
    endpoint: Option<String>,

    /// Access token for the home commons. Falls back to GEN3_TOKEN.
    #[arg(long)]
    token: Option<String>,

    /// Skip objects whose destination file already exists with the expected
    /// size.
    #[arg(long)]
    skip_completed: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Download every object listed in a manifest file (JSON, CSV or TSV)
    Manifest {
        infile: PathBuf,
        #[arg(default_value = ".")]
        output_dir: PathBuf,
    },

    /// Download a single object by DRS identifier
    Object {
        object_id: String,
        #[arg(default_value = ".")]
        output_dir: PathBuf,
    },

    /// Download a list of objects by DRS identifier
    Objects {
        #[arg(required = true)]
        object_ids: Vec<String>,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// List manifest contents, a single object, or your access, without
    /// downloading anything
    Ls {
        infile: Option<PathBuf>,

        /// Describe one object instead of a manifest
        #[arg(long, conflicts_with = "infile")]
        object: Option<String>,

        /// Show the authorization listing for each involved commons
        #[arg(long)]
        access: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let endpoint = cli
        .common
        .endpoint
        .or_else(|| std::env::var("GEN3_ENDPOINT").ok())
        .context("no commons endpoint given; use --endpoint or set GEN3_ENDPOINT")?;
    let token = cli
        .common
        .token
        .or_else(|| std::env::var("GEN3_TOKEN").ok())
        .context("no access token given; use --token or set GEN3_TOKEN")?;

    let mut config = DownloadConfig::default().with_env_overrides();
    config.skip_completed = cli.common.skip_completed;

    let session = DownloadSession::new(&endpoint, &token, config).await?;

    match cli.command {
        Command::Manifest { infile, output_dir } => {
            let entries = load_manifest(&infile)?;
            download(&session, &entries, &output_dir).await
        },
        Command::Object { object_id, output_dir } => {
            download(&session, &entries_for_ids([object_id]), &output_dir).await
        },
        Command::Objects { object_ids, output_dir } => {
            download(&session, &entries_for_ids(object_ids), &output_dir).await
        },
        Command::Ls { infile, object, access } => ls(&session, infile, object, access).await,
    }
}

/// Carriage-return progress line on stderr, one update per received chunk.
/// Concurrent transfers share the line; the last writer wins, which is fine
/// for a terminal indicator.
struct StderrProgress;

fn progress_line(progress: &TransferProgress<'_>) -> String {
    match progress.total_bytes {
        Some(total) if total > 0 => {
            let pct = (progress.bytes_transferred.saturating_mul(100) / total).min(100);
            format!("{}: {}/{} bytes ({pct}%)", progress.file_name, progress.bytes_transferred, total)
        },
        _ => format!("{}: {} bytes", progress.file_name, progress.bytes_transferred),
    }
}

impl ProgressCallback for StderrProgress {
    fn on_progress(&self, progress: &TransferProgress<'_>) {
        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\r{}", progress_line(progress));
        if progress.total_bytes.is_some_and(|total| progress.bytes_transferred >= total) {
            let _ = writeln!(err);
        }
        let _ = err.flush();
    }
}

async fn download(session: &DownloadSession, entries: &[ManifestEntry], output_dir: &PathBuf) -> anyhow::Result<()> {
    let objects = session.resolve_objects(entries).await;
    let statuses = session.download(&objects, output_dir, Some(&StderrProgress)).await?;

    let summary = summarize(&statuses);
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary["failed"].as_array().map(|f| f.is_empty()).unwrap_or(true) {
        std::process::exit(1);
    }
    Ok(())
}

fn summarize(statuses: &HashMap<String, DownloadStatus>) -> serde_json::Value {
    let mut succeeded: Vec<&str> = Vec::new();
    let mut failed: Vec<&str> = Vec::new();
    for (object_id, status) in statuses {
        match status.state {
            DownloadState::Downloaded => succeeded.push(object_id.as_str()),
            _ => failed.push(object_id.as_str()),
        }
    }
    succeeded.sort_unstable();
    failed.sort_unstable();
    serde_json::json!({"succeeded": succeeded, "failed": failed})
}

async fn ls(
    session: &DownloadSession,
    infile: Option<PathBuf>,
    object: Option<String>,
    access: bool,
) -> anyhow::Result<()> {
    let entries = if let Some(object_id) = object {
        entries_for_ids([object_id])
    } else if let Some(path) = &infile {
        load_manifest(path)?
    } else if access {
        Vec::new()
    } else {
        anyhow::bail!("nothing to list; give a manifest, --object or --access");
    };

    let objects = session.resolve_objects(&entries).await;

    if access {
        let authz = session.user_access(&objects).await;
        println!("{}", serde_json::to_string_pretty(&authz)?);
        return Ok(());
    }

    for object in &objects {
        print!("{}", object.listing());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_line_with_known_total() {
        let line = progress_line(&TransferProgress {
            file_name: "a.bam",
            bytes_transferred: 50,
            total_bytes: Some(200),
        });
        assert_eq!(line, "a.bam: 50/200 bytes (25%)");
    }

    #[test]
    fn test_progress_line_with_unknown_total() {
        let line = progress_line(&TransferProgress {
            file_name: "a.bam",
            bytes_transferred: 50,
            total_bytes: None,
        });
        assert_eq!(line, "a.bam: 50 bytes");

        // zero-length declaration is treated as unknown, no division by zero
        let line = progress_line(&TransferProgress {
            file_name: "a.bam",
            bytes_transferred: 0,
            total_bytes: Some(0),
        });
        assert_eq!(line, "a.bam: 0 bytes");
    }
}
