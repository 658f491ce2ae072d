//! ferry client: list and download files from a ferry server.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{IsTerminal, Write};
use std::path::Path;

use ferry::checksum::sha256_file;
use ferry::cli::{ClientCommand, ClientOpts};
use ferry::config::{ClientConfig, Endpoint};
use ferry::log::{DownloadLog, DownloadLogEntry};
use ferry::orchestrator::{BatchOptions, DownloadTask, Orchestrator, TaskStatus};
use ferry::progress::BatchProgress;
use ferry::{client, logging};

fn build_config(opts: &ClientOpts) -> Result<ClientConfig> {
    let mut config = match opts.config {
        Some(ref p) => ClientConfig::load(p)?,
        None => ClientConfig::default(),
    };
    if let Some(ref server) = opts.server {
        config.endpoint = Endpoint::parse(server)?;
    }
    Ok(config)
}

async fn list(config: &ClientConfig) -> Result<()> {
    let mut conn = client::connect(config).await?;
    let files = conn.list_files().await;
    conn.close().await;
    let files = files.with_context(|| format!("listing files on {}", config.endpoint))?;
    if files.is_empty() {
        eprintln!("No files available.");
    }
    for f in files {
        println!("{}", f);
    }
    Ok(())
}

fn history(log_file: &Path, failed_only: bool) -> Result<()> {
    let entries = DownloadLog::new(log_file).read_log()?;
    let shown: Vec<_> = entries
        .iter()
        .filter(|e| !failed_only || e.status == TaskStatus::Failed)
        .collect();
    if shown.is_empty() {
        eprintln!("No recorded downloads.");
    }
    for e in shown {
        match e.error {
            Some(ref err) => println!(
                "{}  {:<9} {}  {}  {}",
                e.timestamp, e.status, e.server, e.filename, err
            ),
            None => println!(
                "{}  {:<9} {}  {}  {}/{} bytes",
                e.timestamp, e.status, e.server, e.filename, e.bytes_transferred, e.total_bytes
            ),
        }
    }
    Ok(())
}

/// One line per task: result (or digest) on `out`, failures on `err`.
/// A digest that cannot be computed is reported and counted; the other
/// tasks are still reported.
fn report<O: Write, E: Write>(
    tasks: &[DownloadTask],
    digest: bool,
    out: &mut O,
    err: &mut E,
) -> std::io::Result<usize> {
    let mut digest_failures = 0;
    for t in tasks {
        match t.status {
            TaskStatus::Completed if digest => match sha256_file(&t.destination) {
                Ok(d) => writeln!(out, "{}  {}", d, t.destination.display())?,
                Err(e) => {
                    digest_failures += 1;
                    writeln!(err, "{}: digest failed: {:#}", t.filename, e)?;
                }
            },
            TaskStatus::Completed => writeln!(
                out,
                "{} -> {} ({} bytes)",
                t.filename,
                t.destination.display(),
                t.bytes_transferred
            )?,
            _ => writeln!(
                err,
                "{}: {}",
                t.filename,
                t.error.as_deref().unwrap_or("download did not complete")
            )?,
        }
    }
    Ok(digest_failures)
}

struct GetArgs<'a> {
    files: &'a [String],
    dest: &'a Path,
    check_listing: bool,
    digest: bool,
    log_file: Option<&'a Path>,
    quiet: bool,
}

/// Returns true if every file downloaded.
async fn get(config: ClientConfig, args: GetArgs<'_>) -> Result<bool> {
    let server = config.endpoint.to_string();
    let orchestrator = Orchestrator::new(config);
    let mut batch = orchestrator.start(
        args.files.iter().cloned(),
        args.dest,
        BatchOptions {
            check_listing: args.check_listing,
        },
    );

    let hidden = args.quiet || !std::io::stderr().is_terminal();
    let progress = BatchProgress::new(batch.tasks(), hidden);
    while let Some(ev) = batch.next_update().await {
        progress.update(&ev, &batch.tasks()[ev.index()]);
    }
    progress.finish();

    let summary = batch.summary();
    let tasks = batch.wait().await;

    let digest_failures = report(
        &tasks,
        args.digest,
        &mut std::io::stdout().lock(),
        &mut std::io::stderr().lock(),
    )?;

    if let Some(path) = args.log_file {
        let entries: Vec<_> = tasks
            .iter()
            .map(|t| DownloadLogEntry::from_task(&server, t))
            .collect();
        DownloadLog::new(path).add_entries(&entries)?;
    }

    eprintln!(
        "{} completed, {} failed, {:.1} MB",
        summary.completed,
        summary.failed,
        summary.bytes as f64 / 1_048_576.0
    );
    Ok(summary.failed == 0 && digest_failures == 0)
}

fn main() -> Result<()> {
    let opts = ClientOpts::parse();
    logging::init_logging(opts.verbose)?;
    let config = build_config(&opts)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    match opts.command {
        ClientCommand::List => rt.block_on(list(&config)),
        ClientCommand::History {
            ref log_file,
            failed,
        } => history(log_file, failed),
        ClientCommand::Get {
            ref files,
            ref dest,
            check_listing,
            digest,
            ref log_file,
            quiet,
        } => {
            let args = GetArgs {
                files,
                dest,
                check_listing,
                digest,
                log_file: log_file.as_deref(),
                quiet,
            };
            if !rt.block_on(get(config, args))? {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
