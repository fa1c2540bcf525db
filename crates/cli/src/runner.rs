//! End-to-end batch run: read inputs, preprocess, analyse, report.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use labelcheck_client::api::JobApi;
use labelcheck_client::controller::{AnalysisController, AnalysisSnapshot, AnalysisStatus, ControllerConfig};
use labelcheck_client::scheduler::UploadReport;
use labelcheck_client::JobClient;
use labelcheck_core::preprocess::compress_images;
use labelcheck_core::selection::FileSelection;

use crate::config::AppConfig;
use crate::input::{load_reference, load_source_files};
use crate::report::{render_json, render_text};

const STREAM_END_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Parser)]
#[command(author, version, about = "Batch label compliance analysis", long_about = None)]
pub struct Cli {
    /// Label images (JPEG, PNG or WebP), up to 300
    #[arg(required = true)]
    pub images: Vec<PathBuf>,

    /// Reference application data to compare labels against
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Override the API root for this run
    #[arg(long)]
    pub api_base: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run one batch to completion and print the report.
///
/// Exits non-zero unless the run completed with every label passing or
/// needing review.
pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<ExitCode> {
    let mut selection = FileSelection::new();
    let loaded = load_source_files(&cli.images).await?;
    let outcome = selection.add(loaded)?;
    for name in &outcome.unsupported {
        tracing::warn!(file = %name, "Skipping unsupported file type");
    }
    for name in &outcome.duplicates {
        tracing::warn!(file = %name, "Skipping duplicate file");
    }
    if selection.is_empty() {
        bail!("No supported images to analyse");
    }

    let reference = match &cli.csv {
        Some(path) => {
            let rows = load_reference(path).await?;
            tracing::info!(rows = rows.len(), path = %path.display(), "Loaded reference data");
            Some(rows)
        }
        None => None,
    };

    let files = compress_images(selection.into_files()).await;

    let api_base = cli.api_base.unwrap_or(config.api_base);
    tracing::info!(api_base = %api_base, files = files.len(), "Starting batch");

    let controller = AnalysisController::new(
        Arc::new(JobClient::new(api_base)),
        ControllerConfig {
            stall_timeout: config.stall_timeout,
        },
    );

    controller
        .analyze(files, reference)
        .await
        .context("Could not start analysis")?;

    if !controller.is_subscribed() {
        controller.reset();
        bail!("Result stream is unavailable");
    }

    let (snapshot, uploads) = tokio::select! {
        settled = wait_until_settled(&controller) => settled,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, abandoning batch");
            controller.reset();
            return Ok(ExitCode::from(130));
        }
    };

    if let Some(report) = &uploads {
        tracing::debug!(?report, "Uploads settled");
    }
    if snapshot.status.is_active() {
        tracing::warn!(
            progress = snapshot.progress,
            total = snapshot.total_files,
            chunks_failed = uploads.as_ref().map_or(0, |r| r.chunks_failed),
            "Result stream ended before every label was analysed",
        );
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&render_json(&snapshot))?);
    } else {
        print!("{}", render_text(&snapshot));
    }

    let summary = snapshot.summary();
    let incomplete = snapshot.status != AnalysisStatus::Complete;
    if incomplete || summary.rejected > 0 || summary.errored > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Follow snapshots, logging progress, until the run has nothing left to
/// deliver.
///
/// Returns once the run is terminal, or once the uploads have settled and
/// the result stream is gone while the run is still short of records. In
/// the second case the returned snapshot is still `Uploading` or
/// `Streaming`.
pub async fn wait_until_settled<A: JobApi>(
    controller: &AnalysisController<A>,
) -> (AnalysisSnapshot, Option<UploadReport>) {
    let mut updates = controller.watch();
    let uploads = controller.join_uploads();
    tokio::pin!(uploads);
    let mut report = None;
    let mut uploads_settled = false;
    let mut last_progress = None;

    loop {
        let snapshot = updates.borrow_and_update().clone();
        if last_progress != Some(snapshot.progress) {
            tracing::info!(
                status = %snapshot.status,
                progress = snapshot.progress,
                total = snapshot.total_files,
                "Progress",
            );
            last_progress = Some(snapshot.progress);
        }
        if snapshot.status.is_terminal() {
            if !uploads_settled {
                report = (&mut uploads).await;
            }
            return (snapshot, report);
        }
        if uploads_settled && !controller.is_subscribed() {
            return (controller.snapshot(), report);
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return (snapshot, report);
                }
            }
            settled = &mut uploads, if !uploads_settled => {
                report = settled;
                uploads_settled = true;
            }
            // A stream that ends on its own publishes nothing.
            _ = tokio::time::sleep(STREAM_END_POLL), if uploads_settled => {}
        }
    }
}
