//! Chunked, concurrency-bounded upload of a batch.

use std::sync::Arc;

use futures::future::join_all;
use labelcheck_core::types::{ClientIndex, SourceFile};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::api::JobApi;

/// Files per upload request.
pub const CHUNK_SIZE: usize = 3;

/// Upload requests allowed in flight at once.
pub const MAX_IN_FLIGHT: usize = 4;

/// One upload request's worth of files, tagged with their client indices.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position of this chunk in the batch (0-based).
    pub seq: usize,
    pub items: Vec<(SourceFile, ClientIndex)>,
}

/// What happened to a batch's chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub chunks_total: usize,
    pub chunks_failed: usize,
    /// Chunks never issued because the run was cancelled.
    pub chunks_skipped: usize,
    /// Whether `complete_job` was called and succeeded.
    pub completed: bool,
}

/// Pair each file with its input position and split into [`CHUNK_SIZE`]
/// groups. Order is preserved within and across chunks.
pub fn partition(files: Vec<SourceFile>) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::with_capacity(files.len().div_ceil(CHUNK_SIZE));
    for (i, file) in files.into_iter().enumerate() {
        let index = ClientIndex(i as u32);
        match chunks.last_mut() {
            Some(chunk) if chunk.items.len() < CHUNK_SIZE => chunk.items.push((file, index)),
            _ => chunks.push(Chunk {
                seq: chunks.len(),
                items: vec![(file, index)],
            }),
        }
    }
    chunks
}

enum ChunkOutcome {
    Uploaded,
    Failed,
    Skipped,
}

/// Uploads a batch through a [`JobApi`].
pub struct UploadScheduler<A: JobApi> {
    api: Arc<A>,
    max_in_flight: usize,
}

impl<A: JobApi> UploadScheduler<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            max_in_flight: MAX_IN_FLIGHT,
        }
    }

    /// Upload every file for `job_id`, then mark the job complete.
    ///
    /// A failed chunk is logged and the rest of the batch continues.
    /// `complete_job` is called exactly once, after every chunk has settled,
    /// unless `cancel` fired first; in that case no further chunks are
    /// issued and completion is skipped. Requests already in flight are
    /// allowed to finish.
    pub async fn upload_all(
        &self,
        job_id: &str,
        files: Vec<SourceFile>,
        cancel: &CancellationToken,
    ) -> UploadReport {
        let chunks = partition(files);
        let mut report = UploadReport {
            chunks_total: chunks.len(),
            ..Default::default()
        };

        tracing::info!(
            job_id,
            chunks = chunks.len(),
            max_in_flight = self.max_in_flight,
            "Uploading batch",
        );

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let uploads = chunks.into_iter().map(|chunk| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return ChunkOutcome::Skipped,
                };
                if cancel.is_cancelled() {
                    return ChunkOutcome::Skipped;
                }
                match self.api.upload_chunk(job_id, &chunk.items).await {
                    Ok(ack) => {
                        tracing::debug!(job_id, chunk = chunk.seq, files = ack.files.len(), "Chunk uploaded");
                        ChunkOutcome::Uploaded
                    }
                    Err(e) => {
                        tracing::error!(job_id, chunk = chunk.seq, error = %e, "Chunk upload failed");
                        ChunkOutcome::Failed
                    }
                }
            }
        });

        for outcome in join_all(uploads).await {
            match outcome {
                ChunkOutcome::Uploaded => {}
                ChunkOutcome::Failed => report.chunks_failed += 1,
                ChunkOutcome::Skipped => report.chunks_skipped += 1,
            }
        }

        if cancel.is_cancelled() {
            tracing::info!(job_id, skipped = report.chunks_skipped, "Upload cancelled, not completing job");
            return report;
        }

        match self.api.complete_job(job_id).await {
            Ok(()) => report.completed = true,
            Err(e) => tracing::error!(job_id, error = %e, "Failed to mark uploads complete"),
        }

        if report.chunks_failed > 0 {
            tracing::warn!(
                job_id,
                failed = report.chunks_failed,
                total = report.chunks_total,
                "Some chunks failed to upload",
            );
        }
        report
    }
}
