//! Batch analysis orchestration.
//!
//! [`AnalysisController`] drives one job at a time through
//! `Idle -> Uploading -> Streaming -> Complete` (or `Error`). It owns the
//! result store, the job's [`Subscription`] and the upload task, and
//! publishes an [`AnalysisSnapshot`] after every state change.
//!
//! Every run is tagged with a generation number. Events, upload handles and
//! the stall watchdog all carry the generation they were started under, and
//! anything carrying a stale generation is ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use labelcheck_core::reference::ApplicationRow;
use labelcheck_core::result::{BatchSummary, LabelFailure, ResultRecord};
use labelcheck_core::types::{ClientIndex, SourceFile};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::{JobApi, JobClientError};
use crate::messages::StreamEvent;
use crate::scheduler::{UploadReport, UploadScheduler};
use crate::subscription::Subscription;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Where the current run is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnalysisStatus {
    #[default]
    Idle,
    Uploading,
    Streaming,
    Complete,
    Error,
}

impl AnalysisStatus {
    /// Whether stream events may still change the run.
    pub fn is_active(self) -> bool {
        matches!(self, AnalysisStatus::Uploading | AnalysisStatus::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Complete | AnalysisStatus::Error)
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnalysisStatus::Idle => "idle",
            AnalysisStatus::Uploading => "uploading",
            AnalysisStatus::Streaming => "streaming",
            AnalysisStatus::Complete => "complete",
            AnalysisStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Job-level information surfaced alongside the results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Reference rows shared a `label_id`; only the first was used.
    DuplicateLabelIds(Vec<String>),
    /// Reference rows that matched no uploaded image.
    UnmatchedRows(Vec<String>),
    /// An `error` event not tied to any single item.
    JobError(String),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::DuplicateLabelIds(ids) => {
                write!(f, "Duplicate label_id values (first row used): {}", ids.join(", "))
            }
            Diagnostic::UnmatchedRows(ids) => {
                write!(f, "Reference rows with no matching image: {}", ids.join(", "))
            }
            Diagnostic::JobError(message) => write!(f, "Job error: {message}"),
        }
    }
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, Default)]
pub struct AnalysisSnapshot {
    pub generation: u64,
    pub status: AnalysisStatus,
    pub job_id: Option<String>,
    pub total_files: usize,
    /// Number of records received; always equals `records.len()`.
    pub progress: usize,
    /// Records sorted by client index.
    pub records: Vec<(ClientIndex, ResultRecord)>,
    pub diagnostics: Vec<Diagnostic>,
    pub error: Option<String>,
    /// Wall time from `analyze` to completion. Set only once complete.
    pub elapsed: Option<Duration>,
}

impl AnalysisSnapshot {
    pub fn summary(&self) -> BatchSummary {
        BatchSummary::from_records(self.records.iter().map(|(_, r)| r))
    }

    pub fn record(&self, index: ClientIndex) -> Option<&ResultRecord> {
        self.records
            .iter()
            .find(|(idx, _)| *idx == index)
            .map(|(_, r)| r)
    }
}

/// Tunables for [`AnalysisController`].
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    /// Fail a run that sees no stream activity for this long. Disabled when `None`.
    pub stall_timeout: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Cannot analyze an empty batch")]
    EmptyBatch,

    #[error("Failed to create job: {0}")]
    CreateJob(#[source] JobClientError),

    /// `reset` or a newer `analyze` took over while this one was starting.
    #[error("Analysis was superseded")]
    Superseded,
}

// ---------------------------------------------------------------------------
// Result store
// ---------------------------------------------------------------------------

/// Records keyed by client index. The first record for an index wins.
#[derive(Debug, Default)]
pub(crate) struct ResultStore {
    records: BTreeMap<ClientIndex, ResultRecord>,
}

impl ResultStore {
    /// Insert a record; returns `false` when `index` already has one.
    fn insert(&mut self, index: ClientIndex, record: ResultRecord) -> bool {
        match self.records.entry(index) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn to_vec(&self) -> Vec<(ClientIndex, ResultRecord)> {
        self.records.iter().map(|(k, v)| (*k, v.clone())).collect()
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RunState {
    generation: u64,
    status: AnalysisStatus,
    job_id: Option<String>,
    total_files: usize,
    store: ResultStore,
    diagnostics: Vec<Diagnostic>,
    pending_unmatched: Vec<String>,
    error: Option<String>,
    started_at: Option<Instant>,
    last_activity: Option<Instant>,
    elapsed: Option<Duration>,
    subscription: Option<Subscription>,
    upload_cancel: Option<CancellationToken>,
    uploads: Option<JoinHandle<UploadReport>>,
}

impl RunState {
    fn close_subscription(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.close();
        }
    }

    fn cancel_uploads(&mut self) {
        if let Some(token) = self.upload_cancel.take() {
            token.cancel();
        }
    }

    /// Tear down the current run and bump the generation.
    fn begin_generation(&mut self) -> u64 {
        self.close_subscription();
        self.cancel_uploads();
        let generation = self.generation + 1;
        *self = RunState {
            generation,
            ..Default::default()
        };
        generation
    }

    /// Store a record for `index` if it belongs to this batch and has none
    /// yet. The store never grows past `total_files`.
    fn record(&mut self, index: ClientIndex, record: ResultRecord) -> bool {
        if index.get() as usize >= self.total_files {
            tracing::warn!(
                client_index = %index,
                total = self.total_files,
                "Ignoring record outside the batch",
            );
            return false;
        }
        if !self.store.insert(index, record) {
            tracing::debug!(client_index = %index, "Duplicate record ignored");
            return false;
        }
        true
    }

    fn fail(&mut self, message: String) {
        self.status = AnalysisStatus::Error;
        self.error = Some(message);
        self.close_subscription();
        self.cancel_uploads();
    }

    /// Complete the run once every expected record is present.
    fn check_completion(&mut self) {
        if !self.status.is_active() || self.store.len() < self.total_files {
            return;
        }
        self.status = AnalysisStatus::Complete;
        self.elapsed = self.started_at.map(|t| t.elapsed());
        if !self.pending_unmatched.is_empty() {
            let rows = std::mem::take(&mut self.pending_unmatched);
            self.diagnostics.push(Diagnostic::UnmatchedRows(rows));
        }
        self.close_subscription();
        tracing::info!(
            job_id = self.job_id.as_deref().unwrap_or(""),
            records = self.store.len(),
            elapsed_ms = self.elapsed.map(|e| e.as_millis() as u64).unwrap_or(0),
            "Analysis complete",
        );
    }

    fn snapshot(&self) -> AnalysisSnapshot {
        AnalysisSnapshot {
            generation: self.generation,
            status: self.status,
            job_id: self.job_id.clone(),
            total_files: self.total_files,
            progress: self.store.len(),
            records: self.store.to_vec(),
            diagnostics: self.diagnostics.clone(),
            error: self.error.clone(),
            elapsed: self.elapsed,
        }
    }
}

struct Shared<A: JobApi> {
    api: Arc<A>,
    config: ControllerConfig,
    state: Mutex<RunState>,
    snapshots: watch::Sender<AnalysisSnapshot>,
}

impl<A: JobApi> Shared<A> {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &RunState) {
        self.snapshots.send_replace(state.snapshot());
    }

    fn apply(&self, generation: u64, event: StreamEvent) {
        let mut state = self.lock();
        if state.generation != generation {
            tracing::debug!(generation, event = event.name(), "Ignoring event from previous run");
            return;
        }
        if !state.status.is_active() {
            return;
        }
        state.last_activity = Some(Instant::now());

        match event {
            StreamEvent::Meta(meta) => {
                let received = state.store.len();
                let total = if meta.total_files < received {
                    tracing::warn!(
                        server = meta.total_files,
                        received,
                        "Server total is below records already received",
                    );
                    received
                } else {
                    meta.total_files
                };
                if total != state.total_files {
                    tracing::info!(
                        local = state.total_files,
                        server = total,
                        "Correcting total file count from server",
                    );
                    state.total_files = total;
                }
            }
            StreamEvent::Result(data) => {
                let accepted = state.record(data.client_index, ResultRecord::Success(data.result));
                if accepted && state.status == AnalysisStatus::Uploading {
                    state.status = AnalysisStatus::Streaming;
                }
            }
            StreamEvent::Error(data) => match ClientIndex::from_wire(data.client_index) {
                Some(index) => {
                    let failure = LabelFailure {
                        file_id: data.file_id,
                        filename: data.filename,
                        message: data.error,
                    };
                    state.record(index, ResultRecord::Failure(failure));
                }
                None => {
                    tracing::warn!(error = %data.error, "Job-level error from server");
                    state.diagnostics.push(Diagnostic::JobError(data.error));
                }
            },
            StreamEvent::Done(done) => {
                state.pending_unmatched = done.unmatched_csv_rows;
                state.close_subscription();
            }
        }

        state.check_completion();
        self.publish(&state);
    }

    /// Fail the run if it goes `timeout` without stream activity.
    async fn watch_stall(self: Arc<Self>, generation: u64, timeout: Duration) {
        loop {
            let deadline = {
                let mut state = self.lock();
                if state.generation != generation || !state.status.is_active() {
                    return;
                }
                let last = state.last_activity.unwrap_or_else(Instant::now);
                if last.elapsed() >= timeout {
                    let message = format!("No results received for {}s", timeout.as_secs());
                    tracing::warn!(job_id = state.job_id.as_deref().unwrap_or(""), "{message}");
                    state.fail(message);
                    self.publish(&state);
                    return;
                }
                last + timeout
            };
            tokio::time::sleep_until(deadline).await;
        }
    }
}

/// Orchestrates one batch analysis at a time over a [`JobApi`].
pub struct AnalysisController<A: JobApi> {
    shared: Arc<Shared<A>>,
}

impl<A: JobApi> Clone for AnalysisController<A> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<A: JobApi> AnalysisController<A> {
    pub fn new(api: Arc<A>, config: ControllerConfig) -> Self {
        let (snapshots, _) = watch::channel(AnalysisSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                api,
                config,
                state: Mutex::new(RunState::default()),
                snapshots,
            }),
        }
    }

    /// Start analysing `files`, superseding any run in progress.
    ///
    /// Returns the job id once the job exists and uploads have been
    /// started. Results arrive asynchronously; observe them through
    /// [`snapshot`](Self::snapshot) or [`watch`](Self::watch).
    pub async fn analyze(
        &self,
        files: Vec<SourceFile>,
        application_data: Option<Vec<ApplicationRow>>,
    ) -> Result<String, ControllerError> {
        if files.is_empty() {
            return Err(ControllerError::EmptyBatch);
        }

        let generation = {
            let mut state = self.shared.lock();
            let generation = state.begin_generation();
            let now = Instant::now();
            state.status = AnalysisStatus::Uploading;
            state.total_files = files.len();
            state.started_at = Some(now);
            state.last_activity = Some(now);
            self.shared.publish(&state);
            generation
        };
        tracing::info!(generation, files = files.len(), "Starting analysis");

        let created = self
            .shared
            .api
            .create_job(files.len(), application_data.as_deref())
            .await;

        let job_id = {
            let mut state = self.shared.lock();
            if state.generation != generation {
                return Err(ControllerError::Superseded);
            }
            match created {
                Ok(created) => {
                    if !created.duplicate_label_ids.is_empty() {
                        state
                            .diagnostics
                            .push(Diagnostic::DuplicateLabelIds(created.duplicate_label_ids));
                    }
                    state.job_id = Some(created.job_id.clone());
                    self.shared.publish(&state);
                    created.job_id
                }
                Err(e) => {
                    tracing::error!(error = %e, "Job creation failed");
                    state.fail(e.to_string());
                    self.shared.publish(&state);
                    return Err(ControllerError::CreateJob(e));
                }
            }
        };

        let stream = self.shared.api.open_stream(&job_id).await;

        let mut state = self.shared.lock();
        if state.generation != generation {
            return Err(ControllerError::Superseded);
        }

        match stream {
            Ok(stream) => {
                let weak: Weak<Shared<A>> = Arc::downgrade(&self.shared);
                state.subscription = Some(Subscription::spawn(job_id.clone(), stream, move |event| {
                    if let Some(shared) = weak.upgrade() {
                        shared.apply(generation, event);
                    }
                }));
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to open result stream");
            }
        }

        let cancel = CancellationToken::new();
        state.upload_cancel = Some(cancel.clone());
        let scheduler = UploadScheduler::new(self.shared.api.clone());
        let upload_job_id = job_id.clone();
        state.uploads = Some(tokio::spawn(async move {
            scheduler.upload_all(&upload_job_id, files, &cancel).await
        }));

        if let Some(timeout) = self.shared.config.stall_timeout {
            tokio::spawn(self.shared.clone().watch_stall(generation, timeout));
        }

        Ok(job_id)
    }

    /// Apply one stream event produced under `generation`.
    ///
    /// Events from a previous generation, or arriving while no run is
    /// active, are ignored.
    pub fn apply(&self, generation: u64, event: StreamEvent) {
        self.shared.apply(generation, event);
    }

    /// Abandon the current run and return to `Idle`.
    pub fn reset(&self) {
        let mut state = self.shared.lock();
        let generation = state.begin_generation();
        tracing::info!(generation, "Analysis reset");
        self.shared.publish(&state);
    }

    /// Wait for the current run's uploads to settle.
    ///
    /// Returns `None` when no upload task is pending (already joined, never
    /// started, or discarded by `reset`).
    pub async fn join_uploads(&self) -> Option<UploadReport> {
        let handle = self.shared.lock().uploads.take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "Upload task failed");
                None
            }
        }
    }

    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    pub fn status(&self) -> AnalysisStatus {
        self.shared.lock().status
    }

    pub fn snapshot(&self) -> AnalysisSnapshot {
        self.shared.lock().snapshot()
    }

    /// Receiver updated after every state change.
    pub fn watch(&self) -> watch::Receiver<AnalysisSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Whether the current run holds an open subscription.
    pub fn is_subscribed(&self) -> bool {
        self.shared
            .lock()
            .subscription
            .as_ref()
            .is_some_and(|s| !s.is_closed())
    }
}
