//! Scripted in-memory [`JobApi`] shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use labelcheck_client::api::{JobApi, JobClientError, JobCreated, UploadAck, UploadedFile};
use labelcheck_client::messages::{parse_event, StreamEvent};
use labelcheck_client::sse::{EventStream, StreamError};
use labelcheck_core::reference::ApplicationRow;
use labelcheck_core::types::{ClientIndex, SourceFile};
use tokio::sync::Semaphore;

pub const JOB_ID: &str = "job-1";

pub type StreamSender = UnboundedSender<Result<StreamEvent, StreamError>>;

/// Records every call and lets tests script failures and timing.
#[derive(Default)]
pub struct FakeApi {
    create_error: Option<(u16, String)>,
    duplicate_label_ids: Vec<String>,
    stream_error: bool,
    upload_delay: Duration,
    /// Chunks whose first client index is listed here fail.
    failing_chunks: HashSet<u32>,
    gate: Option<Semaphore>,

    pub creates: AtomicUsize,
    pub completes: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    settled: AtomicUsize,
    pub settled_at_complete: Mutex<Vec<usize>>,
    pub uploads: Mutex<Vec<Vec<u32>>>,
    pub application_data: Mutex<Option<Vec<ApplicationRow>>>,
    streams: Mutex<Vec<StreamSender>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_error(mut self, status: u16, message: &str) -> Self {
        self.create_error = Some((status, message.to_string()));
        self
    }

    pub fn with_duplicates(mut self, ids: &[&str]) -> Self {
        self.duplicate_label_ids = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_stream_error(mut self) -> Self {
        self.stream_error = true;
        self
    }

    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    pub fn failing_chunk(mut self, first_index: u32) -> Self {
        self.failing_chunks.insert(first_index);
        self
    }

    /// Hold every upload until [`open_gate`](Self::open_gate) is called.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.completes.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn sorted_uploads(&self) -> Vec<Vec<u32>> {
        let mut uploads = self.uploads.lock().unwrap().clone();
        uploads.sort();
        uploads
    }

    pub fn streams_opened(&self) -> usize {
        self.streams.lock().unwrap().len()
    }

    /// Sender feeding the `n`th stream opened on this fake.
    pub fn stream(&self, n: usize) -> StreamSender {
        self.streams.lock().unwrap()[n].clone()
    }

    /// Push one event down the `n`th stream.
    pub fn emit(&self, n: usize, event: StreamEvent) {
        // The subscription may already be closed; that is what some tests check.
        let _ = self.stream(n).unbounded_send(Ok(event));
    }
}

#[async_trait]
impl JobApi for FakeApi {
    async fn create_job(
        &self,
        _total_files: usize,
        application_data: Option<&[ApplicationRow]>,
    ) -> Result<JobCreated, JobClientError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        *self.application_data.lock().unwrap() = application_data.map(|rows| rows.to_vec());
        if let Some((status, message)) = &self.create_error {
            return Err(JobClientError::Api {
                status: *status,
                message: message.clone(),
            });
        }
        Ok(JobCreated {
            job_id: JOB_ID.to_string(),
            duplicate_label_ids: self.duplicate_label_ids.clone(),
        })
    }

    async fn upload_chunk(
        &self,
        _job_id: &str,
        chunk: &[(SourceFile, ClientIndex)],
    ) -> Result<UploadAck, JobClientError> {
        let indices: Vec<u32> = chunk.iter().map(|(_, idx)| idx.get()).collect();
        self.uploads.lock().unwrap().push(indices.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.settled.fetch_add(1, Ordering::SeqCst);

        if self.failing_chunks.contains(&indices[0]) {
            return Err(JobClientError::Api {
                status: 500,
                message: "Internal Server Error".into(),
            });
        }
        Ok(UploadAck {
            files: chunk
                .iter()
                .enumerate()
                .map(|(i, (file, idx))| UploadedFile {
                    file_id: i as i64,
                    client_index: *idx,
                    filename: file.name().to_string(),
                })
                .collect(),
        })
    }

    async fn complete_job(&self, _job_id: &str) -> Result<(), JobClientError> {
        self.completes.fetch_add(1, Ordering::SeqCst);
        self.settled_at_complete
            .lock()
            .unwrap()
            .push(self.settled.load(Ordering::SeqCst));
        Ok(())
    }

    fn stream_url(&self, job_id: &str) -> String {
        format!("fake://jobs/{job_id}/stream")
    }

    async fn open_stream(&self, _job_id: &str) -> Result<EventStream, StreamError> {
        if self.stream_error {
            return Err(StreamError::Status {
                status: 404,
                message: "Job not found".into(),
            });
        }
        let (tx, rx) = mpsc::unbounded();
        self.streams.lock().unwrap().push(tx);
        Ok(rx.boxed())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn files(n: usize) -> Vec<SourceFile> {
    (0..n)
        .map(|i| {
            SourceFile::new(
                format!("label_{i}.jpg"),
                vec![0xFF, 0xD8, i as u8],
                "image/jpeg",
                chrono::Utc::now(),
            )
        })
        .collect()
}

pub fn meta(total_files: usize) -> StreamEvent {
    event("meta", serde_json::json!({ "job_id": JOB_ID, "total_files": total_files }))
}

pub fn result(index: u32, passed: bool) -> StreamEvent {
    let issues = if passed {
        serde_json::json!([])
    } else {
        serde_json::json!([{
            "field": "government_warning",
            "severity": "critical",
            "message": "Government warning missing",
            "issue_type": "presence"
        }])
    };
    event(
        "result",
        serde_json::json!({
            "client_index": index,
            "file_id": index,
            "filename": format!("label_{index}.jpg"),
            "data": { "brand_name": "Old Tom" },
            "compliance": { "passed": passed, "issues": issues }
        }),
    )
}

pub fn item_error(index: i64, message: &str) -> StreamEvent {
    event(
        "error",
        serde_json::json!({
            "client_index": index,
            "file_id": index,
            "filename": if index >= 0 { format!("label_{index}.jpg") } else { String::new() },
            "error": message
        }),
    )
}

pub fn done(unmatched: &[&str]) -> StreamEvent {
    event("done", serde_json::json!({ "unmatched_csv_rows": unmatched }))
}

fn event(name: &str, data: serde_json::Value) -> StreamEvent {
    parse_event(name, &data.to_string()).unwrap()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
