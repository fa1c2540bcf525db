//! Result stream event types and parser.
//!
//! The analysis service pushes named server-sent events (`meta`, `result`,
//! `error`, `done`), each with a JSON `data` payload. This module turns an
//! `(event name, data)` pair into a strongly-typed [`StreamEvent`].

use labelcheck_core::result::LabelResult;
use labelcheck_core::types::ClientIndex;
use serde::Deserialize;

/// All known result stream events.
///
/// Deserialized via the adjacently-tagged `"event"` name with associated
/// `"data"` content.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum StreamEvent {
    /// Authoritative job metadata, sent first on every connection.
    #[serde(rename = "meta")]
    Meta(MetaData),

    /// One image was analysed successfully.
    #[serde(rename = "result")]
    Result(ResultData),

    /// Analysis failed for one image, or for the job as a whole when
    /// `client_index` is negative.
    #[serde(rename = "error")]
    Error(ErrorData),

    /// No further results will be sent for this job.
    #[serde(rename = "done")]
    Done(DoneData),
}

/// Payload for `meta` events.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaData {
    #[serde(default)]
    pub job_id: Option<String>,
    pub total_files: usize,
}

/// Payload for `result` events.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultData {
    pub client_index: ClientIndex,
    #[serde(flatten)]
    pub result: LabelResult,
}

/// Payload for `error` events.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    /// Signed on the wire: the service reports job-level failures with `-1`.
    pub client_index: i64,
    #[serde(default)]
    pub file_id: Option<i64>,
    #[serde(default)]
    pub filename: String,
    pub error: String,
}

/// Payload for `done` events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DoneData {
    /// Reference rows that never matched an uploaded image.
    #[serde(default)]
    pub unmatched_csv_rows: Vec<String>,
}

impl StreamEvent {
    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Meta(_) => "meta",
            StreamEvent::Result(_) => "result",
            StreamEvent::Error(_) => "error",
            StreamEvent::Done(_) => "done",
        }
    }
}

/// Parse one named event into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown event names.
/// Callers should log and continue.
pub fn parse_event(event: &str, data: &str) -> Result<StreamEvent, serde_json::Error> {
    let data: serde_json::Value = serde_json::from_str(data)?;
    serde_json::from_value(serde_json::json!({ "event": event, "data": data }))
}
