//! Client for the label analysis service.
//!
//! - [`api`] wraps the job REST endpoints behind the [`JobApi`] trait.
//! - [`messages`] and [`sse`] decode the per-job result stream.
//! - [`subscription`] owns the task consuming that stream.
//! - [`scheduler`] uploads a batch in bounded-concurrency chunks.
//! - [`controller`] ties them together into the analysis state machine.

pub mod api;
pub mod controller;
pub mod messages;
pub mod scheduler;
pub mod sse;
pub mod subscription;

pub use api::{JobApi, JobClient, JobClientError};
pub use controller::{AnalysisController, AnalysisSnapshot, AnalysisStatus, ControllerConfig, ControllerError};
pub use messages::StreamEvent;
