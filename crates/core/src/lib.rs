//! Domain types and pure logic for the label batch analysis client.
//!
//! This crate has no internal dependencies and no network code:
//!
//! - [`types`]: source files, client indices, accepted media types.
//! - [`result`]: per-item result records and derived outcome statistics.
//! - [`selection`]: operator file selection with ceiling and de-duplication.
//! - [`reference`]: reference-row CSV parsing.
//! - [`preprocess`]: image normalisation before upload.

pub mod error;
pub mod preprocess;
pub mod reference;
pub mod result;
pub mod selection;
pub mod types;

pub use error::CoreError;
