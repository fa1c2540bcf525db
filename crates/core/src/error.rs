/// Errors raised by the input acceptance and domain layer.
///
/// Validation errors are surfaced synchronously at the point where files or
/// reference data are accepted and never affect an already-accepted batch.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
}
