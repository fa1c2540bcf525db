//! Operator file selection with batch ceiling and de-duplication.
//!
//! A [`FileSelection`] is the set of images accepted for the next analysis
//! run. Positions in the selection become client indices when the run
//! starts.

use crate::error::CoreError;
use crate::types::{is_accepted_media_type, SourceFile, MAX_BATCH_ITEMS};

/// What happened to an incoming addition that was not rejected outright.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOutcome {
    /// Number of files appended to the selection.
    pub added: usize,
    /// Names skipped because a file with the same name and size is
    /// already accepted (or appeared earlier in the same addition).
    pub duplicates: Vec<String>,
    /// Names skipped because their media type is not accepted.
    pub unsupported: Vec<String>,
}

/// Ordered set of accepted source files.
#[derive(Debug, Clone, Default)]
pub struct FileSelection {
    files: Vec<SourceFile>,
}

impl FileSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add files to the selection.
    ///
    /// Unsupported and duplicate files are skipped. If the remaining files
    /// would push the selection past [`MAX_BATCH_ITEMS`], the whole addition
    /// is rejected and the selection is left unchanged.
    pub fn add(&mut self, incoming: Vec<SourceFile>) -> Result<AddOutcome, CoreError> {
        let mut outcome = AddOutcome::default();
        let mut accepted: Vec<SourceFile> = Vec::with_capacity(incoming.len());

        for file in incoming {
            if !is_accepted_media_type(file.media_type()) {
                outcome.unsupported.push(file.name().to_string());
                continue;
            }
            let seen = self
                .files
                .iter()
                .chain(accepted.iter())
                .any(|f| same_file(f, &file));
            if seen {
                outcome.duplicates.push(file.name().to_string());
                continue;
            }
            accepted.push(file);
        }

        let resulting = self.files.len() + accepted.len();
        if resulting > MAX_BATCH_ITEMS {
            return Err(CoreError::Validation(format!(
                "Adding {} files would bring the batch to {resulting}; maximum is {MAX_BATCH_ITEMS}",
                accepted.len()
            )));
        }

        outcome.added = accepted.len();
        self.files.extend(accepted);
        Ok(outcome)
    }

    /// Remove the file at `index`, returning it if it existed.
    pub fn remove(&mut self, index: usize) -> Option<SourceFile> {
        (index < self.files.len()).then(|| self.files.remove(index))
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    /// Consume the selection, yielding files in client-index order.
    pub fn into_files(self) -> Vec<SourceFile> {
        self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Two files are the same selection entry when name and byte size match.
fn same_file(a: &SourceFile, b: &SourceFile) -> bool {
    a.name() == b.name() && a.size() == b.size()
}
