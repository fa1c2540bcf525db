//! Shared primitive types: timestamps, client indices, and source files.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Media types accepted on the preprocessing / upload path.
pub const MEDIA_TYPE_JPEG: &str = "image/jpeg";
pub const MEDIA_TYPE_PNG: &str = "image/png";
pub const MEDIA_TYPE_WEBP: &str = "image/webp";

/// All media types the analysis service accepts.
pub const ACCEPTED_MEDIA_TYPES: &[&str] = &[MEDIA_TYPE_JPEG, MEDIA_TYPE_PNG, MEDIA_TYPE_WEBP];

/// Hard ceiling on files per job and, independently, on reference rows.
pub const MAX_BATCH_ITEMS: usize = 300;

/// Returns `true` when `media_type` is one of [`ACCEPTED_MEDIA_TYPES`].
pub fn is_accepted_media_type(media_type: &str) -> bool {
    ACCEPTED_MEDIA_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(media_type))
}

// ---------------------------------------------------------------------------
// ClientIndex
// ---------------------------------------------------------------------------

/// Position of a file in the job's file list.
///
/// Assigned once when analysis starts and stable for the life of the job.
/// It is the only correlation key between an uploaded file and its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIndex(pub u32);

impl ClientIndex {
    pub fn get(self) -> u32 {
        self.0
    }

    /// Convert a wire value. Negative values are job-level sentinels and
    /// have no index.
    pub fn from_wire(value: i64) -> Option<Self> {
        u32::try_from(value).ok().map(Self)
    }
}

impl fmt::Display for ClientIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SourceFile
// ---------------------------------------------------------------------------

/// A file selected by the operator. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    name: String,
    bytes: Bytes,
    media_type: String,
    modified: Timestamp,
}

impl SourceFile {
    pub fn new(
        name: impl Into<String>,
        bytes: impl Into<Bytes>,
        media_type: impl Into<String>,
        modified: Timestamp,
    ) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            media_type: media_type.into(),
            modified,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The file content. Cloning is cheap (reference counted).
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Declared media type, e.g. `image/png`.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn modified(&self) -> Timestamp {
        self.modified
    }

    /// Whether the declared media type is any `image/*` type.
    pub fn is_image(&self) -> bool {
        self.media_type
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
    }

    /// File name without its final extension.
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(0) | None => &self.name,
            Some(dot) => &self.name[..dot],
        }
    }
}
