//! Reading label images and reference data from disk.

use std::path::{Path, PathBuf};

use labelcheck_core::reference::{parse_reference_csv, ApplicationRow};
use labelcheck_core::types::{SourceFile, MEDIA_TYPE_JPEG, MEDIA_TYPE_PNG, MEDIA_TYPE_WEBP};
use labelcheck_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {source}", path.display())]
    Reference {
        path: PathBuf,
        #[source]
        source: CoreError,
    },
}

/// Media type implied by a file extension. Unrecognised extensions map to
/// `application/octet-stream` so selection reports them as unsupported.
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => MEDIA_TYPE_JPEG,
        Some("png") => MEDIA_TYPE_PNG,
        Some("webp") => MEDIA_TYPE_WEBP,
        _ => "application/octet-stream",
    }
}

/// Read one file into a [`SourceFile`] named after its final path component.
pub async fn load_source_file(path: &Path) -> Result<SourceFile, InputError> {
    let read_err = |source: std::io::Error| InputError::Read {
        path: path.to_path_buf(),
        source,
    };
    let bytes = tokio::fs::read(path).await.map_err(read_err)?;
    let modified = tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .map(chrono::DateTime::<chrono::Utc>::from)
        .unwrap_or_else(|_| chrono::Utc::now());

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(SourceFile::new(name, bytes, media_type_for(path), modified))
}

/// Read every path, failing on the first unreadable one.
pub async fn load_source_files(paths: &[PathBuf]) -> Result<Vec<SourceFile>, InputError> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(load_source_file(path).await?);
    }
    Ok(files)
}

/// Read and parse a reference CSV.
pub async fn load_reference(path: &Path) -> Result<Vec<ApplicationRow>, InputError> {
    let data = tokio::fs::read(path).await.map_err(|source| InputError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_reference_csv(&data).map_err(|source| InputError::Reference {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_from_extension() {
        assert_eq!(media_type_for(Path::new("a/front.JPG")), MEDIA_TYPE_JPEG);
        assert_eq!(media_type_for(Path::new("back.jpeg")), MEDIA_TYPE_JPEG);
        assert_eq!(media_type_for(Path::new("neck.png")), MEDIA_TYPE_PNG);
        assert_eq!(media_type_for(Path::new("side.webp")), MEDIA_TYPE_WEBP);
        assert_eq!(media_type_for(Path::new("scan.tiff")), "application/octet-stream");
        assert_eq!(media_type_for(Path::new("README")), "application/octet-stream");
    }
}
