use std::path::Path;

use async_trait::async_trait;
use common::error::AppError;
use tracing::warn;

/// Boundary to the external document-extraction wrappers. Implementations
/// turn binary formats into plain text; everything else in the pipeline
/// only ever sees the extracted string.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path, extension: &str) -> Result<String, AppError>;
}

/// Placeholder wired in when no extractor is deployed: every extraction
/// fails, which routes binary formats into the raw-read fallback.
pub struct NoExtractor;

#[async_trait]
impl TextExtractor for NoExtractor {
    async fn extract(&self, _path: &Path, extension: &str) -> Result<String, AppError> {
        Err(AppError::Unavailable(format!(
            "no text extractor configured for .{extension} files"
        )))
    }
}

/// Reads ingestable file content, dispatching on the file extension.
/// Plain-text formats are read directly with invalid UTF-8 replaced;
/// document formats go through the extractor, falling back to a raw read
/// when extraction fails; anything else is rejected.
pub async fn read_file_text(
    path: &Path,
    extractor: &dyn TextExtractor,
) -> Result<String, AppError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "txt" | "md" => read_lossy(path).await,
        "pdf" | "doc" | "docx" => match extractor.extract(path, &extension).await {
            Ok(text) => Ok(text),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "text extraction failed, falling back to raw read"
                );
                read_lossy(path).await
            }
        },
        other => Err(AppError::Validation(format!(
            "Unsupported file type: .{other}"
        ))),
    }
}

async fn read_lossy(path: &Path) -> Result<String, AppError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
