use std::path::Path;
use std::pin::Pin;

use crate::document::{DEFAULT_MAX_FILE_SIZE, DocumentLoader};
use crate::error::IngestionError;

/// PDF text extraction. Parsing is CPU-bound, so it runs on the blocking
/// thread pool.
pub struct PdfLoader {
    pub max_file_size: u64,
}

impl Default for PdfLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl DocumentLoader for PdfLoader {
    fn load(
        &self,
        path: &Path,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, IngestionError>> + Send + '_>>
    {
        let path = path.to_path_buf();
        let max_size = self.max_file_size;
        Box::pin(async move {
            let meta = tokio::fs::metadata(&path).await?;
            if meta.len() > max_size {
                return Err(IngestionError::FileTooLarge {
                    size: meta.len(),
                    max: max_size,
                });
            }

            let bytes = tokio::fs::read(&path).await?;
            tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text_from_mem(&bytes)
                    .map_err(|e| IngestionError::ParseFailure(e.to_string()))
            })
            .await
            .map_err(|e| IngestionError::ParseFailure(format!("pdf task panicked: {e}")))?
        })
    }

    fn supported_extensions(&self) -> &[&str] {
        &["pdf"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn corrupt_pdf_is_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.pdf");
        std::fs::write(&file, b"not a pdf at all").unwrap();

        let result = PdfLoader::default().load(&file).await;
        assert!(matches!(result, Err(IngestionError::ParseFailure(_))));
    }

    #[tokio::test]
    async fn missing_pdf_is_io_error() {
        let result = PdfLoader::default().load(Path::new("/nonexistent/x.pdf")).await;
        assert!(matches!(result, Err(IngestionError::Io(_))));
    }
}
