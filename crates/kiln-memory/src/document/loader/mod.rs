mod docx;
mod pdf;
mod text;

pub use docx::DocxLoader;
pub use pdf::PdfLoader;
pub use text::TextLoader;

use std::path::Path;

use crate::error::IngestionError;
use crate::types::FileType;

use super::DocumentLoader;

/// Detect the file type from the extension and extract plain text with the
/// matching loader.
///
/// # Errors
///
/// `UnsupportedFormat` for unknown extensions; loader-specific errors
/// otherwise.
pub async fn extract_text(path: &Path) -> Result<(String, FileType), IngestionError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let Some(file_type) = FileType::from_extension(ext) else {
        return Err(IngestionError::UnsupportedFormat {
            extension: ext.to_string(),
        });
    };

    let content = match file_type {
        FileType::Txt | FileType::Md => TextLoader::default().load(path).await?,
        FileType::Pdf => PdfLoader::default().load(path).await?,
        FileType::Docx => DocxLoader::default().load(path).await?,
    };
    Ok((content, file_type))
}
