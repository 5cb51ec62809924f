use std::io::Read;
use std::path::Path;
use std::pin::Pin;

use crate::document::{DEFAULT_MAX_FILE_SIZE, DocumentLoader};
use crate::error::IngestionError;

/// DOCX text extraction: reads `word/document.xml` from the OOXML archive
/// and collects `w:t` text runs, with a newline per paragraph.
pub struct DocxLoader {
    pub max_file_size: u64,
}

impl Default for DocxLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, IngestionError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| IngestionError::ParseFailure(e.to_string()))?;
    let mut xml = Vec::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| IngestionError::ParseFailure(format!("word/document.xml: {e}")))?
        .read_to_end(&mut xml)
        .map_err(|e| IngestionError::ParseFailure(e.to_string()))?;
    extract_text_runs(&xml)
}

fn extract_text_runs(xml: &[u8]) -> Result<String, IngestionError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text_run = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text_run = true,
            Ok(Event::Text(t)) if in_text_run => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                // paragraph boundary
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(IngestionError::ParseFailure(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

impl DocumentLoader for DocxLoader {
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
            tokio::task::spawn_blocking(move || extract_docx(&bytes))
                .await
                .map_err(|e| IngestionError::ParseFailure(format!("docx task panicked: {e}")))?
        })
    }

    fn supported_extensions(&self) -> &[&str] {
        &["docx"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_docx(document_xml: &str) -> Vec<u8> {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            writer
                .start_file("word/document.xml", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(document_xml.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn extracts_text_runs_with_paragraph_breaks() {
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>first paragraph</w:t></w:r></w:p>
    <w:p><w:r><w:t>second</w:t></w:r><w:r><w:t> paragraph</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let text = extract_docx(&make_docx(xml)).unwrap();
        assert_eq!(text.trim(), "first paragraph\nsecond paragraph");
    }

    #[test]
    fn not_a_zip_is_parse_failure() {
        let result = extract_docx(b"definitely not a zip");
        assert!(matches!(result, Err(IngestionError::ParseFailure(_))));
    }

    #[test]
    fn zip_without_document_xml_is_parse_failure() {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            writer
                .start_file("other.xml", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"<x/>").unwrap();
            writer.finish().unwrap();
        }
        let result = extract_docx(&cursor.into_inner());
        assert!(matches!(result, Err(IngestionError::ParseFailure(_))));
    }

    #[tokio::test]
    async fn loads_from_disk() {
        let xml = r#"<w:document xmlns:w="ns"><w:body><w:p><w:r><w:t>hello docx</w:t></w:r></w:p></w:body></w:document>"#;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.docx");
        std::fs::write(&file, make_docx(xml)).unwrap();

        let content = DocxLoader::default().load(&file).await.unwrap();
        assert_eq!(content.trim(), "hello docx");
    }
}
