use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported source file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Txt,
    Md,
    Docx,
}

impl FileType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Txt => "txt",
            Self::Md => "md",
            Self::Docx => "docx",
        }
    }

    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Txt),
            "md" | "markdown" => Some(Self::Md),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }
}

impl std::str::FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| format!("unknown file type: {s}"))
    }
}

/// A corpus document. Content is immutable once created; metadata edits and
/// re-chunking move `updated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub path: String,
    pub file_type: FileType,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored text window of a document, the unit of embedding and retrieval.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: String,
    pub document_id: String,
    pub index: i64,
    pub content: String,
    pub word_count: i64,
    pub embedding: Option<Vec<f32>>,
    /// Fingerprint of the provider/model that produced the vector.
    pub fingerprint: Option<String>,
    pub stale: bool,
}

/// One ranked retrieval hit, produced per query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub chunk_index: i64,
    pub content: String,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_from_extension() {
        assert_eq!(FileType::from_extension("PDF"), Some(FileType::Pdf));
        assert_eq!(FileType::from_extension("markdown"), Some(FileType::Md));
        assert_eq!(FileType::from_extension("docx"), Some(FileType::Docx));
        assert_eq!(FileType::from_extension("exe"), None);
    }

    #[test]
    fn file_type_round_trip() {
        for ft in [FileType::Pdf, FileType::Txt, FileType::Md, FileType::Docx] {
            assert_eq!(FileType::from_extension(ft.as_str()), Some(ft));
        }
    }
}
