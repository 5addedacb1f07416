//! Extractor adapters: one per modality, each turning a file on disk into a
//! page- or segment-tagged text stream. The raw extraction libraries
//! (PDF/OCR/ASR) are out of scope; these are thin wrappers establishing the
//! `Extractor` capability boundary that a real deployment plugs concrete
//! extraction crates into.

use crate::chunker::Segment;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("unsupported MIME type: {0}")]
    UnsupportedMime(String),
    #[error("extraction failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Vec<Segment>, ExtractionError>;
}

/// Plain-text extractor: the whole file is one untagged page.
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<Segment>, ExtractionError> {
        let text = std::fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Segment { page_number: None, text }])
    }
}

/// Tagged-variant dispatch over the extractor capability set, keyed by MIME
/// type and registered statically at startup — no runtime code loading.
pub struct ExtractorRegistry {
    text: PlainTextExtractor,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self { text: PlainTextExtractor }
    }
}

impl ExtractorRegistry {
    pub fn extract(&self, mime: &str, path: &Path) -> Result<Vec<Segment>, ExtractionError> {
        match mime {
            "text/plain" | "text/markdown" => self.text.extract(path),
            // PDF, image (OCR), audio (ASR), and office-document extraction
            // are provided by an external collaborator in a real deployment;
            // this core only defines the dispatch point they plug into.
            "application/pdf" | "image/png" | "image/jpeg" | "audio/mpeg" | "audio/wav"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Err(ExtractionError::Failed(format!(
                    "no extractor registered for {mime} in this deployment"
                )))
            }
            other => Err(ExtractionError::UnsupportedMime(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use std::io::Write;

    #[test]
    fn plain_text_extractor_yields_single_untagged_segment() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "hello world").unwrap();
        let registry = ExtractorRegistry::default();
        let segments = registry.extract("text/plain", file.path()).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].page_number, None);
    }

    #[test]
    fn empty_file_yields_zero_segments() {
        let file = NamedTempFile::new().unwrap();
        let registry = ExtractorRegistry::default();
        let segments = registry.extract("text/plain", file.path()).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn unregistered_mime_fails() {
        let registry = ExtractorRegistry::default();
        let err = registry.extract("application/octet-stream", Path::new("x")).unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedMime(_)));
    }
}
