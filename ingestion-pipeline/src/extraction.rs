use async_trait::async_trait;
use bytes::Bytes;
use common::error::AppError;

/// Boundary to the external text-extraction collaborator.
///
/// The pipeline hands it raw bytes plus the mime type recorded at upload and
/// expects plain text back; any failure surfaces as an `Extraction` error
/// that ends up on the document's `FAILED` status.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, bytes: &Bytes, mime_type: &str) -> Result<String, AppError>;
}

/// Extractor for formats that are already text. Binary formats (PDF, DOCX)
/// belong to an external service; routing them here fails the document with
/// an explicit message instead of indexing garbage.
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, bytes: &Bytes, mime_type: &str) -> Result<String, AppError> {
        match mime_type {
            "text/plain" | "text/markdown" => {
                let text = std::str::from_utf8(bytes).map_err(|err| {
                    AppError::Extraction(format!("document is not valid UTF-8: {err}"))
                })?;
                Ok(text.to_string())
            }
            other => Err(AppError::Extraction(format!(
                "no extractor available for mime type '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_text_passthrough() {
        let extractor = PlainTextExtractor;
        let text = extractor
            .extract(&Bytes::from_static(b"hello world"), "text/plain")
            .await
            .expect("extract");
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn test_markdown_is_treated_as_text() {
        let extractor = PlainTextExtractor;
        let text = extractor
            .extract(&Bytes::from_static(b"# Title\nbody"), "text/markdown")
            .await
            .expect("extract");
        assert!(text.contains("Title"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_an_extraction_error() {
        let extractor = PlainTextExtractor;
        let result = extractor
            .extract(&Bytes::from_static(&[0xff, 0xfe, 0x00]), "text/plain")
            .await;
        assert!(matches!(result, Err(AppError::Extraction(_))));
    }

    #[tokio::test]
    async fn test_binary_formats_are_rejected_here() {
        let extractor = PlainTextExtractor;
        let result = extractor
            .extract(&Bytes::from_static(b"%PDF-1.7"), "application/pdf")
            .await;
        assert!(matches!(result, Err(AppError::Extraction(_))));
    }
}
