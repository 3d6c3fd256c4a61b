use common::error::AppError;
use text_splitter::{ChunkConfig, TextSplitter};

/// Split extracted text into overlapping character chunks.
///
/// Input is whitespace-normalized first so documents full of blank lines do
/// not produce near-empty chunks, and the same bytes always split the same
/// way. Overlap must stay below the chunk size.
pub fn split_text(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<String>, AppError> {
    if chunk_size == 0 {
        return Err(AppError::Validation("chunk_size must be non-zero".into()));
    }
    if chunk_overlap >= chunk_size {
        return Err(AppError::Validation(format!(
            "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
        )));
    }

    let cleaned = clean_text(text);
    if cleaned.is_empty() {
        return Ok(Vec::new());
    }

    let chunk_config = ChunkConfig::new(chunk_size)
        .with_overlap(chunk_overlap)
        .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?;
    let splitter = TextSplitter::new(chunk_config);

    Ok(splitter.chunks(&cleaned).map(str::to_owned).collect())
}

/// Collapse any run of whitespace into a single space.
fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
