use common::{error::AppError, storage::types::document_chunk::DocumentChunk};
use state_machines::core::GuardError;
use tracing::{debug, instrument};

use super::{
    context::PipelineContext,
    state::{Chunked, Embedded, Extracted, Fetched, IngestionMachine, Persisted, Ready},
};

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, attempt = ctx.attempt, document_id = %ctx.document.id)
)]
pub async fn fetch(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Fetched>, AppError> {
    let bytes = ctx
        .services
        .fetch_document_bytes(&ctx.document.object_key)
        .await?;

    debug!(
        job_id = %ctx.job_id,
        object_key = %ctx.document.object_key,
        byte_count = bytes.len(),
        "document bytes fetched"
    );
    ctx.raw_bytes = Some(bytes);

    machine
        .fetch()
        .map_err(|(_, guard)| map_guard_error("fetch", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, attempt = ctx.attempt, document_id = %ctx.document.id)
)]
pub async fn extract(
    machine: IngestionMachine<(), Fetched>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Extracted>, AppError> {
    let bytes = ctx.raw_bytes()?.clone();
    let text = ctx
        .services
        .extract_text(&bytes, &ctx.document.mime_type)
        .await?;

    if text.trim().is_empty() {
        return Err(AppError::Extraction(
            "text extraction returned empty content".into(),
        ));
    }

    debug!(
        job_id = %ctx.job_id,
        text_chars = text.chars().count(),
        "text extracted"
    );
    ctx.text = Some(text);
    ctx.raw_bytes = None;

    machine
        .extract()
        .map_err(|(_, guard)| map_guard_error("extract", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, attempt = ctx.attempt, document_id = %ctx.document.id)
)]
pub async fn chunk(
    machine: IngestionMachine<(), Extracted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Chunked>, AppError> {
    let chunk_texts = ctx.services.split_chunks(ctx.text()?)?;

    if chunk_texts.is_empty() {
        return Err(AppError::Extraction(
            "document produced zero chunks; file may be empty or unreadable".into(),
        ));
    }

    debug!(job_id = %ctx.job_id, chunk_count = chunk_texts.len(), "text chunked");
    ctx.chunk_texts = chunk_texts;
    ctx.text = None;

    machine
        .chunk()
        .map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, attempt = ctx.attempt, document_id = %ctx.document.id)
)]
pub async fn embed(
    machine: IngestionMachine<(), Chunked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Embedded>, AppError> {
    let chunk_texts = std::mem::take(&mut ctx.chunk_texts);
    let embeddings = ctx.services.embed_chunks(chunk_texts.clone()).await?;

    if embeddings.len() != chunk_texts.len() {
        // A mismatch here would silently corrupt the index.
        return Err(AppError::Embedding(format!(
            "embedding count mismatch: got {} embeddings for {} chunks",
            embeddings.len(),
            chunk_texts.len()
        )));
    }

    // Classification is copied onto each chunk at write time so query-side
    // filtering needs no join back to the document.
    let chunks: Vec<DocumentChunk> = chunk_texts
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(index, (content, embedding))| {
            DocumentChunk::new(
                ctx.document.id.clone(),
                index as u32,
                content,
                embedding,
                ctx.document.security_level,
            )
        })
        .collect();

    debug!(job_id = %ctx.job_id, chunk_count = chunks.len(), "chunks embedded");
    ctx.chunks = chunks;

    machine
        .embed()
        .map_err(|(_, guard)| map_guard_error("embed", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(job_id = %ctx.job_id, attempt = ctx.attempt, document_id = %ctx.document.id)
)]
pub async fn persist(
    machine: IngestionMachine<(), Embedded>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Persisted>, AppError> {
    let chunks = ctx.take_chunks()?;
    let chunk_count = chunks.len();

    DocumentChunk::replace_for_document(&ctx.document.id, chunks, ctx.db).await?;

    debug!(
        job_id = %ctx.job_id,
        document_id = %ctx.document.id,
        chunk_count,
        "chunk set persisted"
    );

    machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}
