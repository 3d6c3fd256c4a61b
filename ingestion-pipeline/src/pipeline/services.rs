use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::store::StorageManager,
    utils::embedding::EmbeddingProvider,
};

use crate::{chunking, extraction::TextExtractor};

/// External collaborators of the ingestion pipeline, grouped behind one
/// trait so tests can swap in failing or canned implementations.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    /// Raw bytes from object storage.
    async fn fetch_document_bytes(&self, object_key: &str) -> Result<Bytes, AppError>;

    /// Plain text out of the stored bytes.
    async fn extract_text(&self, bytes: &Bytes, mime_type: &str) -> Result<String, AppError>;

    /// Deterministic overlapping split of the extracted text.
    fn split_chunks(&self, text: &str) -> Result<Vec<String>, AppError>;

    /// One vector per chunk text, batched for throughput.
    async fn embed_chunks(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError>;

    /// Cleanup of the stored object once a job is dead-lettered.
    async fn delete_document_object(&self, object_key: &str) -> Result<(), AppError>;
}

pub struct DefaultPipelineServices {
    storage: StorageManager,
    extractor: Arc<dyn TextExtractor>,
    embedding_provider: Arc<EmbeddingProvider>,
    chunk_size: usize,
    chunk_overlap: usize,
    embed_batch_size: usize,
}

impl DefaultPipelineServices {
    pub fn new(
        storage: StorageManager,
        extractor: Arc<dyn TextExtractor>,
        embedding_provider: Arc<EmbeddingProvider>,
        chunk_size: usize,
        chunk_overlap: usize,
        embed_batch_size: usize,
    ) -> Self {
        Self {
            storage,
            extractor,
            embedding_provider,
            chunk_size,
            chunk_overlap,
            embed_batch_size,
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn fetch_document_bytes(&self, object_key: &str) -> Result<Bytes, AppError> {
        self.storage
            .get(object_key)
            .await
            .map_err(AppError::Storage)
    }

    async fn extract_text(&self, bytes: &Bytes, mime_type: &str) -> Result<String, AppError> {
        self.extractor.extract(bytes, mime_type).await
    }

    fn split_chunks(&self, text: &str) -> Result<Vec<String>, AppError> {
        chunking::split_text(text, self.chunk_size, self.chunk_overlap)
    }

    async fn embed_chunks(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        let batch_size = self.embed_batch_size.max(1);

        for batch in texts.chunks(batch_size) {
            let batch_embeddings = self
                .embedding_provider
                .embed_batch(batch.to_vec())
                .await
                .map_err(|err| AppError::Embedding(err.to_string()))?;
            embeddings.extend(batch_embeddings);
        }

        Ok(embeddings)
    }

    async fn delete_document_object(&self, object_key: &str) -> Result<(), AppError> {
        self.storage
            .delete(object_key)
            .await
            .map_err(AppError::Storage)
    }
}
