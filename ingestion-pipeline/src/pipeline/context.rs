use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{document::Document, document_chunk::DocumentChunk, ingestion_job::IngestionJob},
    },
};
use tracing::error;

use super::{config::IngestionConfig, services::PipelineServices};

/// Mutable scratch space threaded through the pipeline stages. Each stage
/// reads what the previous one left behind and deposits its own output.
pub struct PipelineContext<'a> {
    pub job: &'a IngestionJob,
    pub job_id: String,
    pub attempt: u32,
    pub db: &'a SurrealDbClient,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub document: &'a Document,
    pub raw_bytes: Option<Bytes>,
    pub text: Option<String>,
    pub chunk_texts: Vec<String>,
    pub chunks: Vec<DocumentChunk>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        job: &'a IngestionJob,
        document: &'a Document,
        db: &'a SurrealDbClient,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
    ) -> Self {
        let job_id = job.id.clone();
        let attempt = job.attempts;
        Self {
            job,
            job_id,
            attempt,
            db,
            pipeline_config,
            services,
            document,
            raw_bytes: None,
            text: None,
            chunk_texts: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn raw_bytes(&self) -> Result<&Bytes, AppError> {
        self.raw_bytes
            .as_ref()
            .ok_or_else(|| AppError::InternalError("document bytes expected to be available".into()))
    }

    pub fn text(&self) -> Result<&str, AppError> {
        self.text
            .as_deref()
            .ok_or_else(|| AppError::InternalError("extracted text expected to be available".into()))
    }

    pub fn take_chunks(&mut self) -> Result<Vec<DocumentChunk>, AppError> {
        if self.chunks.is_empty() {
            return Err(AppError::InternalError(
                "embedded chunks expected to be available for persistence".into(),
            ));
        }
        Ok(std::mem::take(&mut self.chunks))
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            job_id = %self.job_id,
            document_id = %self.document.id,
            attempt = self.attempt,
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}
