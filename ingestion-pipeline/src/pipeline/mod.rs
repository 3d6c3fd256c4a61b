mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            document::Document,
            ingestion_job::{IngestionJob, JobErrorInfo},
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use tracing::{debug, info, warn};

use crate::extraction::TextExtractor;

use self::{
    context::PipelineContext,
    stages::{chunk, embed, extract, fetch, persist},
    state::ready,
};

/// Prefix on a document's error message once every retry has been used up.
pub const PERMANENT_FAILURE_PREFIX: &str = "PERMANENT_FAILURE:";

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        config: &AppConfig,
        storage: StorageManager,
        extractor: Arc<dyn TextExtractor>,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Result<Self, AppError> {
        let pipeline_config = IngestionConfig::from_app_config(config);
        let services = DefaultPipelineServices::new(
            storage,
            extractor,
            embedding_provider,
            pipeline_config.chunk_size,
            pipeline_config.chunk_overlap,
            pipeline_config.tuning.embed_batch_size,
        );

        Self::with_services(db, pipeline_config, Arc::new(services))
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            db,
            pipeline_config,
            services,
        })
    }

    /// Run one claimed job to completion.
    ///
    /// The document mirrors the outcome: `Processing` while stages run,
    /// `Indexed` inside the atomic chunk swap on success, `Failed` with the
    /// stored error otherwise. The job carries the retry bookkeeping; once
    /// attempts are exhausted it moves to the dead-letter queue and the
    /// uploaded object is removed from storage.
    #[tracing::instrument(
        skip_all,
        fields(
            job_id = %job.id,
            document_id = %job.document_id,
            attempt = job.attempts,
            worker_id = job.worker_id.as_deref().unwrap_or("unknown-worker")
        )
    )]
    pub async fn process_job(&self, job: IngestionJob) -> Result<(), AppError> {
        let processing_job = job.mark_processing(&self.db).await?;

        let document = match Document::get(&processing_job.document_id, &self.db).await {
            Ok(document) => document,
            Err(err) => {
                // Nothing to retry against; drop the job straight to the
                // dead-letter queue.
                let error_info = JobErrorInfo {
                    code: Some("document_missing".into()),
                    message: err.to_string(),
                };
                let failed = processing_job
                    .mark_failed(error_info.clone(), Duration::from_secs(0), &self.db)
                    .await?;
                failed.mark_dead_letter(error_info, &self.db).await?;
                return Err(err);
            }
        };

        Document::mark_processing(&document.id, &self.db).await?;

        match self
            .drive_pipeline(&processing_job, &document)
            .await
            .map_err(|err| {
                debug!(
                    job_id = %processing_job.id,
                    attempt = processing_job.attempts,
                    error = %err,
                    "ingestion pipeline failed"
                );
                err
            }) {
            Ok(()) => {
                processing_job.mark_succeeded(&self.db).await?;
                info!(
                    job_id = %processing_job.id,
                    document_id = %document.id,
                    attempt = processing_job.attempts,
                    "ingestion job succeeded"
                );
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                let retryable = !matches!(err, AppError::Validation(_));
                let error_info = JobErrorInfo {
                    code: None,
                    message: reason.clone(),
                };

                if retryable && processing_job.can_retry() {
                    Document::mark_failed(&document.id, &reason, &self.db).await?;
                    let delay = self.retry_delay(processing_job.attempts);
                    processing_job
                        .mark_failed(error_info, delay, &self.db)
                        .await?;
                    warn!(
                        job_id = %processing_job.id,
                        document_id = %document.id,
                        attempt = processing_job.attempts,
                        retry_in_secs = delay.as_secs(),
                        "ingestion job failed; scheduled retry"
                    );
                } else {
                    let permanent_reason = format!("{PERMANENT_FAILURE_PREFIX} {reason}");
                    Document::mark_failed(&document.id, &permanent_reason, &self.db).await?;
                    let failed_job = processing_job
                        .mark_failed(error_info.clone(), Duration::from_secs(0), &self.db)
                        .await?;
                    failed_job.mark_dead_letter(error_info, &self.db).await?;

                    // The raw upload is only kept around for retries.
                    if let Err(cleanup_err) = self
                        .services
                        .delete_document_object(&document.object_key)
                        .await
                    {
                        warn!(
                            document_id = %document.id,
                            object_key = %document.object_key,
                            error = %cleanup_err,
                            "failed to delete stored object after final failure"
                        );
                    }

                    warn!(
                        job_id = %failed_job.id,
                        document_id = %document.id,
                        attempt = failed_job.attempts,
                        "ingestion job failed; moved to dead letter queue"
                    );
                }

                Err(AppError::Processing(reason))
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let tuning = &self.pipeline_config.tuning;
        let capped_attempt = attempt
            .saturating_sub(1)
            .min(tuning.retry_backoff_cap_exponent);
        let multiplier = 2_u64.pow(capped_attempt);
        let delay = tuning.retry_base_delay_secs.saturating_mul(multiplier);

        Duration::from_secs(delay.min(tuning.retry_max_delay_secs))
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    #[tracing::instrument(
        skip_all,
        fields(job_id = %job.id, attempt = job.attempts, document_id = %document.id)
    )]
    async fn drive_pipeline(
        &self,
        job: &IngestionJob,
        document: &Document,
    ) -> Result<(), AppError> {
        let mut ctx = PipelineContext::new(
            job,
            document,
            self.db.as_ref(),
            &self.pipeline_config,
            self.services.as_ref(),
        );

        let machine = ready();

        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = fetch(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let fetch_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = extract(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let extract_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = chunk(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let chunk_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = embed(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let embed_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let _machine = persist(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let persist_duration = stage_start.elapsed();

        let total_duration = pipeline_started.elapsed();
        info!(
            job_id = %ctx.job_id,
            attempt = ctx.attempt,
            total_ms = Self::duration_millis(total_duration),
            fetch_ms = Self::duration_millis(fetch_duration),
            extract_ms = Self::duration_millis(extract_duration),
            chunk_ms = Self::duration_millis(chunk_duration),
            embed_ms = Self::duration_millis(embed_duration),
            persist_ms = Self::duration_millis(persist_duration),
            "ingestion pipeline finished"
        );

        Ok(())
    }
}
