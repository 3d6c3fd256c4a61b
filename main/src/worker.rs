use std::sync::Arc;

use common::{
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{document_chunk::DocumentChunk, index_manifest::IndexManifest},
    },
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{
    extraction::PlainTextExtractor, pipeline::IngestionPipeline, run_worker_loop,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    db.ensure_initialized().await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider =
        Arc::new(EmbeddingProvider::from_config(&config, Some(openai_client.clone())).await?);
    info!(
        embedding_backend = embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    // Refuse to mix embedding spaces: if the provider changed since the
    // index was built, rebuild the vectors before serving any new work.
    let (manifest, changed) = IndexManifest::sync_with_provider(&db, &embedding_provider).await?;
    if changed {
        warn!(
            model_code = ?manifest.model_code,
            dimension = manifest.dimension,
            "Embedding configuration changed; re-embedding existing chunks"
        );
        if let Err(e) = DocumentChunk::update_all_embeddings(&db, &embedding_provider).await {
            error!("Failed to re-embed document chunks: {e}. Search results may be stale.");
        }
    }

    let storage = StorageManager::new(&config).await?;

    let ingestion_pipeline = Arc::new(IngestionPipeline::new(
        db.clone(),
        &config,
        storage,
        Arc::new(PlainTextExtractor),
        embedding_provider,
    )?);

    run_worker_loop(db, ingestion_pipeline).await
}
