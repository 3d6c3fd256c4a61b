use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document::deserialize_flexible_id},
    utils::embedding::EmbeddingProvider,
};

use super::document_chunk::DocumentChunk;

/// Records which embedding function built the live vector index.
///
/// Ingestion-time and query-time vectors must come from the same model; when
/// a provider upgrade is detected at startup the index is rebuilt instead of
/// silently mixing embedding spaces.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IndexManifest {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub backend: String,
    pub model_code: Option<String>,
    pub dimension: u32,
}

impl IndexManifest {
    fn from_provider(provider: &EmbeddingProvider) -> Self {
        Self {
            id: "current".to_string(),
            backend: provider.backend_label().to_string(),
            model_code: provider.model_code(),
            dimension: provider.dimension() as u32,
        }
    }

    pub fn matches(&self, provider: &EmbeddingProvider) -> bool {
        self.backend == provider.backend_label()
            && self.model_code == provider.model_code()
            && self.dimension as usize == provider.dimension()
    }

    pub async fn get_current(db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let manifest: Option<Self> = db
            .client
            .query("SELECT * FROM type::thing('index_manifest', 'current')")
            .await?
            .take(0)?;

        Ok(manifest)
    }

    /// Align the stored manifest with the live provider.
    ///
    /// Returns the manifest plus a flag telling the caller whether existing
    /// chunks must be re-embedded: `true` means the recorded embedding
    /// function changed since the index was built. The HNSW index is
    /// redefined to the provider's dimension in either case.
    pub async fn sync_with_provider(
        db: &SurrealDbClient,
        provider: &EmbeddingProvider,
    ) -> Result<(Self, bool), AppError> {
        let desired = Self::from_provider(provider);

        match Self::get_current(db).await? {
            None => {
                let created: Option<Self> = db
                    .create(("index_manifest", "current"))
                    .content(desired.clone())
                    .await?;
                DocumentChunk::redefine_hnsw_index(db, provider.dimension()).await?;

                created
                    .map(|manifest| (manifest, false))
                    .ok_or_else(|| {
                        AppError::InternalError("Failed to initialize index manifest".into())
                    })
            }
            Some(current) if current.matches(provider) => Ok((current, false)),
            Some(_) => {
                let updated: Option<Self> = db
                    .client
                    .query("UPDATE type::thing('index_manifest', 'current') MERGE $changes RETURN AFTER")
                    .bind(("changes", desired))
                    .await?
                    .take(0)?;
                DocumentChunk::redefine_hnsw_index(db, provider.dimension()).await?;

                updated.map(|manifest| (manifest, true)).ok_or_else(|| {
                    AppError::InternalError("Failed to update index manifest".into())
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, &database)
            .await
            .expect("in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_first_sync_creates_manifest() {
        let db = memory_db().await;
        let provider = EmbeddingProvider::new_hashed(16).expect("provider");

        let (manifest, changed) = IndexManifest::sync_with_provider(&db, &provider)
            .await
            .expect("sync");

        assert!(!changed, "first sync must not request a re-embed");
        assert_eq!(manifest.backend, "hashed");
        assert_eq!(manifest.dimension, 16);
    }

    #[tokio::test]
    async fn test_unchanged_provider_is_a_noop() {
        let db = memory_db().await;
        let provider = EmbeddingProvider::new_hashed(16).expect("provider");

        IndexManifest::sync_with_provider(&db, &provider)
            .await
            .expect("first sync");
        let (_, changed) = IndexManifest::sync_with_provider(&db, &provider)
            .await
            .expect("second sync");

        assert!(!changed);
    }

    #[tokio::test]
    async fn test_dimension_change_is_detected() {
        let db = memory_db().await;

        let small = EmbeddingProvider::new_hashed(8).expect("provider");
        IndexManifest::sync_with_provider(&db, &small)
            .await
            .expect("first sync");

        let large = EmbeddingProvider::new_hashed(32).expect("provider");
        let (manifest, changed) = IndexManifest::sync_with_provider(&db, &large)
            .await
            .expect("second sync");

        assert!(changed, "a dimension change must trigger re-embedding");
        assert_eq!(manifest.dimension, 32);
    }
}
