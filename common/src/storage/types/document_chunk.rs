use std::collections::HashMap;

use surrealdb::sql::Datetime as SurrealDatetime;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    error::AppError, storage::db::SurrealDbClient, stored_object,
    utils::embedding::EmbeddingProvider,
};

use super::{document::DocumentStatus, security::SecurityLevel};

/// HNSW search width used by the knn operator at query time.
const KNN_EF: usize = 40;

stored_object!(DocumentChunk, "document_chunk", {
    document_id: String,
    /// Ordinal position within the source document.
    chunk_index: u32,
    content: String,
    embedding: Vec<f32>,
    /// Denormalized from the document at write time so query-time filtering
    /// needs no join. Immutable once written; reclassification deletes and
    /// re-ingests the whole chunk set.
    security_level: SecurityLevel,
    /// Mirrors the document's active flag.
    is_active: bool
});

/// A chunk plus its query-time cosine similarity.
#[derive(Debug, Clone)]
pub struct ChunkMatch {
    pub chunk: DocumentChunk,
    pub similarity: f32,
}

/// One row of the knn statement: the chunk's own fields plus the index
/// distance. Kept separate from `DocumentChunk` so retrieval stays a single
/// atomic statement.
#[derive(Debug, serde::Deserialize)]
struct KnnRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
    #[serde(deserialize_with = "deserialize_datetime", default)]
    created_at: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_datetime", default)]
    updated_at: DateTime<Utc>,
    document_id: String,
    chunk_index: u32,
    content: String,
    embedding: Vec<f32>,
    security_level: SecurityLevel,
    is_active: bool,
    distance: Option<f32>,
}

impl KnnRow {
    fn into_match(self) -> ChunkMatch {
        // Cosine distance in [0, 2]; missing distance ranks last.
        let similarity = 1.0 - self.distance.unwrap_or(1.0);
        ChunkMatch {
            chunk: DocumentChunk {
                id: self.id,
                created_at: self.created_at,
                updated_at: self.updated_at,
                document_id: self.document_id,
                chunk_index: self.chunk_index,
                content: self.content,
                embedding: self.embedding,
                security_level: self.security_level,
                is_active: self.is_active,
            },
            similarity,
        }
    }
}

impl DocumentChunk {
    pub fn new(
        document_id: String,
        chunk_index: u32,
        content: String,
        embedding: Vec<f32>,
        security_level: SecurityLevel,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            chunk_index,
            content,
            embedding,
            security_level,
            is_active: true,
        }
    }

    /// Replace the full chunk set of one document atomically.
    ///
    /// Delete of the old set, insert of the new set and the document's
    /// transition to `Indexed` commit together, so a concurrent search sees
    /// either the fully old or the fully new chunk set and a reader never
    /// observes a partially indexed document.
    pub async fn replace_for_document(
        document_id: &str,
        chunks: Vec<DocumentChunk>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if chunks.iter().any(|chunk| chunk.document_id != document_id) {
            return Err(AppError::Validation(
                "chunk set contains a chunk belonging to a different document".into(),
            ));
        }

        let chunk_count = chunks.len();
        let query = format!(
            "BEGIN TRANSACTION; \
             DELETE {chunk_table} WHERE document_id = $document_id; \
             INSERT INTO {chunk_table} $chunks; \
             UPDATE type::thing('document', $document_id) \
               SET status = $indexed, chunk_count = $chunk_count, \
                   error_message = NONE, updated_at = $now; \
             COMMIT TRANSACTION;",
            chunk_table = Self::table_name(),
        );

        db.client
            .query(query)
            .bind(("document_id", document_id.to_string()))
            .bind(("chunks", chunks))
            .bind(("indexed", DocumentStatus::Indexed.as_str()))
            .bind(("chunk_count", chunk_count as i64))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?
            .check()?;

        info!(document_id, chunk_count, "replaced document chunk set");
        Ok(())
    }

    /// Nearest-neighbor search restricted to the permitted levels.
    ///
    /// A single statement both ranks by vector distance and applies the
    /// level/active predicates, so a chunk outside `allowed_levels` is never
    /// materialized out of storage, not even transiently, and a concurrent
    /// chunk-set replacement is seen either fully or not at all. Ties on
    /// similarity break by chunk id ascending so results are stable across
    /// runs.
    pub async fn search(
        query_embedding: &[f32],
        allowed_levels: &[SecurityLevel],
        k: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChunkMatch>, AppError> {
        // An empty clearance set can never match; skip the round trip.
        if allowed_levels.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let allowed: Vec<String> = allowed_levels
            .iter()
            .map(|level| level.as_str().to_string())
            .collect();

        let knn_query = format!(
            "SELECT *, vector::distance::knn() AS distance FROM {table} \
             WHERE is_active = true \
               AND security_level IN $allowed \
               AND embedding <|{k},{KNN_EF}|> $query_embedding \
             ORDER BY distance ASC",
            table = Self::table_name(),
        );

        let mut response = db
            .client
            .query(knn_query)
            .bind(("allowed", allowed))
            .bind(("query_embedding", query_embedding.to_vec()))
            .await?;

        let rows: Vec<KnnRow> = response.take(0)?;
        debug!(candidates = rows.len(), "knn candidates retrieved");

        let mut matches: Vec<ChunkMatch> = rows.into_iter().map(KnnRow::into_match).collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });

        Ok(matches)
    }

    pub async fn delete_by_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let query = format!(
            "DELETE {} WHERE document_id = $document_id",
            Self::table_name()
        );
        db.client
            .query(query)
            .bind(("document_id", document_id.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn count_for_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<usize, AppError> {
        #[derive(serde::Deserialize)]
        struct CountRow {
            total: usize,
        }

        let mut response = db
            .client
            .query(
                "SELECT count() AS total FROM type::table($table) \
                 WHERE document_id = $document_id GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .await?;

        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows.first().map_or(0, |row| row.total))
    }

    /// Recreate the HNSW index with a new embedding dimension. Surreal
    /// requires the index definition to be recreated when the vector length
    /// changes.
    pub async fn redefine_hnsw_index(
        db: &SurrealDbClient,
        dimension: usize,
    ) -> Result<(), AppError> {
        let query = format!(
            "BEGIN TRANSACTION; \
             REMOVE INDEX IF EXISTS idx_chunk_embedding ON TABLE {table}; \
             DEFINE INDEX idx_chunk_embedding ON TABLE {table} FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE; \
             COMMIT TRANSACTION;",
            table = Self::table_name(),
        );

        let res = db.client.query(query).await.map_err(AppError::Database)?;
        res.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Re-embed every stored chunk with the given provider inside one
    /// all-or-nothing transaction.
    ///
    /// Runs after an embedding model change is detected, so query-time and
    /// ingestion-time vectors never come from different embedding spaces.
    /// All new vectors are generated up front; any failure or dimension
    /// mismatch aborts before the database is touched.
    pub async fn update_all_embeddings(
        db: &SurrealDbClient,
        provider: &EmbeddingProvider,
    ) -> Result<(), AppError> {
        let new_dimension = provider.dimension();
        info!(
            new_dimension,
            "starting re-embedding of all document chunks"
        );

        let all_chunks: Vec<DocumentChunk> = db.select(Self::table_name()).await?;
        if all_chunks.is_empty() {
            info!("No document chunks to re-embed. Skipping.");
            Self::redefine_hnsw_index(db, new_dimension).await?;
            return Ok(());
        }
        info!("Found {} chunks to re-embed.", all_chunks.len());

        let texts: Vec<String> = all_chunks
            .iter()
            .map(|chunk| chunk.content.clone())
            .collect();
        let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        let embeddings = Retry::spawn(retry_strategy, || provider.embed_batch(texts.clone()))
            .await
            .map_err(|err| AppError::Embedding(err.to_string()))?;

        if embeddings.len() != all_chunks.len() {
            return Err(AppError::Embedding(format!(
                "embedding count mismatch: got {} vectors for {} chunks",
                embeddings.len(),
                all_chunks.len()
            )));
        }

        let mut new_embeddings: HashMap<String, Vec<f32>> = HashMap::new();
        for (chunk, embedding) in all_chunks.iter().zip(embeddings) {
            if embedding.len() != new_dimension {
                let err_msg = format!(
                    "generated embedding for chunk {} has dimension {}, expected {}; aborting",
                    chunk.id,
                    embedding.len(),
                    new_dimension
                );
                error!("{}", err_msg);
                return Err(AppError::Embedding(err_msg));
            }
            new_embeddings.insert(chunk.id.clone(), embedding);
        }

        let mut transaction_query = String::from("BEGIN TRANSACTION;");

        for (id, embedding) in new_embeddings {
            let embedding_str = format!(
                "[{}]",
                embedding
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            );
            transaction_query.push_str(&format!(
                "UPDATE type::thing('{}', '{}') SET embedding = {}, updated_at = time::now();",
                Self::table_name(),
                id,
                embedding_str
            ));
        }

        transaction_query.push_str(&format!(
            "REMOVE INDEX IF EXISTS idx_chunk_embedding ON TABLE {table}; \
             DEFINE INDEX idx_chunk_embedding ON TABLE {table} FIELDS embedding HNSW DIMENSION {new_dimension} DIST COSINE;",
            table = Self::table_name(),
        ));
        transaction_query.push_str("COMMIT TRANSACTION;");

        db.query(transaction_query).await?.check()?;

        info!("Re-embedding of document chunks completed successfully.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::document::Document;

    async fn setup_test_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, &database)
            .await
            .expect("Failed to start in-memory surrealdb");

        DocumentChunk::redefine_hnsw_index(&db, 3)
            .await
            .expect("Failed to configure test index");

        db
    }

    async fn store_document(db: &SurrealDbClient, level: SecurityLevel) -> Document {
        let document = Document::new(
            format!("Document {level}"),
            level,
            "owner_1".into(),
            format!("documents/{level}.txt"),
            "text/plain".into(),
            64,
        );
        db.store_item(document.clone()).await.expect("store document");
        document
    }

    fn chunk_for(document: &Document, index: u32, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk::new(
            document.id.clone(),
            index,
            format!("chunk {index} of {}", document.title),
            embedding,
            document.security_level,
        )
    }

    #[tokio::test]
    async fn test_replace_for_document_is_a_full_swap() {
        let db = setup_test_db().await;
        let document = store_document(&db, SecurityLevel::Low).await;

        let first_set = vec![
            chunk_for(&document, 0, vec![1.0, 0.0, 0.0]),
            chunk_for(&document, 1, vec![0.0, 1.0, 0.0]),
        ];
        DocumentChunk::replace_for_document(&document.id, first_set, &db)
            .await
            .expect("first replace");
        assert_eq!(
            DocumentChunk::count_for_document(&document.id, &db)
                .await
                .expect("count"),
            2
        );

        let second_set = vec![chunk_for(&document, 0, vec![0.0, 0.0, 1.0])];
        DocumentChunk::replace_for_document(&document.id, second_set, &db)
            .await
            .expect("second replace");
        assert_eq!(
            DocumentChunk::count_for_document(&document.id, &db)
                .await
                .expect("count"),
            1
        );

        let updated = Document::get(&document.id, &db).await.expect("get document");
        assert_eq!(updated.status, DocumentStatus::Indexed);
        assert_eq!(updated.chunk_count, 1);
    }

    #[tokio::test]
    async fn test_replace_rejects_foreign_chunks() {
        let db = setup_test_db().await;
        let document = store_document(&db, SecurityLevel::Low).await;
        let other = store_document(&db, SecurityLevel::Low).await;

        let result = DocumentChunk::replace_for_document(
            &document.id,
            vec![chunk_for(&other, 0, vec![1.0, 0.0, 0.0])],
            &db,
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_search_filters_by_level_inside_the_query() {
        let db = setup_test_db().await;
        let low_doc = store_document(&db, SecurityLevel::Low).await;
        let high_doc = store_document(&db, SecurityLevel::High).await;

        DocumentChunk::replace_for_document(
            &low_doc.id,
            vec![chunk_for(&low_doc, 0, vec![1.0, 0.0, 0.0])],
            &db,
        )
        .await
        .expect("replace low");
        DocumentChunk::replace_for_document(
            &high_doc.id,
            vec![chunk_for(&high_doc, 0, vec![0.99, 0.01, 0.0])],
            &db,
        )
        .await
        .expect("replace high");

        let matches = DocumentChunk::search(
            &[1.0, 0.0, 0.0],
            &[SecurityLevel::Low, SecurityLevel::Mid],
            5,
            &db,
        )
        .await
        .expect("search");

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].chunk.document_id, low_doc.id);
        assert_eq!(matches[0].chunk.security_level, SecurityLevel::Low);
    }

    #[tokio::test]
    async fn test_search_with_empty_clearance_returns_nothing() {
        let db = setup_test_db().await;
        let document = store_document(&db, SecurityLevel::Low).await;
        DocumentChunk::replace_for_document(
            &document.id,
            vec![chunk_for(&document, 0, vec![1.0, 0.0, 0.0])],
            &db,
        )
        .await
        .expect("replace");

        let matches = DocumentChunk::search(&[1.0, 0.0, 0.0], &[], 5, &db)
            .await
            .expect("search");
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_search_excludes_deactivated_documents() {
        let db = setup_test_db().await;
        let document = store_document(&db, SecurityLevel::Low).await;
        DocumentChunk::replace_for_document(
            &document.id,
            vec![chunk_for(&document, 0, vec![1.0, 0.0, 0.0])],
            &db,
        )
        .await
        .expect("replace");

        Document::set_active(&document.id, false, &db)
            .await
            .expect("deactivate");

        let matches = DocumentChunk::search(&[1.0, 0.0, 0.0], &[SecurityLevel::Low], 5, &db)
            .await
            .expect("search");
        assert!(
            matches.is_empty(),
            "deactivated document must contribute zero chunks"
        );
    }

    #[tokio::test]
    async fn test_failed_document_stops_serving_chunks() {
        let db = setup_test_db().await;
        let document = store_document(&db, SecurityLevel::Low).await;
        DocumentChunk::replace_for_document(
            &document.id,
            vec![chunk_for(&document, 0, vec![1.0, 0.0, 0.0])],
            &db,
        )
        .await
        .expect("replace");

        // A failed re-ingest must pull the old chunk set out of retrieval.
        Document::mark_failed(&document.id, "re-ingest blew up", &db)
            .await
            .expect("mark failed");

        let matches = DocumentChunk::search(&[1.0, 0.0, 0.0], &[SecurityLevel::Low], 5, &db)
            .await
            .expect("search");
        assert!(
            matches.is_empty(),
            "failed document must contribute zero chunks"
        );
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity_then_id() {
        let db = setup_test_db().await;
        let document = store_document(&db, SecurityLevel::Low).await;

        let mut near = chunk_for(&document, 0, vec![1.0, 0.0, 0.0]);
        near.id = "b-near".into();
        let mut far = chunk_for(&document, 1, vec![0.0, 1.0, 0.0]);
        far.id = "a-far".into();
        let mut tied = chunk_for(&document, 2, vec![1.0, 0.0, 0.0]);
        tied.id = "c-tied".into();

        DocumentChunk::replace_for_document(&document.id, vec![near, far, tied], &db)
            .await
            .expect("replace");

        let matches = DocumentChunk::search(&[1.0, 0.0, 0.0], &[SecurityLevel::Low], 5, &db)
            .await
            .expect("search");

        assert_eq!(matches.len(), 3);
        // The two identical embeddings tie on similarity and order by id.
        assert_eq!(matches[0].chunk.id, "b-near");
        assert_eq!(matches[1].chunk.id, "c-tied");
        assert_eq!(matches[2].chunk.id, "a-far");
        assert!(matches[0].similarity > matches[2].similarity);
    }

    #[tokio::test]
    async fn test_concurrent_search_sees_old_or_new_set_never_a_mix() {
        let db = setup_test_db().await;
        let document = store_document(&db, SecurityLevel::Low).await;

        let old_set = vec![
            chunk_for(&document, 0, vec![1.0, 0.0, 0.0]),
            chunk_for(&document, 1, vec![1.0, 0.0, 0.0]),
        ];
        DocumentChunk::replace_for_document(&document.id, old_set, &db)
            .await
            .expect("seed old set");

        // Writer re-ingests the same document with a three-chunk set while
        // the reader keeps searching.
        let writer_db = db.clone();
        let writer_doc = document.clone();
        let writer = tokio::spawn(async move {
            for round in 0..10u32 {
                let count = if round % 2 == 0 { 3 } else { 2 };
                let set: Vec<DocumentChunk> = (0..count)
                    .map(|i| chunk_for(&writer_doc, i, vec![1.0, 0.0, 0.0]))
                    .collect();
                DocumentChunk::replace_for_document(&writer_doc.id, set, &writer_db)
                    .await
                    .expect("replace");
            }
        });

        for _ in 0..20 {
            let matches = DocumentChunk::search(&[1.0, 0.0, 0.0], &[SecurityLevel::Low], 5, &db)
                .await
                .expect("search");
            assert!(
                matches.len() == 2 || matches.len() == 3,
                "observed a partially replaced chunk set of {} chunks",
                matches.len()
            );
            tokio::task::yield_now().await;
        }

        writer.await.expect("writer task");
    }

    #[tokio::test]
    async fn test_reclassified_document_leaves_no_stale_chunks() {
        let db = setup_test_db().await;
        let document = store_document(&db, SecurityLevel::High).await;
        DocumentChunk::replace_for_document(
            &document.id,
            vec![chunk_for(&document, 0, vec![1.0, 0.0, 0.0])],
            &db,
        )
        .await
        .expect("replace");

        Document::reclassify(&document.id, SecurityLevel::Low, &db)
            .await
            .expect("reclassify");

        // Prior HIGH chunks are gone entirely, not merely relabeled.
        let matches = DocumentChunk::search(&[1.0, 0.0, 0.0], SecurityLevel::all(), 5, &db)
            .await
            .expect("search");
        assert!(matches.is_empty());
        assert_eq!(
            DocumentChunk::count_for_document(&document.id, &db)
                .await
                .expect("count"),
            0
        );
    }

    #[tokio::test]
    async fn test_update_all_embeddings_switches_dimension() {
        let db = setup_test_db().await;
        let document = store_document(&db, SecurityLevel::Low).await;
        DocumentChunk::replace_for_document(
            &document.id,
            vec![
                chunk_for(&document, 0, vec![1.0, 0.0, 0.0]),
                chunk_for(&document, 1, vec![0.0, 1.0, 0.0]),
            ],
            &db,
        )
        .await
        .expect("replace");

        let provider = EmbeddingProvider::new_hashed(8).expect("hashed provider");
        DocumentChunk::update_all_embeddings(&db, &provider)
            .await
            .expect("re-embed");

        let chunks: Vec<DocumentChunk> = db
            .get_all_stored_items()
            .await
            .expect("fetch all chunks");
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|chunk| chunk.embedding.len() == 8));
    }
}
