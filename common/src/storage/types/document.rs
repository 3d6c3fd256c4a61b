use std::collections::HashMap;

use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::security::SecurityLevel;

/// Mime types the ingestion pipeline knows how to hand to an extractor.
pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    "text/plain",
    "text/markdown",
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

const MAX_TITLE_LENGTH: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "INDEXED")]
    Indexed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Indexed => "INDEXED",
            DocumentStatus::Failed => "FAILED",
        }
    }
}

stored_object!(Document, "document", {
    title: String,
    security_level: SecurityLevel,
    status: DocumentStatus,
    is_active: bool,
    owner_id: String,
    /// Object storage key for the raw uploaded bytes. The pipeline only ever
    /// reads this object, it never rewrites it.
    object_key: String,
    mime_type: String,
    file_size: u64,
    chunk_count: u32,
    error_message: Option<String>
});

impl Document {
    pub fn new(
        title: String,
        security_level: SecurityLevel,
        owner_id: String,
        object_key: String,
        mime_type: String,
        file_size: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            title,
            security_level,
            status: DocumentStatus::Pending,
            is_active: true,
            owner_id,
            object_key,
            mime_type,
            file_size,
            chunk_count: 0,
            error_message: None,
        }
    }

    /// Validate upload metadata and persist the record in `Pending` state.
    /// Bad metadata is rejected here, synchronously, and never reaches the
    /// ingestion pipeline.
    pub async fn create(
        title: String,
        security_level: SecurityLevel,
        owner_id: String,
        object_key: String,
        mime_type: String,
        file_size: u64,
        db: &SurrealDbClient,
    ) -> Result<Document, AppError> {
        if title.trim().is_empty() {
            return Err(AppError::Validation("document title must not be empty".into()));
        }
        if title.chars().count() > MAX_TITLE_LENGTH {
            return Err(AppError::Validation(format!(
                "document title exceeds {MAX_TITLE_LENGTH} characters"
            )));
        }
        if !SUPPORTED_MIME_TYPES.contains(&mime_type.as_str()) {
            return Err(AppError::Validation(format!(
                "unsupported mime type '{mime_type}'"
            )));
        }

        let document = Document::new(
            title,
            security_level,
            owner_id,
            object_key,
            mime_type,
            file_size,
        );
        db.store_item(document.clone()).await?;
        Ok(document)
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Document, AppError> {
        db.get_item::<Document>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("document {id}")))
    }

    pub async fn list_for_owner(
        owner_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Document>, AppError> {
        let documents: Vec<Document> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE owner_id = $owner_id \
                 ORDER BY created_at DESC",
            )
            .bind(("table", Self::table_name()))
            .bind(("owner_id", owner_id.to_string()))
            .await?
            .take(0)?;

        Ok(documents)
    }

    /// Resolve titles for a set of document ids in one query. Used when
    /// assembling source attributions for retrieved chunks.
    pub async fn titles_by_ids(
        ids: &[String],
        db: &SurrealDbClient,
    ) -> Result<HashMap<String, String>, AppError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let things: Vec<Thing> = ids
            .iter()
            .map(|id| Thing::from((Self::table_name(), id.as_str())))
            .collect();

        let documents: Vec<Document> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE id IN $things")
            .bind(("table", Self::table_name()))
            .bind(("things", things))
            .await?
            .take(0)?;

        Ok(documents
            .into_iter()
            .map(|doc| (doc.id, doc.title))
            .collect())
    }

    pub async fn mark_processing(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        Self::update_status(id, DocumentStatus::Processing, None, db).await
    }

    /// Failure for this ingestion attempt. A failed document contributes
    /// zero chunks to any query result, so any chunk set left from an
    /// earlier successful ingest is deactivated in the same transaction; a
    /// later successful re-ingest replaces it wholesale.
    pub async fn mark_failed(
        id: &str,
        message: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        // Existence check so a bad id surfaces as NotFound, not a no-op.
        Self::get(id, db).await?;

        db.client
            .query(
                "BEGIN TRANSACTION; \
                 UPDATE type::thing($doc_table, $id) \
                   SET status = $failed, error_message = $error_message, updated_at = $now; \
                 UPDATE document_chunk SET is_active = false, updated_at = $now \
                   WHERE document_id = $id; \
                 COMMIT TRANSACTION;",
            )
            .bind(("doc_table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("failed", DocumentStatus::Failed.as_str()))
            .bind(("error_message", message.to_string()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?
            .check()?;

        Ok(())
    }

    async fn update_status(
        id: &str,
        status: DocumentStatus,
        error_message: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut result = db
            .client
            .query(
                "UPDATE type::thing($table, $id) \
                 SET status = $status, error_message = $error_message, updated_at = $now \
                 RETURN *",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("status", status.as_str()))
            .bind(("error_message", error_message))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let updated: Option<Document> = result.take(0)?;
        updated
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("document {id}")))
    }

    /// Flip the active flag on the document and mirror it onto every chunk in
    /// the same transaction, so a deactivated document contributes zero
    /// chunks to any search the moment the update commits.
    pub async fn set_active(
        id: &str,
        active: bool,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "BEGIN TRANSACTION; \
                 UPDATE type::thing($doc_table, $id) SET is_active = $active, updated_at = $now; \
                 UPDATE document_chunk SET is_active = $active, updated_at = $now \
                   WHERE document_id = $id; \
                 COMMIT TRANSACTION;",
            )
            .bind(("doc_table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("active", active))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?
            .check()?;

        Ok(())
    }

    /// Reclassification never edits chunk levels in place. The old chunk set
    /// is dropped and the document reset to `Pending` in one transaction, so
    /// no window exists where stale chunks carry a stale level; the caller
    /// re-enqueues an ingestion job to rebuild the index at the new level.
    pub async fn reclassify(
        id: &str,
        new_level: SecurityLevel,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        // Existence check first so a bad id surfaces as NotFound, not a no-op.
        Self::get(id, db).await?;

        db.client
            .query(
                "BEGIN TRANSACTION; \
                 DELETE document_chunk WHERE document_id = $id; \
                 UPDATE type::thing($doc_table, $id) \
                   SET security_level = $level, status = $pending, chunk_count = 0, \
                       error_message = NONE, updated_at = $now; \
                 COMMIT TRANSACTION;",
            )
            .bind(("doc_table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("level", new_level.as_str()))
            .bind(("pending", DocumentStatus::Pending.as_str()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?
            .check()?;

        Ok(())
    }

    /// Remove the document and its chunks together. Chunks never outlive
    /// their document.
    pub async fn delete(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "BEGIN TRANSACTION; \
                 DELETE document_chunk WHERE document_id = $id; \
                 DELETE type::thing($doc_table, $id); \
                 COMMIT TRANSACTION;",
            )
            .bind(("doc_table", Self::table_name()))
            .bind(("id", id.to_string()))
            .await?
            .check()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, &database)
            .await
            .expect("in-memory surrealdb")
    }

    fn sample_document() -> Document {
        Document::new(
            "Quarterly report".into(),
            SecurityLevel::High,
            "user_1".into(),
            "documents/quarterly.txt".into(),
            "text/plain".into(),
            1024,
        )
    }

    #[tokio::test]
    async fn test_create_valid_document() {
        let db = memory_db().await;

        let document = Document::create(
            "Handbook".into(),
            SecurityLevel::Low,
            "user_1".into(),
            "documents/handbook.txt".into(),
            "text/plain".into(),
            512,
            &db,
        )
        .await
        .expect("create document");

        assert_eq!(document.status, DocumentStatus::Pending);
        assert_eq!(document.chunk_count, 0);
        assert!(document.is_active);
        assert!(document.error_message.is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_metadata() {
        let db = memory_db().await;

        let empty_title = Document::create(
            "   ".into(),
            SecurityLevel::Low,
            "user_1".into(),
            "documents/a.txt".into(),
            "text/plain".into(),
            1,
            &db,
        )
        .await;
        assert!(matches!(empty_title, Err(AppError::Validation(_))));

        let bad_mime = Document::create(
            "Valid title".into(),
            SecurityLevel::Low,
            "user_1".into(),
            "documents/a.bin".into(),
            "application/octet-stream".into(),
            1,
            &db,
        )
        .await;
        assert!(matches!(bad_mime, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let db = memory_db().await;
        let document = sample_document();
        db.store_item(document.clone()).await.expect("store");

        Document::mark_processing(&document.id, &db)
            .await
            .expect("mark processing");
        let processing = Document::get(&document.id, &db).await.expect("get");
        assert_eq!(processing.status, DocumentStatus::Processing);

        Document::mark_failed(&document.id, "extraction produced no text", &db)
            .await
            .expect("mark failed");
        let failed = Document::get(&document.id, &db).await.expect("get");
        assert_eq!(failed.status, DocumentStatus::Failed);
        assert_eq!(
            failed.error_message.as_deref(),
            Some("extraction produced no text")
        );
    }

    #[tokio::test]
    async fn test_mark_processing_unknown_document() {
        let db = memory_db().await;
        let result = Document::mark_processing("missing", &db).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_for_owner_ignores_other_owners() {
        let db = memory_db().await;

        let mine = sample_document();
        let mut theirs = sample_document();
        theirs.id = Uuid::new_v4().to_string();
        theirs.owner_id = "user_2".into();

        db.store_item(mine.clone()).await.expect("store mine");
        db.store_item(theirs).await.expect("store theirs");

        let listed = Document::list_for_owner("user_1", &db).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, mine.id);
    }

    #[tokio::test]
    async fn test_reclassify_resets_to_pending() {
        let db = memory_db().await;
        let document = sample_document();
        db.store_item(document.clone()).await.expect("store");

        Document::reclassify(&document.id, SecurityLevel::Mid, &db)
            .await
            .expect("reclassify");

        let updated = Document::get(&document.id, &db).await.expect("get");
        assert_eq!(updated.security_level, SecurityLevel::Mid);
        assert_eq!(updated.status, DocumentStatus::Pending);
        assert_eq!(updated.chunk_count, 0);
    }

    #[tokio::test]
    async fn test_titles_by_ids() {
        let db = memory_db().await;
        let document = sample_document();
        db.store_item(document.clone()).await.expect("store");

        let titles = Document::titles_by_ids(&[document.id.clone()], &db)
            .await
            .expect("titles");
        assert_eq!(titles.get(&document.id).map(String::as_str), Some("Quarterly report"));

        let empty = Document::titles_by_ids(&[], &db).await.expect("titles");
        assert!(empty.is_empty());
    }
}
