use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::{
    chat_message::{AnswerSource, SourceRef},
    security::SecurityLevel,
};

stored_object!(AuditRecord, "audit_record", {
    user_id: String,
    /// Role tag as presented at query time, even if unrecognized.
    role: String,
    /// Clearance set the resolver produced for that role.
    clearance: Vec<SecurityLevel>,
    session_id: Option<String>,
    message_id: Option<String>,
    query: String,
    answer: String,
    source: AnswerSource,
    sources: Vec<SourceRef>,
    model: Option<String>,
    latency_ms: u64,
    token_count: u32
});

impl AuditRecord {
    /// The audit trail is append-only: this type exposes `record` and reads,
    /// nothing that updates or deletes.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: String,
        role: String,
        clearance: Vec<SecurityLevel>,
        session_id: Option<String>,
        message_id: Option<String>,
        query: String,
        answer: String,
        source: AnswerSource,
        sources: Vec<SourceRef>,
        model: Option<String>,
        latency_ms: u64,
        token_count: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            role,
            clearance,
            session_id,
            message_id,
            query,
            answer,
            source,
            sources,
            model,
            latency_ms,
            token_count,
        }
    }

    pub async fn record(self, db: &SurrealDbClient) -> Result<AuditRecord, AppError> {
        let stored = db.store_item(self).await?;
        stored.ok_or_else(|| {
            AppError::InternalError("audit record write returned no row".to_string())
        })
    }

    pub async fn list_for_user(
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<AuditRecord>, AppError> {
        let records: Vec<AuditRecord> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE user_id = $user_id \
                 ORDER BY created_at DESC",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(records)
    }

    pub async fn count(db: &SurrealDbClient) -> Result<usize, AppError> {
        #[derive(serde::Deserialize)]
        struct CountRow {
            total: usize,
        }

        let mut response = db
            .client
            .query("SELECT count() AS total FROM type::table($table) GROUP ALL")
            .bind(("table", Self::table_name()))
            .await?;

        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows.first().map_or(0, |row| row.total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::security::UserRole;

    async fn memory_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, &database)
            .await
            .expect("in-memory surrealdb")
    }

    fn sample_record(user_id: &str, source: AnswerSource) -> AuditRecord {
        AuditRecord::new(
            user_id.into(),
            UserRole::Employee.as_str().into(),
            UserRole::Employee.clearance().to_vec(),
            Some("session_1".into()),
            Some("message_1".into()),
            "what is the budget".into(),
            "answer text".into(),
            source,
            vec![],
            Some("quick-model".into()),
            250,
            12,
        )
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let db = memory_db().await;

        sample_record("user_1", AnswerSource::Generated)
            .record(&db)
            .await
            .expect("record");
        sample_record("user_1", AnswerSource::Error)
            .record(&db)
            .await
            .expect("record");
        sample_record("user_2", AnswerSource::NoResults)
            .record(&db)
            .await
            .expect("record");

        let records = AuditRecord::list_for_user("user_1", &db)
            .await
            .expect("list");
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.user_id == "user_1"));

        assert_eq!(AuditRecord::count(&db).await.expect("count"), 3);
    }

    #[tokio::test]
    async fn test_record_captures_clearance_at_query_time() {
        let db = memory_db().await;
        let stored = sample_record("user_1", AnswerSource::Generated)
            .record(&db)
            .await
            .expect("record");

        assert_eq!(
            stored.clearance,
            vec![SecurityLevel::Low, SecurityLevel::Mid]
        );
        assert_eq!(stored.role, "EMPLOYEE");
    }
}
