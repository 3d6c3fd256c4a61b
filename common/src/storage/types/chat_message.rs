#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Which path produced the answer. `NoResults` covers both "nothing relevant
/// was indexed" and "nothing the user is cleared for" — the two are
/// indistinguishable on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerSource {
    #[serde(rename = "GENERATED")]
    Generated,
    #[serde(rename = "EXTRACTIVE")]
    Extractive,
    #[serde(rename = "NO_RESULTS")]
    NoResults,
    #[serde(rename = "ERROR")]
    Error,
}

impl AnswerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AnswerSource::Generated => "GENERATED",
            AnswerSource::Extractive => "EXTRACTIVE",
            AnswerSource::NoResults => "NO_RESULTS",
            AnswerSource::Error => "ERROR",
        }
    }
}

/// Attribution for one retrieved chunk that informed an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub similarity: f32,
}

stored_object!(ChatMessage, "chat_message", {
    session_id: String,
    query: String,
    answer: String,
    source: AnswerSource,
    sources: Vec<SourceRef>,
    model: Option<String>,
    latency_ms: u64,
    token_count: u32
});

impl ChatMessage {
    /// A message is the audit unit: once created it is never mutated.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
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
            session_id,
            query,
            answer,
            source,
            sources,
            model,
            latency_ms,
            token_count,
        }
    }

    pub async fn list_for_session(
        session_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChatMessage>, AppError> {
        let messages: Vec<ChatMessage> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE session_id = $session_id \
                 ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("session_id", session_id.to_string()))
            .await?
            .take(0)?;

        Ok(messages)
    }
}
