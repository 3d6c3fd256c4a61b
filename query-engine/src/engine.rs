use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            audit_record::AuditRecord,
            chat_message::{AnswerSource, ChatMessage, SourceRef},
            chat_session::ChatSession,
            document::Document,
            document_chunk::DocumentChunk,
            security::SecurityLevel,
            user::User,
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::{
    answer_context,
    generation::{approximate_token_count, GenerationRequest, Generator},
    session_locks::SessionLocks,
};

/// Shared refusal wording. The empty-clearance path and the genuinely-empty
/// result path both return exactly this string, so the response shape leaks
/// nothing about whether higher-classified matches exist.
pub const REFUSAL_MESSAGE: &str =
    "I could not find any relevant information to answer your question.";

/// User-facing message for any internal failure. Detail goes to the logs and
/// the audit trail, never to the client.
const GENERIC_ERROR_MESSAGE: &str =
    "Something went wrong while answering your question. Please try again.";

/// Selects the generation profile: latency against capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnswerMode {
    #[default]
    Quick,
    Detailed,
}

impl AnswerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AnswerMode::Quick => "quick",
            AnswerMode::Detailed => "detailed",
        }
    }
}

impl FromStr for AnswerMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick" => Ok(AnswerMode::Quick),
            "detailed" => Ok(AnswerMode::Detailed),
            other => Err(AppError::Validation(format!("unknown answer mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryEngineConfig {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub max_context_chars: usize,
    pub quick_model: String,
    pub detailed_model: String,
    pub retrieval_timeout: Duration,
}

impl QueryEngineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            top_k: config.top_k,
            similarity_threshold: config.similarity_threshold,
            max_context_chars: config.max_context_chars,
            quick_model: config.quick_model.clone(),
            detailed_model: config.detailed_model.clone(),
            retrieval_timeout: Duration::from_secs(config.retrieval_timeout_secs),
        }
    }
}

/// What the caller gets back. The matching `ChatMessage` and `AuditRecord`
/// are already durable by the time this is returned.
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub session_id: String,
    pub message_id: String,
    pub answer: String,
    pub source: AnswerSource,
    pub sources: Vec<SourceRef>,
    pub model: Option<String>,
    pub latency_ms: u64,
    pub token_count: u32,
}

struct Computed {
    answer: String,
    source: AnswerSource,
    sources: Vec<SourceRef>,
    model: Option<String>,
    token_count: u32,
}

impl Computed {
    fn no_results() -> Self {
        Self {
            answer: REFUSAL_MESSAGE.to_string(),
            source: AnswerSource::NoResults,
            sources: Vec::new(),
            model: None,
            token_count: approximate_token_count(REFUSAL_MESSAGE),
        }
    }
}

pub struct QueryEngine {
    db: Arc<SurrealDbClient>,
    embedding_provider: Arc<EmbeddingProvider>,
    /// `None` disables generation entirely; retrieval hits then answer
    /// extractively.
    generator: Option<Arc<dyn Generator>>,
    session_locks: Arc<SessionLocks>,
    config: QueryEngineConfig,
}

impl QueryEngine {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedding_provider: Arc<EmbeddingProvider>,
        generator: Option<Arc<dyn Generator>>,
        config: QueryEngineConfig,
    ) -> Self {
        Self {
            db,
            embedding_provider,
            generator,
            session_locks: Arc::new(SessionLocks::new()),
            config,
        }
    }

    /// Answer one query for one user.
    ///
    /// Clearance is resolved from the user's role, retrieval is restricted
    /// to that clearance inside the search itself, and the decision policy
    /// picks generated, extractive or refusal. Whatever happens — including
    /// generation failures — a `ChatMessage` is appended and exactly one
    /// `AuditRecord` is written before this function returns; the writes run
    /// on a detached task so a disconnecting client cannot cancel them.
    #[tracing::instrument(skip_all, fields(user_id = %user.id, mode = mode.as_str()))]
    pub async fn answer(
        &self,
        user: &User,
        session_id: Option<&str>,
        query_text: &str,
        mode: AnswerMode,
    ) -> Result<AnswerOutcome, AppError> {
        let started = Instant::now();

        let session = match session_id {
            Some(id) => ChatSession::get_owned(id, &user.id, &self.db).await?,
            None => ChatSession::create_session(user.id.clone(), None, &self.db).await?,
        };

        let clearance = user.clearance();
        debug!(
            role = %user.role,
            clearance = ?clearance,
            "clearance resolved"
        );

        let computed = match self.run_pipeline(clearance, query_text, mode).await {
            Ok(computed) => computed,
            Err(err) => {
                error!(error = %err, "query pipeline failed");
                Computed {
                    answer: GENERIC_ERROR_MESSAGE.to_string(),
                    source: AnswerSource::Error,
                    sources: Vec::new(),
                    model: None,
                    token_count: 0,
                }
            }
        };

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let message = ChatMessage::new(
            session.id.clone(),
            query_text.to_string(),
            computed.answer.clone(),
            computed.source,
            computed.sources.clone(),
            computed.model.clone(),
            latency_ms,
            computed.token_count,
        );

        let audit = AuditRecord::new(
            user.id.clone(),
            user.role.clone(),
            clearance.to_vec(),
            Some(session.id.clone()),
            Some(message.id.clone()),
            query_text.to_string(),
            computed.answer.clone(),
            computed.source,
            computed.sources.clone(),
            computed.model.clone(),
            latency_ms,
            computed.token_count,
        );

        // Session append and audit write run detached from this future, so
        // client cancellation cannot lose them; the engine still awaits the
        // handle because a query does not count as finished until its audit
        // record is durable. The audit write goes first: it is the
        // compliance guarantee and must not depend on the append succeeding.
        let db = Arc::clone(&self.db);
        let locks = Arc::clone(&self.session_locks);
        let message_to_store = message.clone();
        let persisted = tokio::spawn(async move {
            let _guard = locks.acquire(&message_to_store.session_id).await;
            audit.record(&db).await?;
            ChatSession::derive_title_if_empty(
                &message_to_store.session_id,
                &message_to_store.query,
                &db,
            )
            .await?;
            db.store_item(message_to_store).await?;
            Ok::<(), AppError>(())
        });
        persisted.await??;

        info!(
            session_id = %session.id,
            source = computed.source.as_str(),
            model = computed.model.as_deref().unwrap_or("none"),
            chunks_used = computed.sources.len(),
            latency_ms,
            token_count = computed.token_count,
            "query answered"
        );

        Ok(AnswerOutcome {
            session_id: session.id,
            message_id: message.id,
            answer: computed.answer,
            source: computed.source,
            sources: computed.sources,
            model: computed.model,
            latency_ms,
            token_count: computed.token_count,
        })
    }

    /// Decision policy, first match wins: empty clearance or no candidates
    /// or weak top similarity → refusal; otherwise generate with the
    /// mode-selected profile, or fall back to a verbatim excerpt when
    /// generation is disabled.
    async fn run_pipeline(
        &self,
        clearance: &'static [SecurityLevel],
        query_text: &str,
        mode: AnswerMode,
    ) -> Result<Computed, AppError> {
        if clearance.is_empty() {
            // Fail closed without touching the index. The response is
            // byte-identical to the empty-result case.
            warn!("empty clearance set; refusing without retrieval");
            return Ok(Computed::no_results());
        }

        let query_embedding = timeout(
            self.config.retrieval_timeout,
            self.embedding_provider.embed(query_text),
        )
        .await
        .map_err(|_| AppError::Timeout("query embedding"))?
        .map_err(|err| AppError::Embedding(err.to_string()))?;

        let matches = timeout(
            self.config.retrieval_timeout,
            DocumentChunk::search(&query_embedding, clearance, self.config.top_k, &self.db),
        )
        .await
        .map_err(|_| AppError::Timeout("vector search"))??;

        let Some(top) = matches.first() else {
            debug!("no authorized candidates retrieved");
            return Ok(Computed::no_results());
        };

        if top.similarity < self.config.similarity_threshold {
            debug!(
                top_similarity = top.similarity,
                threshold = self.config.similarity_threshold,
                "top candidate below relevance threshold"
            );
            return Ok(Computed::no_results());
        }

        let mut document_ids: Vec<String> = matches
            .iter()
            .map(|entry| entry.chunk.document_id.clone())
            .collect();
        document_ids.sort();
        document_ids.dedup();
        let titles = Document::titles_by_ids(&document_ids, &self.db).await?;

        let sources = answer_context::to_source_refs(&matches, &titles);

        match &self.generator {
            Some(generator) => {
                let model = self.model_for(mode).to_string();
                let context = answer_context::build_context(
                    &matches,
                    &titles,
                    self.config.max_context_chars,
                );
                let generated = generator
                    .generate(GenerationRequest {
                        model: model.clone(),
                        query: query_text.to_string(),
                        context,
                    })
                    .await?;

                let token_count = generated
                    .token_count
                    .unwrap_or_else(|| approximate_token_count(&generated.answer));

                Ok(Computed {
                    answer: generated.answer,
                    source: AnswerSource::Generated,
                    sources,
                    model: Some(model),
                    token_count,
                })
            }
            None => {
                let answer = answer_context::extractive_answer(&matches);
                let token_count = approximate_token_count(&answer);
                Ok(Computed {
                    answer,
                    source: AnswerSource::Extractive,
                    sources,
                    model: None,
                    token_count,
                })
            }
        }
    }

    fn model_for(&self, mode: AnswerMode) -> &str {
        match mode {
            AnswerMode::Quick => &self.config.quick_model,
            AnswerMode::Detailed => &self.config.detailed_model,
        }
    }
}
