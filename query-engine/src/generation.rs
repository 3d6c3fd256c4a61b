use std::sync::Arc;
use std::time::Duration;

use async_openai::{
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use common::error::AppError;
use tokio::time::timeout;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

const GENERATION_SYSTEM_PROMPT: &str = "You are an assistant answering questions about internal \
company documents. Answer using only the provided context. If the context does not contain the \
answer, say that you could not find the information. Cite sources by their bracketed number.";

/// Bounded retries around one generation call.
const GENERATION_RETRIES: usize = 2;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub query: String,
    pub context: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub answer: String,
    /// Completion token usage when the backend reports it.
    pub token_count: Option<u32>,
}

/// Boundary to the generation model. The engine picks the model per request
/// from its quick/detailed profiles; implementations stay profile-agnostic.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedAnswer, AppError>;
}

/// Chat-completions backed generator. Every attempt runs under a timeout and
/// transport failures get a bounded retry with jittered backoff; a request
/// that still fails surfaces as an error the engine reports (and audits) as
/// an `ERROR` outcome.
pub struct OpenAiGenerator {
    client: Arc<Client<async_openai::config::OpenAIConfig>>,
    request_timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    async fn attempt(&self, request: &GenerationRequest) -> Result<GeneratedAnswer, AppError> {
        let user_message = format!(
            "Context Information:\n==================\n{}\n\nUser Question:\n==================\n{}",
            request.context, request.query
        );

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&request.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(GENERATION_SYSTEM_PROMPT).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .build()?;

        let response = timeout(
            self.request_timeout,
            self.client.chat().create(chat_request),
        )
        .await
        .map_err(|_| AppError::Timeout("generation"))??;

        let answer = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| {
                AppError::InternalError("No content found in generation response".into())
            })?;

        let token_count = response.usage.map(|usage| usage.completion_tokens);

        Ok(GeneratedAnswer {
            answer,
            token_count,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedAnswer, AppError> {
        debug!(model = %request.model, context_chars = request.context.len(), "generation requested");

        let retry_strategy = ExponentialBackoff::from_millis(200)
            .map(jitter)
            .take(GENERATION_RETRIES);

        Retry::spawn(retry_strategy, || self.attempt(&request)).await
    }
}

/// Whitespace word count, the fallback when the backend reports no usage.
pub fn approximate_token_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approximate_token_count() {
        assert_eq!(approximate_token_count(""), 0);
        assert_eq!(approximate_token_count("one"), 1);
        assert_eq!(approximate_token_count("  spread   out  words "), 3);
    }
}
