pub mod answer_context;
pub mod engine;
pub mod generation;
pub mod session_locks;

pub use engine::{AnswerMode, AnswerOutcome, QueryEngine, QueryEngineConfig, REFUSAL_MESSAGE};
pub use generation::{GeneratedAnswer, GenerationRequest, Generator, OpenAiGenerator};
