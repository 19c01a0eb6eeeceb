/// Grounded answer generation
///
/// Architecture:
/// - CompletionProvider trait with an OpenAI-compatible chat implementation
/// - Prompt contract: numbered sources in, `[n]` citations out
/// - CitationValidator: extraction, range checks and coverage
/// - GroundedAnswerGenerator: state machine, retries, verdict
mod citations;
mod completion;
mod generator;
mod prompts;

pub use citations::{CitationReport, CitationValidator};
pub use completion::{Completion, CompletionError, CompletionProvider, OpenAiChatProvider};
pub use generator::{DraftAnswer, GenerationState, GroundedAnswerGenerator, IllegalTransition};
pub use prompts::{build_user_message, DECLINE_SENTENCE, SYSTEM_PROMPT};

use crate::config::LlmConfig;
use crate::error::{KbError, Result};
use std::sync::Arc;

/// Instantiate the provider named in `[llm].provider`
pub fn completion_provider_from_config(config: &LlmConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChatProvider::from_config(config)?)),
        other => Err(KbError::Config(format!(
            "Unknown completion provider: {}",
            other
        ))),
    }
}
