//! Instruction contract and user message layout for the completion call

use crate::context::ContextBlock;

/// The sentence the model is told to use when the sources fall short
pub const DECLINE_SENTENCE: &str = "I don't have enough information to answer this question.";

/// System instruction sent with every grounded completion
pub const SYSTEM_PROMPT: &str = "You are a support assistant that answers questions using only \
the numbered knowledge-base sources provided by the user.

Rules:
1. Use only information from the numbered sources. Do not rely on prior knowledge.
2. Cite every factual claim with the number of its source in square brackets, e.g. [1] or [1, 3].
3. Only cite numbers that appear in the sources. Never invent a source.
4. End your answer with a line \"Sources:\" followed by the cited numbers and titles.
5. If the sources do not address the question, reply exactly: \
\"I don't have enough information to answer this question.\"
6. Be concise but complete.";

/// User turn: the numbered context followed by the question
pub fn build_user_message(question: &str, context: &ContextBlock) -> String {
    format!(
        "## Sources\n\n{}\n\n## Question\n\n{}\n\n\
         Answer using only the sources above. Cite them as [1] to [{}].",
        context.render(),
        question.trim(),
        context.len()
    )
}
