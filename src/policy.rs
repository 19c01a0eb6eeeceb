//! Fallback and escalation policy applied to every verdict

use crate::context::ContextBlock;
use crate::generation::DraftAnswer;
use crate::types::{Diagnostics, GeneratedAnswer, NotFoundReason, Verdict};
use std::collections::BTreeSet;

pub const NOT_FOUND_TEXT: &str =
    "No information was found in the knowledge base to answer this question.";

pub const LOW_CONFIDENCE_CAVEAT: &str =
    "This answer may not be fully supported by the knowledge base. Verify it against the cited sources.";

pub const ESCALATION_HINT: &str =
    "If this does not resolve your issue, contact the help desk to reach a human agent.";

/// Shapes generator output into the caller-visible answer
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    not_found_text: String,
    caveat: String,
    escalation_hint: String,
}

impl FallbackPolicy {
    pub fn new(
        not_found_text: impl Into<String>,
        caveat: impl Into<String>,
        escalation_hint: impl Into<String>,
    ) -> Self {
        Self {
            not_found_text: not_found_text.into(),
            caveat: caveat.into(),
            escalation_hint: escalation_hint.into(),
        }
    }

    /// Build the final answer for `draft`, drawn from `context`
    pub fn apply(
        &self,
        draft: DraftAnswer,
        context: &ContextBlock,
        diagnostics: Diagnostics,
    ) -> GeneratedAnswer {
        match draft.verdict {
            Verdict::Answered => GeneratedAnswer {
                text: draft.text,
                cited_numbers: draft.cited_numbers,
                sources: context.sources(),
                grounded_coverage: draft.grounded_coverage,
                verdict: Verdict::Answered,
                caveat: None,
                escalation_hint: None,
                not_found_reason: None,
                grounding_violations: draft.grounding_violations,
                diagnostics,
            },
            Verdict::LowConfidence => GeneratedAnswer {
                text: draft.text,
                cited_numbers: draft.cited_numbers,
                sources: context.sources(),
                grounded_coverage: draft.grounded_coverage,
                verdict: Verdict::LowConfidence,
                caveat: Some(self.caveat.clone()),
                escalation_hint: Some(self.escalation_hint.clone()),
                not_found_reason: None,
                grounding_violations: draft.grounding_violations,
                diagnostics,
            },
            Verdict::NotFound => self.not_found(
                draft.not_found_reason.unwrap_or(NotFoundReason::NoResults),
                diagnostics,
            ),
        }
    }

    /// The fixed payload: no sources, no citations
    pub fn not_found(&self, reason: NotFoundReason, diagnostics: Diagnostics) -> GeneratedAnswer {
        GeneratedAnswer {
            text: self.not_found_text.clone(),
            cited_numbers: BTreeSet::new(),
            sources: Vec::new(),
            grounded_coverage: 0.0,
            verdict: Verdict::NotFound,
            caveat: None,
            escalation_hint: Some(self.escalation_hint.clone()),
            not_found_reason: Some(reason),
            grounding_violations: Vec::new(),
            diagnostics,
        }
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::new(NOT_FOUND_TEXT, LOW_CONFIDENCE_CAVEAT, ESCALATION_HINT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextBuilder;
    use crate::types::Article;
    use chrono::Utc;
    use std::sync::Arc;

    fn context() -> ContextBlock {
        let article = Arc::new(Article {
            id: "kb-001".to_string(),
            title: "Password Reset Procedure".to_string(),
            content: "Use the portal.".to_string(),
            category: "IT".to_string(),
            tags: Default::default(),
            last_updated: Utc::now(),
            url: None,
            embedding: Vec::new(),
            content_hash: None,
        });
        ContextBuilder::default().build(&[article])
    }

    fn draft(verdict: Verdict) -> DraftAnswer {
        DraftAnswer {
            text: "Use the portal [1].".to_string(),
            verdict,
            not_found_reason: None,
            cited_numbers: BTreeSet::from([1]),
            grounding_violations: Vec::new(),
            grounded_coverage: 1.0,
            usage: None,
            completion_retries: 0,
        }
    }

    #[test]
    fn test_answered_is_unmodified() {
        let answer = FallbackPolicy::default().apply(
            draft(Verdict::Answered),
            &context(),
            Diagnostics::default(),
        );

        assert_eq!(answer.text, "Use the portal [1].");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].id, "kb-001");
        assert!(answer.caveat.is_none());
        assert!(answer.escalation_hint.is_none());
    }

    #[test]
    fn test_low_confidence_gets_caveat_and_hint() {
        let answer = FallbackPolicy::default().apply(
            draft(Verdict::LowConfidence),
            &context(),
            Diagnostics::default(),
        );

        assert_eq!(answer.text, "Use the portal [1].");
        assert_eq!(answer.caveat.as_deref(), Some(LOW_CONFIDENCE_CAVEAT));
        assert_eq!(answer.escalation_hint.as_deref(), Some(ESCALATION_HINT));
        assert_eq!(answer.sources.len(), 1);
    }

    #[test]
    fn test_not_found_is_fixed_payload() {
        let mut declined = draft(Verdict::NotFound);
        declined.not_found_reason = Some(NotFoundReason::NoRelevantInformation);

        let answer = FallbackPolicy::default().apply(declined, &context(), Diagnostics::default());

        assert_eq!(answer.text, NOT_FOUND_TEXT);
        assert!(answer.sources.is_empty());
        assert!(answer.cited_numbers.is_empty());
        assert_eq!(
            answer.not_found_reason,
            Some(NotFoundReason::NoRelevantInformation)
        );
        assert!(answer.escalation_hint.is_some());
    }
}
