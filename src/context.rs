//! Context window assembly from ranked articles

use crate::config::ContextConfig;
use crate::types::{Article, ArticleId, SourceRef};
use std::sync::Arc;

const ENTRY_SEPARATOR: &str = "\n\n---\n\n";

/// One numbered source in the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    /// 1-based position; the only numbering citations may use
    pub citation_number: u32,
    pub article_id: ArticleId,
    pub title: String,
    pub category: String,
    pub snippet: String,
}

impl ContextEntry {
    fn render(&self) -> String {
        format!(
            "[{}] {} ({})\n{}",
            self.citation_number, self.title, self.category, self.snippet
        )
    }
}

/// Ordered, numbered sources handed to the generator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextBlock {
    entries: Vec<ContextEntry>,
}

impl ContextBlock {
    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `n` names one of the entries
    pub fn contains_citation(&self, n: u32) -> bool {
        n >= 1 && (n as usize) <= self.entries.len()
    }

    /// Source list aligned with the citation numbers
    pub fn sources(&self) -> Vec<SourceRef> {
        self.entries
            .iter()
            .map(|e| SourceRef {
                id: e.article_id.clone(),
                title: e.title.clone(),
            })
            .collect()
    }

    /// Prompt text: `[n] Title (category)` then the snippet, entries split by `---`
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(ContextEntry::render)
            .collect::<Vec<_>>()
            .join(ENTRY_SEPARATOR)
    }
}

/// Builds a character-bounded [`ContextBlock`]
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    max_total_chars: usize,
    max_snippet_chars: usize,
}

impl ContextBuilder {
    pub fn new(max_total_chars: usize, max_snippet_chars: usize) -> Self {
        Self {
            max_total_chars,
            max_snippet_chars,
        }
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(config.max_total_chars, config.max_snippet_chars)
    }

    /// Number the articles in the given order and fit them into the budget
    ///
    /// An entry costs its rendered length in characters. The first entry
    /// that does not fit ends the block; nothing after it is considered.
    pub fn build(&self, articles: &[Arc<Article>]) -> ContextBlock {
        let mut entries = Vec::with_capacity(articles.len());
        let mut used = 0usize;

        for article in articles {
            let entry = ContextEntry {
                citation_number: entries.len() as u32 + 1,
                article_id: article.id.clone(),
                title: article.title.clone(),
                category: article.category.clone(),
                snippet: truncate_snippet(article.content.trim(), self.max_snippet_chars),
            };

            let cost = entry.render().chars().count();
            if used + cost > self.max_total_chars {
                tracing::debug!(
                    "Context budget reached at {} of {} articles ({} chars used)",
                    entries.len(),
                    articles.len(),
                    used
                );
                break;
            }
            used += cost;
            entries.push(entry);
        }

        ContextBlock { entries }
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(6000, 1500)
    }
}

/// Cut `text` to at most `max_chars` characters
///
/// Prefers ending after a sentence, then at a word boundary. Only falls back
/// to a hard cut when neither exists in the window.
pub fn truncate_snippet(text: &str, max_chars: usize) -> String {
    let cut = match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => byte_idx,
        None => return text.to_string(),
    };
    let window = &text[..cut];

    let sentence_end = window
        .char_indices()
        .filter(|&(i, c)| {
            matches!(c, '.' | '!' | '?')
                && text[i + c.len_utf8()..]
                    .chars()
                    .next()
                    .map_or(true, char::is_whitespace)
        })
        .map(|(i, c)| i + c.len_utf8())
        .last();

    if let Some(end) = sentence_end.filter(|&end| end >= window.len() / 2) {
        return window[..end].to_string();
    }

    match window.rfind(char::is_whitespace) {
        Some(space) if space > 0 => window[..space].trim_end().to_string(),
        _ => window.to_string(),
    }
}
