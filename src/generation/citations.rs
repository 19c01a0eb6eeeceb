//! Citation extraction and grounding checks for generated text

use regex::Regex;
use std::collections::BTreeSet;

/// Matches `[3]` as well as lists like `[1, 3]`
const CITATION_PATTERN: &str = r"\[(\d+(?:\s*,\s*\d+)*)\]";

/// A line that opens the trailing source list: `Sources:`, `**Sources:**`, `## Sources`
const SOURCES_HEADING_PATTERN: &str = r"(?im)^[ \t]*(?:#{1,6}[ \t]*)?(?:\*\*)?sources?[ \t]*(?::|\*\*|$)";

/// A source list entry: `[2] Title`, `- Title`, `3. Title`
const LIST_LINE_PATTERN: &str = r"^[ \t]*(?:\[\d+|[-*+\x{2022}]|\d+[.)])";

/// What the validator found in one answer
#[derive(Debug, Clone, PartialEq)]
pub struct CitationReport {
    /// In-range citation numbers anywhere in the text
    pub cited: BTreeSet<u32>,
    /// In-range citation numbers in the answer body only
    pub body_cited: BTreeSet<u32>,
    /// Out-of-range citation numbers, ascending
    pub violations: Vec<u32>,
    /// Citation tokens in the answer body (source list excluded)
    pub body_citations: usize,
    /// Sentences in the answer body, at least 1
    pub sentences: usize,
    /// `body_citations / sentences`, clipped to [0, 1]
    pub coverage: f32,
}

impl CitationReport {
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

/// Compiled patterns for citation checks
#[derive(Debug, Clone)]
pub struct CitationValidator {
    citation: Regex,
    sources_heading: Regex,
    list_line: Regex,
}

impl CitationValidator {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            citation: Regex::new(CITATION_PATTERN)?,
            sources_heading: Regex::new(SOURCES_HEADING_PATTERN)?,
            list_line: Regex::new(LIST_LINE_PATTERN)?,
        })
    }

    /// Every citation number in `text`, in order of appearance (duplicates kept)
    pub fn extract(&self, text: &str) -> Vec<u32> {
        self.citation
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .flat_map(|list| list.as_str().split(','))
            // Too large for u32 is certainly out of range
            .map(|n| n.trim().parse::<u32>().unwrap_or(u32::MAX))
            .collect()
    }

    /// Answer text without the trailing source list
    ///
    /// A heading only starts the source list when nothing but list entries
    /// follow it, so "Source: the handbook says..." stays in the body.
    pub fn body<'a>(&self, text: &'a str) -> &'a str {
        match self
            .sources_heading
            .find_iter(text)
            .find(|heading| self.only_list_follows(&text[heading.end()..]))
        {
            Some(heading) => &text[..heading.start()],
            None => text,
        }
    }

    fn only_list_follows(&self, rest: &str) -> bool {
        let mut lines = rest.lines();
        // Remainder of the heading line may hold inline citations, nothing else
        let inline = lines.next().unwrap_or_default();
        let inline = self.citation.replace_all(inline, "");
        if inline.chars().any(|c| !(c.is_whitespace() || matches!(c, '*' | ',' | ';'))) {
            return false;
        }
        lines
            .filter(|line| !line.trim().is_empty())
            .all(|line| self.list_line.is_match(line))
    }

    /// Check `text` against a context of `source_count` numbered entries
    ///
    /// Range checks cover the whole text, including the source list. Coverage
    /// only looks at the body.
    pub fn validate(&self, text: &str, source_count: usize) -> CitationReport {
        let mut cited = BTreeSet::new();
        let mut violations = BTreeSet::new();
        for n in self.extract(text) {
            if n >= 1 && (n as usize) <= source_count {
                cited.insert(n);
            } else {
                violations.insert(n);
            }
        }

        let body = self.body(text);
        let body_cited = self
            .extract(body)
            .into_iter()
            .filter(|n| cited.contains(n))
            .collect();
        let body_citations = self.citation.find_iter(body).count();
        let stripped = self.citation.replace_all(body, " ");
        let sentences = count_sentences(&stripped).max(1);
        let coverage = (body_citations as f32 / sentences as f32).clamp(0.0, 1.0);

        CitationReport {
            cited,
            body_cited,
            violations: violations.into_iter().collect(),
            body_citations,
            sentences,
            coverage,
        }
    }
}

/// Count sentence-like segments containing at least one letter
///
/// A segment ends at `.`, `!` or `?` followed by whitespace (or the end of the
/// text), or at a line break, so bullet lists count one sentence per item.
fn count_sentences(text: &str) -> usize {
    let mut count = 0;
    let mut has_letter = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |next| next.is_whitespace()),
            _ => {
                has_letter |= c.is_alphabetic();
                false
            }
        };
        if boundary {
            if has_letter {
                count += 1;
            }
            has_letter = false;
        }
    }
    if has_letter {
        count += 1;
    }
    count
}
