//! Entity matcher — finds brand and competitor occurrences in answer text
//!
//! Two pattern sets are compiled per entity:
//! - **name patterns**: canonical name and aliases, case-insensitive, rejected when the
//!   neighbouring character is a word character or `@`
//! - **domain patterns**: each domain (optionally `www.`-prefixed), accepted only at the
//!   start of text, after whitespace, or right after an `http(s)://` scheme
//!
//! Domain hits score 1.0, canonical-name hits 0.9, alias hits 0.7. Spans are byte
//! offsets into the input and never overlap; the first-discovered span wins.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::Entity;

pub const DOMAIN_CONFIDENCE: f64 = 1.0;
pub const CANONICAL_NAME_CONFIDENCE: f64 = 0.9;
pub const ALIAS_CONFIDENCE: f64 = 0.7;

static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)https?://").expect("scheme regex is valid"));

static TLD_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.[A-Za-z]{2,}").expect("tld regex is valid"));

/// A detected occurrence of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MentionSpan {
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
}

impl MentionSpan {
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        !(end <= self.start || start >= self.end)
    }

    pub fn excerpt<'a>(&self, text: &'a str) -> &'a str {
        text.get(self.start..self.end).unwrap_or("")
    }
}

struct NamePattern {
    regex: Regex,
    canonical: bool,
}

/// Compiled matcher for one entity. Build once and reuse across answers.
pub struct EntityMatcher {
    canonical: String,
    names: Vec<NamePattern>,
    domains: Vec<Regex>,
}

impl EntityMatcher {
    pub fn new(entity: &impl Entity) -> Self {
        let canonical = entity.name().trim().to_lowercase();

        let names = entity
            .names()
            .into_iter()
            .filter_map(|name| {
                let pattern = format!("(?i){}", regex::escape(name));
                compile(&pattern).map(|regex| NamePattern {
                    regex,
                    canonical: name.to_lowercase() == canonical,
                })
            })
            .collect();

        let domains = entity
            .domains()
            .iter()
            .map(|d| d.trim())
            .filter(|d| !d.is_empty())
            .filter_map(|domain| {
                let pattern = format!(
                    r"(?i)(?:^|\s|https?://)((?:www\.)?{})\b",
                    regex::escape(domain)
                );
                compile(&pattern)
            })
            .collect();

        Self {
            canonical,
            names,
            domains,
        }
    }

    /// All non-overlapping occurrences in `text`, sorted by start offset.
    pub fn find(&self, text: &str) -> Vec<MentionSpan> {
        let mut found: Vec<MentionSpan> = Vec::new();

        for re in &self.domains {
            for caps in re.captures_iter(text) {
                if let Some(m) = caps.get(1) {
                    push_span(&mut found, m.start(), m.end(), DOMAIN_CONFIDENCE);
                }
            }
        }

        for pattern in &self.names {
            for (start, end) in guarded_matches(&pattern.regex, text) {
                if looks_like_email_local(text, start) || looks_like_url_context(text, start, end) {
                    continue;
                }
                let matched = &text[start..end];
                let confidence = if pattern.canonical || matched.to_lowercase() == self.canonical {
                    CANONICAL_NAME_CONFIDENCE
                } else {
                    ALIAS_CONFIDENCE
                };
                push_span(&mut found, start, end, confidence);
            }
        }

        found.sort_by_key(|s| s.start);
        found
    }
}

/// One-shot form of [`EntityMatcher::find`].
pub fn find_mentions(text: &str, entity: &impl Entity) -> Vec<MentionSpan> {
    EntityMatcher::new(entity).find(text)
}

// ============================================================================
// INTERNAL HELPERS
// ============================================================================

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "Skipping entity pattern that failed to compile");
            None
        }
    }
}

fn push_span(found: &mut Vec<MentionSpan>, start: usize, end: usize, confidence: f64) {
    if found.iter().any(|s| s.overlaps(start, end)) {
        return;
    }
    found.push(MentionSpan {
        start,
        end,
        confidence,
    });
}

fn is_guard_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '@'
}

/// Matches of `re` whose neighbours are not word characters or `@`.
/// A rejected candidate resumes the search one character later, so a valid match
/// starting inside a rejected one is still found.
fn guarded_matches(re: &Regex, text: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut pos = 0;

    while pos <= text.len() {
        let Some(m) = re.find_at(text, pos) else {
            break;
        };
        if m.start() == m.end() {
            break;
        }

        let before_ok = text[..m.start()]
            .chars()
            .next_back()
            .map_or(true, |c| !is_guard_char(c));
        let after_ok = text[m.end()..]
            .chars()
            .next()
            .map_or(true, |c| !is_guard_char(c));

        if before_ok && after_ok {
            out.push((m.start(), m.end()));
            pos = m.end();
        } else {
            let step = text[m.start()..].chars().next().map_or(1, char::len_utf8);
            pos = m.start() + step;
        }
    }

    out
}

fn looks_like_email_local(text: &str, start: usize) -> bool {
    text[..start].chars().rev().take(2).any(|c| c == '@')
}

fn looks_like_url_context(text: &str, start: usize, end: usize) -> bool {
    let before = &text[..start];
    let token_start = before
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);

    SCHEME_RE.is_match(&before[token_start..]) || TLD_SUFFIX_RE.is_match(&text[end..])
}

// ============================================================================
// TESTS
// ============================================================================
