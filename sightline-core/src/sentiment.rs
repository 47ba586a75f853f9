//! Lexicon-based sentiment scoring around brand occurrences
//!
//! Each occurrence of a brand name or alias gets a ±200 character window. Lexicon
//! hits in the window push a polarity score up or down, negators flip individual
//! hits, and numbered-list placement adds a small positive bias. Window polarities
//! are clamped, binned to 20/40/60/80/100, and averaged per answer.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::Entity;

const WINDOW_CHARS: usize = 200;
const NEGATION_LOOKBACK_CHARS: usize = 20;
const NEGATION_SHIFT: f64 = 0.6;
const LIST_BONUS: f64 = 0.3;

static NEGATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bnot\b|\bno\b|n['’]t\b").expect("negator regex is valid"));

static LIST_ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+[.)]\s+").expect("list item regex is valid"));

pub static DEFAULT_LEXICON: Lazy<Lexicon> = Lazy::new(Lexicon::v1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    fn sign(self) -> f64 {
        match self {
            Polarity::Positive => 1.0,
            Polarity::Negative => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    Strong,
    Mild,
}

impl Strength {
    fn weight(self) -> f64 {
        match self {
            Strength::Strong => 0.9,
            Strength::Mild => 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexiconEntry {
    pub phrase: &'static str,
    pub polarity: Polarity,
    pub strength: Strength,
}

const fn entry(phrase: &'static str, polarity: Polarity, strength: Strength) -> LexiconEntry {
    LexiconEntry {
        phrase,
        polarity,
        strength,
    }
}

use Polarity::{Negative, Positive};
use Strength::{Mild, Strong};

static V1_ENTRIES: &[LexiconEntry] = &[
    entry("best", Positive, Strong),
    entry("top", Positive, Strong),
    entry("favorite", Positive, Strong),
    entry("favourite", Positive, Strong),
    entry("editor's pick", Positive, Strong),
    entry("editors' pick", Positive, Strong),
    entry("winner", Positive, Strong),
    entry("award", Positive, Strong),
    entry("excellent", Positive, Strong),
    entry("outstanding", Positive, Strong),
    entry("love", Positive, Strong),
    entry("ideal", Positive, Strong),
    entry("go-to", Positive, Strong),
    entry("good", Positive, Mild),
    entry("great", Positive, Mild),
    entry("recommend", Positive, Mild),
    entry("solid", Positive, Mild),
    entry("reliable", Positive, Mild),
    entry("comfortable", Positive, Mild),
    entry("avoid", Negative, Strong),
    entry("not recommended", Negative, Strong),
    entry("don't buy", Negative, Strong),
    entry("do not buy", Negative, Strong),
    entry("issues", Negative, Strong),
    entry("problems", Negative, Strong),
    entry("worst", Negative, Strong),
    entry("terrible", Negative, Strong),
    entry("unsafe", Negative, Strong),
    entry("recall", Negative, Strong),
    entry("broken", Negative, Strong),
    entry("cons", Negative, Mild),
    entry("drawbacks", Negative, Mild),
    entry("expensive", Negative, Mild),
    entry("heavy", Negative, Mild),
    entry("uncomfortable", Negative, Mild),
    entry("poor", Negative, Mild),
    entry("bad", Negative, Mild),
];

/// A versioned phrase table.
#[derive(Debug, Clone)]
pub struct Lexicon {
    pub version: String,
    entries: Vec<LexiconEntry>,
}

impl Lexicon {
    pub fn new(version: impl Into<String>, entries: Vec<LexiconEntry>) -> Self {
        Self {
            version: version.into(),
            entries,
        }
    }

    pub fn v1() -> Self {
        Self::new("v1", V1_ENTRIES.to_vec())
    }

    pub fn entries(&self) -> &[LexiconEntry] {
        &self.entries
    }
}

/// Maps a clamped polarity to the 20..100 scale.
pub fn bin_score(polarity: f64) -> u32 {
    if polarity >= 0.75 {
        100
    } else if polarity >= 0.25 {
        80
    } else if polarity > -0.25 {
        60
    } else if polarity > -0.75 {
        40
    } else {
        20
    }
}

pub struct SentimentScorer<'a> {
    lexicon: &'a Lexicon,
}

impl Default for SentimentScorer<'static> {
    fn default() -> Self {
        Self {
            lexicon: &DEFAULT_LEXICON,
        }
    }
}

impl<'a> SentimentScorer<'a> {
    pub fn new(lexicon: &'a Lexicon) -> Self {
        Self { lexicon }
    }

    /// Score for `entity` in `text`, or `None` when the entity never appears.
    pub fn score(&self, text: &str, entity: &impl Entity) -> Option<u32> {
        if text.is_empty() {
            return None;
        }
        let lower = text.to_lowercase();

        let names: Vec<String> = entity.names().iter().map(|n| n.to_lowercase()).collect();
        let occurrences: Vec<usize> = names
            .iter()
            .flat_map(|name| lower.match_indices(name.as_str()).map(|(i, _)| i))
            .collect();
        if occurrences.is_empty() {
            return None;
        }

        let total: u32 = occurrences
            .iter()
            .map(|&pos| {
                let window = window_around(&lower, pos, WINDOW_CHARS);
                let mut polarity = self.window_polarity(window);
                if is_list_line(&lower, pos) {
                    polarity += LIST_BONUS;
                }
                bin_score(polarity.clamp(-1.0, 1.0))
            })
            .sum();

        Some((total as f64 / occurrences.len() as f64).round() as u32)
    }

    fn window_polarity(&self, window: &str) -> f64 {
        let mut polarity = 0.0;

        for polarity_class in [Positive, Negative] {
            for strength in [Strong, Mild] {
                let hit = self
                    .lexicon
                    .entries
                    .iter()
                    .filter(|e| e.polarity == polarity_class && e.strength == strength)
                    .any(|e| find_phrase(window, e.phrase).is_some());
                if hit {
                    polarity += polarity_class.sign() * strength.weight();
                }
            }
        }

        for e in &self.lexicon.entries {
            if let Some(at) = find_phrase(window, e.phrase) {
                if is_negated(window, at) {
                    polarity -= e.polarity.sign() * NEGATION_SHIFT;
                }
            }
        }

        polarity
    }
}

/// Scores with the default lexicon.
pub fn score_sentiment(text: &str, entity: &impl Entity) -> Option<u32> {
    SentimentScorer::default().score(text, entity)
}

// ============================================================================
// TEXT HELPERS
// ============================================================================

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// First word-bounded occurrence of `phrase` in `haystack`.
fn find_phrase(haystack: &str, phrase: &str) -> Option<usize> {
    haystack.match_indices(phrase).map(|(i, _)| i).find(|&i| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + phrase.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

fn is_negated(window: &str, at: usize) -> bool {
    let start = back_chars(window, at, NEGATION_LOOKBACK_CHARS);
    NEGATOR_RE.is_match(&window[start..at])
}

/// Byte index `n` characters before `pos`, or 0.
fn back_chars(text: &str, pos: usize, n: usize) -> usize {
    if n == 0 {
        return pos;
    }
    text[..pos]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn window_around(text: &str, pos: usize, radius: usize) -> &str {
    let start = back_chars(text, pos, radius);
    let end = text[pos..]
        .char_indices()
        .nth(radius)
        .map(|(i, _)| pos + i)
        .unwrap_or(text.len());
    &text[start..end]
}

fn is_list_line(text: &str, pos: usize) -> bool {
    let line_start = text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = text[pos..].find('\n').map(|i| pos + i).unwrap_or(text.len());
    LIST_ITEM_RE.is_match(&text[line_start..line_end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntitySpec;

    fn acme() -> EntitySpec {
        EntitySpec::new("Acme")
    }

    #[test]
    fn test_bins() {
        assert_eq!(bin_score(1.0), 100);
        assert_eq!(bin_score(0.4), 80);
        assert_eq!(bin_score(0.0), 60);
        assert_eq!(bin_score(-0.2), 60);
        assert_eq!(bin_score(-0.5), 40);
        assert_eq!(bin_score(-0.9), 20);
    }

    #[test]
    fn test_strong_positive() {
        assert_eq!(score_sentiment("Acme is the best choice", &acme()), Some(100));
    }

    #[test]
    fn test_mild_positive() {
        assert_eq!(score_sentiment("Acme is good", &acme()), Some(80));
    }

    #[test]
    fn test_negated_positive_moves_down() {
        assert_eq!(score_sentiment("Acme is not good", &acme()), Some(60));
    }

    #[test]
    fn test_absent_brand() {
        assert_eq!(score_sentiment("Contoso is great", &acme()), None);
        assert_eq!(score_sentiment("", &acme()), None);
    }

    #[test]
    fn test_neutral_mention() {
        assert_eq!(score_sentiment("Acme sells widgets", &acme()), Some(60));
    }

    #[test]
    fn test_strong_negative() {
        assert_eq!(score_sentiment("Avoid Acme, it is terrible", &acme()), Some(20));
    }

    #[test]
    fn test_numbered_list_bias() {
        // 0.0 baseline + 0.3 list bonus lands in the mild-positive bin.
        assert_eq!(score_sentiment("1. Acme\n2. Contoso", &acme()), Some(80));
    }

    #[test]
    fn test_phrase_requires_word_boundary() {
        // "topic" must not count as "top", "badge" must not count as "bad".
        assert_eq!(score_sentiment("Acme topic badge", &acme()), Some(60));
    }

    #[test]
    fn test_average_across_occurrences() {
        let far = " ".repeat(450);
        let text = format!("Acme is the best.{far}Acme is the worst.");
        // Occurrence windows do not overlap: 100 and 20 average to 60.
        assert_eq!(score_sentiment(&text, &acme()), Some(60));
    }

    #[test]
    fn test_alias_occurrences_are_scored() {
        let brand = EntitySpec::new("Acme").with_aliases(&["Roadrunner Co"]);
        assert_eq!(score_sentiment("Roadrunner Co is excellent", &brand), Some(100));
    }

    #[test]
    fn test_substitute_lexicon() {
        let lexicon = Lexicon::new("test", vec![entry("zippy", Positive, Strong)]);
        let scorer = SentimentScorer::new(&lexicon);
        assert_eq!(scorer.score("Acme is zippy", &acme()), Some(100));
        assert_eq!(scorer.score("Acme is the best", &acme()), Some(60));
        assert_eq!(lexicon.version, "test");
    }

    #[test]
    fn test_window_is_char_boundary_safe() {
        let text = format!("{}Acme é great {}", "ü".repeat(300), "ß".repeat(300));
        assert_eq!(score_sentiment(&text, &acme()), Some(80));
    }
}
