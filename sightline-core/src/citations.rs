//! Citation normalization
//!
//! Converts provider-native citation payloads, or URLs found in answer text, into a
//! uniform `NormalizedCitation` list deduplicated by registrable domain.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::{Host, Url};

use crate::models::ProviderId;

static TEXT_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)https?://[^\s)\]">]+"#).expect("url regex is valid"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCitation {
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub rank_hint: Option<i32>,
}

/// Citation fields before domain resolution.
#[derive(Debug, Clone, Default)]
struct RawCitation {
    url: String,
    title: Option<String>,
    snippet: Option<String>,
    rank_hint: Option<i32>,
}

/// Registrable domain of `url`, lowercased with any `www.` prefix removed.
///
/// Falls back to the bare host when the public-suffix list has no rule for it
/// (single-label hosts, IP literals).
pub fn extract_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host()?;

    let host = match host {
        Host::Domain(d) => d.trim_end_matches('.').to_ascii_lowercase(),
        Host::Ipv4(ip) => return Some(ip.to_string()),
        Host::Ipv6(ip) => return Some(ip.to_string()),
    };
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        return None;
    }

    Some(
        psl::domain_str(host)
            .map(str::to_string)
            .unwrap_or_else(|| host.to_string()),
    )
}

/// Unique http(s) URLs in `text`, in order of first appearance, with trailing
/// `)`, `.` and `,` stripped.
pub fn extract_urls_from_text(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for m in TEXT_URL_RE.find_iter(text) {
        let Ok(parsed) = Url::parse(m.as_str()) else {
            continue;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            continue;
        }
        let normalized = parsed
            .to_string()
            .trim_end_matches(|c| matches!(c, ')' | '.' | ','))
            .to_string();
        if seen.insert(normalized.clone()) {
            urls.push(normalized);
        }
    }

    urls
}

/// Citations recovered from URLs in answer text, capped at `limit` URLs.
pub fn citations_from_text(text: &str, limit: usize) -> Vec<NormalizedCitation> {
    let raw = extract_urls_from_text(text)
        .into_iter()
        .take(limit)
        .map(|url| RawCitation {
            url,
            ..Default::default()
        })
        .collect();
    dedupe_by_domain(raw)
}

/// Normalizes a provider's native citation payload.
///
/// Entries without a usable URL are dropped. Rank hints come from the payload when
/// it carries an integer rank field, else from the entry's position (1-based).
pub fn normalize_citations(raw: &[Value], provider: ProviderId) -> Vec<NormalizedCitation> {
    let extracted = raw
        .iter()
        .filter_map(|entry| match provider {
            ProviderId::OpenAi => openai_entry(entry),
            ProviderId::Anthropic => anthropic_entry(entry),
            ProviderId::Gemini => gemini_entry(entry),
        })
        .collect();
    dedupe_by_domain(extracted)
}

/// Fills `native` from URLs in `text`.
///
/// With no native citations the full text-derived list (up to `limit`) is used.
/// Otherwise domains not already present are appended until `threshold` is reached,
/// each ranked after the current tail.
pub fn top_up(
    native: Vec<NormalizedCitation>,
    text: &str,
    threshold: usize,
    limit: usize,
) -> Vec<NormalizedCitation> {
    if native.is_empty() {
        return citations_from_text(text, limit);
    }
    if native.len() >= threshold {
        return native;
    }

    let mut out = native;
    let mut seen: HashSet<String> = out.iter().map(|c| c.domain.clone()).collect();

    for candidate in citations_from_text(text, limit) {
        if out.len() >= threshold {
            break;
        }
        if !seen.insert(candidate.domain.clone()) {
            continue;
        }
        let rank = out.len() as i32 + 1;
        out.push(NormalizedCitation {
            rank_hint: Some(rank),
            ..candidate
        });
    }

    out
}

fn dedupe_by_domain(raw: Vec<RawCitation>) -> Vec<NormalizedCitation> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for (i, c) in raw.into_iter().enumerate() {
        let Some(domain) = extract_domain(&c.url) else {
            continue;
        };
        if !seen.insert(domain.clone()) {
            continue;
        }
        out.push(NormalizedCitation {
            url: c.url,
            domain,
            title: c.title,
            snippet: c.snippet,
            rank_hint: c.rank_hint.or(Some(i as i32 + 1)),
        });
    }

    out
}

// ============================================================================
// PROVIDER FIELD LOOKUPS
// ============================================================================

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut cur = value;
    for key in path {
        cur = cur.get(*key)?;
    }
    cur.as_str().map(str::trim).filter(|s| !s.is_empty())
}

fn first_str(value: &Value, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .find_map(|p| str_at(value, p))
        .map(str::to_string)
}

fn int_at(value: &Value, key: &str) -> Option<i32> {
    value
        .get(key)
        .and_then(Value::as_i64)
        .and_then(|r| i32::try_from(r).ok())
}

fn openai_entry(entry: &Value) -> Option<RawCitation> {
    let url = first_str(entry, &[&["url"], &["source", "url"], &["id"]])?;
    Some(RawCitation {
        url,
        title: first_str(entry, &[&["title"], &["source", "title"]]),
        snippet: first_str(entry, &[&["snippet"], &["content"]]),
        rank_hint: int_at(entry, "rank"),
    })
}

fn anthropic_entry(entry: &Value) -> Option<RawCitation> {
    let url = first_str(entry, &[&["url"], &["metadata", "url"]])?;
    Some(RawCitation {
        url,
        title: first_str(entry, &[&["title"], &["metadata", "title"]]),
        snippet: first_str(entry, &[&["text"], &["snippet"], &["cited_text"]]),
        rank_hint: int_at(entry, "score"),
    })
}

fn gemini_entry(entry: &Value) -> Option<RawCitation> {
    let url = first_str(entry, &[&["url"], &["web", "uri"], &["uri"]])?;
    Some(RawCitation {
        url,
        title: first_str(entry, &[&["title"], &["web", "title"]]),
        snippet: first_str(entry, &[&["snippet"], &["web", "snippet"]]),
        rank_hint: int_at(entry, "rank"),
    })
}
