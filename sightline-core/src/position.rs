use once_cell::sync::Lazy;
use regex::Regex;

static ENUMERATED_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)[.)](\D.*)?$").expect("enumeration regex is valid"));

/// Ordinal position of `names[0]` in an answer.
///
/// See [`resolve_position_of`].
pub fn resolve_position(text: &str, names: &[&str]) -> Option<usize> {
    let target = names.first()?;
    resolve_position_of(text, names, target)
}

/// Ordinal position of `target` among `names` in `text`.
///
/// A numbered list line (`3. Foo`, `3) Foo`, `3.Foo`) that contains the target wins
/// and its number is returned. A digit right after the separator is a decimal, not
/// an enumerator. Otherwise every name is located by first occurrence and the
/// target's 1-based rank in that ordering is returned. `None` when the target does
/// not appear.
pub fn resolve_position_of(text: &str, names: &[&str], target: &str) -> Option<usize> {
    let target = target.trim().to_lowercase();
    if text.is_empty() || target.is_empty() {
        return None;
    }
    let lower = text.to_lowercase();

    for line in lower.lines() {
        let Some(caps) = ENUMERATED_LINE_RE.captures(line) else {
            continue;
        };
        let rest = caps.get(2).map_or("", |m| m.as_str());
        if rest.contains(target.as_str()) {
            if let Ok(n) = caps[1].parse::<usize>() {
                return Some(n);
            }
        }
    }

    let mut candidates: Vec<String> = names
        .iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();
    if !candidates.contains(&target) {
        candidates.push(target.clone());
    }

    let mut found: Vec<(usize, &str)> = candidates
        .iter()
        .filter_map(|n| lower.find(n.as_str()).map(|pos| (pos, n.as_str())))
        .collect();
    found.sort_by_key(|(pos, _)| *pos);

    found
        .iter()
        .position(|(_, n)| *n == target)
        .map(|i| i + 1)
}
