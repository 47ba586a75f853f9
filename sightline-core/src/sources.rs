use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainShare {
    pub domain: String,
    pub citations: u64,
    pub share_pct: f64,
}

/// Counts citations per domain, most-cited first. Ties keep first-seen order.
pub fn count_domains<'a>(domains: impl IntoIterator<Item = &'a str>) -> Vec<(String, u64)> {
    let mut counts: Vec<(String, u64)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for domain in domains {
        let domain = domain.trim();
        if domain.is_empty() {
            continue;
        }
        match index.get(domain) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(domain.to_string(), counts.len());
                counts.push((domain.to_string(), 1));
            }
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

/// Share of total citations per domain, as a percentage rounded to one decimal.
pub fn compute_domain_shares(counts: &[(String, u64)]) -> Vec<DomainShare> {
    let total: u64 = counts.iter().map(|(_, n)| n).sum();
    let mut shares: Vec<DomainShare> = counts
        .iter()
        .map(|(domain, n)| DomainShare {
            domain: domain.clone(),
            citations: *n,
            share_pct: if total == 0 {
                0.0
            } else {
                (*n as f64 / total as f64 * 1000.0).round() / 10.0
            },
        })
        .collect();
    shares.sort_by(|a, b| b.citations.cmp(&a.citations));
    shares
}
