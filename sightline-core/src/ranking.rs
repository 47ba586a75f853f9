use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ProviderId;

/// A brand's visibility within one (topic, provider) group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityRow {
    pub brand_id: Uuid,
    pub topic: String,
    pub provider: ProviderId,
    pub visibility_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRow {
    pub brand_id: Uuid,
    pub topic: String,
    pub provider: ProviderId,
    pub visibility_pct: f64,
    pub rank: i32,
    pub prev_rank: Option<i32>,
}

type GroupKey = (String, ProviderId);

/// Groups rows by (topic, provider) preserving first-seen order.
fn group_rows(rows: &[VisibilityRow]) -> Vec<(GroupKey, Vec<&VisibilityRow>)> {
    let mut groups: Vec<(GroupKey, Vec<&VisibilityRow>)> = Vec::new();
    let mut index: HashMap<GroupKey, usize> = HashMap::new();

    for row in rows {
        let key = (row.topic.clone(), row.provider);
        match index.get(&key) {
            Some(&i) => groups[i].1.push(row),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![row]));
            }
        }
    }

    groups
}

fn sort_desc(group: &mut [&VisibilityRow]) {
    // slice::sort_by is stable, so equal visibility keeps input order.
    group.sort_by(|a, b| b.visibility_pct.total_cmp(&a.visibility_pct));
}

/// Ordinal 1-based ranking per (topic, provider): position after a stable sort
/// by visibility descending, so tied brands still get distinct ranks in input
/// order. The brand's rank in `prev` is attached when present.
pub fn compute_ranks(rows: &[VisibilityRow], prev: &[VisibilityRow]) -> Vec<RankedRow> {
    let mut prev_ranks: HashMap<(GroupKey, Uuid), i32> = HashMap::new();
    for (key, mut group) in group_rows(prev) {
        sort_desc(&mut group);
        for (i, row) in group.iter().enumerate() {
            prev_ranks.insert((key.clone(), row.brand_id), i as i32 + 1);
        }
    }

    let mut out = Vec::with_capacity(rows.len());
    for (key, mut group) in group_rows(rows) {
        sort_desc(&mut group);
        for (i, row) in group.iter().enumerate() {
            out.push(RankedRow {
                brand_id: row.brand_id,
                topic: row.topic.clone(),
                provider: row.provider,
                visibility_pct: row.visibility_pct,
                rank: i as i32 + 1,
                prev_rank: prev_ranks.get(&(key.clone(), row.brand_id)).copied(),
            });
        }
    }

    out
}
