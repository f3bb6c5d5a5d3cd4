//! Merge independent provider answers into one
//!
//! Rules:
//! - the answer with the highest self-reported confidence seeds the result
//! - semantic_type, data_type and is_calculated are majority votes over all
//!   successful answers; a tie keeps the seed's value
//! - confidence is the plain mean of all successful answers
//! - no successful answer yields `AnalysisResult::fallback`

use super::{AnalysisResult, CONSENSUS_PROVIDER};
use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub struct ProviderOutcome {
    pub provider: String,
    pub result: Result<AnalysisResult, ProviderError>,
}

impl ProviderOutcome {
    pub fn ok(provider: impl Into<String>, result: AnalysisResult) -> Self {
        Self {
            provider: provider.into(),
            result: Ok(result),
        }
    }

    pub fn err(provider: impl Into<String>, error: ProviderError) -> Self {
        Self {
            provider: provider.into(),
            result: Err(error),
        }
    }
}

/// Majority value among `values`. Equal counts keep `seed`.
fn vote<T, K>(values: &[T], seed: &T, key: impl Fn(&T) -> K) -> (T, usize)
where
    T: Clone,
    K: PartialEq,
{
    let seed_key = key(seed);
    let seed_count = values.iter().filter(|v| key(*v) == seed_key).count();

    let mut winner = (seed.clone(), seed_count);
    for v in values {
        let k = key(v);
        let count = values.iter().filter(|other| key(*other) == k).count();
        if count > winner.1 {
            winner = (v.clone(), count);
        }
    }
    winner
}

fn union_in_order(lists: impl Iterator<Item = Vec<String>>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in lists.flatten() {
        if !out.iter().any(|existing| existing.eq_ignore_ascii_case(&item)) {
            out.push(item);
        }
    }
    out
}

pub fn merge_consensus(field_name: &str, outcomes: &[ProviderOutcome]) -> AnalysisResult {
    let successes: Vec<&AnalysisResult> = outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok())
        .collect();

    if successes.is_empty() {
        tracing::warn!(
            "[Consensus] All {} provider(s) failed for '{}', using fallback",
            outcomes.len(),
            field_name
        );
        return AnalysisResult::fallback(field_name);
    }

    // max_by keeps the last maximum; iterate reversed so the first wins ties
    let seed = successes
        .iter()
        .rev()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .copied()
        .unwrap_or(successes[0]);

    let mut merged = seed.clone();
    let n = successes.len();

    let semantic: Vec<String> = successes.iter().map(|r| r.semantic_type.clone()).collect();
    let (semantic_type, semantic_votes) =
        vote(&semantic, &seed.semantic_type, |s| s.trim().to_lowercase());
    merged.semantic_type = semantic_type;

    let data: Vec<String> = successes.iter().map(|r| r.data_type.clone()).collect();
    merged.data_type = vote(&data, &seed.data_type, |s| s.trim().to_lowercase()).0;

    let calculated: Vec<bool> = successes.iter().map(|r| r.is_calculated).collect();
    merged.is_calculated = vote(&calculated, &seed.is_calculated, |b| *b).0;

    if merged.is_calculated && merged.calculation_formula.is_none() {
        merged.calculation_formula = successes
            .iter()
            .find_map(|r| r.calculation_formula.clone());
    }

    merged.confidence = successes.iter().map(|r| r.confidence).sum::<f64>() / n as f64;
    merged.related_fields = union_in_order(successes.iter().map(|r| r.related_fields.clone()));
    merged.context_clues = union_in_order(successes.iter().map(|r| r.context_clues.clone()));
    merged.agreement = semantic_votes as f64 / n as f64;
    if n > 1 {
        merged.provider = CONSENSUS_PROVIDER.to_string();
    }

    tracing::debug!(
        "[Consensus] '{}' -> {} ({}/{} agree, confidence {:.2})",
        field_name,
        merged.semantic_type,
        semantic_votes,
        n,
        merged.confidence
    );

    merged
}
