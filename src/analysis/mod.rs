//! Field analysis - what does an HTML field mean?
//!
//! Information Hiding:
//! - Prompt wording and response parsing stay inside this module
//! - Providers only see text in, text out
//! - Merging of provider answers is a pure function in `consensus`

pub mod analyzer;
pub mod consensus;

pub use analyzer::ConsensusAnalyzer;
pub use consensus::{merge_consensus, ProviderOutcome};

use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FALLBACK_PROVIDER: &str = "fallback";
pub const CONSENSUS_PROVIDER: &str = "consensus";
pub const FALLBACK_CONFIDENCE: f64 = 0.1;

/// Semantic description of one field, as returned by a provider or merged
/// from several. `confidence` is always in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub ai_generated_name: String,
    pub semantic_type: String,
    pub data_type: String,
    pub unit_of_measure: Option<String>,
    pub is_calculated: bool,
    pub calculation_formula: Option<String>,
    pub related_fields: Vec<String>,
    pub confidence: f64,
    pub context_clues: Vec<String>,
    pub provider: String,
    /// Share of responses whose semantic_type equals the chosen one
    pub agreement: f64,
}

impl AnalysisResult {
    /// Low-confidence answer derived from the raw field name alone
    pub fn fallback(field_name: &str) -> Self {
        Self {
            ai_generated_name: snake_case(field_name),
            semantic_type: "unknown".to_string(),
            data_type: "text".to_string(),
            unit_of_measure: None,
            is_calculated: false,
            calculation_formula: None,
            related_fields: Vec::new(),
            confidence: FALLBACK_CONFIDENCE,
            context_clues: Vec::new(),
            provider: FALLBACK_PROVIDER.to_string(),
            agreement: 0.0,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.provider == FALLBACK_PROVIDER
    }
}

/// Lenient mirror of the response schema; models omit or null fields freely
#[derive(Debug, Default, Deserialize)]
struct RawAnalysis {
    ai_generated_name: Option<String>,
    semantic_type: Option<String>,
    data_type: Option<String>,
    unit_of_measure: Option<String>,
    is_calculated: Option<bool>,
    calculation_formula: Option<String>,
    related_fields: Option<Vec<String>>,
    confidence: Option<f64>,
    context_clues: Option<Vec<String>>,
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parse a provider's text answer. Markdown fences and prose around the
/// JSON object are ignored. Confidence above 1 is read as a percentage.
pub fn parse_analysis(
    field_name: &str,
    provider: &str,
    text: &str,
) -> Result<AnalysisResult, ProviderError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &text[s..=e],
        _ => return Err(ProviderError::InvalidJson("no JSON object in response".into())),
    };

    let raw: RawAnalysis =
        serde_json::from_str(json).map_err(|e| ProviderError::InvalidJson(e.to_string()))?;

    let mut confidence = raw.confidence.unwrap_or(0.5);
    if confidence > 1.0 {
        confidence /= 100.0;
    }

    Ok(AnalysisResult {
        ai_generated_name: non_blank(raw.ai_generated_name).unwrap_or_else(|| snake_case(field_name)),
        semantic_type: non_blank(raw.semantic_type).unwrap_or_else(|| "unknown".to_string()),
        data_type: non_blank(raw.data_type).unwrap_or_else(|| "text".to_string()),
        unit_of_measure: non_blank(raw.unit_of_measure),
        is_calculated: raw.is_calculated.unwrap_or(false),
        calculation_formula: non_blank(raw.calculation_formula),
        related_fields: raw.related_fields.unwrap_or_default(),
        confidence: confidence.clamp(0.0, 1.0),
        context_clues: raw.context_clues.unwrap_or_default(),
        provider: provider.to_string(),
        agreement: 1.0,
    })
}

/// `tenantName`, `Tenant Name` and `unit[rent]` become `tenant_name`,
/// `tenant_name` and `unit_rent`.
pub fn snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower_or_digit = false;

    for c in s.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower_or_digit {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower_or_digit = c.is_lowercase() || c.is_ascii_digit();
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower_or_digit = false;
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "field".to_string()
    } else {
        trimmed.to_string()
    }
}

pub const SYSTEM_PROMPT: &str = "You analyze form and display fields captured from a \
property management web application. Answer with a single JSON object and nothing else.";

/// Domain relationships offered to the model as hints; never computed here
const DOMAIN_HINTS: &str = "\
Common property management relationships:
- late fee is usually 5% of monthly rent
- security deposit is usually one month's rent
- prorated rent = monthly rent * days occupied / days in month
- balance due = total charges - total payments
- occupancy rate = occupied units / total units * 100";

pub fn build_prompt(field_name: &str, attributes: &BTreeMap<String, String>, context: &str) -> String {
    let attrs = if attributes.is_empty() {
        "(none)".to_string()
    } else {
        attributes
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    };

    format!(
        "Field name: {field_name}\n\
         HTML attributes: {attrs}\n\
         Surrounding context: {context}\n\n\
         {DOMAIN_HINTS}\n\n\
         Return JSON with exactly these keys:\n\
         {{\"ai_generated_name\": snake_case string, \
         \"semantic_type\": string (e.g. tenant_name, monthly_rent, late_fee, phone, email, address, date), \
         \"data_type\": one of text|currency|percentage|date|number|boolean|email|phone, \
         \"unit_of_measure\": string or null, \
         \"is_calculated\": boolean, \
         \"calculation_formula\": string or null, \
         \"related_fields\": array of strings, \
         \"confidence\": number between 0 and 1, \
         \"context_clues\": array of strings}}"
    )
}
