use super::{build_prompt, merge_consensus, parse_analysis, AnalysisResult, ProviderOutcome, SYSTEM_PROMPT};
use crate::core::llm::FieldProvider;
use crate::extraction::CapturedField;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A captured field together with the merged analysis of it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedField {
    pub field: CapturedField,
    pub analysis: AnalysisResult,
}

/// Asks every configured provider about a field at once and merges the
/// answers. Works with any number of providers; with two it is the
/// "dual model" mode, with none every answer is the fallback.
pub struct ConsensusAnalyzer {
    providers: Vec<Arc<dyn FieldProvider>>,
}

impl ConsensusAnalyzer {
    pub fn new(providers: Vec<Arc<dyn FieldProvider>>) -> Self {
        Self { providers }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    async fn ask(provider: &dyn FieldProvider, field_name: &str, prompt: &str) -> ProviderOutcome {
        let name = provider.name().to_string();
        let result = match provider.complete(SYSTEM_PROMPT, prompt).await {
            Ok(text) => parse_analysis(field_name, &name, &text),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            tracing::warn!("[ConsensusAnalyzer] {} failed for '{}': {}", name, field_name, e);
        }

        ProviderOutcome { provider: name, result }
    }

    pub async fn analyze_with_consensus(
        &self,
        field_name: &str,
        attributes: &BTreeMap<String, String>,
        context: &str,
    ) -> AnalysisResult {
        let prompt = build_prompt(field_name, attributes, context);

        let outcomes = join_all(
            self.providers
                .iter()
                .map(|p| Self::ask(p.as_ref(), field_name, &prompt)),
        )
        .await;

        merge_consensus(field_name, &outcomes)
    }

    pub async fn analyze_field(&self, field: &CapturedField) -> AnalyzedField {
        let analysis = self
            .analyze_with_consensus(&field.field_name, &field.attributes, &field.context)
            .await;

        AnalyzedField {
            field: field.clone(),
            analysis,
        }
    }
}
