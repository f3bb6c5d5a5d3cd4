//! Shared data resolution
//!
//! Every fact a page reports is resolved against existing elements before
//! it is written: a sufficiently similar element is updated in place (new
//! version), otherwise a new element is created. The page is then linked
//! to the element. Two contact elements scoring at or above the threshold
//! against each other are never created.

use crate::core::model::{ElementType, NewElement, PageReference, ReferenceType, SharedDataElement};
use crate::core::normalize::Contact;
use crate::core::similarity::{text_similarity, SimilarityScorer};
use crate::storage::SharedDataStore;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Contacts are read straight off the page
const OBSERVED_CONFIDENCE: u8 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    pub element: SharedDataElement,
    pub created: bool,
    pub updated: bool,
    /// Similarity to the matched element; `None` when a new one was created
    pub score: Option<f64>,
}

/// A named value (calculation or metric) seen on a page
#[derive(Debug, Clone)]
pub struct NamedFact {
    pub element_type: ElementType,
    pub name: String,
    pub value: Value,
    pub formula: Option<String>,
    pub confidence: u8,
    pub display_label: Option<String>,
}

/// Digit runs in a name. "Unit 101 Total" and "Unit 102 Total" are close
/// as text but name different facts.
fn numbering(name: &str) -> Vec<&str> {
    name.split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .collect()
}

pub struct SharedDataManager {
    store: Arc<dyn SharedDataStore>,
    scorer: SimilarityScorer,
}

impl SharedDataManager {
    pub fn new(store: Arc<dyn SharedDataStore>, scorer: SimilarityScorer) -> Self {
        Self { store, scorer }
    }

    pub fn store(&self) -> &Arc<dyn SharedDataStore> {
        &self.store
    }

    async fn link(
        &self,
        page_url: &str,
        element_id: i64,
        created: bool,
        display_label: Option<String>,
    ) -> Result<()> {
        let reference_type = if created {
            ReferenceType::Primary
        } else {
            ReferenceType::Reference
        };

        let added = self
            .store
            .add_reference(PageReference {
                page_url: page_url.to_string(),
                element_id,
                reference_type,
                display_label,
            })
            .await
            .context("Failed to link page to shared element")?;

        if added {
            tracing::debug!(
                "[SharedData] Linked {} -> element {} ({})",
                page_url,
                element_id,
                reference_type.as_str()
            );
        }
        Ok(())
    }

    /// Resolve a contact seen on `page_url` to exactly one element
    pub async fn record_contact(
        &self,
        page_url: &str,
        contact: &Contact,
        display_label: Option<&str>,
    ) -> Result<ResolveOutcome> {
        let normalized = contact.normalized();
        if normalized.is_empty() {
            anyhow::bail!("contact has no usable attributes");
        }

        let existing = self.store.list_elements(Some(ElementType::ContactInfo)).await?;
        let decoded: Vec<(&SharedDataElement, Contact)> = existing
            .iter()
            .filter_map(|el| {
                serde_json::from_value::<Contact>(el.current_value.clone())
                    .ok()
                    .map(|c| (el, c))
            })
            .collect();

        let best = self
            .scorer
            .best_match(&normalized, decoded.iter().map(|(el, c)| ((*el, c), c)));

        let outcome = match best {
            Some(((element, stored), score)) => {
                let others: Vec<(i64, &Contact)> = decoded
                    .iter()
                    .filter(|(el, _)| el.id != element.id)
                    .map(|(el, c)| (el.id, c))
                    .collect();
                let merged = self.merge_without_collisions(element.id, stored, &normalized, &others);
                if merged == *stored {
                    tracing::debug!(
                        "[SharedData] Contact matches element {} (score {:.2}), unchanged",
                        element.id,
                        score
                    );
                    ResolveOutcome {
                        element: element.clone(),
                        created: false,
                        updated: false,
                        score: Some(score),
                    }
                } else {
                    let updated = self
                        .store
                        .update_value(element.id, serde_json::to_value(&merged)?, OBSERVED_CONFIDENCE, None)
                        .await?;
                    tracing::info!(
                        "[SharedData] Updated contact element {} to version {} (score {:.2})",
                        updated.id,
                        updated.version,
                        score
                    );
                    ResolveOutcome {
                        element: updated,
                        created: false,
                        updated: true,
                        score: Some(score),
                    }
                }
            }
            None => {
                let element = self
                    .store
                    .insert_element(NewElement {
                        element_name: normalized.display_name(),
                        element_type: ElementType::ContactInfo,
                        current_value: serde_json::to_value(&normalized)?,
                        confidence: OBSERVED_CONFIDENCE,
                        is_derived: false,
                        formula_expression: None,
                    })
                    .await?;
                tracing::info!(
                    "[SharedData] Created contact element {} '{}'",
                    element.id,
                    element.element_name
                );
                ResolveOutcome {
                    element,
                    created: true,
                    updated: false,
                    score: None,
                }
            }
        };

        self.link(
            page_url,
            outcome.element.id,
            outcome.created,
            display_label.map(str::to_string),
        )
        .await?;
        Ok(outcome)
    }

    /// Merge `incoming` into `stored` one attribute at a time. An attribute
    /// that would make the result match another contact element is left
    /// out, so no two contact elements ever match each other.
    fn merge_without_collisions(
        &self,
        element_id: i64,
        stored: &Contact,
        incoming: &Contact,
        others: &[(i64, &Contact)],
    ) -> Contact {
        let partials = [
            Contact {
                name: incoming.name.clone(),
                ..Contact::default()
            },
            Contact {
                phone: incoming.phone.clone(),
                ..Contact::default()
            },
            Contact {
                email: incoming.email.clone(),
                ..Contact::default()
            },
            Contact {
                address: incoming.address.clone(),
                ..Contact::default()
            },
        ];

        let mut merged = stored.clone();
        for partial in partials.iter().filter(|p| !p.is_empty()) {
            let candidate = merged.merged_with(partial);
            if candidate == merged {
                continue;
            }

            if let Some((other_id, _)) = others
                .iter()
                .find(|(_, other)| self.scorer.is_match(&candidate, other))
            {
                tracing::warn!(
                    "[SharedData] Not merging {:?} into element {}: it would match element {}",
                    partial,
                    element_id,
                    other_id
                );
                continue;
            }
            merged = candidate;
        }
        merged
    }

    /// Resolve a named calculation or metric. Elements of the same type whose
    /// names are at least `threshold` similar and carry the same numbers are
    /// the same element.
    pub async fn record_fact(&self, page_url: &str, fact: NamedFact) -> Result<ResolveOutcome> {
        let existing = self.store.list_elements(Some(fact.element_type)).await?;

        let best = existing
            .iter()
            .filter(|el| numbering(&el.element_name) == numbering(&fact.name))
            .map(|el| (el, text_similarity(&el.element_name, &fact.name)))
            .filter(|(_, s)| *s >= self.scorer.threshold())
            .fold(None, |best: Option<(&SharedDataElement, f64)>, (el, s)| match best {
                Some((_, best_s)) if best_s >= s => best,
                _ => Some((el, s)),
            });

        let outcome = match best {
            Some((element, score)) => {
                let formula_changed =
                    fact.formula.is_some() && fact.formula != element.formula_expression;
                if element.current_value == fact.value && !formula_changed {
                    ResolveOutcome {
                        element: element.clone(),
                        created: false,
                        updated: false,
                        score: Some(score),
                    }
                } else {
                    let updated = self
                        .store
                        .update_value(element.id, fact.value, fact.confidence, fact.formula)
                        .await?;
                    tracing::info!(
                        "[SharedData] {} '{}' now at version {}",
                        updated.element_type,
                        updated.element_name,
                        updated.version
                    );
                    ResolveOutcome {
                        element: updated,
                        created: false,
                        updated: true,
                        score: Some(score),
                    }
                }
            }
            None => {
                let element = self
                    .store
                    .insert_element(NewElement {
                        element_name: fact.name.trim().to_string(),
                        element_type: fact.element_type,
                        current_value: fact.value,
                        confidence: fact.confidence,
                        is_derived: fact.element_type == ElementType::Calculation,
                        formula_expression: fact.formula,
                    })
                    .await?;
                tracing::info!(
                    "[SharedData] Created {} element {} '{}'",
                    element.element_type,
                    element.id,
                    element.element_name
                );
                ResolveOutcome {
                    element,
                    created: true,
                    updated: false,
                    score: None,
                }
            }
        };

        self.link(page_url, outcome.element.id, outcome.created, fact.display_label)
            .await?;
        Ok(outcome)
    }

    pub async fn record_calculation(
        &self,
        page_url: &str,
        name: &str,
        value: Value,
        formula: Option<String>,
        confidence: u8,
    ) -> Result<ResolveOutcome> {
        self.record_fact(
            page_url,
            NamedFact {
                element_type: ElementType::Calculation,
                name: name.to_string(),
                value,
                formula,
                confidence,
                display_label: Some(name.to_string()),
            },
        )
        .await
    }

    pub async fn record_metric(
        &self,
        page_url: &str,
        name: &str,
        value: Value,
        confidence: u8,
    ) -> Result<ResolveOutcome> {
        self.record_fact(
            page_url,
            NamedFact {
                element_type: ElementType::Metric,
                name: name.to_string(),
                value,
                formula: None,
                confidence,
                display_label: Some(name.to_string()),
            },
        )
        .await
    }

    /// Elements shown on a page, with the reference that links them
    pub async fn elements_for_page(&self, page_url: &str) -> Result<Vec<(PageReference, SharedDataElement)>> {
        let mut out = Vec::new();
        for reference in self.store.references_for_page(page_url).await? {
            if let Some(element) = self.store.get_element(reference.element_id).await? {
                out.push((reference, element));
            }
        }
        Ok(out)
    }

    pub async fn pages_for_element(&self, element_id: i64) -> Result<Vec<PageReference>> {
        Ok(self.store.references_for_element(element_id).await?)
    }
}
