//! In-Memory Storage
//!
//! Information Hiding:
//! - Map storage structures hidden from users
//! - Thread-safe access via RwLock hidden behind async interface
//! - Suitable for testing and one-shot runs

use super::{CrawlState, CrawlStateStore, SharedDataStore};
use crate::core::model::{ElementType, NewElement, PageReference, SharedDataElement};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    next_id: i64,
    elements: BTreeMap<i64, SharedDataElement>,
    references: Vec<PageReference>,
}

/// Shared data kept in process memory; lost when the process exits
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedDataStore for InMemoryStore {
    async fn insert_element(&self, element: NewElement) -> StoreResult<SharedDataElement> {
        let mut tables = self.tables.write().await;
        tables.next_id += 1;
        let now = Utc::now();

        let stored = SharedDataElement {
            id: tables.next_id,
            element_name: element.element_name,
            element_type: element.element_type,
            current_value: element.current_value,
            confidence: element.confidence.min(100),
            is_derived: element.is_derived,
            formula_expression: element.formula_expression,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        tables.elements.insert(stored.id, stored.clone());

        tracing::debug!("[InMemoryStore] Inserted element {} '{}'", stored.id, stored.element_name);
        Ok(stored)
    }

    async fn update_value(
        &self,
        id: i64,
        value: Value,
        confidence: u8,
        formula: Option<String>,
    ) -> StoreResult<SharedDataElement> {
        let mut tables = self.tables.write().await;
        let element = tables
            .elements
            .get_mut(&id)
            .ok_or(StoreError::ElementNotFound(id))?;

        element.current_value = value;
        element.confidence = confidence.min(100);
        if formula.is_some() {
            element.formula_expression = formula;
        }
        element.version += 1;
        element.updated_at = Utc::now();

        tracing::debug!("[InMemoryStore] Element {} now at version {}", id, element.version);
        Ok(element.clone())
    }

    async fn get_element(&self, id: i64) -> StoreResult<Option<SharedDataElement>> {
        Ok(self.tables.read().await.elements.get(&id).cloned())
    }

    async fn list_elements(&self, element_type: Option<ElementType>) -> StoreResult<Vec<SharedDataElement>> {
        let tables = self.tables.read().await;
        Ok(tables
            .elements
            .values()
            .filter(|e| element_type.map_or(true, |t| e.element_type == t))
            .cloned()
            .collect())
    }

    async fn add_reference(&self, reference: PageReference) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if !tables.elements.contains_key(&reference.element_id) {
            return Err(StoreError::ElementNotFound(reference.element_id));
        }

        let exists = tables
            .references
            .iter()
            .any(|r| r.page_url == reference.page_url && r.element_id == reference.element_id);
        if exists {
            return Ok(false);
        }

        tables.references.push(reference);
        Ok(true)
    }

    async fn references_for_page(&self, page_url: &str) -> StoreResult<Vec<PageReference>> {
        let tables = self.tables.read().await;
        Ok(tables
            .references
            .iter()
            .filter(|r| r.page_url == page_url)
            .cloned()
            .collect())
    }

    async fn references_for_element(&self, element_id: i64) -> StoreResult<Vec<PageReference>> {
        let tables = self.tables.read().await;
        Ok(tables
            .references
            .iter()
            .filter(|r| r.element_id == element_id)
            .cloned()
            .collect())
    }
}

/// Crawl state that lives only as long as the process
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    state: Arc<RwLock<CrawlState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CrawlStateStore for InMemoryStateStore {
    async fn load(&self) -> StoreResult<CrawlState> {
        Ok(self.state.read().await.clone())
    }

    async fn save(&self, state: &CrawlState) -> StoreResult<()> {
        *self.state.write().await = state.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ReferenceType;
    use serde_json::json;

    fn rent() -> NewElement {
        NewElement {
            element_name: "Monthly Rent".to_string(),
            element_type: ElementType::Metric,
            current_value: json!({"amount": 1500.0}),
            confidence: 80,
            is_derived: false,
            formula_expression: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_update_bumps_version() {
        let store = InMemoryStore::new();
        let inserted = store.insert_element(rent()).await.unwrap();
        assert_eq!(inserted.version, 1);

        let updated = store
            .update_value(inserted.id, json!({"amount": 1550.0}), 90, None)
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.current_value["amount"], 1550.0);
    }

    #[tokio::test]
    async fn test_update_missing_element() {
        let store = InMemoryStore::new();
        let err = store.update_value(42, json!(null), 0, None).await.unwrap_err();
        assert!(matches!(err, StoreError::ElementNotFound(42)));
    }

    #[tokio::test]
    async fn test_references_are_idempotent() {
        let store = InMemoryStore::new();
        let element = store.insert_element(rent()).await.unwrap();
        let reference = PageReference {
            page_url: "https://app/leases/1".to_string(),
            element_id: element.id,
            reference_type: ReferenceType::Primary,
            display_label: Some("Rent".to_string()),
        };

        assert!(store.add_reference(reference.clone()).await.unwrap());
        assert!(!store.add_reference(reference).await.unwrap());
        assert_eq!(store.references_for_element(element.id).await.unwrap().len(), 1);
        assert_eq!(store.references_for_page("https://app/leases/1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_by_type() {
        let store = InMemoryStore::new();
        store.insert_element(rent()).await.unwrap();
        let mut contact = rent();
        contact.element_type = ElementType::ContactInfo;
        store.insert_element(contact).await.unwrap();

        assert_eq!(store.list_elements(None).await.unwrap().len(), 2);
        assert_eq!(store.list_elements(Some(ElementType::ContactInfo)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_state_store_round_trip() {
        let store = InMemoryStateStore::new();
        let mut state = CrawlState::default();
        state.mark_processed("https://app/1");
        store.save(&state).await.unwrap();
        assert_eq!(store.load().await.unwrap(), state);
    }
}
