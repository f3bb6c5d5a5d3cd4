//! Shared-data and crawl-state storage abstractions
//!
//! Information Hiding:
//! - Storage backend details hidden behind traits
//! - Allows swapping between memory, SQLite and JSON files without API changes
//! - Each implementation owns its own data structures and formats

use crate::core::model::{ElementType, NewElement, PageReference, SharedDataElement};
use crate::error::StoreResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

pub mod filesystem;
pub mod memory;
pub mod sqlite;

pub use filesystem::JsonStateStore;
pub use memory::{InMemoryStateStore, InMemoryStore};
pub use sqlite::SqliteStore;

/// Repository for canonical shared data elements and the pages that show them.
/// Elements are never deleted.
#[async_trait]
pub trait SharedDataStore: Send + Sync {
    /// Insert a new element at version 1
    async fn insert_element(&self, element: NewElement) -> StoreResult<SharedDataElement>;

    /// Replace the value of an element and bump its version.
    /// `formula` of `None` keeps the stored formula.
    async fn update_value(
        &self,
        id: i64,
        value: Value,
        confidence: u8,
        formula: Option<String>,
    ) -> StoreResult<SharedDataElement>;

    async fn get_element(&self, id: i64) -> StoreResult<Option<SharedDataElement>>;

    /// Elements ordered by id, optionally restricted to one type
    async fn list_elements(&self, element_type: Option<ElementType>) -> StoreResult<Vec<SharedDataElement>>;

    /// Link a page to an element. Returns false when the link already existed.
    async fn add_reference(&self, reference: PageReference) -> StoreResult<bool>;

    async fn references_for_page(&self, page_url: &str) -> StoreResult<Vec<PageReference>>;

    async fn references_for_element(&self, element_id: i64) -> StoreResult<Vec<PageReference>>;
}

/// URLs already processed and URLs discovered but not yet processed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlState {
    pub processed: BTreeSet<String>,
    pub discovered: BTreeSet<String>,
}

impl CrawlState {
    pub fn is_processed(&self, url: &str) -> bool {
        self.processed.contains(url)
    }

    pub fn mark_processed(&mut self, url: impl Into<String>) {
        let url = url.into();
        self.discovered.remove(&url);
        self.processed.insert(url);
    }

    /// Returns true when the URL is new to both sets
    pub fn add_discovered(&mut self, url: impl Into<String>) -> bool {
        let url = url.into();
        if self.processed.contains(&url) {
            return false;
        }
        self.discovered.insert(url)
    }

    pub fn pending(&self) -> impl Iterator<Item = &String> {
        self.discovered.iter().filter(|u| !self.processed.contains(*u))
    }

    pub fn clear(&mut self) {
        self.processed.clear();
        self.discovered.clear();
    }
}

/// Durable home of the crawl state; read and written as a whole
#[async_trait]
pub trait CrawlStateStore: Send + Sync {
    /// Missing state loads as empty
    async fn load(&self) -> StoreResult<CrawlState>;

    async fn save(&self, state: &CrawlState) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_state_transitions() {
        let mut state = CrawlState::default();
        assert!(state.add_discovered("https://a/1"));
        assert!(!state.add_discovered("https://a/1"));
        assert_eq!(state.pending().count(), 1);

        state.mark_processed("https://a/1");
        assert!(state.is_processed("https://a/1"));
        assert_eq!(state.pending().count(), 0);
        assert!(!state.add_discovered("https://a/1"));
    }
}
