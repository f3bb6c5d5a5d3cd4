//! File System Crawl State
//!
//! Information Hiding:
//! - File names and JSON layout hidden from users
//! - Directory creation handled on construction
//! - Both files are rewritten whole on every save

use super::{CrawlState, CrawlStateStore};
use crate::error::StoreResult;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const PROCESSED_FILE: &str = "processed_pages.json";
pub const DISCOVERED_FILE: &str = "discovered_links.json";

/// Crawl state as two JSON arrays of URLs:
/// `{base_path}/processed_pages.json` and `{base_path}/discovered_links.json`
pub struct JsonStateStore {
    base_path: PathBuf,
}

impl JsonStateStore {
    pub async fn new(base_path: PathBuf) -> StoreResult<Self> {
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    fn processed_path(&self) -> PathBuf {
        self.base_path.join(PROCESSED_FILE)
    }

    fn discovered_path(&self) -> PathBuf {
        self.base_path.join(DISCOVERED_FILE)
    }

    async fn read_set(path: &Path) -> StoreResult<BTreeSet<String>> {
        if !path.exists() {
            tracing::debug!("[JsonStateStore] {:?} does not exist, starting empty", path);
            return Ok(BTreeSet::new());
        }

        let json = fs::read_to_string(path).await?;
        if json.trim().is_empty() {
            return Ok(BTreeSet::new());
        }
        Ok(serde_json::from_str(&json)?)
    }

    async fn write_set(path: &Path, set: &BTreeSet<String>) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(set)?;
        fs::write(path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl CrawlStateStore for JsonStateStore {
    async fn load(&self) -> StoreResult<CrawlState> {
        let state = CrawlState {
            processed: Self::read_set(&self.processed_path()).await?,
            discovered: Self::read_set(&self.discovered_path()).await?,
        };

        tracing::debug!(
            "[JsonStateStore] Loaded {} processed, {} discovered from {:?}",
            state.processed.len(),
            state.discovered.len(),
            self.base_path
        );
        Ok(state)
    }

    async fn save(&self, state: &CrawlState) -> StoreResult<()> {
        Self::write_set(&self.processed_path(), &state.processed).await?;
        Self::write_set(&self.discovered_path(), &state.discovered).await?;

        tracing::debug!(
            "[JsonStateStore] Saved {} processed, {} discovered to {:?}",
            state.processed.len(),
            state.discovered.len(),
            self.base_path
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_missing_files_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonStateStore::new(temp_dir.path().to_path_buf()).await.unwrap();

        let state = store.load().await.unwrap();
        assert!(state.processed.is_empty());
        assert!(state.discovered.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().to_path_buf();

        {
            let store = JsonStateStore::new(path.clone()).await.unwrap();
            let mut state = CrawlState::default();
            state.mark_processed("https://app.example.com/tenants");
            state.add_discovered("https://app.example.com/units");
            store.save(&state).await.unwrap();
        }

        {
            let store = JsonStateStore::new(path.clone()).await.unwrap();
            let state = store.load().await.unwrap();
            assert!(state.is_processed("https://app.example.com/tenants"));
            assert!(state.discovered.contains("https://app.example.com/units"));
        }

        // Files are plain JSON arrays
        let raw = std::fs::read_to_string(path.join(PROCESSED_FILE)).unwrap();
        let urls: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(urls, vec!["https://app.example.com/tenants"]);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(PROCESSED_FILE), "{not json").unwrap();

        let store = JsonStateStore::new(temp_dir.path().to_path_buf()).await.unwrap();
        assert!(store.load().await.is_err());
    }
}
