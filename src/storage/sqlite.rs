//! SQLite Shared Data Storage
//!
//! Information Hiding:
//! - Schema, SQL and row mapping hidden behind `SharedDataStore`
//! - Blocking rusqlite calls run on the blocking thread pool
//! - One connection, serialized by a mutex

use super::SharedDataStore;
use crate::core::model::{
    ElementType, NewElement, PageReference, ReferenceType, SharedDataElement,
};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS shared_data_elements (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    element_name       TEXT NOT NULL,
    element_type       TEXT NOT NULL,
    current_value      TEXT NOT NULL,
    confidence         INTEGER NOT NULL,
    is_derived         INTEGER NOT NULL,
    formula_expression TEXT,
    version            INTEGER NOT NULL DEFAULT 1,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_elements_type ON shared_data_elements (element_type);

CREATE TABLE IF NOT EXISTS page_references (
    page_url       TEXT NOT NULL,
    element_id     INTEGER NOT NULL REFERENCES shared_data_elements (id),
    reference_type TEXT NOT NULL,
    display_label  TEXT,
    PRIMARY KEY (page_url, element_id)
);
";

const ELEMENT_COLUMNS: &str = "id, element_name, element_type, current_value, confidence, \
     is_derived, formula_expression, version, created_at, updated_at";

/// Column values exactly as stored, converted after the query
struct ElementRow {
    id: i64,
    element_name: String,
    element_type: String,
    current_value: String,
    confidence: i64,
    is_derived: bool,
    formula_expression: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl ElementRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            element_name: row.get(1)?,
            element_type: row.get(2)?,
            current_value: row.get(3)?,
            confidence: row.get(4)?,
            is_derived: row.get(5)?,
            formula_expression: row.get(6)?,
            version: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_element(self) -> StoreResult<SharedDataElement> {
        Ok(SharedDataElement {
            id: self.id,
            element_name: self.element_name,
            element_type: self
                .element_type
                .parse::<ElementType>()
                .map_err(StoreError::Corrupt)?,
            current_value: serde_json::from_str(&self.current_value)?,
            confidence: self.confidence.clamp(0, 100) as u8,
            is_derived: self.is_derived,
            formula_expression: self.formula_expression,
            version: self.version.max(1) as u32,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

fn parse_time(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}

fn reference_from_row(row: &Row<'_>) -> rusqlite::Result<(String, i64, String, Option<String>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_reference(raw: (String, i64, String, Option<String>)) -> StoreResult<PageReference> {
    let (page_url, element_id, reference_type, display_label) = raw;
    Ok(PageReference {
        page_url,
        element_id,
        reference_type: reference_type
            .parse::<ReferenceType>()
            .map_err(StoreError::Corrupt)?,
        display_label,
    })
}

fn fetch_element(conn: &Connection, id: i64) -> StoreResult<Option<SharedDataElement>> {
    let sql = format!("SELECT {} FROM shared_data_elements WHERE id = ?1", ELEMENT_COLUMNS);
    conn.query_row(&sql, params![id], ElementRow::from_row)
        .optional()?
        .map(ElementRow::into_element)
        .transpose()
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        tracing::info!("[SqliteStore] Opened database at {:?}", path);
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Task("connection mutex poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl SharedDataStore for SqliteStore {
    async fn insert_element(&self, element: NewElement) -> StoreResult<SharedDataElement> {
        self.run(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO shared_data_elements
                     (element_name, element_type, current_value, confidence, is_derived,
                      formula_expression, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
                params![
                    element.element_name,
                    element.element_type.as_str(),
                    serde_json::to_string(&element.current_value)?,
                    element.confidence.min(100),
                    element.is_derived,
                    element.formula_expression,
                    now,
                ],
            )?;

            let id = conn.last_insert_rowid();
            tracing::debug!("[SqliteStore] Inserted element {} '{}'", id, element.element_name);
            fetch_element(conn, id)?.ok_or(StoreError::ElementNotFound(id))
        })
        .await
    }

    async fn update_value(
        &self,
        id: i64,
        value: Value,
        confidence: u8,
        formula: Option<String>,
    ) -> StoreResult<SharedDataElement> {
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE shared_data_elements
                    SET current_value = ?1,
                        confidence = ?2,
                        formula_expression = COALESCE(?3, formula_expression),
                        version = version + 1,
                        updated_at = ?4
                  WHERE id = ?5",
                params![
                    serde_json::to_string(&value)?,
                    confidence.min(100),
                    formula,
                    Utc::now().to_rfc3339(),
                    id,
                ],
            )?;

            if changed == 0 {
                return Err(StoreError::ElementNotFound(id));
            }
            fetch_element(conn, id)?.ok_or(StoreError::ElementNotFound(id))
        })
        .await
    }

    async fn get_element(&self, id: i64) -> StoreResult<Option<SharedDataElement>> {
        self.run(move |conn| fetch_element(conn, id)).await
    }

    async fn list_elements(&self, element_type: Option<ElementType>) -> StoreResult<Vec<SharedDataElement>> {
        self.run(move |conn| {
            let rows: Vec<ElementRow> = match element_type {
                Some(t) => {
                    let sql = format!(
                        "SELECT {} FROM shared_data_elements WHERE element_type = ?1 ORDER BY id",
                        ELEMENT_COLUMNS
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(params![t.as_str()], ElementRow::from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
                None => {
                    let sql = format!("SELECT {} FROM shared_data_elements ORDER BY id", ELEMENT_COLUMNS);
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map([], ElementRow::from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
            };

            rows.into_iter().map(ElementRow::into_element).collect()
        })
        .await
    }

    async fn add_reference(&self, reference: PageReference) -> StoreResult<bool> {
        self.run(move |conn| {
            if fetch_element(conn, reference.element_id)?.is_none() {
                return Err(StoreError::ElementNotFound(reference.element_id));
            }

            let inserted = conn.execute(
                "INSERT OR IGNORE INTO page_references
                     (page_url, element_id, reference_type, display_label)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    reference.page_url,
                    reference.element_id,
                    reference.reference_type.as_str(),
                    reference.display_label,
                ],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn references_for_page(&self, page_url: &str) -> StoreResult<Vec<PageReference>> {
        let page_url = page_url.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT page_url, element_id, reference_type, display_label
                   FROM page_references WHERE page_url = ?1 ORDER BY element_id",
            )?;
            let raw = stmt
                .query_map(params![page_url], reference_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter().map(into_reference).collect()
        })
        .await
    }

    async fn references_for_element(&self, element_id: i64) -> StoreResult<Vec<PageReference>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT page_url, element_id, reference_type, display_label
                   FROM page_references WHERE element_id = ?1 ORDER BY rowid",
            )?;
            let raw = stmt
                .query_map(params![element_id], reference_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter().map(into_reference).collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn contact_element() -> NewElement {
        NewElement {
            element_name: "John Smith".to_string(),
            element_type: ElementType::ContactInfo,
            current_value: json!({"name": "John Smith", "phone": "(555) 123-4567"}),
            confidence: 95,
            is_derived: false,
            formula_expression: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        let inserted = store.insert_element(contact_element()).await.unwrap();

        let loaded = store.get_element(inserted.id).await.unwrap().unwrap();
        assert_eq!(loaded, inserted);
        assert_eq!(loaded.element_type, ElementType::ContactInfo);
        assert_eq!(loaded.current_value["phone"], "(555) 123-4567");
    }

    #[tokio::test]
    async fn test_update_keeps_formula_when_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut calc = contact_element();
        calc.element_type = ElementType::Calculation;
        calc.formula_expression = Some("1575.00 = 1500.00 + 75.00".to_string());
        let inserted = store.insert_element(calc).await.unwrap();

        let updated = store
            .update_value(inserted.id, json!({"total": 1600.0}), 70, None)
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.confidence, 70);
        assert_eq!(updated.formula_expression.as_deref(), Some("1575.00 = 1500.00 + 75.00"));
    }

    #[tokio::test]
    async fn test_update_missing_element() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.update_value(7, json!(1), 1, None).await.unwrap_err();
        assert!(matches!(err, StoreError::ElementNotFound(7)));
    }

    #[tokio::test]
    async fn test_references() {
        let store = SqliteStore::open_in_memory().unwrap();
        let element = store.insert_element(contact_element()).await.unwrap();

        for (url, kind) in [
            ("https://app/tenants/1", ReferenceType::Primary),
            ("https://app/leases/9", ReferenceType::Reference),
        ] {
            let added = store
                .add_reference(PageReference {
                    page_url: url.to_string(),
                    element_id: element.id,
                    reference_type: kind,
                    display_label: None,
                })
                .await
                .unwrap();
            assert!(added);
        }

        let duplicate = store
            .add_reference(PageReference {
                page_url: "https://app/tenants/1".to_string(),
                element_id: element.id,
                reference_type: ReferenceType::Reference,
                display_label: None,
            })
            .await
            .unwrap();
        assert!(!duplicate);

        let refs = store.references_for_element(element.id).await.unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].reference_type, ReferenceType::Primary);

        let page_refs = store.references_for_page("https://app/leases/9").await.unwrap();
        assert_eq!(page_refs.len(), 1);
    }

    #[tokio::test]
    async fn test_reference_to_missing_element_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store
            .add_reference(PageReference {
                page_url: "https://app/x".to_string(),
                element_id: 99,
                reference_type: ReferenceType::Primary,
                display_label: None,
            })
            .await;
        assert!(matches!(result, Err(StoreError::ElementNotFound(99))));
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data").join("shared.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_element(contact_element()).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let elements = store.list_elements(Some(ElementType::ContactInfo)).await.unwrap();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].element_name, "John Smith");
        assert!(store.list_elements(Some(ElementType::Metric)).await.unwrap().is_empty());
    }
}
