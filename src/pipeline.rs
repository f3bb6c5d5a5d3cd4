//! Captured page processing
//!
//! A page is processed once: its form fields are analyzed, its
//! calculations are recorded as shared elements, and its same-site links
//! are queued. A page is marked processed even when processing fails, so a
//! transient failure skips it until the crawl state is cleared.

use crate::analysis::analyzer::{AnalyzedField, ConsensusAnalyzer};
use crate::core::normalize::title_case;
use crate::extraction::{
    canonical_url, capture_fields, discover_links, extract_calculations, CalculationReport,
};
use crate::shared_data::{ResolveOutcome, SharedDataManager};
use crate::storage::{CrawlState, CrawlStateStore};
use anyhow::{Context as _, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

const SUM_FORMULA_CONFIDENCE: u8 = 70;
const KEYWORD_TOTAL_CONFIDENCE: u8 = 80;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PageReport {
    pub url: String,
    pub skipped: bool,
    pub fields: Vec<AnalyzedField>,
    pub calculations: CalculationReport,
    pub elements: Vec<ResolveOutcome>,
    pub discovered: usize,
    pub error: Option<String>,
}

impl PageReport {
    fn skipped(url: &str) -> Self {
        Self {
            url: url.to_string(),
            skipped: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub interrupted: bool,
}

pub struct PageProcessor {
    analyzer: Arc<ConsensusAnalyzer>,
    shared: Arc<SharedDataManager>,
    state_store: Arc<dyn CrawlStateStore>,
    state: CrawlState,
}

impl PageProcessor {
    pub async fn new(
        analyzer: Arc<ConsensusAnalyzer>,
        shared: Arc<SharedDataManager>,
        state_store: Arc<dyn CrawlStateStore>,
    ) -> Result<Self> {
        let state = state_store
            .load()
            .await
            .context("Failed to load crawl state")?;

        Ok(Self {
            analyzer,
            shared,
            state_store,
            state,
        })
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    pub async fn persist(&self) -> Result<()> {
        self.state_store
            .save(&self.state)
            .await
            .context("Failed to save crawl state")
    }

    pub async fn process_page(&mut self, url: &str, html: &str) -> PageReport {
        if self.state.is_processed(url) {
            tracing::debug!("[PageProcessor] Skipping already processed {}", url);
            return PageReport::skipped(url);
        }

        tracing::info!("[PageProcessor] Processing {}", url);
        let mut report = PageReport {
            url: url.to_string(),
            ..Default::default()
        };

        if let Err(e) = self.process_into(url, html, &mut report).await {
            tracing::error!("[PageProcessor] Failed to process {}: {:#}", url, e);
            report.error = Some(format!("{:#}", e));
        }

        self.state.mark_processed(url);
        report
    }

    /// A capture that could not be loaded counts as a failed page
    fn record_failure(&mut self, url: &str, error: &anyhow::Error) -> PageReport {
        if self.state.is_processed(url) {
            return PageReport::skipped(url);
        }

        tracing::error!("[PageProcessor] Failed to load {}: {:#}", url, error);
        self.state.mark_processed(url);
        PageReport {
            url: url.to_string(),
            error: Some(format!("{:#}", error)),
            ..Default::default()
        }
    }

    async fn process_into(&mut self, url: &str, html: &str, report: &mut PageReport) -> Result<()> {
        for field in capture_fields(html) {
            report.fields.push(self.analyzer.analyze_field(&field).await);
        }

        report.calculations = extract_calculations(html);

        let mut names_on_page: HashMap<String, usize> = HashMap::new();
        for (i, formula) in report.calculations.sum_formulas.iter().enumerate() {
            let base = match &formula.row_label {
                Some(label) => format!("{} Total", label),
                None => format!("Row {} Total", i + 1),
            };
            // Rows repeating a label on one page are distinct facts
            let seen = names_on_page.entry(base.clone()).or_insert(0);
            *seen += 1;
            let name = if *seen == 1 {
                base
            } else {
                format!("{} {}", base, seen)
            };
            let outcome = self
                .shared
                .record_calculation(
                    url,
                    &name,
                    json!({ "total": formula.total, "operands": formula.operands }),
                    Some(formula.expression.clone()),
                    SUM_FORMULA_CONFIDENCE,
                )
                .await?;
            report.elements.push(outcome);
        }

        for total in &report.calculations.keyword_totals {
            let outcome = self
                .shared
                .record_metric(
                    url,
                    &title_case(&total.label),
                    json!({ "amount": total.amount, "raw": total.raw }),
                    KEYWORD_TOTAL_CONFIDENCE,
                )
                .await?;
            report.elements.push(outcome);
        }

        for link in discover_links(html, url) {
            if self.state.add_discovered(link) {
                report.discovered += 1;
            }
        }

        tracing::info!(
            "[PageProcessor] {}: {} fields, {} elements, {} new links",
            url,
            report.fields.len(),
            report.elements.len(),
            report.discovered
        );
        Ok(())
    }

    /// Process every `*.html` capture in `dir`, in file name order. State is
    /// saved after each page and when Ctrl-C interrupts the run. A capture
    /// that cannot be loaded is reported as failed and the run continues.
    pub async fn process_dir(&mut self, dir: &Path) -> Result<(BatchSummary, Vec<PageReport>)> {
        let mut files = html_files(dir).await?;
        files.sort();

        let mut summary = BatchSummary::default();
        let mut reports = Vec::new();

        for path in files {
            let report = match load_capture(&path).await {
                Ok((url, html)) => {
                    let outcome = tokio::select! {
                        report = self.process_page(&url, &html) => Some(report),
                        _ = tokio::signal::ctrl_c() => None,
                    };

                    let Some(report) = outcome else {
                        tracing::warn!("[PageProcessor] Interrupted, saving crawl state");
                        summary.interrupted = true;
                        self.persist().await?;
                        return Ok((summary, reports));
                    };
                    report
                }
                Err(e) => self.record_failure(&capture_key(&path), &e),
            };

            if report.skipped {
                summary.skipped += 1;
            } else if report.error.is_some() {
                summary.failed += 1;
            } else {
                summary.processed += 1;
            }
            reports.push(report);

            self.persist().await?;
        }

        Ok((summary, reports))
    }
}

async fn html_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read capture directory {:?}", dir))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_html = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"));
        if is_html {
            files.push(path);
        }
    }
    Ok(files)
}

/// Read a capture and work out its page URL. Bytes that are not UTF-8
/// are replaced rather than rejected.
async fn load_capture(path: &Path) -> Result<(String, String)> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("Failed to read capture {:?}", path))?;
    let html = String::from_utf8_lossy(&bytes).into_owned();
    let url = page_url_for(path, &html)?;
    Ok((url, html))
}

/// The capture's canonical link, else a `file://` URL for the capture itself
fn page_url_for(path: &Path, html: &str) -> Result<String> {
    match canonical_url(html) {
        Some(url) => Ok(url),
        None => file_url(path),
    }
}

fn file_url(path: &Path) -> Result<String> {
    let absolute = std::fs::canonicalize(path)
        .with_context(|| format!("Failed to resolve capture path {:?}", path))?;
    url::Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .map_err(|_| anyhow::anyhow!("Capture path {:?} is not absolute", absolute))
}

/// Crawl-state key for a capture that could not be loaded
fn capture_key(path: &Path) -> String {
    file_url(path).unwrap_or_else(|_| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::similarity::SimilarityScorer;
    use crate::storage::{InMemoryStateStore, InMemoryStore};

    const STATEMENT: &str = r#"
        <html><head><link rel="canonical" href="https://app.example.com/tenants/7/ledger"></head>
        <body>
          <a href="/tenants/7">Tenant</a>
          <a href="/units/101">Unit</a>
          <label for="memo">Memo</label><input id="memo" name="memo">
          <table>
            <tr><td>March</td><td>$1,500.00</td><td>$75.00</td><td>$1,575.00</td></tr>
          </table>
          <p>Balance: $1,575.00</p>
        </body></html>
    "#;

    async fn processor(state_store: Arc<dyn CrawlStateStore>) -> PageProcessor {
        let analyzer = Arc::new(ConsensusAnalyzer::new(Vec::new()));
        let shared = Arc::new(SharedDataManager::new(
            Arc::new(InMemoryStore::new()),
            SimilarityScorer::default(),
        ));
        PageProcessor::new(analyzer, shared, state_store).await.unwrap()
    }

    #[tokio::test]
    async fn test_process_page_records_calculations_and_links() {
        let mut processor = processor(Arc::new(InMemoryStateStore::new())).await;
        let url = "https://app.example.com/tenants/7/ledger";

        let report = processor.process_page(url, STATEMENT).await;
        assert!(!report.skipped);
        assert!(report.error.is_none());
        assert_eq!(report.fields.len(), 1);
        assert!(report.fields[0].analysis.is_fallback());
        assert_eq!(report.elements.len(), 2);
        assert_eq!(report.elements[0].element.element_name, "March Total");
        assert_eq!(report.elements[1].element.element_name, "Balance");
        assert_eq!(report.discovered, 2);
        assert!(processor.state().is_processed(url));

        let again = processor.process_page(url, STATEMENT).await;
        assert!(again.skipped);
    }

    #[tokio::test]
    async fn test_process_dir_persists_state() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ledger.html"), STATEMENT).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("blank.html"), "<html><body>No data</body></html>").unwrap();

        let state_store = Arc::new(InMemoryStateStore::new());
        let mut processor = processor(state_store.clone()).await;

        let (summary, reports) = processor.process_dir(dir.path()).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert!(!summary.interrupted);
        assert_eq!(reports.len(), 2);

        let saved = state_store.load().await.unwrap();
        assert!(saved.is_processed("https://app.example.com/tenants/7/ledger"));
        assert!(saved.processed.iter().any(|u| u.starts_with("file://")));

        let (second, _) = processor.process_dir(dir.path()).await.unwrap();
        assert_eq!(second.skipped, 2);
    }

    #[tokio::test]
    async fn test_unlabelled_sum_rows_stay_separate() {
        let mut processor = processor(Arc::new(InMemoryStateStore::new())).await;
        let html = r#"
            <table>
              <tr><td>$10.00</td><td>$5.00</td><td>$15.00</td></tr>
              <tr><td>$20.00</td><td>$2.00</td><td>$22.00</td></tr>
              <tr><td>Fees</td><td>$1.00</td><td>$1.00</td><td>$2.00</td></tr>
              <tr><td>Fees</td><td>$3.00</td><td>$3.00</td><td>$6.00</td></tr>
            </table>
        "#;

        let report = processor.process_page("https://app.example.com/ledger", html).await;
        assert!(report.error.is_none());
        assert_eq!(report.calculations.sum_formulas.len(), 4);

        let names: Vec<&str> = report
            .elements
            .iter()
            .map(|o| o.element.element_name.as_str())
            .collect();
        assert_eq!(names, vec!["Row 1 Total", "Row 2 Total", "Fees Total", "Fees Total 2"]);
        assert!(report.elements.iter().all(|o| o.created));
        assert!(report.elements.iter().all(|o| o.element.version == 1));
    }

    #[tokio::test]
    async fn test_unreadable_capture_fails_without_stopping_the_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a_broken.html")).unwrap();
        std::fs::write(dir.path().join("b_ledger.html"), STATEMENT).unwrap();

        let state_store = Arc::new(InMemoryStateStore::new());
        let mut processor = processor(state_store.clone()).await;

        let (summary, reports) = processor.process_dir(dir.path()).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 1);
        assert!(reports[0].error.is_some());
        assert!(reports[0].url.starts_with("file://"));

        let saved = state_store.load().await.unwrap();
        assert!(saved.is_processed(&reports[0].url));

        let (second, _) = processor.process_dir(dir.path()).await.unwrap();
        assert_eq!(second.skipped, 2);
        assert_eq!(second.failed, 0);
    }
}
