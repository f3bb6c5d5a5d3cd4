//! Page-scraping heuristics over captured HTML
//!
//! Information Hiding:
//! - DOM traversal and selectors stay inside this module
//! - Callers get plain data: fields, links, calculations

pub mod calculations;
pub mod fields;

pub use calculations::{extract_calculations, CalculationReport, KeywordTotal, SumFormula};
pub use fields::{canonical_url, capture_fields, discover_links, page_text, CapturedField};
