//! Best-effort calculation extraction from rendered pages
//!
//! Nothing here is authoritative. Currency amounts, percentages and
//! "Total:"-style labels are pulled out of the page text with regular
//! expressions; table rows are flagged as sums when one cell equals the
//! sum of the others. Multi-row totals, tax-inclusive sums and ratios are
//! not recognised.

use super::fields::page_text;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

const SUM_TOLERANCE: f64 = 0.01;

static CURRENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$[\d,]+\.?\d*").expect("valid currency regex"));

static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?%").expect("valid percent regex"));

static KEYWORD_TOTAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(total due|total|subtotal|balance due|balance|amount due)\s*:\s*(-?\$[\d,]+\.?\d*)")
        .expect("valid keyword regex")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordTotal {
    pub label: String,
    pub amount: f64,
    pub raw: String,
}

/// A table row in which one cell is the sum of the other numeric cells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumFormula {
    pub row_label: Option<String>,
    pub operands: Vec<f64>,
    pub total: f64,
    pub expression: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculationReport {
    pub currency_values: Vec<String>,
    pub percentages: Vec<String>,
    pub keyword_totals: Vec<KeywordTotal>,
    pub sum_formulas: Vec<SumFormula>,
}

impl CalculationReport {
    pub fn is_empty(&self) -> bool {
        self.currency_values.is_empty()
            && self.percentages.is_empty()
            && self.keyword_totals.is_empty()
            && self.sum_formulas.is_empty()
    }
}

/// Parse `$1,250.00`, `(45.00)`, `-12`, `5%` into a number.
/// Parenthesised values are negative.
pub fn parse_amount(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let negative = (trimmed.starts_with('(') && trimmed.ends_with(')')) || trimmed.starts_with('-');
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '(' | ')' | '-' | '%' | ' '))
        .collect();

    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let value: f64 = cleaned.parse().ok()?;
    Some(if negative { -value } else { value })
}

fn dedup_in_order(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

/// Regex pass over plain text
pub fn extract_from_text(text: &str) -> CalculationReport {
    let currency_values = dedup_in_order(CURRENCY_RE.find_iter(text).map(|m| m.as_str().to_string()));
    let percentages = dedup_in_order(PERCENT_RE.find_iter(text).map(|m| m.as_str().to_string()));

    let keyword_totals = KEYWORD_TOTAL_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let label = caps.get(1)?.as_str().to_string();
            let raw = caps.get(2)?.as_str().to_string();
            let amount = parse_amount(&raw)?;
            Some(KeywordTotal { label, amount, raw })
        })
        .collect();

    CalculationReport {
        currency_values,
        percentages,
        keyword_totals,
        sum_formulas: Vec::new(),
    }
}

fn format_amount(v: f64) -> String {
    format!("{:.2}", v)
}

/// Check one row of cell texts. The last qualifying cell is preferred as
/// the total, since totals usually close a row. Zero totals are ignored.
pub fn detect_row_sum(cells: &[String]) -> Option<SumFormula> {
    let numeric: Vec<(usize, f64)> = cells
        .iter()
        .enumerate()
        .filter_map(|(i, c)| parse_amount(c).map(|v| (i, v)))
        .collect();

    if numeric.len() < 3 {
        return None;
    }

    for &(total_idx, total) in numeric.iter().rev() {
        if total.abs() < SUM_TOLERANCE {
            continue;
        }

        let operands: Vec<f64> = numeric
            .iter()
            .filter(|(i, _)| *i != total_idx)
            .map(|(_, v)| *v)
            .collect();
        let sum: f64 = operands.iter().sum();

        if (sum - total).abs() <= SUM_TOLERANCE {
            let row_label = cells
                .iter()
                .map(|c| c.trim())
                .find(|c| !c.is_empty() && parse_amount(c).is_none())
                .map(str::to_string);

            let expression = format!(
                "{} = {}",
                format_amount(total),
                operands.iter().map(|v| format_amount(*v)).collect::<Vec<_>>().join(" + ")
            );

            return Some(SumFormula {
                row_label,
                operands,
                total,
                expression,
            });
        }
    }

    None
}

/// Scan every `<tr>` in the document for sum rows
pub fn extract_table_sums(html: &str) -> Vec<SumFormula> {
    let (Ok(row_sel), Ok(cell_sel)) = (Selector::parse("tr"), Selector::parse("td, th")) else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    document
        .select(&row_sel)
        .filter_map(|row| {
            let cells: Vec<String> = row
                .select(&cell_sel)
                .map(|cell| cell.text().collect::<Vec<_>>().join(" ").trim().to_string())
                .collect();
            detect_row_sum(&cells)
        })
        .collect()
}

/// Text heuristics plus table sums for a full HTML page
pub fn extract_calculations(html: &str) -> CalculationReport {
    let mut report = extract_from_text(&page_text(html));
    report.sum_formulas = extract_table_sums(html);

    tracing::debug!(
        "[CalculationExtractor] {} currency, {} percent, {} totals, {} sum rows",
        report.currency_values.len(),
        report.percentages.len(),
        report.keyword_totals.len(),
        report.sum_formulas.len()
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$1,250.00"), Some(1250.0));
        assert_eq!(parse_amount("(45.50)"), Some(-45.5));
        assert_eq!(parse_amount("5%"), Some(5.0));
        assert_eq!(parse_amount("Unit 4B"), None);
        assert_eq!(parse_amount("$"), None);
    }

    #[test]
    fn test_text_patterns() {
        let text = "Rent $1,200.00 due. Late fee 5% applies. Total: $1,260.00 Balance Due: $60.00 \
                    Rent $1,200.00 again";
        let report = extract_from_text(text);

        assert_eq!(report.currency_values, vec!["$1,200.00", "$1,260.00", "$60.00"]);
        assert_eq!(report.percentages, vec!["5%"]);
        assert_eq!(report.keyword_totals.len(), 2);
        assert_eq!(report.keyword_totals[0].label, "Total");
        assert_eq!(report.keyword_totals[0].amount, 1260.0);
        assert_eq!(report.keyword_totals[1].label, "Balance Due");
    }

    #[test]
    fn test_row_sum_detected_within_tolerance() {
        let row = cells(&["Unit 101", "$1,000.00", "$250.00", "$10.005", "$1,260.00"]);
        let formula = detect_row_sum(&row).unwrap();

        assert_eq!(formula.row_label.as_deref(), Some("Unit 101"));
        assert_eq!(formula.total, 1260.0);
        assert_eq!(formula.operands.len(), 3);
        assert!(formula.expression.starts_with("1260.00 = 1000.00 + 250.00"));
    }

    #[test]
    fn test_row_without_sum_is_ignored() {
        assert!(detect_row_sum(&cells(&["A", "1", "2", "4"])).is_none());
        // Two numbers are never enough
        assert!(detect_row_sum(&cells(&["A", "5", "5"])).is_none());
        assert!(detect_row_sum(&cells(&["0", "0", "0"])).is_none());
    }

    #[test]
    fn test_total_in_first_column() {
        let formula = detect_row_sum(&cells(&["300", "100", "200"])).unwrap();
        assert_eq!(formula.total, 300.0);
        assert_eq!(formula.row_label, None);
    }

    #[test]
    fn test_extract_calculations_from_html() {
        let html = r#"
            <html><body>
              <p>Total: $1,575.00</p>
              <table>
                <tr><th>Charge</th><th>Rent</th><th>Fees</th><th>Total</th></tr>
                <tr><td>March</td><td>$1,500.00</td><td>$75.00</td><td>$1,575.00</td></tr>
                <tr><td>April</td><td>$1,500.00</td><td>$0.00</td><td>$1,400.00</td></tr>
              </table>
              <script>var lateFeeRate = "5%";</script>
            </body></html>
        "#;

        let report = extract_calculations(html);
        assert_eq!(report.sum_formulas.len(), 1);
        assert_eq!(report.sum_formulas[0].row_label.as_deref(), Some("March"));
        assert_eq!(report.keyword_totals[0].amount, 1575.0);
        assert!(report.percentages.contains(&"5%".to_string()));
        assert!(!report.is_empty());
    }
}
