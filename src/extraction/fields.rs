//! Form field capture and link discovery from captured HTML

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use url::Url;

const MAX_CONTEXT_CHARS: usize = 200;
const SKIPPED_INPUT_TYPES: &[&str] = &["hidden", "submit", "button", "reset", "image"];

/// One form/display field observed on a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedField {
    pub field_name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub context: String,
}

impl CapturedField {
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            attributes: BTreeMap::new(),
            context: String::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: String) -> String {
    if text.chars().count() <= MAX_CONTEXT_CHARS {
        text
    } else {
        text.chars().take(MAX_CONTEXT_CHARS).collect()
    }
}

fn element_text(el: &ElementRef) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

/// Collect `<input>`, `<select>` and `<textarea>` elements that carry a
/// `name` or `id`. Context is the `<label for=…>` text, else placeholder,
/// else aria-label, else the parent element's text.
pub fn capture_fields(html: &str) -> Vec<CapturedField> {
    let document = Html::parse_document(html);

    let (Some(label_sel), Some(field_sel)) =
        (selector("label[for]"), selector("input, select, textarea"))
    else {
        return Vec::new();
    };

    let labels: HashMap<String, String> = document
        .select(&label_sel)
        .filter_map(|label| {
            label
                .value()
                .attr("for")
                .map(|id| (id.to_string(), element_text(&label)))
        })
        .collect();

    let mut seen = HashSet::new();
    let mut fields = Vec::new();

    for el in document.select(&field_sel) {
        let node = el.value();
        let tag = node.name();

        if tag == "input" {
            let input_type = node.attr("type").unwrap_or("text").to_lowercase();
            if SKIPPED_INPUT_TYPES.contains(&input_type.as_str()) {
                continue;
            }
        }

        let Some(field_name) = node.attr("name").or_else(|| node.attr("id")) else {
            continue;
        };
        if !seen.insert(field_name.to_string()) {
            continue;
        }

        let mut attributes: BTreeMap<String, String> = node
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        attributes.insert("tag".to_string(), tag.to_string());

        let context = node
            .attr("id")
            .and_then(|id| labels.get(id).cloned())
            .filter(|t| !t.is_empty())
            .or_else(|| node.attr("placeholder").map(str::to_string))
            .or_else(|| node.attr("aria-label").map(str::to_string))
            .or_else(|| {
                el.parent()
                    .and_then(ElementRef::wrap)
                    .map(|parent| element_text(&parent))
            })
            .unwrap_or_default();

        fields.push(CapturedField {
            field_name: field_name.to_string(),
            attributes,
            context: truncate(context),
        });
    }

    tracing::debug!("[FieldCapture] Captured {} fields", fields.len());
    fields
}

/// `<link rel="canonical">` target, if the capture carries one
pub fn canonical_url(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let sel = selector("link[rel=canonical]")?;
    document
        .select(&sel)
        .filter_map(|el| el.value().attr("href"))
        .map(|href| href.trim().to_string())
        .find(|href| !href.is_empty())
}

/// Same-host http(s) links, fragments removed, in document order
pub fn discover_links(html: &str, base_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let Some(sel) = selector("a[href]") else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();

    document
        .select(&sel)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .filter(|url| url.host_str() == base.host_str())
        .map(|mut url| {
            url.set_fragment(None);
            url.to_string()
        })
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// All text in the document, scripts included
pub fn page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    collapse_whitespace(&document.root_element().text().collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE_FORM: &str = r#"
        <html><body>
          <form>
            <label for="rent">Monthly Rent</label>
            <input id="rent" name="lease[rent]" type="text">
            <input name="late_fee" placeholder="Late fee amount">
            <div>Move-in date <input name="move_in" type="date"></div>
            <input type="hidden" name="csrf_token" value="abc">
            <input type="submit" name="save" value="Save">
            <select name="unit"><option>101</option></select>
            <input type="radio" name="pets" value="yes">
            <input type="radio" name="pets" value="no">
            <input type="text">
          </form>
        </body></html>
    "#;

    #[test]
    fn test_capture_fields_uses_label_placeholder_and_parent() {
        let fields = capture_fields(LEASE_FORM);
        let names: Vec<&str> = fields.iter().map(|f| f.field_name.as_str()).collect();
        assert_eq!(names, vec!["lease[rent]", "late_fee", "move_in", "unit", "pets"]);

        assert_eq!(fields[0].context, "Monthly Rent");
        assert_eq!(fields[1].context, "Late fee amount");
        assert!(fields[2].context.starts_with("Move-in date"));
        assert_eq!(fields[0].attributes.get("tag").map(String::as_str), Some("input"));
        assert_eq!(fields[3].attributes.get("tag").map(String::as_str), Some("select"));
    }

    #[test]
    fn test_discover_links_keeps_same_host() {
        let html = r##"
            <a href="/tenants">Tenants</a>
            <a href="/tenants#top">Tenants again</a>
            <a href="https://app.example.com/units?page=2">Units</a>
            <a href="https://other.com/">Elsewhere</a>
            <a href="mailto:office@example.com">Mail</a>
        "##;

        let links = discover_links(html, "https://app.example.com/dashboard");
        assert_eq!(
            links,
            vec![
                "https://app.example.com/tenants".to_string(),
                "https://app.example.com/units?page=2".to_string(),
            ]
        );
    }

    #[test]
    fn test_canonical_url() {
        let html = r#"<html><head><link rel="canonical" href="https://app.example.com/leases/7"></head></html>"#;
        assert_eq!(canonical_url(html).as_deref(), Some("https://app.example.com/leases/7"));
        assert_eq!(canonical_url("<p>none</p>"), None);
    }

    #[test]
    fn test_context_is_truncated() {
        let long = "x".repeat(500);
        let html = format!(r#"<input name="notes" placeholder="{}">"#, long);
        let fields = capture_fields(&html);
        assert_eq!(fields[0].context.chars().count(), MAX_CONTEXT_CHARS);
    }
}
