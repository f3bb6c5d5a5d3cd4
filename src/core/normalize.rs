//! Canonical forms for free-text contact attributes
//!
//! All functions are pure. They are applied before any comparison so that
//! "JOHN SMITH / 555.123.4567" and "John Smith / (555) 123-4567" look the
//! same to the similarity scorer.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const STREET_SUFFIXES: &[(&str, &str)] = &[
    ("Street", "St"),
    ("Avenue", "Ave"),
    ("Boulevard", "Blvd"),
    ("Drive", "Dr"),
    ("Road", "Rd"),
    ("Lane", "Ln"),
    ("Court", "Ct"),
    ("Place", "Pl"),
    ("Apartment", "Apt"),
    ("Suite", "Ste"),
    ("Parkway", "Pkwy"),
    ("Circle", "Cir"),
    ("Highway", "Hwy"),
];

static SUFFIX_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    STREET_SUFFIXES
        .iter()
        .filter_map(|(word, abbrev)| {
            Regex::new(&format!(r"(?i)\b{}\b", word))
                .ok()
                .map(|re| (re, *abbrev))
        })
        .collect()
});

/// Title-case with the word-boundary rule used by most scripting languages:
/// a letter is upper-cased when the previous character is not a letter.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_letter = false;

    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_letter = true;
        } else {
            out.push(c);
            prev_letter = false;
        }
    }

    out
}

pub fn normalize_name(s: &str) -> String {
    title_case(s.trim())
}

/// Formats 10-digit (or 11-digit, leading `1`) numbers as `(XXX) XXX-XXXX`.
/// Anything else is returned unchanged.
pub fn normalize_phone(s: &str) -> String {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();

    let local = match digits.len() {
        10 => digits.as_str(),
        11 if digits.starts_with('1') => &digits[1..],
        _ => return s.to_string(),
    };

    format!("({}) {}-{}", &local[0..3], &local[3..6], &local[6..10])
}

pub fn normalize_email(s: &str) -> String {
    s.trim().to_lowercase()
}

pub fn normalize_address(s: &str) -> String {
    let mut address = s.trim().to_string();
    for (pattern, abbrev) in SUFFIX_PATTERNS.iter() {
        address = pattern.replace_all(&address, *abbrev).into_owned();
    }
    title_case(&address)
}

/// A contact as observed on a page. Every attribute is optional; absent
/// attributes are skipped when scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Contact {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Normalized copy. Blank attributes become `None`.
    pub fn normalized(&self) -> Contact {
        fn apply(v: &Option<String>, f: fn(&str) -> String) -> Option<String> {
            v.as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(f)
        }

        Contact {
            name: apply(&self.name, normalize_name),
            phone: apply(&self.phone, normalize_phone),
            email: apply(&self.email, normalize_email),
            address: apply(&self.address, normalize_address),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.email.is_none() && self.address.is_none()
    }

    /// Fields of `other` fill gaps in `self`, present fields in `other` win.
    pub fn merged_with(&self, other: &Contact) -> Contact {
        Contact {
            name: other.name.clone().or_else(|| self.name.clone()),
            phone: other.phone.clone().or_else(|| self.phone.clone()),
            email: other.email.clone().or_else(|| self.email.clone()),
            address: other.address.clone().or_else(|| self.address.clone()),
        }
    }

    /// Short label used as the element name of a contact
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.email.clone())
            .or_else(|| self.phone.clone())
            .unwrap_or_else(|| "Unnamed Contact".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_is_trimmed_and_title_cased() {
        assert_eq!(normalize_name("  jOHN smith "), "John Smith");
        assert_eq!(normalize_name("mary-kate o'neil"), "Mary-Kate O'Neil");
    }

    #[test]
    fn test_phone_formats() {
        assert_eq!(normalize_phone("555.123.4567"), "(555) 123-4567");
        assert_eq!(normalize_phone("+1 555 123 4567"), "(555) 123-4567");
        assert_eq!(normalize_phone("5551234567"), "(555) 123-4567");
    }

    #[test]
    fn test_phone_with_unexpected_digit_count_is_unchanged() {
        assert_eq!(normalize_phone("123-4567"), "123-4567");
        assert_eq!(normalize_phone("25551234567"), "25551234567");
    }

    #[test]
    fn test_phone_is_idempotent() {
        for input in ["555.123.4567", "1-555-123-4567", "123", "(555) 123-4567 x12", "ext 9"] {
            let once = normalize_phone(input);
            assert_eq!(normalize_phone(&once), once, "input: {}", input);
        }
    }

    #[test]
    fn test_email_is_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  JOHN@X.COM "), "john@x.com");
    }

    #[test]
    fn test_address_abbreviates_suffixes() {
        assert_eq!(normalize_address(" 123 main street "), "123 Main St");
        assert_eq!(normalize_address("45 Oak AVENUE Apartment 12b"), "45 Oak Ave Apt 12B");
        // Partial words are left alone
        assert_eq!(normalize_address("9 Streetly Road"), "9 Streetly Rd");
    }

    #[test]
    fn test_contact_normalized_drops_blank_fields() {
        let contact = Contact::new()
            .with_name("  ")
            .with_phone("555 123 4567")
            .with_email("A@B.COM");

        let normalized = contact.normalized();
        assert_eq!(normalized.name, None);
        assert_eq!(normalized.phone.as_deref(), Some("(555) 123-4567"));
        assert_eq!(normalized.email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn test_merged_with_fills_gaps() {
        let existing = Contact::new().with_name("John Smith").with_phone("(555) 123-4567");
        let incoming = Contact::new().with_email("john@example.com");

        let merged = existing.merged_with(&incoming);
        assert_eq!(merged.name.as_deref(), Some("John Smith"));
        assert_eq!(merged.email.as_deref(), Some("john@example.com"));
    }
}
