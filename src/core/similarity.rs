//! Weighted similarity between contact records
//!
//! The score is a weighted average over the attributes present on both
//! sides: name similarity counts double, exact phone and email matches
//! count 1.5 each. It is NOT bounded by 1.0, so a lone matching phone
//! (score 1.5) clears the 0.85 threshold even when names differ.

use super::normalize::Contact;

pub const DEFAULT_THRESHOLD: f64 = 0.85;

const NAME_WEIGHT: f64 = 2.0;
const PHONE_WEIGHT: f64 = 1.5;
const EMAIL_WEIGHT: f64 = 1.5;

/// Edit-distance ratio in `0.0..=1.0` between two strings, case-insensitive.
///
/// This is normalized Levenshtein, not a longest-matching-blocks ratio
/// (`2 * matches / total length`). The two agree on identical and fully
/// disjoint strings but can differ in between, so a name-only comparison
/// may land on the other side of the `threshold / 2` cutoff than a
/// matching-blocks ratio would. For example `"Jon Smith"` vs `"John Smith"`
/// scores 0.9 here.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&a.trim().to_lowercase(), &b.trim().to_lowercase())
}

fn exact(a: &str, b: &str) -> f64 {
    if a == b {
        1.0
    } else {
        0.0
    }
}

/// Score two contacts. Both are normalized first; attributes missing on
/// either side are skipped rather than penalized. Returns 0.0 when no
/// attribute could be compared.
pub fn score(a: &Contact, b: &Contact) -> f64 {
    let a = a.normalized();
    let b = b.normalized();

    let mut total = 0.0;
    let mut compared = 0u32;

    if let (Some(x), Some(y)) = (&a.name, &b.name) {
        total += text_similarity(x, y) * NAME_WEIGHT;
        compared += 1;
    }
    if let (Some(x), Some(y)) = (&a.phone, &b.phone) {
        total += exact(x, y) * PHONE_WEIGHT;
        compared += 1;
    }
    if let (Some(x), Some(y)) = (&a.email, &b.email) {
        total += exact(x, y) * EMAIL_WEIGHT;
        compared += 1;
    }

    if compared == 0 {
        0.0
    } else {
        total / compared as f64
    }
}

/// Threshold-based matcher
#[derive(Debug, Clone, Copy)]
pub struct SimilarityScorer {
    threshold: f64,
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl SimilarityScorer {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn score(&self, a: &Contact, b: &Contact) -> f64 {
        score(a, b)
    }

    pub fn is_match(&self, a: &Contact, b: &Contact) -> bool {
        score(a, b) >= self.threshold
    }

    /// Highest-scoring candidate at or above the threshold.
    /// Earlier candidates win ties.
    pub fn best_match<'a, T>(
        &self,
        contact: &Contact,
        candidates: impl IntoIterator<Item = (T, &'a Contact)>,
    ) -> Option<(T, f64)> {
        let mut best: Option<(T, f64)> = None;

        for (key, candidate) in candidates {
            let s = score(contact, candidate);
            if s < self.threshold {
                continue;
            }
            match &best {
                Some((_, best_score)) if *best_score >= s => {}
                _ => best = Some((key, s)),
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_similarity_is_edit_distance_ratio() {
        assert!((text_similarity("Jon Smith", "john smith") - 0.9).abs() < 1e-9);
        assert_eq!(text_similarity(" Ann ", "ann"), 1.0);
        assert_eq!(text_similarity("abc", "xyz"), 0.0);
    }

    fn john() -> Contact {
        Contact::new()
            .with_name("John Smith")
            .with_phone("555.123.4567")
            .with_email("john.smith@example.com")
    }

    #[test]
    fn test_phone_formatting_does_not_prevent_match() {
        let a = john();
        let b = Contact::new()
            .with_name("John Smith")
            .with_phone("(555) 123-4567")
            .with_email("john.smith@example.com");

        let scorer = SimilarityScorer::default();
        assert!(scorer.score(&a, &b) >= 0.85);
        assert!(scorer.is_match(&a, &b));
    }

    #[test]
    fn test_entirely_different_contacts_do_not_match() {
        let b = Contact::new()
            .with_name("Jane Doe")
            .with_phone("212-555-0199")
            .with_email("jane@other.org");

        let scorer = SimilarityScorer::default();
        assert!(scorer.score(&john(), &b) < 0.85);
        assert!(!scorer.is_match(&john(), &b));
    }

    #[test]
    fn test_missing_fields_are_skipped() {
        let a = Contact::new().with_phone("5551234567");
        let b = Contact::new().with_name("Someone Else").with_phone("(555) 123-4567");

        // Only the phone is compared
        assert_eq!(score(&a, &b), 1.5);
    }

    #[test]
    fn test_single_matching_phone_merges_different_names() {
        let a = Contact::new().with_name("John Smith").with_phone("555-123-4567");
        let b = Contact::new().with_name("Robert Brown").with_phone("5551234567");

        assert!(SimilarityScorer::default().is_match(&a, &b));
    }

    #[test]
    fn test_nothing_to_compare_scores_zero() {
        let a = Contact::new().with_name("John Smith");
        let b = Contact::new().with_email("john@example.com");
        assert_eq!(score(&a, &b), 0.0);
    }

    #[test]
    fn test_best_match_picks_highest_score() {
        let existing = vec![
            (1, Contact::new().with_name("Jon Smith")),
            (2, Contact::new().with_name("John Smith")),
            (3, Contact::new().with_name("Alice Jones")),
        ];
        let probe = Contact::new().with_name("john smith");

        let scorer = SimilarityScorer::default();
        let best = scorer.best_match(&probe, existing.iter().map(|(id, c)| (*id, c)));
        assert_eq!(best.map(|(id, _)| id), Some(2));
    }

    #[test]
    fn test_text_similarity_ignores_case() {
        assert_eq!(text_similarity("Late Fee", "late fee"), 1.0);
        assert!(text_similarity("Late Fee", "Security Deposit") < 0.5);
    }
}
