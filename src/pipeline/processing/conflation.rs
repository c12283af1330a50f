use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::config::DeduplicationConfig;
use crate::types::{CanonicalRecord, KnownContact};

/// Scores a company name against the known names.
///
/// Kept narrow so the similarity algorithm can be swapped or tested on its own.
pub trait NameMatcher {
    /// The best scoring known name and its score on a 0-100 scale, or `None`
    /// when there are no known names. Ties may resolve to any of the tied names.
    fn best_match<'k>(&self, name: &str, known: &'k [String]) -> Option<(&'k str, f64)>;
}

/// Token-order-insensitive similarity: both names are lowercased, split on
/// whitespace, sorted and rejoined before a normalized Levenshtein comparison.
///
/// The edit distance is normalized by the longer name rather than by the
/// combined length, so scores run lower than an insertion/deletion (LCS)
/// ratio whenever the names differ in length:
/// `acme` vs `acme co` scores 57.1 here and 72.7 as an LCS ratio. Thresholds
/// tuned against an LCS-based scorer need lowering to keep the same recall.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSortMatcher;

impl TokenSortMatcher {
    pub fn score(a: &str, b: &str) -> f64 {
        strsim::normalized_levenshtein(&token_sort(a), &token_sort(b)) * 100.0
    }
}

impl NameMatcher for TokenSortMatcher {
    fn best_match<'k>(&self, name: &str, known: &'k [String]) -> Option<(&'k str, f64)> {
        let sorted_name = token_sort(name);
        known
            .iter()
            .map(|candidate| {
                let score = strsim::normalized_levenshtein(&sorted_name, &token_sort(candidate)) * 100.0;
                (candidate.as_str(), score)
            })
            .fold(None, |best: Option<(&'k str, f64)>, current| match best {
                Some((_, best_score)) if best_score >= current.1 => best,
                _ => Some(current),
            })
    }
}

fn token_sort(value: &str) -> String {
    let lower = value.to_lowercase();
    let mut tokens: Vec<&str> = lower.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Run-scoped identity index of already known contacts.
///
/// Seeded from the store at run start and grown as files are accepted, so a
/// later file in the same run is checked against earlier acceptances.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupIndex {
    phones: HashSet<String>,
    names: Vec<String>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_known(contacts: &[KnownContact]) -> Self {
        let mut index = Self::new();
        for contact in contacts {
            if let Some(phone) = &contact.phone_number {
                index.phones.insert(phone.clone());
            }
            index.names.push(contact.company_name.to_lowercase());
        }
        index
    }

    pub fn contains_phone(&self, phone: &str) -> bool {
        self.phones.contains(phone)
    }

    /// Lowercased company names, in the order they became known
    pub fn known_names(&self) -> &[String] {
        &self.names
    }

    pub fn phone_count(&self) -> usize {
        self.phones.len()
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    /// Return the index extended with a batch of newly accepted records
    pub fn extended_with(mut self, accepted: &[CanonicalRecord]) -> Self {
        for record in accepted {
            if let Some(phone) = &record.phone_number {
                self.phones.insert(phone.clone());
            }
            if let Some(name) = record.lowercase_name() {
                self.names.push(name);
            }
        }
        self
    }
}

/// Outcome of checking one record against the index
#[derive(Debug, Clone, PartialEq)]
pub enum DedupDecision {
    /// Previously unseen; goes on to persistence
    Accept,
    /// The phone number is already known
    ExactDuplicate,
    /// Similar enough to a known company name to need a human decision
    PotentialDuplicate { matched_name: String, score: f64 },
}

/// A record held back for review and why
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub record: CanonicalRecord,
    pub matched_name: String,
    pub score: f64,
}

/// Per-file result of deduplication
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub accepted: Vec<CanonicalRecord>,
    pub review: Vec<ReviewEntry>,
    pub exact_duplicates: Vec<CanonicalRecord>,
}

/// Filters a cleaned batch against the known contacts: exact match on phone
/// number always, then fuzzy match on company name when enabled.
pub struct DeduplicationEngine<M: NameMatcher = TokenSortMatcher> {
    config: DeduplicationConfig,
    matcher: M,
}

impl DeduplicationEngine<TokenSortMatcher> {
    pub fn new(config: DeduplicationConfig) -> Self {
        Self::with_matcher(config, TokenSortMatcher)
    }
}

impl<M: NameMatcher> DeduplicationEngine<M> {
    pub fn with_matcher(config: DeduplicationConfig, matcher: M) -> Self {
        Self { config, matcher }
    }

    /// Decide what happens to one record
    pub fn decide(&self, record: &CanonicalRecord, index: &DedupIndex) -> DedupDecision {
        if let Some(phone) = record.phone_number.as_deref() {
            if index.contains_phone(phone) {
                return DedupDecision::ExactDuplicate;
            }
        }

        if !self.config.enable_fuzzy_matching {
            return DedupDecision::Accept;
        }

        let Some(name) = record.lowercase_name() else {
            return DedupDecision::Accept;
        };

        match self.matcher.best_match(&name, index.known_names()) {
            Some((matched, score)) if score >= f64::from(self.config.company_name_threshold) => {
                DedupDecision::PotentialDuplicate {
                    matched_name: matched.to_string(),
                    score,
                }
            }
            _ => DedupDecision::Accept,
        }
    }

    pub fn deduplicate(&self, batch: Vec<CanonicalRecord>, index: &DedupIndex) -> DedupOutcome {
        info!("Starting deduplication of {} records...", batch.len());
        if self.config.enable_fuzzy_matching {
            info!(
                "Fuzzy matching for company names is enabled (threshold {})",
                self.config.company_name_threshold
            );
        } else {
            info!("Fuzzy matching for company names is disabled.");
        }

        let mut outcome = DedupOutcome::default();
        for record in batch {
            match self.decide(&record, index) {
                DedupDecision::Accept => outcome.accepted.push(record),
                DedupDecision::ExactDuplicate => outcome.exact_duplicates.push(record),
                DedupDecision::PotentialDuplicate { matched_name, score } => {
                    warn!(
                        "Potential duplicate found for '{}'. Similarity: {:.1}%. Matched with: '{}'. Holding for review.",
                        record.company_name.as_deref().unwrap_or_default(),
                        score,
                        matched_name
                    );
                    outcome.review.push(ReviewEntry {
                        record,
                        matched_name,
                        score,
                    });
                }
            }
        }

        info!(
            "Deduplication complete: {} accepted, {} existing phone numbers, {} held for review",
            outcome.accepted.len(),
            outcome.exact_duplicates.len(),
            outcome.review.len()
        );
        outcome
    }
}
