use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::types::CanonicalRecord;

/// Formatting characters stripped from phone numbers
static PHONE_PUNCTUATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[()\-\s]").expect("phone punctuation pattern is valid")
});

/// Artifacts left behind when a missing cell was stringified upstream
const PHONE_ARTIFACTS: [&str; 2] = ["nan", "None"];

/// Result of cleaning one source file's batch
#[derive(Debug, Clone, Default)]
pub struct CleanedBatch {
    /// Records that passed every check, in original row order
    pub records: Vec<CanonicalRecord>,
    /// Records without a usable company name, quarantined for operator review
    pub invalid: Vec<CanonicalRecord>,
    /// Later rows repeating a phone number already seen in this batch
    pub dropped_duplicates: Vec<CanonicalRecord>,
}

/// Enforces minimum viability of a batch of canonical records.
///
/// Steps run in a fixed order: company name backfill from the URL,
/// quarantine of records that still have no name, phone normalization,
/// whitespace trimming, then first-occurrence-wins dedup on phone number.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordCleaner;

impl RecordCleaner {
    pub fn new() -> Self {
        Self
    }

    pub fn clean(&self, batch: Vec<CanonicalRecord>) -> CleanedBatch {
        info!("Starting data cleaning for {} records...", batch.len());
        let mut outcome = CleanedBatch::default();

        let mut derived = 0usize;
        let mut viable = Vec::with_capacity(batch.len());
        for mut record in batch {
            if is_blank(record.company_name.as_deref()) {
                if let Some(name) = record.url.as_deref().and_then(derive_name_from_url) {
                    record.company_name = Some(name);
                    derived += 1;
                }
            }

            if is_blank(record.company_name.as_deref()) {
                outcome.invalid.push(record);
            } else {
                viable.push(record);
            }
        }

        if derived > 0 {
            info!("Derived {} company names from URLs", derived);
        }
        if !outcome.invalid.is_empty() {
            warn!(
                "Quarantined {} records with no company name",
                outcome.invalid.len()
            );
        }

        let mut seen_phones = HashSet::new();
        for mut record in viable {
            record.phone_number = record.phone_number.as_deref().and_then(clean_phone);
            trim_fields(&mut record);

            let is_duplicate = match record.phone_number.as_deref() {
                Some(phone) => !seen_phones.insert(phone.to_string()),
                None => false,
            };

            if is_duplicate {
                debug!("Dropping in-file duplicate phone number {:?}", record.phone_number);
                outcome.dropped_duplicates.push(record);
            } else {
                outcome.records.push(record);
            }
        }

        if !outcome.dropped_duplicates.is_empty() {
            info!(
                "Removed {} duplicate phone numbers from the source file",
                outcome.dropped_duplicates.len()
            );
        }
        info!("Data cleaning complete: {} records remain", outcome.records.len());

        outcome
    }
}

/// Derive a company name from a website, e.g. `http://www.example.com/page` -> `Example`.
/// Returns `None` when the URL has no usable host.
pub fn derive_name_from_url(raw_url: &str) -> Option<String> {
    let raw_url = raw_url.trim();
    if raw_url.is_empty() {
        return None;
    }

    let with_scheme = if raw_url.contains("://") {
        raw_url.to_string()
    } else {
        format!("http://{raw_url}")
    };

    let parsed = Url::parse(&with_scheme).ok()?;
    // the parser stores internationalized hosts in punycode
    let (host, _) = idna::domain_to_unicode(parsed.host_str()?);
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let label = host.split('.').next().filter(|l| !l.is_empty())?;

    Some(capitalize(label))
}

/// Strip stringified-null artifacts and formatting punctuation.
/// An empty result means there is no phone number.
pub fn clean_phone(phone: &str) -> Option<String> {
    let mut cleaned = phone.to_string();
    for artifact in PHONE_ARTIFACTS {
        cleaned = cleaned.replace(artifact, "");
    }
    let cleaned = PHONE_PUNCTUATION.replace_all(&cleaned, "");

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.into_owned())
    }
}

/// Trim every promoted string field. `tags` and `additional_info` are left untouched.
fn trim_fields(record: &mut CanonicalRecord) {
    for field in [
        &mut record.company_name,
        &mut record.url,
        &mut record.phone_number,
        &mut record.industry,
        &mut record.customer_target_segments,
    ] {
        *field = field
            .take()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

fn capitalize(label: &str) -> String {
    let lower = label.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawRow;
    use serde_json::json;

    fn record(name: Option<&str>, phone: Option<&str>) -> CanonicalRecord {
        let mut raw = RawRow::new();
        raw.insert("Company".to_string(), json!(name));
        CanonicalRecord {
            company_name: name.map(str::to_string),
            url: None,
            phone_number: phone.map(str::to_string),
            industry: None,
            is_b2b: None,
            customer_target_segments: None,
            tags: vec!["expo".to_string()],
            additional_info: raw,
        }
    }

    #[test]
    fn test_derives_name_from_url() {
        assert_eq!(derive_name_from_url("http://www.example.com/page").as_deref(), Some("Example"));
        assert_eq!(derive_name_from_url("acme.io").as_deref(), Some("Acme"));
        assert_eq!(derive_name_from_url("https://SHOP.Globex.com").as_deref(), Some("Shop"));
        assert_eq!(derive_name_from_url(""), None);
        assert_eq!(derive_name_from_url("http://"), None);
    }

    #[test]
    fn test_name_from_internationalized_domain() {
        assert_eq!(derive_name_from_url("http://www.müller.de").as_deref(), Some("Müller"));
        assert_eq!(derive_name_from_url("xn--mller-kva.de/shop").as_deref(), Some("Müller"));
    }

    #[test]
    fn test_backfills_missing_name_from_url() {
        let mut missing = record(None, Some("1"));
        missing.url = Some("http://www.example.com/page".to_string());

        let cleaned = RecordCleaner::new().clean(vec![missing]);
        assert_eq!(cleaned.records.len(), 1);
        assert_eq!(cleaned.records[0].company_name.as_deref(), Some("Example"));
    }

    #[test]
    fn test_quarantines_records_without_name() {
        let mut unparseable = record(Some("   "), Some("2"));
        unparseable.url = Some("http://".to_string());

        let cleaned = RecordCleaner::new().clean(vec![
            record(Some("Acme"), Some("1")),
            unparseable,
            record(None, None),
        ]);

        assert_eq!(cleaned.records.len(), 1);
        assert_eq!(cleaned.invalid.len(), 2);
    }

    #[test]
    fn test_phone_normalization() {
        assert_eq!(clean_phone("(555) 123-4567").as_deref(), Some("5551234567"));
        assert_eq!(clean_phone(" 555 123 4567 ").as_deref(), Some("5551234567"));
        assert_eq!(clean_phone("nan"), None);
        assert_eq!(clean_phone("None"), None);
        assert_eq!(clean_phone("( ) -"), None);
        assert_eq!(clean_phone("+1.555.123.4567").as_deref(), Some("+1.555.123.4567"));
    }

    #[test]
    fn test_trims_strings_but_not_tags_or_payload() {
        let mut padded = record(Some("  Acme  "), Some("555"));
        padded.industry = Some(" Retail ".to_string());
        padded.url = Some("   ".to_string());
        padded.tags = vec![" expo ".to_string()];
        padded.additional_info.insert("Notes".to_string(), json!("  keep me  "));

        let cleaned = RecordCleaner::new().clean(vec![padded]);
        let out = &cleaned.records[0];

        assert_eq!(out.company_name.as_deref(), Some("Acme"));
        assert_eq!(out.industry.as_deref(), Some("Retail"));
        assert_eq!(out.url, None);
        assert_eq!(out.tags, vec![" expo "]);
        assert_eq!(out.additional_info["Notes"], json!("  keep me  "));
    }

    #[test]
    fn test_keeps_first_occurrence_of_phone() {
        let cleaned = RecordCleaner::new().clean(vec![
            record(Some("First"), Some("(555) 000-1111")),
            record(Some("Second"), Some("555-000-1111")),
            record(Some("Third"), Some("5550002222")),
            record(Some("Fourth"), Some("555 000 1111")),
        ]);

        let kept: Vec<_> = cleaned.records.iter().filter_map(|r| r.company_name.as_deref()).collect();
        let dropped: Vec<_> = cleaned
            .dropped_duplicates
            .iter()
            .filter_map(|r| r.company_name.as_deref())
            .collect();

        assert_eq!(kept, vec!["First", "Third"]);
        assert_eq!(dropped, vec!["Second", "Fourth"]);
    }

    #[test]
    fn test_records_without_phone_are_not_duplicates() {
        let cleaned = RecordCleaner::new().clean(vec![
            record(Some("Acme"), None),
            record(Some("Globex"), None),
            record(Some("Initech"), Some("nan")),
        ]);

        assert_eq!(cleaned.records.len(), 3);
        assert!(cleaned.dropped_duplicates.is_empty());
    }
}
