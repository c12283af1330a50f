pub mod registry;

use serde_json::Value;
use tracing::{debug, info};

use self::registry::PromotionRegistry;
use crate::config::{Config, PromotionRules};
use crate::constants;
use crate::types::{CanonicalRecord, RawRow};

/// Maps arbitrary-shape raw rows onto the canonical contact record.
///
/// Structured fields are promoted by first-present-wins coalescing over the
/// configured candidate columns; the whole raw row is always kept in
/// `additional_info`, whether or not any of it was promoted.
pub struct RecordNormalizer {
    registry: PromotionRegistry,
    tag: Option<String>,
}

impl RecordNormalizer {
    pub fn new(registry: PromotionRegistry, tag: Option<String>) -> Self {
        Self { registry, tag }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            PromotionRegistry::from_config(config),
            config.run_tag().map(str::to_string),
        )
    }

    /// Normalize every row of one source file with the rule set chosen for it
    pub fn normalize_batch(&self, rows: Vec<RawRow>, file_name: &str) -> Vec<CanonicalRecord> {
        let selected = self.registry.select(file_name);
        info!(
            "Applying promotion rules for profile '{}' to {}",
            selected.profile_name, file_name
        );
        if selected.rules.is_empty() {
            debug!("No promotion rules for {}; structured fields stay empty", file_name);
        }

        rows.into_iter()
            .map(|row| self.normalize(row, selected.rules))
            .collect()
    }

    /// Normalize one row
    pub fn normalize(&self, row: RawRow, rules: &PromotionRules) -> CanonicalRecord {
        let promote = |field: &str| coalesce(&row, rules.candidates(field));

        let is_b2b = parse_b2b(promote(constants::IS_B2B).as_deref());

        CanonicalRecord {
            company_name: promote(constants::COMPANY_NAME),
            url: promote(constants::URL),
            phone_number: promote(constants::PHONE_NUMBER),
            industry: promote(constants::INDUSTRY),
            is_b2b,
            customer_target_segments: promote(constants::CUSTOMER_TARGET_SEGMENTS),
            tags: self.tag.iter().cloned().collect(),
            additional_info: row,
        }
    }
}

/// First present, non-null value among `candidates`, scanned in order
pub fn coalesce(row: &RawRow, candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|column| row.get(column))
        .find_map(value_to_text)
}

/// Case-insensitive tri-state mapping. Anything unrecognised stays unknown.
pub fn parse_b2b(value: Option<&str>) -> Option<bool> {
    let value = value?.trim().to_lowercase();
    match value.as_str() {
        "yes" | "true" | "1" => Some(true),
        "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// Text form of a raw cell; null and blank cells count as absent
fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(number_to_text(n)),
        other => Some(other.to_string()),
    }
}

/// Spreadsheet cells carry whole numbers as floats; render 5551234567.0 as 5551234567
fn number_to_text(n: &serde_json::Number) -> String {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                return format!("{}", f as i64);
            }
        }
    }
    n.to_string()
}
