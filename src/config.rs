use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::constants;
use crate::error::{EtlError, Result};

/// Environment variable holding the contact store location
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source_directory: String,
    pub review_directory: String,
    pub processed_directory: String,
    pub log_file: String,
    #[serde(default = "default_invalid_records_directory")]
    pub invalid_records_directory: String,
    #[serde(default = "default_dropped_duplicates_directory")]
    pub dropped_duplicates_directory: String,
    /// Applied to every accepted record of the run
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub deduplication: DeduplicationConfig,
    /// Evaluated in file order; the first `file_name_contains` hit wins
    #[serde(default)]
    pub data_source_profiles: Vec<DataSourceProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeduplicationConfig {
    #[serde(default = "default_true")]
    pub enable_fuzzy_matching: bool,
    /// Minimum similarity (0-100) for a name to be held for review
    #[serde(default = "default_threshold")]
    pub company_name_threshold: u8,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            enable_fuzzy_matching: true,
            company_name_threshold: constants::DEFAULT_COMPANY_NAME_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataSourceProfile {
    pub name: String,
    #[serde(default)]
    pub file_name_contains: Option<String>,
    #[serde(default)]
    pub promotion_rules: PromotionRules,
}

impl DataSourceProfile {
    /// Substring match against a source file name. Profiles without a
    /// pattern only ever apply as the named fallback.
    pub fn matches(&self, file_name: &str) -> bool {
        match self.file_name_contains.as_deref() {
            Some(pattern) if !pattern.is_empty() => file_name.contains(pattern),
            _ => false,
        }
    }
}

/// Canonical field -> prioritized list of original column names
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromotionRules {
    #[serde(default)]
    pub company_name: Vec<String>,
    #[serde(default)]
    pub url: Vec<String>,
    #[serde(default)]
    pub phone_number: Vec<String>,
    #[serde(default)]
    pub industry: Vec<String>,
    #[serde(default)]
    pub is_b2b: Vec<String>,
    #[serde(default)]
    pub customer_target_segments: Vec<String>,
}

impl PromotionRules {
    /// Candidate source columns for a canonical field, in priority order
    pub fn candidates(&self, field: &str) -> &[String] {
        match field {
            constants::COMPANY_NAME => &self.company_name,
            constants::URL => &self.url,
            constants::PHONE_NUMBER => &self.phone_number,
            constants::INDUSTRY => &self.industry,
            constants::IS_B2B => &self.is_b2b,
            constants::CUSTOMER_TARGET_SEGMENTS => &self.customer_target_segments,
            _ => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        constants::PROMOTABLE_FIELDS
            .iter()
            .all(|field| self.candidates(field).is_empty())
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> u8 {
    constants::DEFAULT_COMPANY_NAME_THRESHOLD
}

fn default_invalid_records_directory() -> String {
    constants::DEFAULT_INVALID_RECORDS_DIR.to_string()
}

fn default_dropped_duplicates_directory() -> String {
    constants::DEFAULT_DROPPED_DUPLICATES_DIR.to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_path = path.as_ref();
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            EtlError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        Self::from_toml_str(&config_content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("source_directory", &self.source_directory),
            ("review_directory", &self.review_directory),
            ("processed_directory", &self.processed_directory),
            ("log_file", &self.log_file),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(EtlError::Config(format!("'{key}' must not be empty")));
            }
        }

        if self.deduplication.company_name_threshold > 100 {
            return Err(EtlError::Config(format!(
                "deduplication.company_name_threshold must be between 0 and 100, got {}",
                self.deduplication.company_name_threshold
            )));
        }

        let mut seen = HashSet::new();
        for profile in &self.data_source_profiles {
            if !seen.insert(profile.name.as_str()) {
                return Err(EtlError::Config(format!(
                    "data source profile '{}' is defined more than once",
                    profile.name
                )));
            }
        }

        Ok(())
    }

    /// The configured run tag, ignoring blank values
    pub fn run_tag(&self) -> Option<&str> {
        self.tag
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Look up a profile by name
    pub fn profile(&self, name: &str) -> Option<&DataSourceProfile> {
        self.data_source_profiles.iter().find(|p| p.name == name)
    }

    /// Resolve the contact store location from the environment.
    /// A missing value is a fatal configuration error.
    pub fn database_url() -> Result<String> {
        match std::env::var(DATABASE_URL_VAR) {
            Ok(url) if !url.trim().is_empty() => Ok(url),
            _ => Err(EtlError::Config(format!(
                "{DATABASE_URL_VAR} is not configured"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
source_directory = "data/incoming"
review_directory = "data/review"
processed_directory = "data/processed"
log_file = "logs/etl.log"
tag = "spring-campaign"

[deduplication]
company_name_threshold = 85

[[data_source_profiles]]
name = "apollo"
file_name_contains = "apollo"

[data_source_profiles.promotion_rules]
company_name = ["Company", "Company Name"]
phone_number = ["Company Phone", "Phone"]

[[data_source_profiles]]
name = "default"

[data_source_profiles.promotion_rules]
company_name = ["Name"]
"#;

    #[test]
    fn test_parses_profiles_in_order() {
        let config = Config::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.data_source_profiles.len(), 2);
        assert_eq!(config.data_source_profiles[0].name, "apollo");
        assert_eq!(
            config.data_source_profiles[0].promotion_rules.company_name,
            vec!["Company", "Company Name"]
        );
        assert_eq!(config.run_tag(), Some("spring-campaign"));
        assert_eq!(config.deduplication.company_name_threshold, 85);
        assert!(config.deduplication.enable_fuzzy_matching);
        assert_eq!(config.invalid_records_directory, "etl/invalid_records");
    }

    #[test]
    fn test_profile_without_pattern_never_matches() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        let default = config.profile("default").unwrap();

        assert!(!default.matches("anything.csv"));
        assert!(config.profile("apollo").unwrap().matches("apollo_export.csv"));
    }

    #[test]
    fn test_rejects_threshold_above_100() {
        let content = SAMPLE.replace("company_name_threshold = 85", "company_name_threshold = 101");
        let err = Config::from_toml_str(&content).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_canonical_field() {
        let content = SAMPLE.replace("company_name = [\"Name\"]", "favourite_color = [\"Colour\"]");
        assert!(Config::from_toml_str(&content).is_err());
    }

    #[test]
    fn test_rejects_duplicate_profile_names() {
        let content = SAMPLE.replace("name = \"default\"", "name = \"apollo\"");
        assert!(matches!(
            Config::from_toml_str(&content),
            Err(EtlError::Config(_))
        ));
    }

    #[test]
    fn test_blank_tag_is_no_tag() {
        let content = SAMPLE.replace("tag = \"spring-campaign\"", "tag = \"  \"");
        let config = Config::from_toml_str(&content).unwrap();
        assert_eq!(config.run_tag(), None);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = Config::from_toml_str(include_str!("../config.toml")).unwrap();
        assert_eq!(config.deduplication.company_name_threshold, 90);
        assert!(config.profile("default").is_some());
        assert_eq!(config.run_tag(), None);
    }
}
