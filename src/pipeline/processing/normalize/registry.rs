use tracing::{debug, warn};

use crate::config::{Config, DataSourceProfile, PromotionRules};
use crate::constants::DEFAULT_PROFILE;

/// The rule set chosen for one source file
#[derive(Debug, Clone, Copy)]
pub struct SelectedRules<'a> {
    pub profile_name: &'a str,
    pub rules: &'a PromotionRules,
}

/// Ordered registry of promotion rule sets.
///
/// Entries are evaluated in configured order and the first whose pattern
/// occurs in the file name wins. When nothing matches, the profile named
/// `default` applies, or an empty rule set if there is none.
#[derive(Debug, Clone, Default)]
pub struct PromotionRegistry {
    entries: Vec<DataSourceProfile>,
    fallback: PromotionRules,
}

impl PromotionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for profile in &config.data_source_profiles {
            registry.register(
                profile.name.clone(),
                profile.file_name_contains.clone(),
                profile.promotion_rules.clone(),
            );
        }
        if config.profile(DEFAULT_PROFILE).is_none() {
            warn!("No '{}' promotion profile; files matching no profile promote nothing", DEFAULT_PROFILE);
        }
        debug!("Promotion profiles in evaluation order: {:?}", registry.list_profiles());
        registry
    }

    /// Append a rule set. The profile named `default` also becomes the fallback.
    pub fn register(&mut self, name: String, file_name_contains: Option<String>, rules: PromotionRules) {
        if name == DEFAULT_PROFILE {
            self.fallback = rules.clone();
        }
        self.entries.push(DataSourceProfile {
            name,
            file_name_contains,
            promotion_rules: rules,
        });
    }

    /// Pick the rule set for a source file
    pub fn select(&self, file_name: &str) -> SelectedRules<'_> {
        self.entries
            .iter()
            .find(|entry| entry.matches(file_name))
            .map(|entry| SelectedRules {
                profile_name: entry.name.as_str(),
                rules: &entry.promotion_rules,
            })
            .unwrap_or(SelectedRules {
                profile_name: DEFAULT_PROFILE,
                rules: &self.fallback,
            })
    }

    /// List all registered profile names in evaluation order
    pub fn list_profiles(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(company: &str) -> PromotionRules {
        PromotionRules {
            company_name: vec![company.to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_first_configured_match_wins() {
        let mut registry = PromotionRegistry::new();
        registry.register("apollo".into(), Some("apollo".into()), rules("Company"));
        registry.register("apollo_eu".into(), Some("apollo_eu".into()), rules("Firma"));

        let selected = registry.select("apollo_eu_2024.csv");
        assert_eq!(selected.profile_name, "apollo");
        assert_eq!(selected.rules.company_name, vec!["Company"]);
    }

    #[test]
    fn test_falls_back_to_default_profile() {
        let mut registry = PromotionRegistry::new();
        registry.register("default".into(), None, rules("Name"));
        registry.register("zoominfo".into(), Some("zoom".into()), rules("Account"));

        let selected = registry.select("leads.csv");
        assert_eq!(selected.profile_name, "default");
        assert_eq!(selected.rules.company_name, vec!["Name"]);
        assert_eq!(registry.list_profiles(), vec!["default", "zoominfo"]);
    }

    #[test]
    fn test_no_default_profile_yields_empty_rules() {
        let registry = PromotionRegistry::new();
        let selected = registry.select("leads.csv");
        assert_eq!(selected.profile_name, "default");
        assert!(selected.rules.is_empty());
    }
}
