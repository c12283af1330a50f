use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::EtlError;

/// A row exactly as extraction produced it: original column name -> original value.
/// Missing cells are represented as `Value::Null`.
pub type RawRow = Map<String, Value>;

/// The normalized unit flowing through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Required for acceptance; may be empty until the cleaner has run
    pub company_name: Option<String>,
    pub url: Option<String>,
    /// Punctuation-stripped phone number, unique across persisted contacts
    pub phone_number: Option<String>,
    pub industry: Option<String>,
    /// `None` means unknown, which is distinct from `Some(false)`
    pub is_b2b: Option<bool>,
    pub customer_target_segments: Option<String>,
    /// Run tag(s); empty when no tag is configured, never absent
    pub tags: Vec<String>,
    /// The full original row, kept verbatim for audit
    pub additional_info: RawRow,
}

impl CanonicalRecord {
    /// Sorted, de-duplicated original column names of the raw row.
    ///
    /// Derived from `additional_info` so the profile always reflects the
    /// input shape, never the promoted schema.
    pub fn json_keys(&self) -> Vec<String> {
        // serde_json's default map is ordered and keyed uniquely
        self.additional_info.keys().cloned().collect()
    }

    /// Lowercased company name used by the dedup index
    pub fn lowercase_name(&self) -> Option<String> {
        self.company_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_lowercase)
    }
}

/// A contact as persisted in the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub company_name: String,
    pub url: Option<String>,
    pub phone_number: Option<String>,
    pub is_b2b: Option<bool>,
    pub industry: Option<String>,
    pub customer_target_segments: Option<String>,
    pub additional_info: RawRow,
    pub tags: Vec<String>,
    pub status: String,
    pub last_used: Option<DateTime<Utc>>,
    pub profile_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The identity columns the dedup index is seeded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownContact {
    pub company_name: String,
    pub phone_number: Option<String>,
}

/// An observed input shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub profile_hash: String,
    pub json_keys: Vec<String>,
    pub contact_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of an ETL run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(EtlError::Persistence(format!("unknown run status '{other}'"))),
        }
    }
}

/// Audit record of one live pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlRun {
    pub id: Option<i64>,
    pub status: RunStatus,
    pub tag_used: Option<String>,
    pub files_processed: Vec<String>,
    pub contacts_added: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    had_failure: bool,
}

impl EtlRun {
    /// Create a new run in the `running` state
    pub fn new(tag_used: Option<String>) -> Self {
        Self {
            id: None,
            status: RunStatus::Running,
            tag_used,
            files_processed: Vec::new(),
            contacts_added: 0,
            started_at: Utc::now(),
            finished_at: None,
            had_failure: false,
        }
    }

    /// Rebuild a run read back from the store
    pub fn restore(
        id: i64,
        status: RunStatus,
        tag_used: Option<String>,
        files_processed: Vec<String>,
        contacts_added: usize,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Some(id),
            status,
            tag_used,
            files_processed,
            contacts_added,
            started_at,
            finished_at,
            had_failure: status == RunStatus::Failed,
        }
    }

    pub fn record_file(&mut self, file_name: &str, contacts_added: usize) {
        self.files_processed.push(file_name.to_string());
        self.contacts_added += contacts_added;
    }

    /// Remember that the run must end as `failed`
    pub fn mark_failed(&mut self) {
        self.had_failure = true;
    }

    pub fn has_failed(&self) -> bool {
        self.had_failure
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Move the run to its terminal state. Returns `false` if it was already finished.
    pub fn finish(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.status = if self.had_failure {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        self.finished_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_keys_are_sorted_raw_columns() {
        let mut row = RawRow::new();
        row.insert("Phone".to_string(), json!("1"));
        row.insert("Company".to_string(), json!("Acme"));
        row.insert("Address".to_string(), Value::Null);

        let record = CanonicalRecord {
            company_name: Some("Acme".to_string()),
            url: None,
            phone_number: None,
            industry: None,
            is_b2b: None,
            customer_target_segments: None,
            tags: Vec::new(),
            additional_info: row,
        };

        assert_eq!(record.json_keys(), vec!["Address", "Company", "Phone"]);
    }

    #[test]
    fn test_run_finishes_exactly_once() {
        let mut run = EtlRun::new(Some("q3".to_string()));
        run.record_file("a.csv", 2);
        run.record_file("b.csv", 3);

        assert!(run.finish());
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.contacts_added, 5);

        run.mark_failed();
        assert!(!run.finish());
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn test_failed_run_ends_failed() {
        let mut run = EtlRun::new(None);
        assert!(!run.has_failed());
        run.mark_failed();
        assert!(run.has_failed());
        assert_eq!(run.status, RunStatus::Running);
        run.finish();
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[test]
    fn test_run_status_round_trips_through_text() {
        for status in [RunStatus::Running, RunStatus::Completed, RunStatus::Failed] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }
}
