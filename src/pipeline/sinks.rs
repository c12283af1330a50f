use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::Config;
use crate::constants::{self, SINK_TIMESTAMP_FORMAT};
use crate::error::Result;
use crate::pipeline::processing::conflation::ReviewEntry;
use crate::types::CanonicalRecord;

const RECORD_COLUMNS: [&str; 8] = [
    constants::COMPANY_NAME,
    constants::URL,
    constants::PHONE_NUMBER,
    constants::INDUSTRY,
    constants::IS_B2B,
    constants::CUSTOMER_TARGET_SEGMENTS,
    constants::TAGS,
    constants::ADDITIONAL_INFO,
];

/// CSV side outputs for records that need an operator's attention:
/// quarantined invalid records, dropped in-file duplicates and the
/// per-source review queue of potential duplicates.
#[derive(Debug, Clone)]
pub struct SideSinks {
    invalid_dir: PathBuf,
    dropped_dir: PathBuf,
    review_dir: PathBuf,
}

impl SideSinks {
    pub fn new(invalid_dir: PathBuf, dropped_dir: PathBuf, review_dir: PathBuf) -> Self {
        Self {
            invalid_dir,
            dropped_dir,
            review_dir,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            PathBuf::from(&config.invalid_records_directory),
            PathBuf::from(&config.dropped_duplicates_directory),
            PathBuf::from(&config.review_directory),
        )
    }

    /// Write records that have no company name. Nothing is written for an empty slice.
    pub fn write_invalid(&self, source_stem: &str, records: &[CanonicalRecord]) -> Result<Option<PathBuf>> {
        if records.is_empty() {
            return Ok(None);
        }
        let path = self
            .invalid_dir
            .join(format!("missing_company_name_{}_{}.csv", source_stem, timestamp()));
        write_records(&path, records)?;
        info!("Saved {} invalid records to {}", records.len(), path.display());
        Ok(Some(path))
    }

    /// Write records dropped as repeats of an earlier phone number in the same file
    pub fn write_dropped(&self, source_stem: &str, records: &[CanonicalRecord]) -> Result<Option<PathBuf>> {
        if records.is_empty() {
            return Ok(None);
        }
        let path = self
            .dropped_dir
            .join(format!("duplicates_{}_{}.csv", source_stem, timestamp()));
        write_records(&path, records)?;
        info!("Saved {} dropped duplicates to {}", records.len(), path.display());
        Ok(Some(path))
    }

    /// Write the review queue for one source file, replacing any earlier one
    pub fn write_review(&self, source_stem: &str, entries: &[ReviewEntry]) -> Result<Option<PathBuf>> {
        if entries.is_empty() {
            return Ok(None);
        }
        let path = self.review_dir.join(format!("review_{source_stem}.csv"));
        ensure_parent(&path)?;

        let mut writer = csv::Writer::from_path(&path)?;
        let mut header: Vec<&str> = RECORD_COLUMNS.to_vec();
        header.extend(["matched_name", "score"]);
        writer.write_record(&header)?;
        for entry in entries {
            let mut row = record_fields(&entry.record)?;
            row.push(entry.matched_name.clone());
            row.push(format!("{:.1}", entry.score));
            writer.write_record(&row)?;
        }
        writer.flush()?;

        info!("Saved {} potential duplicates to {}", entries.len(), path.display());
        Ok(Some(path))
    }
}

fn timestamp() -> String {
    Local::now().format(SINK_TIMESTAMP_FORMAT).to_string()
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn write_records(path: &Path, records: &[CanonicalRecord]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(RECORD_COLUMNS)?;
    for record in records {
        writer.write_record(record_fields(record)?)?;
    }
    writer.flush()?;
    Ok(())
}

fn record_fields(record: &CanonicalRecord) -> Result<Vec<String>> {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();
    Ok(vec![
        text(&record.company_name),
        text(&record.url),
        text(&record.phone_number),
        text(&record.industry),
        record.is_b2b.map(|b| b.to_string()).unwrap_or_default(),
        text(&record.customer_target_segments),
        serde_json::to_string(&record.tags)?,
        serde_json::to_string(&record.additional_info)?,
    ])
}
