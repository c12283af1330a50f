use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::error::{EtlError, Result};
use crate::metrics::PipelineMetrics;
use crate::pipeline::ingestion::{find_source_files, move_processed_file, FileRowSource, RowSource};
use crate::pipeline::processing::conflation::{DedupIndex, DeduplicationEngine};
use crate::pipeline::processing::normalize::RecordNormalizer;
use crate::pipeline::processing::profile::ProfileKey;
use crate::pipeline::processing::quality_gate::RecordCleaner;
use crate::pipeline::sinks::SideSinks;
use crate::storage::ContactStore;
use crate::types::{CanonicalRecord, EtlRun};

/// Whether a run writes to the contact store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Persist accepted contacts, archive loaded files and keep an audit record
    Live,
    /// Run every stage but persist nothing, move nothing, audit nothing and
    /// leave the side sink directories alone
    DryRun,
}

/// What happened to one source file
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileReport {
    pub file_name: String,
    pub rows_extracted: usize,
    pub invalid: usize,
    pub dropped_duplicates: usize,
    pub exact_duplicates: usize,
    pub held_for_review: usize,
    pub accepted: usize,
    /// Distinct input shapes among the accepted records
    pub profiles: usize,
    pub persisted: usize,
    pub error: Option<String>,
}

/// Result of a complete run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// The finalized audit record; `None` for dry runs
    pub run: Option<EtlRun>,
    pub files: Vec<FileReport>,
    /// The dedup index as it stood after the last file
    pub index: DedupIndex,
}

impl RunSummary {
    pub fn total_accepted(&self) -> usize {
        self.files.iter().map(|f| f.accepted).sum()
    }

    pub fn total_persisted(&self) -> usize {
        self.files.iter().map(|f| f.persisted).sum()
    }

    pub fn failed_files(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|f| f.error.is_some())
            .map(|f| f.file_name.as_str())
            .collect()
    }
}

/// Drives a run: every source file in listing order goes through
/// extraction, normalization, cleaning and dedup, then is persisted
/// (live) or previewed (dry run).
pub struct LoadOrchestrator<R: RowSource = FileRowSource> {
    source: R,
    normalizer: RecordNormalizer,
    cleaner: RecordCleaner,
    dedup: DeduplicationEngine,
    sinks: SideSinks,
    source_dir: PathBuf,
    processed_dir: PathBuf,
    tag: Option<String>,
    mode: RunMode,
    quiet: bool,
}

impl LoadOrchestrator<FileRowSource> {
    pub fn from_config(config: &Config, mode: RunMode, quiet: bool) -> Self {
        Self::with_source(config, mode, quiet, FileRowSource)
    }
}

impl<R: RowSource> LoadOrchestrator<R> {
    pub fn with_source(config: &Config, mode: RunMode, quiet: bool, source: R) -> Self {
        Self {
            source,
            normalizer: RecordNormalizer::from_config(config),
            cleaner: RecordCleaner::new(),
            dedup: DeduplicationEngine::new(config.deduplication.clone()),
            sinks: SideSinks::from_config(config),
            source_dir: PathBuf::from(&config.source_directory),
            processed_dir: PathBuf::from(&config.processed_directory),
            tag: config.run_tag().map(str::to_string),
            mode,
            quiet,
        }
    }

    /// Print a progress line for interactive runs
    fn say(&self, line: &str) {
        if !self.quiet {
            println!("{line}");
        }
    }

    /// Execute one run.
    ///
    /// A live run needs a store. A dry run reads the store only to seed the
    /// dedup index and works against an empty index without one. In live
    /// mode the audit record is finalized once, whatever the outcome.
    pub fn run<S: ContactStore + ?Sized>(&self, mut store: Option<&mut S>) -> Result<RunSummary> {
        if self.mode == RunMode::Live && store.is_none() {
            return Err(EtlError::Config(
                "a live run requires a contact store".to_string(),
            ));
        }

        info!("🚀 ETL pipeline started ({:?})", self.mode);
        self.say(match self.mode {
            RunMode::Live => "🚀 Starting contact load",
            RunMode::DryRun => "🔍 Starting dry run: nothing will be written to the database",
        });

        let mut run = match (self.mode, store.as_deref_mut()) {
            (RunMode::Live, Some(store)) => Some(store.start_run(self.tag.as_deref())?),
            _ => None,
        };

        let index = load_index(store.as_deref());
        let result = self.process_files(store.as_deref_mut(), run.as_mut(), index);

        let mut finalized = Ok(());
        if let (Some(run), Some(store)) = (run.as_mut(), store.as_deref_mut()) {
            if let Err(e) = &result {
                error!("ETL run aborted: {}", e);
                run.mark_failed();
            }
            if run.finish() {
                finalized = store.finish_run(run);
                if let Err(e) = &finalized {
                    error!("Failed to finalize ETL run record: {}", e);
                }
            }
        }

        let (files, index) = result?;
        finalized?;

        let summary = RunSummary { run, files, index };
        info!(
            "ETL pipeline finished: {} files, {} accepted, {} persisted",
            summary.files.len(),
            summary.total_accepted(),
            summary.total_persisted()
        );
        self.say(&format!(
            "✅ Finished: {} files, {} contacts accepted, {} persisted",
            summary.files.len(),
            summary.total_accepted(),
            summary.total_persisted()
        ));
        Ok(summary)
    }

    fn process_files<S: ContactStore + ?Sized>(
        &self,
        mut store: Option<&mut S>,
        mut run: Option<&mut EtlRun>,
        mut index: DedupIndex,
    ) -> Result<(Vec<FileReport>, DedupIndex)> {
        let mut reports = Vec::new();

        for path in find_source_files(&self.source_dir) {
            let (mut report, accepted) = self.process_file(&path, &index)?;

            if self.mode == RunMode::DryRun {
                self.preview(&report.file_name, &accepted);
                reports.push(report);
                continue;
            }

            if report.error.is_some() {
                reports.push(report);
                continue;
            }

            let Some(store) = store.as_deref_mut() else {
                reports.push(report);
                continue;
            };

            match store.persist_batch(&accepted) {
                Ok(persisted) => {
                    report.persisted = persisted;
                    PipelineMetrics::record_persisted(persisted);
                    if let Some(run) = run.as_deref_mut() {
                        run.record_file(&report.file_name, persisted);
                    }
                    self.say(&format!("💾 Loaded {} contacts from {}", persisted, report.file_name));

                    if let Err(e) = move_processed_file(&path, &self.processed_dir) {
                        error!("Failed to move processed file {}: {}", report.file_name, e);
                    }

                    debug!("Updating dedup index with {} new records", accepted.len());
                    index = index.extended_with(&accepted);
                }
                Err(e) => {
                    error!(
                        "Failed to load data for {}. Halting processing for this file. Error: {}",
                        report.file_name, e
                    );
                    PipelineMetrics::record_file_failure("persist");
                    if let Some(run) = run.as_deref_mut() {
                        run.mark_failed();
                    }
                    report.error = Some(e.to_string());
                }
            }
            reports.push(report);
        }

        Ok((reports, index))
    }

    /// Run every stage up to, not including, persistence.
    /// File-level problems are recorded in the report; sink failures propagate.
    #[instrument(skip(self, index), fields(file = %path.display()))]
    fn process_file(&self, path: &Path, index: &DedupIndex) -> Result<(FileReport, Vec<CanonicalRecord>)> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut report = FileReport {
            file_name: file_name.clone(),
            ..Default::default()
        };

        info!("--- Processing file: {} ---", file_name);
        self.say(&format!("📄 Processing {file_name}"));

        let rows = match self.source.extract(path) {
            Ok(rows) => rows,
            Err(e) => {
                error!("Skipping {}: {}", file_name, e);
                PipelineMetrics::record_file_failure("extract");
                report.error = Some(e.to_string());
                return Ok((report, Vec::new()));
            }
        };
        report.rows_extracted = rows.len();
        PipelineMetrics::record_rows_extracted(&file_name, rows.len());
        if rows.is_empty() {
            warn!("{} contains no rows", file_name);
            report.error = Some("no rows".to_string());
            return Ok((report, Vec::new()));
        }

        let records = self.normalizer.normalize_batch(rows, &file_name);
        PipelineMetrics::record_normalized(records.len());

        let cleaned = self.cleaner.clean(records);
        report.invalid = cleaned.invalid.len();
        report.dropped_duplicates = cleaned.dropped_duplicates.len();
        PipelineMetrics::record_cleaning(report.invalid, report.dropped_duplicates);
        if self.mode == RunMode::Live {
            self.sinks.write_invalid(&stem, &cleaned.invalid)?;
            self.sinks.write_dropped(&stem, &cleaned.dropped_duplicates)?;
        } else {
            info!(
                "[dry run] {} invalid records and {} dropped duplicates from {} would be saved",
                report.invalid, report.dropped_duplicates, file_name
            );
        }

        let outcome = self.dedup.deduplicate(cleaned.records, index);
        report.exact_duplicates = outcome.exact_duplicates.len();
        report.held_for_review = outcome.review.len();
        report.accepted = outcome.accepted.len();
        PipelineMetrics::record_dedup(report.exact_duplicates, report.held_for_review, report.accepted);
        if self.mode == RunMode::Live {
            self.sinks.write_review(&stem, &outcome.review)?;
        } else if !outcome.review.is_empty() {
            info!(
                "[dry run] {} potential duplicates from {} would be queued for review",
                report.held_for_review, file_name
            );
        }

        let shapes: BTreeSet<String> = outcome
            .accepted
            .iter()
            .filter_map(|r| ProfileKey::from_keys(r.json_keys()))
            .map(|key| key.hash)
            .collect();
        report.profiles = shapes.len();
        debug!("{} accepted records span {} profiles", report.accepted, report.profiles);

        info!(
            "Deduplication complete. {} rows remaining for insertion.",
            report.accepted
        );
        Ok((report, outcome.accepted))
    }

    fn preview(&self, file_name: &str, accepted: &[CanonicalRecord]) {
        info!("[dry run] {} records from {} would be loaded", accepted.len(), file_name);
        if self.quiet {
            return;
        }
        println!("🔍 {} records from {} would be loaded:", accepted.len(), file_name);
        for record in accepted {
            println!(
                "   {} | {} | {}",
                record.company_name.as_deref().unwrap_or_default(),
                record.phone_number.as_deref().unwrap_or("-"),
                record.tags.join(",")
            );
        }
    }
}

/// Seed the dedup index from the store; any failure degrades to an empty index
fn load_index<S: ContactStore + ?Sized>(store: Option<&S>) -> DedupIndex {
    let Some(store) = store else {
        warn!("No contact store available; deduplicating against an empty index");
        return DedupIndex::new();
    };

    match store.known_contacts() {
        Ok(known) => {
            let index = DedupIndex::from_known(&known);
            info!(
                "Loaded {} existing contacts for deduplication ({} phone numbers, {} names).",
                known.len(),
                index.phone_count(),
                index.name_count()
            );
            index
        }
        Err(e) => {
            warn!(
                "Could not load existing contacts. Deduplication may be affected. Error: {}",
                e
            );
            DedupIndex::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::types::RunStatus;
    use std::fs;

    fn config(root: &Path) -> Config {
        let toml = format!(
            r#"
source_directory = "{root}/source"
review_directory = "{root}/review"
processed_directory = "{root}/processed"
log_file = "{root}/etl.log"
invalid_records_directory = "{root}/invalid"
dropped_duplicates_directory = "{root}/dropped"
tag = "expo"

[deduplication]
enable_fuzzy_matching = true
company_name_threshold = 90

[[data_source_profiles]]
name = "default"

[data_source_profiles.promotion_rules]
company_name = ["Company"]
phone_number = ["Phone"]
"#,
            root = root.display()
        );
        Config::from_toml_str(&toml).unwrap()
    }

    fn write_source(root: &Path, name: &str, content: &str) {
        let dir = root.join("source");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_live_run_requires_store() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = LoadOrchestrator::from_config(&config(dir.path()), RunMode::Live, true);
        assert!(matches!(
            orchestrator.run::<SqliteStore>(None),
            Err(EtlError::Config(_))
        ));
    }

    #[test]
    fn test_dry_run_without_store_uses_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "a.csv", "Company,Phone\nAcme,555-1\n");

        let orchestrator = LoadOrchestrator::from_config(&config(dir.path()), RunMode::DryRun, true);
        let summary = orchestrator.run::<SqliteStore>(None).unwrap();

        assert!(summary.run.is_none());
        assert_eq!(summary.total_accepted(), 1);
        assert_eq!(summary.total_persisted(), 0);
        assert_eq!(summary.index, DedupIndex::new());
        assert!(dir.path().join("source").join("a.csv").exists());
    }

    #[test]
    fn test_live_run_loads_archives_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "a.csv", "Company,Phone\nAcme,(555) 123-4567\nGlobex,555-000-1111\n");

        let mut store = SqliteStore::open_in_memory().unwrap();
        let orchestrator = LoadOrchestrator::from_config(&config(dir.path()), RunMode::Live, true);
        let summary = orchestrator.run(Some(&mut store)).unwrap();

        let run = summary.run.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.contacts_added, 2);
        assert_eq!(run.files_processed, vec!["a.csv"]);
        assert_eq!(run.tag_used.as_deref(), Some("expo"));

        assert_eq!(store.count_contacts().unwrap(), 2);
        assert!(dir.path().join("processed").join("a.csv").exists());
        assert!(summary.index.contains_phone("5551234567"));

        let stored = store.run_by_id(run.id.unwrap()).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
    }

    #[test]
    fn test_unreadable_file_is_skipped_without_failing_run() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "a.csv", "Company,Phone\nAcme,1\n");
        write_source(dir.path(), "b.xlsx", "not really a workbook");

        let mut store = SqliteStore::open_in_memory().unwrap();
        let orchestrator = LoadOrchestrator::from_config(&config(dir.path()), RunMode::Live, true);
        let summary = orchestrator.run(Some(&mut store)).unwrap();

        assert_eq!(summary.failed_files(), vec!["b.xlsx"]);
        let run = summary.run.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.files_processed, vec!["a.csv"]);
        assert!(dir.path().join("source").join("b.xlsx").exists());
    }

    #[test]
    fn test_sink_failure_fails_and_finalizes_run() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "a.csv", "Company,Phone\n,1\n");
        // the invalid records directory cannot be created over a file
        fs::write(dir.path().join("invalid"), "occupied").unwrap();

        let mut store = SqliteStore::open_in_memory().unwrap();
        let orchestrator = LoadOrchestrator::from_config(&config(dir.path()), RunMode::Live, true);
        assert!(orchestrator.run(Some(&mut store)).is_err());

        let run = store.run_by_id(1).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.finished_at.is_some());
    }
}
