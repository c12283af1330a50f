//! Pipeline Phase Metrics
//!
//! Counters for each stage of a load run. Nothing is exported from this
//! crate; the calls are no-ops unless the embedding program installs a
//! `metrics` recorder.

/// Metrics collection for the contact load pipeline
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Rows read from a source file
    pub fn record_rows_extracted(file: &str, rows: usize) {
        ::metrics::counter!("etl_rows_extracted_total", "file" => file.to_string())
            .increment(rows as u64);
    }

    /// Records produced by the normalizer
    pub fn record_normalized(rows: usize) {
        ::metrics::counter!("etl_records_normalized_total").increment(rows as u64);
    }

    /// Cleaner outcomes for one batch
    pub fn record_cleaning(invalid: usize, dropped_duplicates: usize) {
        ::metrics::counter!("etl_invalid_records_total").increment(invalid as u64);
        ::metrics::counter!("etl_intra_batch_duplicates_total").increment(dropped_duplicates as u64);
    }

    /// Dedup outcomes for one batch
    pub fn record_dedup(exact_phone_rejects: usize, review: usize, accepted: usize) {
        ::metrics::counter!("etl_exact_phone_duplicates_total").increment(exact_phone_rejects as u64);
        ::metrics::counter!("etl_fuzzy_review_total").increment(review as u64);
        ::metrics::counter!("etl_records_accepted_total").increment(accepted as u64);
    }

    /// Contacts committed to the store
    pub fn record_persisted(contacts: usize) {
        ::metrics::counter!("etl_contacts_persisted_total").increment(contacts as u64);
    }

    /// A file that could not be extracted or persisted
    pub fn record_file_failure(stage: &'static str) {
        ::metrics::counter!("etl_file_failures_total", "stage" => stage).increment(1);
    }
}
