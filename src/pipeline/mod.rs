// Contact load pipeline: ingestion, processing, side sinks, and the orchestrator driving them

pub mod ingestion;
pub mod orchestrator;
pub mod processing;
pub mod sinks;

// Re-export key types for external use
pub use orchestrator::{FileReport, LoadOrchestrator, RunMode, RunSummary};
