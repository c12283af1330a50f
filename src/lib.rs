pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod reporting;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{EtlError, Result};
pub use pipeline::{LoadOrchestrator, RunMode, RunSummary};
pub use storage::{ContactStore, SqliteStore};
