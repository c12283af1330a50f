// Pipeline processing: normalization, cleaning, profiling, and deduplication

pub mod conflation;
pub mod normalize;
pub mod profile;
pub mod quality_gate;
