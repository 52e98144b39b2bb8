//! Configurable batch pipeline: one run per batch number

pub mod config;
pub mod runner;

pub use config::{PipelineBuilder, PipelineConfig};
pub use runner::{BatchReport, BatchRunner, RegionOutcome};
