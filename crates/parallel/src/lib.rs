//! # Canopy Parallel
//!
//! Execution strategies for independent per-region work:
//! - Sequential, all-core or bounded Rayon pools with order-preserving maps
//! - A shared cancellation flag checked by long-running work items

pub mod strategy;

pub use strategy::{num_cpus, CancelFlag, ParallelError, ParallelStrategy, ProcessingMode};
