//! Zonal statistics over region footprints

pub mod zonal;

pub use zonal::{Budget, ZonalAggregator, ZonalAreas};
