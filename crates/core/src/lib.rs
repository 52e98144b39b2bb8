//! # Canopy Core
//!
//! Core types, projections and I/O for canopy cover zonal statistics.
//!
//! This crate provides:
//! - `Raster<T>`: Generic georeferenced raster grid
//! - `GeoTransform`, `GridSpec`, `PixelWindow`: grid georeferencing
//! - `CRS` and the `Projection` seam with built-in projections
//! - `Region`: identified polygon footprints to aggregate over
//! - I/O for GeoTIFF rasters, tile mosaics and GeoJSON regions

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;
pub mod vector;

pub use crs::{projection_for, CoordTransform, Projection, CRS};
pub use error::{Error, Result};
pub use raster::{GeoTransform, GridSpec, PixelWindow, Raster, RasterElement};
pub use vector::{Region, RegionId};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::{CoordTransform, Projection, CRS};
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, GridSpec, PixelWindow, Raster, RasterElement};
    pub use crate::vector::{Region, RegionId};
    pub use crate::Algorithm;
}

/// Core trait for raster transforms.
///
/// Algorithms are pure functions that transform input data according to parameters.
pub trait Algorithm {
    /// Input type for the algorithm
    type Input;
    /// Output type for the algorithm
    type Output;
    /// Parameters controlling algorithm behavior
    type Params: Default;
    /// Error type for algorithm execution
    type Error: std::error::Error;

    /// Returns the algorithm name
    fn name(&self) -> &'static str;

    /// Returns a description of what the algorithm does
    fn description(&self) -> &'static str;

    /// Execute the algorithm
    fn execute(&self, input: Self::Input, params: Self::Params) -> std::result::Result<Self::Output, Self::Error>;

    /// Execute with default parameters
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
