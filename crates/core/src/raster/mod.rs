//! Raster data structures and grid georeferencing

mod element;
mod geotransform;
mod grid;
mod spec;

pub use element::RasterElement;
pub use geotransform::{GeoTransform, PixelWindow};
pub use grid::{Raster, RasterStatistics};
pub use spec::GridSpec;
