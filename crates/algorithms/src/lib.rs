//! # Canopy Algorithms
//!
//! Canopy cover zonal statistics over region batches.
//!
//! ## Modules
//!
//! - **canopy**: height threshold mask, nearest-neighbour resampling, pixel area rasters
//! - **regions**: exclusion filter and fixed-size batch selection
//! - **statistics**: zonal area aggregation over polygon footprints
//! - **metrics**: per-region km² areas and canopy percentage
//! - **pipeline**: run configuration and the batch runner

pub mod canopy;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod regions;
pub mod statistics;

pub use error::{AggregationError, RunError, RunResult};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::canopy::{
        canopy_mask, pixel_area, resample_nearest, threshold,
        AreaMode, AreaRaster, CanopyMask, MaskParams, PixelArea, CANOPY, MASK_NODATA, OPEN,
    };
    pub use crate::error::{AggregationError, RunError, RunResult};
    pub use crate::metrics::{assemble, MetricsRecord};
    pub use crate::pipeline::{
        BatchReport, BatchRunner, PipelineBuilder, PipelineConfig, RegionOutcome,
    };
    pub use crate::regions::{batch_count, exclude_regions, select_batch, Batch};
    pub use crate::statistics::{Budget, ZonalAggregator, ZonalAreas};
    pub use canopy_core::prelude::*;
}
