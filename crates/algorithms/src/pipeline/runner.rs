//! Batch runner
//!
//! One invocation: filter → select batch → for every region of the batch,
//! on a bounded pool, build mask and area rasters over the region's own
//! window and aggregate → report.
//!
//! Working rasters never span more than one region, so memory follows the
//! cells a region touches and the pixel ceiling bounds every allocation.
//! Windows snap to one lattice (the target resolution, or the height
//! raster's own cells), so neighbouring regions see the same pixels.

use super::config::PipelineConfig;
use crate::canopy::{canopy_mask, check_area_mode, pixel_area, AreaMode, AreaRaster, MaskParams};
use crate::error::{AggregationError, RunResult};
use crate::metrics::{assemble, MetricsRecord};
use crate::regions::{exclude_regions, select_batch};
use crate::statistics::{Budget, ZonalAggregator, ZonalAreas};
use canopy_core::raster::{GridSpec, PixelWindow, Raster};
use canopy_core::{CoordTransform, Error, Region, RegionId, CRS};
use canopy_parallel::{CancelFlag, ParallelStrategy, ProcessingMode};
use geo::{Coord, Rect};
use std::borrow::Cow;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Edge samples used when carrying the height extent into the working CRS
const EXTENT_DENSIFY: usize = 32;

/// Result for one region of the batch
#[derive(Debug, Clone, PartialEq)]
pub enum RegionOutcome {
    Completed {
        record: MetricsRecord,
        areas: ZonalAreas,
        /// Grid the region was aggregated on; `None` when it misses the
        /// height raster
        grid: Option<GridSpec>,
    },
    Failed {
        id: RegionId,
        error: AggregationError,
    },
}

impl RegionOutcome {
    pub fn id(&self) -> &RegionId {
        match self {
            RegionOutcome::Completed { record, .. } => &record.id,
            RegionOutcome::Failed { id, .. } => id,
        }
    }

    pub fn record(&self) -> Option<&MetricsRecord> {
        match self {
            RegionOutcome::Completed { record, .. } => Some(record),
            RegionOutcome::Failed { .. } => None,
        }
    }

    pub fn grid(&self) -> Option<&GridSpec> {
        match self {
            RegionOutcome::Completed { grid, .. } => grid.as_ref(),
            RegionOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RegionOutcome::Failed { .. })
    }
}

/// Everything one run produced
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_number: usize,
    pub batch_size: usize,
    /// Regions left after exclusion, across all batches
    pub filtered_total: usize,
    /// One outcome per batch region, in batch order
    pub outcomes: Vec<RegionOutcome>,
    pub area_mode: AreaMode,
}

impl BatchReport {
    /// No regions were selected: the caller has run out of batches
    pub fn is_exhausted(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &MetricsRecord> {
        self.outcomes.iter().filter_map(RegionOutcome::record)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&RegionId, &AggregationError)> {
        self.outcomes.iter().filter_map(|o| match o {
            RegionOutcome::Failed { id, error } => Some((id, error)),
            RegionOutcome::Completed { .. } => None,
        })
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Completed records with zero total area
    pub fn degenerate_count(&self) -> usize {
        self.records().filter(|r| r.is_degenerate()).count()
    }

    /// Regions whose footprint is clipped by the height raster or holds
    /// no-data cells
    pub fn partial_coverage(&self) -> Vec<&RegionId> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                RegionOutcome::Completed { record, areas, .. } if areas.is_partial() => Some(&record.id),
                _ => None,
            })
            .collect()
    }

    /// Cells of mask and area raster built over the whole batch
    pub fn working_cells(&self) -> u64 {
        self.outcomes.iter().filter_map(RegionOutcome::grid).map(GridSpec::len).sum()
    }

    /// Number of batches the filtered sequence splits into
    pub fn batch_count(&self) -> usize {
        crate::regions::batch_count(self.filtered_total, self.batch_size)
    }
}

/// Mask and area rasters over one region's window
struct WorkingRasters {
    mask: Raster<u8>,
    areas: AreaRaster,
}

/// A region's working grid; native runs also keep the height raster
/// window it crops
struct RegionGrid {
    grid: GridSpec,
    window: Option<PixelWindow>,
}

/// Inputs every region of a run reads
struct RunContext<'a> {
    heights: &'a Raster<f32>,
    /// Height raster extent in the working CRS
    height_extent: Rect<f64>,
    working_crs: CRS,
}

/// Runs one batch per call with a fixed configuration
#[derive(Debug, Clone)]
pub struct BatchRunner {
    config: PipelineConfig,
    cancel: CancelFlag,
}

impl BatchRunner {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            cancel: CancelFlag::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Flag that, once set, fails every unfinished region with `Cancelled`
    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn run(&self, heights: &Raster<f32>, regions: Vec<Region>) -> RunResult<BatchReport> {
        self.run_with_progress(heights, regions, |_| {})
    }

    /// Run the configured batch, calling `progress` as each region finishes.
    ///
    /// Setup failures (invalid configuration, unknown or missing CRS, an
    /// area mode the working CRS cannot support) abort before any region is
    /// aggregated. Per-region failures, including regions above the pixel
    /// ceiling, are recorded in the report and never abort the batch.
    pub fn run_with_progress<F>(
        &self,
        heights: &Raster<f32>,
        regions: Vec<Region>,
        progress: F,
    ) -> RunResult<BatchReport>
    where
        F: Fn(&RegionOutcome) + Sync + Send,
    {
        let start = Instant::now();
        let config = &self.config;
        config.validate()?;

        let heights = self.with_height_crs(heights)?;
        let height_crs = heights.crs().cloned().ok_or_else(|| {
            Error::UnsupportedCrs("height raster has no CRS".into())
        })?;

        let filtered = exclude_regions(regions, &config.exclusion_list);
        let batch = select_batch(&filtered, config.batch_size, config.batch_number)?;

        info!(
            "Regions after exclusion: {}, batch {} of {} (size {}): {} regions",
            batch.total,
            batch.number,
            batch.count(),
            batch.size,
            batch.len()
        );

        let mut report = BatchReport {
            batch_number: batch.number,
            batch_size: batch.size,
            filtered_total: batch.total,
            outcomes: Vec::new(),
            area_mode: config.area_mode,
        };

        if batch.is_exhausted() {
            info!("Batch {} is empty: no more batches", batch.number);
            return Ok(report);
        }

        let working_crs = if config.reproject {
            config.target_crs.clone()
        } else {
            height_crs.clone()
        };
        check_area_mode(Some(&working_crs), config.area_mode)?;

        let to_working = CoordTransform::new(&config.region_crs, &working_crs)?;
        let projected: Vec<Region> = batch
            .regions
            .iter()
            .map(|r| Region::new(r.id.clone(), to_working.transform_multipolygon(&r.geometry)))
            .collect();

        let context = RunContext {
            heights: heights.as_ref(),
            height_extent: CoordTransform::new(&height_crs, &working_crs)?
                .transform_rect(heights.grid_spec().extent(), EXTENT_DENSIFY),
            working_crs,
        };
        info!(
            "Working CRS {} at {}, {} area",
            context.working_crs,
            if config.reproject {
                format!("{} m", config.target_resolution_m)
            } else {
                "native resolution".to_string()
            },
            config.area_mode
        );

        let mode = ProcessingMode::from_limit(config.concurrency);
        debug!("Aggregating with up to {} threads", mode.max_threads());

        report.outcomes = mode.par_map(0..projected.len(), |i| {
            let outcome = self.process_region(&context, &projected[i]);
            progress(&outcome);
            outcome
        })?;

        for outcome in &report.outcomes {
            match outcome {
                RegionOutcome::Failed { id, error } => {
                    warn!("Region {} failed ({}): {}", id, error.kind(), error);
                }
                RegionOutcome::Completed { record, areas, .. } if areas.is_partial() => {
                    warn!(
                        "Region {} has partial coverage ({} no-data cells{})",
                        record.id,
                        areas.nodata_pixels,
                        if areas.clipped { ", clipped by the raster extent" } else { "" }
                    );
                }
                RegionOutcome::Completed { .. } => {}
            }
        }

        info!(
            "Batch {} done in {:.2?}: {} records, {} failed, {} degenerate, {} working cells",
            report.batch_number,
            start.elapsed(),
            report.records().count(),
            report.failure_count(),
            report.degenerate_count(),
            report.working_cells()
        );

        Ok(report)
    }

    fn process_region(&self, context: &RunContext<'_>, region: &Region) -> RegionOutcome {
        let budget = Budget::unlimited()
            .with_timeout(self.config.region_timeout())
            .with_cancel(self.cancel.clone());

        let result = self.region_areas(context, region, &budget).and_then(|(areas, grid)| {
            assemble(region.id.clone(), &areas).map(|record| (record, areas, grid))
        });

        match result {
            Ok((record, areas, grid)) => {
                debug!(
                    "Region {}: {} cells, {:.6} km² total, {:.6} km² canopy",
                    record.id, areas.pixel_count, record.total_area_km2, record.canopy_area_km2
                );
                RegionOutcome::Completed { record, areas, grid }
            }
            Err(error) => RegionOutcome::Failed {
                id: region.id.clone(),
                error,
            },
        }
    }

    /// Aggregate one region on rasters built over its own window
    fn region_areas(
        &self,
        context: &RunContext<'_>,
        region: &Region,
        budget: &Budget,
    ) -> Result<(ZonalAreas, Option<GridSpec>), AggregationError> {
        budget.check()?;

        let missed = ZonalAreas {
            clipped: !region.is_empty(),
            ..Default::default()
        };
        let Some(extent) = region
            .bounding_rect()
            .and_then(|bbox| intersect(&bbox, &context.height_extent))
        else {
            return Ok((missed, None));
        };

        // Checked on the grid description, before any cell is allocated
        let Some(target) = self.region_grid(context, &extent)? else {
            return Ok((missed, None));
        };
        if target.grid.len() > self.config.pixel_count_ceiling {
            return Err(AggregationError::ComputeLimitExceeded {
                pixels: target.grid.len(),
                ceiling: self.config.pixel_count_ceiling,
            });
        }

        let rasters = self.working_rasters(context.heights, &target)?;
        let aggregator = ZonalAggregator::new(&rasters.mask, &rasters.areas, self.config.pixel_count_ceiling)?;
        let areas = aggregator.aggregate(&region.geometry, budget)?;
        Ok((areas, Some(target.grid)))
    }

    fn with_height_crs<'h>(&self, heights: &'h Raster<f32>) -> RunResult<Cow<'h, Raster<f32>>> {
        if heights.crs().is_some() {
            return Ok(Cow::Borrowed(heights));
        }
        match &self.config.height_crs {
            Some(crs) => {
                let mut owned = heights.clone();
                owned.set_crs(Some(crs.clone()));
                Ok(Cow::Owned(owned))
            }
            None => Err(Error::UnsupportedCrs(
                "height raster declares no CRS and none was configured".into(),
            )
            .into()),
        }
    }

    /// Working grid for `extent`: a covering grid at the target resolution
    /// when reprojecting, otherwise the height raster cells it overlaps.
    /// `None` when no cell falls inside.
    fn region_grid(&self, context: &RunContext<'_>, extent: &Rect<f64>) -> canopy_core::Result<Option<RegionGrid>> {
        let target = if self.config.reproject {
            RegionGrid {
                grid: GridSpec::covering(
                    extent,
                    self.config.target_resolution_m,
                    Some(context.working_crs.clone()),
                )?,
                window: None,
            }
        } else {
            let source = context.heights.grid_spec();
            let Some(window) = source.window(extent) else {
                return Ok(None);
            };
            RegionGrid {
                grid: GridSpec::new(source.transform.shifted(&window), window.rows, window.cols, source.crs),
                window: Some(window),
            }
        };
        Ok((!target.grid.is_empty()).then_some(target))
    }

    /// Build mask and area rasters on the region grid
    fn working_rasters(&self, heights: &Raster<f32>, target: &RegionGrid) -> canopy_core::Result<WorkingRasters> {
        let config = &self.config;

        let (source, target_grid): (Cow<'_, Raster<f32>>, _) = match &target.window {
            Some(window) => (Cow::Owned(heights.crop(window)?), None),
            None => (Cow::Borrowed(heights), Some(target.grid.clone())),
        };

        let params = MaskParams {
            threshold_meters: config.threshold_meters,
            target_grid,
        };
        let mask = canopy_mask(source.as_ref(), &params)?;
        let areas = pixel_area(&mask.grid_spec(), config.area_mode)?;

        Ok(WorkingRasters { mask, areas })
    }
}

fn intersect(a: &Rect<f64>, b: &Rect<f64>) -> Option<Rect<f64>> {
    let min_x = a.min().x.max(b.min().x);
    let min_y = a.min().y.max(b.min().y);
    let max_x = a.max().x.min(b.max().x);
    let max_y = a.max().y.min(b.max().y);
    if min_x < max_x && min_y < max_y {
        Some(Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y }))
    } else {
        None
    }
}
