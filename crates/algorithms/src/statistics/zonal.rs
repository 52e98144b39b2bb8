//! Zonal area aggregation
//!
//! Sums a pixel area raster over a polygon footprint, once for every cell
//! and once for cells the canopy mask marks as canopy.
//!
//! A cell belongs to the footprint iff its centre lies inside the polygon
//! under the even-odd rule (holes and disjoint parts handled alike). The
//! same rule drives both sums, so the canopy proportion is never skewed by
//! boundary handling. Cells are found by scanline rasterization: each row's
//! centre line is intersected with the active polygon edges and the spans
//! between crossing pairs are summed.

use crate::canopy::{AreaRaster, CANOPY};
use crate::error::AggregationError;
use canopy_core::raster::{GridSpec, PixelWindow, Raster};
use canopy_core::Result;
use canopy_parallel::CancelFlag;
use geo::{BoundingRect, MultiPolygon};
use std::time::{Duration, Instant};

/// Area sums over one region footprint
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ZonalAreas {
    /// Σ pixel area over the footprint (m²)
    pub total_area_m2: f64,
    /// Σ pixel area over footprint cells with mask == 1 (m²)
    pub canopy_area_m2: f64,
    /// Footprint cells
    pub pixel_count: u64,
    /// Footprint cells with mask == 1
    pub canopy_pixel_count: u64,
    /// Footprint cells with no height data; counted in the total only
    pub nodata_pixels: u64,
    /// The region's bounding box reaches outside the grid
    pub clipped: bool,
}

impl ZonalAreas {
    /// Coverage of the region by valid raster data is incomplete
    pub fn is_partial(&self) -> bool {
        self.clipped || self.nodata_pixels > 0
    }
}

/// Stop conditions checked between rows
#[derive(Debug, Clone, Default)]
pub struct Budget {
    deadline: Option<(Instant, Duration)>,
    cancel: Option<CancelFlag>,
}

impl Budget {
    /// No deadline and no cancellation
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Time out `limit` from now
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.deadline = limit.map(|d| (Instant::now() + d, d));
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn check(&self) -> std::result::Result<(), AggregationError> {
        if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
            return Err(AggregationError::Cancelled);
        }
        if let Some((deadline, limit)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(AggregationError::Timeout(limit));
            }
        }
        Ok(())
    }
}

/// A non-horizontal polygon edge prepared for scanning
#[derive(Debug, Clone, Copy)]
struct Edge {
    y_lo: f64,
    y_hi: f64,
    /// x where the edge meets `y_lo`
    x_at_lo: f64,
    /// dx/dy
    slope: f64,
}

impl Edge {
    fn x_at(&self, y: f64) -> f64 {
        self.x_at_lo + (y - self.y_lo) * self.slope
    }
}

fn collect_edges(geometry: &MultiPolygon<f64>) -> Vec<Edge> {
    let mut edges = Vec::new();
    for polygon in &geometry.0 {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            for line in ring.lines() {
                let (a, b) = (line.start, line.end);
                if a.y == b.y || !(a.y.is_finite() && b.y.is_finite()) {
                    continue;
                }
                let (lo, hi) = if a.y < b.y { (a, b) } else { (b, a) };
                edges.push(Edge {
                    y_lo: lo.y,
                    y_hi: hi.y,
                    x_at_lo: lo.x,
                    slope: (hi.x - lo.x) / (hi.y - lo.y),
                });
            }
        }
    }
    edges
}

/// Aggregates area over region footprints on one working grid.
///
/// The mask and area rasters are shared, read-only, and must sit on the
/// same grid; construction fails with `CrsMismatch` or `SizeMismatch`
/// otherwise.
#[derive(Debug, Clone, Copy)]
pub struct ZonalAggregator<'a> {
    mask: &'a Raster<u8>,
    areas: &'a AreaRaster,
    pixel_ceiling: u64,
}

impl<'a> ZonalAggregator<'a> {
    pub fn new(mask: &'a Raster<u8>, areas: &'a AreaRaster, pixel_ceiling: u64) -> Result<Self> {
        mask.ensure_same_grid(&areas.areas)?;
        if !mask.transform().is_north_up() {
            return Err(canopy_core::Error::InvalidParameter {
                name: "grid",
                value: mask.grid_spec().describe(),
                reason: "zonal aggregation needs a north-up grid".into(),
            });
        }
        Ok(Self {
            mask,
            areas,
            pixel_ceiling,
        })
    }

    pub fn grid(&self) -> GridSpec {
        self.mask.grid_spec()
    }

    /// Sum total and canopy area over `geometry`, given in the grid's CRS.
    ///
    /// A footprint that misses the grid yields zero areas. Fails with
    /// `ComputeLimitExceeded` before scanning if the region's clipped
    /// bounding window holds more cells than the ceiling.
    pub fn aggregate(
        &self,
        geometry: &MultiPolygon<f64>,
        budget: &Budget,
    ) -> std::result::Result<ZonalAreas, AggregationError> {
        let Some(bbox) = geometry.bounding_rect() else {
            return Ok(ZonalAreas::default());
        };

        let grid = self.grid();
        let extent = grid.extent();
        let clipped = bbox.min().x < extent.min().x
            || bbox.min().y < extent.min().y
            || bbox.max().x > extent.max().x
            || bbox.max().y > extent.max().y;

        let Some(window) = grid.window(&bbox) else {
            return Ok(ZonalAreas {
                clipped,
                ..Default::default()
            });
        };

        if window.len() > self.pixel_ceiling {
            return Err(AggregationError::ComputeLimitExceeded {
                pixels: window.len(),
                ceiling: self.pixel_ceiling,
            });
        }

        let mut result = self.scan(geometry, &window, budget)?;
        result.clipped = clipped;
        Ok(result)
    }

    fn scan(
        &self,
        geometry: &MultiPolygon<f64>,
        window: &PixelWindow,
        budget: &Budget,
    ) -> std::result::Result<ZonalAreas, AggregationError> {
        let gt = *self.mask.transform();
        let mask = self.mask.view();
        let areas = self.areas.areas.view();

        let mut edges = collect_edges(geometry);
        // Rows run north to south, so activate edges by descending top
        edges.sort_by(|a, b| b.y_hi.total_cmp(&a.y_hi));

        let mut active: Vec<Edge> = Vec::new();
        let mut next_edge = 0;
        let mut crossings: Vec<f64> = Vec::new();
        let mut out = ZonalAreas::default();

        for row in window.row_off..window.row_end() {
            budget.check()?;

            let (_, y) = gt.pixel_to_geo(0, row);
            while next_edge < edges.len() && edges[next_edge].y_hi > y {
                active.push(edges[next_edge]);
                next_edge += 1;
            }
            active.retain(|e| e.y_lo <= y);

            crossings.clear();
            crossings.extend(active.iter().map(|e| e.x_at(y)));
            crossings.sort_by(f64::total_cmp);

            let mut row_total = 0.0;
            let mut row_canopy = 0.0;

            for span in crossings.chunks_exact(2) {
                let (c0, c1) = centre_span(span[0], span[1], gt.origin_x, gt.pixel_width);
                let lo = c0.max(window.col_off as i64);
                let hi = c1.min(window.col_end() as i64);
                if hi <= lo {
                    continue;
                }

                for col in lo as usize..hi as usize {
                    let area = areas[(row, col)];
                    if !area.is_finite() {
                        out.nodata_pixels += 1;
                        continue;
                    }
                    let m = mask[(row, col)];
                    out.pixel_count += 1;
                    row_total += area;
                    if m == CANOPY {
                        out.canopy_pixel_count += 1;
                        row_canopy += area;
                    } else if self.mask.is_nodata(m) {
                        out.nodata_pixels += 1;
                    }
                }
            }

            out.total_area_m2 += row_total;
            out.canopy_area_m2 += row_canopy;
        }

        Ok(out)
    }
}

/// Columns whose centres fall in `[x0, x1)`, as a half-open index range
fn centre_span(x0: f64, x1: f64, origin_x: f64, pixel_width: f64) -> (i64, i64) {
    let first = ((x0 - origin_x) / pixel_width - 0.5).ceil();
    let end = ((x1 - origin_x) / pixel_width - 0.5).ceil();
    (first as i64, end as i64)
}
