//! Grid descriptions independent of cell values

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, PixelWindow};
use geo::Rect;

/// Shape, georeferencing and CRS of a raster grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
    pub crs: Option<CRS>,
}

impl GridSpec {
    pub fn new(transform: GeoTransform, rows: usize, cols: usize, crs: Option<CRS>) -> Self {
        Self {
            transform,
            rows,
            cols,
            crs,
        }
    }

    /// North-up grid of square `resolution` cells covering `rect`.
    ///
    /// Edges snap outward to whole multiples of the resolution, so two grids
    /// built from different rectangles share one cell lattice.
    pub fn covering(rect: &Rect<f64>, resolution: f64, crs: Option<CRS>) -> Result<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(Error::InvalidParameter {
                name: "resolution",
                value: resolution.to_string(),
                reason: "must be a positive finite number".into(),
            });
        }

        let min_x = (rect.min().x / resolution).floor() * resolution;
        let max_x = (rect.max().x / resolution).ceil() * resolution;
        let min_y = (rect.min().y / resolution).floor() * resolution;
        let max_y = (rect.max().y / resolution).ceil() * resolution;

        let cols = ((max_x - min_x) / resolution).round() as usize;
        let rows = ((max_y - min_y) / resolution).round() as usize;

        Ok(Self {
            transform: GeoTransform::new(min_x, max_y, resolution, -resolution),
            rows,
            cols,
            crs,
        })
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total number of cells
    pub fn len(&self) -> u64 {
        self.rows as u64 * self.cols as u64
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Map extent of the grid
    pub fn extent(&self) -> Rect<f64> {
        self.transform.extent(self.cols, self.rows)
    }

    /// Cells whose extent meets `rect`
    pub fn window(&self, rect: &Rect<f64>) -> Option<PixelWindow> {
        self.transform.window(rect, self.cols, self.rows)
    }

    /// Short human-readable description used in logs and mismatch errors
    pub fn describe(&self) -> String {
        let crs = self
            .crs
            .as_ref()
            .map(|c| c.identifier())
            .unwrap_or_else(|| "no CRS".to_string());
        let t = &self.transform;
        format!(
            "{} {}x{} origin ({}, {}) cell {}x{}",
            crs, self.cols, self.rows, t.origin_x, t.origin_y, t.pixel_width, t.pixel_height
        )
    }

    /// Fail with [`Error::SizeMismatch`] or [`Error::CrsMismatch`] unless both
    /// grids share shape, lattice and CRS.
    pub fn ensure_same(&self, other: &GridSpec) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(Error::SizeMismatch {
                er: self.rows,
                ec: self.cols,
                ar: other.rows,
                ac: other.cols,
            });
        }

        let crs_match = match (&self.crs, &other.crs) {
            (Some(a), Some(b)) => a.is_equivalent(b),
            (None, None) => true,
            _ => false,
        };

        if !crs_match || !self.transform.approx_eq(&other.transform) {
            return Err(Error::CrsMismatch(self.describe(), other.describe()));
        }

        Ok(())
    }
}
