//! Per-pixel ground area rasters
//!
//! Two modes, and the mode travels with the raster so a caller can never
//! lose track of which one produced the numbers:
//!
//! - `Uniform`: every cell is `|pixel_width × pixel_height|`. Only
//!   meaningful when the grid is in a (near) equal-area projected CRS.
//! - `DistortionAware`: every cell gets its true ground area from the
//!   projection's local geometry (meridional and prime-vertical radii for
//!   geographic grids, `1/k²` for conformal projections).

use canopy_core::raster::{GridSpec, Raster};
use canopy_core::{projection_for, Algorithm, Error, Result, CRS};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How pixel ground area is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaMode {
    Uniform,
    #[default]
    DistortionAware,
}

impl fmt::Display for AreaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AreaMode::Uniform => write!(f, "uniform"),
            AreaMode::DistortionAware => write!(f, "distortion-aware"),
        }
    }
}

/// Ground area (m²) per cell of a grid, tagged with the mode that produced it
#[derive(Debug, Clone)]
pub struct AreaRaster {
    pub mode: AreaMode,
    pub areas: Raster<f64>,
}

impl AreaRaster {
    /// Sum of all cell areas
    pub fn total(&self) -> f64 {
        self.areas.data().iter().filter(|v| v.is_finite()).sum()
    }
}

/// Pixel area raster builder
#[derive(Debug, Clone, Default)]
pub struct PixelArea;

impl Algorithm for PixelArea {
    type Input = GridSpec;
    type Output = AreaRaster;
    type Params = AreaMode;
    type Error = Error;

    fn name(&self) -> &'static str {
        "PixelArea"
    }

    fn description(&self) -> &'static str {
        "Per-pixel ground area in square metres, uniform or distortion-aware"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        pixel_area(&input, params)
    }
}

/// Fail unless `mode` can produce areas for grids in `crs`.
///
/// `Uniform` is refused for geographic grids, where a degree-squared
/// constant has no meaning as a ground area. `DistortionAware` needs a CRS
/// with a built-in projection.
pub fn check_area_mode(crs: Option<&CRS>, mode: AreaMode) -> Result<()> {
    match (mode, crs) {
        (AreaMode::Uniform, Some(crs)) => {
            if projection_for(crs).map(|p| p.is_geographic()).unwrap_or(false) {
                return Err(Error::InvalidParameter {
                    name: "area_mode",
                    value: mode.to_string(),
                    reason: format!("{} is geographic; use distortion-aware areas", crs),
                });
            }
            Ok(())
        }
        (AreaMode::Uniform, None) => Ok(()),
        (AreaMode::DistortionAware, Some(crs)) => projection_for(crs).map(|_| ()),
        (AreaMode::DistortionAware, None) => Err(Error::UnsupportedCrs(
            "distortion-aware areas need a grid CRS".into(),
        )),
    }
}

/// Build the pixel area raster for `grid`, subject to [`check_area_mode`].
pub fn pixel_area(grid: &GridSpec, mode: AreaMode) -> Result<AreaRaster> {
    let gt = grid.transform;
    if !gt.is_north_up() {
        return Err(Error::InvalidParameter {
            name: "grid",
            value: grid.describe(),
            reason: "pixel areas need a north-up grid".into(),
        });
    }
    check_area_mode(grid.crs.as_ref(), mode)?;

    let areas = match mode {
        AreaMode::Uniform => Raster::from_grid(grid, gt.cell_area()),
        AreaMode::DistortionAware => {
            let crs = grid.crs.as_ref().ok_or_else(|| {
                Error::UnsupportedCrs("distortion-aware areas need a grid CRS".into())
            })?;
            let projection = projection_for(crs)?;
            let (rows, cols) = grid.shape();
            let (dx, dy) = (gt.pixel_width.abs(), gt.pixel_height.abs());

            let data: Vec<f64> = (0..rows)
                .into_par_iter()
                .flat_map(|row| {
                    (0..cols)
                        .map(|col| {
                            let (x, y) = gt.pixel_to_geo(col, row);
                            projection.cell_ground_area(x, y, dx, dy)
                        })
                        .collect::<Vec<f64>>()
                })
                .collect();

            let mut raster = Raster::from_grid(grid, 0.0);
            *raster.data_mut() = Array2::from_shape_vec((rows, cols), data)
                .map_err(|e| Error::Other(e.to_string()))?;
            raster
        }
    };

    Ok(AreaRaster { mode, areas })
}
