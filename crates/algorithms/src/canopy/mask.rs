//! Binary canopy mask from a canopy height raster

use super::resample::resample_nearest;
use canopy_core::raster::{GridSpec, Raster, RasterElement};
use canopy_core::{Algorithm, Error, Result};
use ndarray::Array2;
use rayon::prelude::*;

/// Mask value for cells at or above the height threshold
pub const CANOPY: u8 = 1;
/// Mask value for cells below the threshold
pub const OPEN: u8 = 0;
/// Mask value where the height is unknown
pub const MASK_NODATA: u8 = u8::MAX;

/// Canopy mask builder
#[derive(Debug, Clone, Default)]
pub struct CanopyMask;

/// Parameters for the canopy mask
#[derive(Debug, Clone)]
pub struct MaskParams {
    /// Minimum canopy height in metres (inclusive)
    pub threshold_meters: f64,
    /// Grid to resample onto before thresholding; `None` keeps the native grid
    pub target_grid: Option<GridSpec>,
}

impl Default for MaskParams {
    fn default() -> Self {
        Self {
            threshold_meters: 2.0,
            target_grid: None,
        }
    }
}

impl Algorithm for CanopyMask {
    type Input = Raster<f32>;
    type Output = Raster<u8>;
    type Params = MaskParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "CanopyMask"
    }

    fn description(&self) -> &'static str {
        "Binary canopy mask: 1 where height >= threshold, 0 below, 255 where height is no-data"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        canopy_mask(&input, &params)
    }
}

/// Build the canopy mask, resampling by nearest neighbour first when a
/// target grid is given.
pub fn canopy_mask<T: RasterElement>(heights: &Raster<T>, params: &MaskParams) -> Result<Raster<u8>> {
    if !params.threshold_meters.is_finite() {
        return Err(Error::InvalidParameter {
            name: "threshold_meters",
            value: params.threshold_meters.to_string(),
            reason: "must be finite".into(),
        });
    }

    match &params.target_grid {
        Some(grid) => threshold(&resample_nearest(heights, grid)?, params.threshold_meters),
        None => threshold(heights, params.threshold_meters),
    }
}

/// Threshold a height raster on its own grid
pub fn threshold<T: RasterElement>(heights: &Raster<T>, threshold_meters: f64) -> Result<Raster<u8>> {
    let (rows, cols) = heights.shape();
    let view = heights.view();

    let data: Vec<u8> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![MASK_NODATA; cols];
            for (col, out) in row_data.iter_mut().enumerate() {
                let h = view[(row, col)];
                if heights.is_nodata(h) {
                    continue;
                }
                *out = match h.to_f64() {
                    Some(v) if v >= threshold_meters => CANOPY,
                    Some(_) => OPEN,
                    None => MASK_NODATA,
                };
            }
            row_data
        })
        .collect();

    let mut output = heights.with_same_meta::<u8>(rows, cols);
    output.set_nodata(Some(MASK_NODATA));
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;

    Ok(output)
}
