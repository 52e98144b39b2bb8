//! Canopy rasters: the binary mask and the per-pixel ground area
//!
//! Both are built on the same working grid and only read afterwards.

mod area;
mod mask;
mod resample;

pub use area::{check_area_mode, pixel_area, AreaMode, AreaRaster, PixelArea};
pub use mask::{canopy_mask, threshold, CanopyMask, MaskParams, CANOPY, MASK_NODATA, OPEN};
pub use resample::resample_nearest;
