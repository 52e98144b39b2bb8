//! Nearest-neighbour resampling onto a target grid
//!
//! Nearest neighbour is the only resampler offered: it never invents
//! values, so thresholding after resampling selects exactly the source
//! cells that pass the threshold.

use canopy_core::raster::{GridSpec, Raster, RasterElement};
use canopy_core::{CoordTransform, Error, Result};
use ndarray::Array2;
use rayon::prelude::*;

/// Resample `src` onto `target` by nearest neighbour.
///
/// Each target cell takes the value of the source cell containing its
/// centre (after transforming the centre into the source CRS). Target cells
/// whose centre falls outside the source grid are no-data.
pub fn resample_nearest<T: RasterElement>(src: &Raster<T>, target: &GridSpec) -> Result<Raster<T>> {
    let transform = match (src.crs(), target.crs.as_ref()) {
        (Some(from), Some(to)) => CoordTransform::new(to, from)?,
        (Some(crs), None) | (None, Some(crs)) => CoordTransform::identity(crs),
        (None, None) => {
            return Err(Error::UnsupportedCrs(
                "cannot resample between grids without a CRS".into(),
            ))
        }
    };

    let (rows, cols) = target.shape();
    let (src_rows, src_cols) = src.shape();
    let nodata = src.nodata().unwrap_or_else(T::default_nodata);
    let src_gt = *src.transform();
    let dst_gt = target.transform;
    let view = src.view();

    let data: Vec<T> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![nodata; cols];
            for (col, out) in row_data.iter_mut().enumerate() {
                let (x, y) = dst_gt.pixel_to_geo(col, row);
                let (sx, sy) = transform.apply(x, y);
                let (c, r) = src_gt.geo_to_pixel(sx, sy);
                if !(c.is_finite() && r.is_finite()) || c < 0.0 || r < 0.0 {
                    continue;
                }
                let (c, r) = (c.floor() as usize, r.floor() as usize);
                if r < src_rows && c < src_cols {
                    *out = view[(r, c)];
                }
            }
            row_data
        })
        .collect();

    let mut output = Raster::from_grid(target, nodata);
    output.set_nodata(Some(nodata));
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::{GeoTransform, CRS};

    fn source() -> Raster<f32> {
        let mut r = Raster::from_vec((0..16).map(|v| v as f32).collect(), 4, 4).unwrap();
        r.set_transform(GeoTransform::new(0.0, 40.0, 10.0, -10.0));
        r.set_crs(Some(CRS::statistics_canada_lambert()));
        r
    }

    #[test]
    fn test_finer_grid_repeats_source_cells() {
        let src = source();
        let target = GridSpec::new(
            GeoTransform::new(0.0, 40.0, 5.0, -5.0),
            8,
            8,
            Some(CRS::statistics_canada_lambert()),
        );
        let out = resample_nearest(&src, &target).unwrap();
        assert_eq!(out.get(0, 0).unwrap(), 0.0);
        assert_eq!(out.get(0, 1).unwrap(), 0.0);
        assert_eq!(out.get(0, 2).unwrap(), 1.0);
        assert_eq!(out.get(7, 7).unwrap(), 15.0);
    }

    #[test]
    fn test_outside_source_is_nodata() {
        let src = source();
        let target = GridSpec::new(
            GeoTransform::new(30.0, 40.0, 10.0, -10.0),
            1,
            3,
            Some(CRS::statistics_canada_lambert()),
        );
        let out = resample_nearest(&src, &target).unwrap();
        assert_eq!(out.get(0, 0).unwrap(), 3.0);
        assert!(out.is_nodata(out.get(0, 1).unwrap()));
        assert!(out.is_nodata(out.get(0, 2).unwrap()));
    }

    #[test]
    fn test_values_are_never_blended() {
        let mut src: Raster<f32> = Raster::from_vec(vec![0.0, 10.0, 0.0, 10.0], 2, 2).unwrap();
        src.set_transform(GeoTransform::new(-75.0, 45.0, 0.01, -0.01));
        src.set_crs(Some(CRS::wgs84()));

        let (x0, y0) = CoordTransform::new(&CRS::wgs84(), &CRS::statistics_canada_lambert())
            .unwrap()
            .apply(-74.99, 44.99);
        let target = GridSpec::covering(
            &geo::Rect::new(
                geo::Coord { x: x0 - 400.0, y: y0 - 400.0 },
                geo::Coord { x: x0 + 400.0, y: y0 + 400.0 },
            ),
            50.0,
            Some(CRS::statistics_canada_lambert()),
        )
        .unwrap();
        let out = resample_nearest(&src, &target).unwrap();
        assert!(out
            .data()
            .iter()
            .all(|&v| v.is_nan() || v == 0.0 || v == 10.0));
        assert!(out.data().iter().any(|&v| v == 10.0));
    }
}
