//! Combining overlapping raster tiles into one continuous raster

use super::read_geotiff;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, GridSpec, Raster, RasterElement};
use std::path::Path;

/// Mosaic tiles that share a CRS and a pixel lattice.
///
/// The output covers the union of the tile extents. Tiles are laid down in
/// order and a later tile overwrites an earlier one wherever it holds valid
/// data; cells no tile covers are no-data.
pub fn mosaic<T: RasterElement>(tiles: Vec<Raster<T>>) -> Result<Raster<T>> {
    let mut iter = tiles.into_iter();
    let first = iter.next().ok_or_else(|| Error::InvalidParameter {
        name: "tiles",
        value: "0".into(),
        reason: "at least one tile is required".into(),
    })?;
    let rest: Vec<Raster<T>> = iter.collect();
    if rest.is_empty() {
        return Ok(first);
    }

    let base = *first.transform();
    if !base.is_north_up() {
        return Err(Error::InvalidParameter {
            name: "tiles",
            value: "rotated".into(),
            reason: "only north-up tiles can be mosaicked".into(),
        });
    }

    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;

    for tile in std::iter::once(&first).chain(rest.iter()) {
        check_compatible(&first, tile)?;
        let (x0, y0, x1, y1) = tile.bounds();
        min_x = min_x.min(x0);
        min_y = min_y.min(y0);
        max_x = max_x.max(x1);
        max_y = max_y.max(y1);
    }

    let cols = ((max_x - min_x) / base.pixel_width).round() as usize;
    let rows = ((max_y - min_y) / base.pixel_height.abs()).round() as usize;
    let grid = GridSpec::new(
        GeoTransform::new(min_x, max_y, base.pixel_width, base.pixel_height),
        rows,
        cols,
        first.crs().cloned(),
    );

    let nodata = first.nodata().unwrap_or_else(T::default_nodata);
    let mut out = Raster::from_grid(&grid, nodata);
    out.set_nodata(Some(nodata));

    for tile in std::iter::once(&first).chain(rest.iter()) {
        let (col_off, row_off) = offset_in(&grid.transform, tile.transform());
        let mut dst = out.data_mut().slice_mut(ndarray::s![
            row_off..row_off + tile.rows(),
            col_off..col_off + tile.cols()
        ]);
        for (d, &s) in dst.iter_mut().zip(tile.data().iter()) {
            if !tile.is_nodata(s) {
                *d = s;
            }
        }
    }

    Ok(out)
}

/// Read every tile and mosaic them
pub fn read_mosaic<T, P>(paths: &[P]) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let tiles = paths
        .iter()
        .map(read_geotiff::<T, _>)
        .collect::<Result<Vec<_>>>()?;
    mosaic(tiles)
}

fn check_compatible<T: RasterElement>(a: &Raster<T>, b: &Raster<T>) -> Result<()> {
    let crs_match = match (a.crs(), b.crs()) {
        (Some(x), Some(y)) => x.is_equivalent(y),
        (None, None) => true,
        _ => false,
    };
    let (ta, tb) = (a.transform(), b.transform());
    let tol = ta.pixel_width.abs() * 1e-6;
    let same_size = (ta.pixel_width - tb.pixel_width).abs() <= tol
        && (ta.pixel_height - tb.pixel_height).abs() <= tol
        && tb.is_north_up();

    if !crs_match || !same_size {
        return Err(Error::CrsMismatch(
            a.grid_spec().describe(),
            b.grid_spec().describe(),
        ));
    }

    let (col, row) = ta.geo_to_pixel(tb.origin_x, tb.origin_y);
    if (col - col.round()).abs() > 1e-6 || (row - row.round()).abs() > 1e-6 {
        return Err(Error::InvalidParameter {
            name: "tiles",
            value: b.grid_spec().describe(),
            reason: "tile is not aligned to the first tile's pixel lattice".into(),
        });
    }
    Ok(())
}

fn offset_in(grid: &GeoTransform, tile: &GeoTransform) -> (usize, usize) {
    let (col, row) = grid.geo_to_pixel(tile.origin_x, tile.origin_y);
    (col.round().max(0.0) as usize, row.round().max(0.0) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::CRS;

    fn tile(origin_x: f64, origin_y: f64, values: Vec<f32>, rows: usize, cols: usize) -> Raster<f32> {
        let mut r = Raster::from_vec(values, rows, cols).unwrap();
        r.set_transform(GeoTransform::new(origin_x, origin_y, 1.0, -1.0));
        r.set_crs(Some(CRS::statistics_canada_lambert()));
        r
    }

    #[test]
    fn test_later_tiles_overwrite_valid_cells() {
        let a = tile(0.0, 2.0, vec![1.0; 4], 2, 2);
        let b = tile(1.0, 2.0, vec![f32::NAN, 5.0, 5.0, 5.0], 2, 2);
        let m = mosaic(vec![a, b]).unwrap();

        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m.get(0, 0).unwrap(), 1.0);
        // NaN in the later tile keeps the earlier value
        assert_eq!(m.get(0, 1).unwrap(), 1.0);
        assert_eq!(m.get(1, 1).unwrap(), 5.0);
        assert_eq!(m.get(0, 2).unwrap(), 5.0);
    }

    #[test]
    fn test_gaps_are_nodata() {
        let a = tile(0.0, 1.0, vec![1.0], 1, 1);
        let b = tile(2.0, 1.0, vec![2.0], 1, 1);
        let m = mosaic(vec![a, b]).unwrap();
        assert_eq!(m.shape(), (1, 3));
        assert!(m.is_nodata(m.get(0, 1).unwrap()));
    }

    #[test]
    fn test_misaligned_or_foreign_tiles_rejected() {
        let a = tile(0.0, 1.0, vec![1.0], 1, 1);
        let shifted = tile(0.5, 1.0, vec![1.0], 1, 1);
        assert!(mosaic(vec![a.clone(), shifted]).is_err());

        let mut foreign = tile(1.0, 1.0, vec![1.0], 1, 1);
        foreign.set_crs(Some(CRS::wgs84()));
        assert!(matches!(mosaic(vec![a, foreign]), Err(Error::CrsMismatch(_, _))));

        assert!(mosaic::<f32>(Vec::new()).is_err());
    }
}
