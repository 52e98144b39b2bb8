//! End-to-end scenarios for the batch pipeline.
//!
//! Synthetic height rasters and regions with hand-computable answers:
//! uniform canopy, open ground, half coverage, batch partitioning and the
//! reprojection consistency check between the two area modes.

use approx::assert_relative_eq;
use canopy_algorithms::prelude::*;
use geo::{Coord, LineString, Polygon};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// North-up height raster in EPSG:3347 with square cells
fn lambert_heights(rows: usize, cols: usize, res: f64, fill: f32) -> Raster<f32> {
    let mut r = Raster::filled(rows, cols, fill);
    r.set_transform(GeoTransform::new(0.0, rows as f64 * res, res, -res));
    r.set_crs(Some(CRS::statistics_canada_lambert()));
    r
}

/// Axis-aligned square with `steps` vertices per edge
fn square(id: &str, x0: f64, y0: f64, side: f64, steps: usize) -> Region {
    let mut ring = Vec::with_capacity(4 * steps + 1);
    for i in 0..steps {
        let f = side * i as f64 / steps as f64;
        ring.push(Coord { x: x0 + f, y: y0 });
    }
    for i in 0..steps {
        let f = side * i as f64 / steps as f64;
        ring.push(Coord { x: x0 + side, y: y0 + f });
    }
    for i in 0..steps {
        let f = side * i as f64 / steps as f64;
        ring.push(Coord { x: x0 + side - f, y: y0 + side });
    }
    for i in 0..steps {
        let f = side * i as f64 / steps as f64;
        ring.push(Coord { x: x0, y: y0 + side - f });
    }
    ring.push(ring[0]);
    Region::from_polygon(id, Polygon::new(LineString::from(ring), vec![]))
}

fn native_lambert() -> PipelineBuilder {
    PipelineConfig::builder()
        .reproject(false)
        .area_mode(AreaMode::Uniform)
        .region_crs(CRS::statistics_canada_lambert())
}

fn ids(report: &BatchReport) -> Vec<String> {
    report.outcomes.iter().map(|o| o.id().to_string()).collect()
}

// ---------------------------------------------------------------------------
// Single-region answers
// ---------------------------------------------------------------------------

#[test]
fn full_canopy_square() {
    // 2 km × 2 km region on a 10 m grid, every height above threshold
    let heights = lambert_heights(200, 200, 10.0, 15.0);
    let runner = BatchRunner::new(native_lambert().build().unwrap());
    let report = runner.run(&heights, vec![square("A", 0.0, 0.0, 2000.0, 1)]).unwrap();

    let record = report.records().next().unwrap();
    assert_relative_eq!(record.total_area_km2, 4.0, epsilon = 1e-9);
    assert_relative_eq!(record.canopy_area_km2, 4.0, epsilon = 1e-9);
    assert_relative_eq!(record.canopy_proportion.unwrap(), 100.0, epsilon = 1e-9);
    assert!(report.partial_coverage().is_empty());
}

#[test]
fn open_ground_square() {
    let heights = lambert_heights(200, 200, 10.0, 0.5);
    let runner = BatchRunner::new(native_lambert().build().unwrap());
    let report = runner.run(&heights, vec![square("A", 0.0, 0.0, 2000.0, 1)]).unwrap();

    let record = report.records().next().unwrap();
    assert_relative_eq!(record.total_area_km2, 4.0, epsilon = 1e-9);
    assert_eq!(record.canopy_area_km2, 0.0);
    assert_eq!(record.canopy_proportion, Some(0.0));
}

#[test]
fn half_canopy_with_inclusive_threshold() {
    // West half exactly at threshold, east half just below
    let mut heights = lambert_heights(100, 100, 10.0, 1.99);
    for row in 0..100 {
        for col in 0..50 {
            heights.set(row, col, 2.0).unwrap();
        }
    }
    let runner = BatchRunner::new(native_lambert().build().unwrap());
    let report = runner.run(&heights, vec![square("A", 0.0, 0.0, 1000.0, 1)]).unwrap();

    let record = report.records().next().unwrap();
    assert_relative_eq!(record.total_area_km2, 1.0, epsilon = 1e-9);
    assert_relative_eq!(record.canopy_area_km2, 0.5, epsilon = 1e-9);
    assert_relative_eq!(record.canopy_proportion.unwrap(), 50.0, epsilon = 1e-9);
}

#[test]
fn nodata_cells_reported_as_partial() {
    let mut heights = lambert_heights(10, 10, 10.0, 5.0);
    heights.set_nodata(Some(-9999.0));
    heights.set(0, 0, -9999.0).unwrap();

    let runner = BatchRunner::new(native_lambert().build().unwrap());
    let report = runner.run(&heights, vec![square("A", 0.0, 0.0, 100.0, 1)]).unwrap();

    let RegionOutcome::Completed { record, areas, .. } = &report.outcomes[0] else {
        panic!("region should complete");
    };
    assert_eq!(areas.nodata_pixels, 1);
    assert_eq!(areas.pixel_count, 100);
    assert_relative_eq!(record.canopy_proportion.unwrap(), 99.0, epsilon = 1e-9);
    assert_eq!(report.partial_coverage().len(), 1);
}

#[test]
fn empty_region_has_null_proportion() {
    let heights = lambert_heights(10, 10, 10.0, 5.0);
    let runner = BatchRunner::new(native_lambert().build().unwrap());
    let report = runner
        .run(&heights, vec![square("A", 0.0, 0.0, 50.0, 1), Region::empty("Z")])
        .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    let z = report.records().find(|r| r.id.as_str() == "Z").unwrap();
    assert_eq!(z.total_area_km2, 0.0);
    assert_eq!(z.canopy_proportion, None);
    assert_eq!(report.degenerate_count(), 1);
    assert_eq!(report.failure_count(), 0);
}

// ---------------------------------------------------------------------------
// Batching and exclusion
// ---------------------------------------------------------------------------

fn strip_regions(n: usize) -> Vec<Region> {
    (0..n)
        .map(|i| square(&format!("R{}", i), i as f64 * 10.0, 0.0, 10.0, 1))
        .collect()
}

#[test]
fn batches_partition_the_filtered_regions() {
    let heights = lambert_heights(10, 10, 10.0, 5.0);
    let mut seen: Vec<String> = Vec::new();

    for batch_number in 0.. {
        let config = native_lambert()
            .batch_size(3)
            .batch_number(batch_number)
            .build()
            .unwrap();
        let report = BatchRunner::new(config).run(&heights, strip_regions(7)).unwrap();
        assert_eq!(report.filtered_total, 7);
        assert_eq!(report.batch_count(), 3);
        if report.is_exhausted() {
            assert_eq!(batch_number, 3);
            break;
        }
        assert!(report.outcomes.len() <= 3);
        seen.extend(ids(&report));
    }

    let expected: Vec<String> = (0..7).map(|i| format!("R{}", i)).collect();
    assert_eq!(seen, expected);
    assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 7);
}

#[test]
fn empty_region_source_is_exhausted() {
    let heights = lambert_heights(10, 10, 10.0, 5.0);
    let report = BatchRunner::new(native_lambert().build().unwrap())
        .run(&heights, Vec::new())
        .unwrap();
    assert!(report.is_exhausted());
    assert_eq!(report.filtered_total, 0);
    assert_eq!(report.working_cells(), 0);
}

#[test]
fn excluded_regions_never_appear() {
    let heights = lambert_heights(10, 10, 10.0, 5.0);
    let regions = vec![
        square("A", 0.0, 0.0, 10.0, 1),
        square("B", 10.0, 0.0, 10.0, 1),
        square("C", 20.0, 0.0, 10.0, 1),
    ];
    let config = native_lambert().exclusion_list(["B"]).build().unwrap();
    let report = BatchRunner::new(config).run(&heights, regions).unwrap();

    assert_eq!(report.filtered_total, 2);
    assert_eq!(ids(&report), vec!["A", "C"]);
}

#[test]
fn bounded_concurrency_keeps_batch_order() {
    let heights = lambert_heights(10, 10, 10.0, 5.0);
    let config = native_lambert().concurrency(Some(2)).build().unwrap();
    let report = BatchRunner::new(config).run(&heights, strip_regions(10)).unwrap();

    let expected: Vec<String> = (0..10).map(|i| format!("R{}", i)).collect();
    assert_eq!(ids(&report), expected);
}

#[test]
fn progress_sees_every_region() {
    let heights = lambert_heights(10, 10, 10.0, 5.0);
    let count = std::sync::atomic::AtomicUsize::new(0);
    let report = BatchRunner::new(native_lambert().build().unwrap())
        .run_with_progress(&heights, strip_regions(5), |_| {
            count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(count.into_inner(), report.outcomes.len());
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn oversized_region_fails_alone() {
    let heights = lambert_heights(100, 100, 10.0, 5.0);
    let config = native_lambert().pixel_count_ceiling(5000).build().unwrap();
    let regions = vec![
        square("SMALL", 0.0, 0.0, 100.0, 1),
        square("LARGE", 0.0, 0.0, 1000.0, 1),
        square("NEXT", 100.0, 0.0, 100.0, 1),
    ];
    let report = BatchRunner::new(config).run(&heights, regions).unwrap();

    assert_eq!(ids(&report), vec!["SMALL", "LARGE", "NEXT"]);
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0.as_str(), "LARGE");
    assert_eq!(failures[0].1.kind(), "compute_limit_exceeded");
    assert_eq!(report.records().count(), 2);
    assert!(report.records().all(|r| r.canopy_proportion == Some(100.0)));
}

#[test]
fn slow_region_times_out_alone() {
    let heights = lambert_heights(2000, 2000, 1.0, 5.0);
    let config = native_lambert()
        .region_timeout_secs(Some(0.001))
        .concurrency(Some(1))
        .build()
        .unwrap();
    let regions = vec![
        square("TINY", 0.0, 0.0, 1.0, 1),
        square("HUGE", 0.0, 0.0, 2000.0, 1),
        square("AFTER", 1.0, 0.0, 1.0, 1),
    ];
    let report = BatchRunner::new(config).run(&heights, regions).unwrap();

    assert_eq!(ids(&report), vec!["TINY", "HUGE", "AFTER"]);
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0.as_str(), "HUGE");
    assert!(matches!(failures[0].1, AggregationError::Timeout(_)));
    assert_eq!(failures[0].1.kind(), "timeout");
    assert_eq!(report.records().count(), 2);
    assert!(report.records().all(|r| r.canopy_proportion == Some(100.0)));
}

#[test]
fn far_apart_regions_stay_within_the_ceiling() {
    let heights = lambert_heights(100, 100, 10.0, 5.0);
    let config = native_lambert().pixel_count_ceiling(4).build().unwrap();
    let regions = vec![
        square("SW", 0.0, 0.0, 20.0, 1),
        square("NE", 980.0, 980.0, 20.0, 1),
    ];
    let report = BatchRunner::new(config).run(&heights, regions).unwrap();

    assert_eq!(report.failure_count(), 0);
    assert_eq!(report.working_cells(), 8);
    assert!(report.outcomes.iter().all(|o| o.grid().map(|g| g.len()) == Some(4)));
    assert!(report.records().all(|r| r.canopy_proportion == Some(100.0)));
}

#[test]
fn region_ceiling_is_per_region() {
    let heights = lambert_heights(100, 100, 10.0, 5.0);
    let mask = canopy_mask(&heights, &MaskParams::default()).unwrap();
    let areas = pixel_area(&mask.grid_spec(), AreaMode::Uniform).unwrap();
    let aggregator = ZonalAggregator::new(&mask, &areas, 5000).unwrap();

    let small = square("SMALL", 0.0, 0.0, 100.0, 1);
    let large = square("LARGE", 0.0, 0.0, 1000.0, 1);
    assert!(aggregator.aggregate(&small.geometry, &Budget::unlimited()).is_ok());
    let err = aggregator.aggregate(&large.geometry, &Budget::unlimited()).unwrap_err();
    assert_eq!(err.kind(), "compute_limit_exceeded");
}

#[test]
fn mismatched_mask_and_area_grids_are_fatal() {
    let heights = lambert_heights(10, 10, 10.0, 5.0);
    let mask = canopy_mask(&heights, &MaskParams::default()).unwrap();

    let mut shifted = mask.grid_spec();
    shifted.transform = GeoTransform::new(5.0, 100.0, 10.0, -10.0);
    let areas = pixel_area(&shifted, AreaMode::Uniform).unwrap();

    let err = ZonalAggregator::new(&mask, &areas, u64::MAX).unwrap_err();
    assert!(matches!(err, Error::CrsMismatch(..)));
}

#[test]
fn unsupported_region_crs_is_fatal() {
    let heights = lambert_heights(10, 10, 10.0, 5.0);
    let config = native_lambert().region_crs(CRS::from_epsg(32630)).build().unwrap();
    let err = BatchRunner::new(config)
        .run(&heights, vec![square("A", 0.0, 0.0, 10.0, 1)])
        .unwrap_err();
    assert!(matches!(err, RunError::Core(Error::UnsupportedCrs(_))));
}

#[test]
fn uniform_area_on_geographic_grid_is_fatal() {
    let heights = geographic_heights(-91.87, 49.0, 0.01);
    let config = PipelineConfig::builder()
        .reproject(false)
        .area_mode(AreaMode::Uniform)
        .build()
        .unwrap();
    let err = BatchRunner::new(config)
        .run(&heights, vec![square("A", -91.87, 49.0, 0.01, 1)])
        .unwrap_err();
    assert!(matches!(err, RunError::Core(Error::InvalidParameter { name: "area_mode", .. })));
}

// ---------------------------------------------------------------------------
// Reprojection consistency
// ---------------------------------------------------------------------------

const GEO_RES: f64 = 1e-4;
const MARGIN: f64 = 0.005;

/// EPSG:4326 heights covering `[lon0, lon0 + size] × [lat0, lat0 + size]`
/// plus a margin, all canopy
fn geographic_heights(lon0: f64, lat0: f64, size: f64) -> Raster<f32> {
    let n = ((size + 2.0 * MARGIN) / GEO_RES).round() as usize;
    let mut r = Raster::filled(n, n, 12.0_f32);
    r.set_transform(GeoTransform::new(lon0 - MARGIN, lat0 + size + MARGIN, GEO_RES, -GEO_RES));
    r.set_crs(Some(CRS::wgs84()));
    r
}

/// Total km² of one geographic square under the native distortion-aware
/// path and under the reproject-then-uniform path
fn both_paths(lon0: f64, lat0: f64, size: f64) -> (f64, f64) {
    let heights = geographic_heights(lon0, lat0, size);
    let region = || vec![square("R", lon0, lat0, size, 64)];

    let native = PipelineConfig::builder()
        .reproject(false)
        .area_mode(AreaMode::DistortionAware)
        .build()
        .unwrap();
    let native = BatchRunner::new(native).run(&heights, region()).unwrap();
    assert_eq!(native.area_mode, AreaMode::DistortionAware);

    let projected = PipelineConfig::builder()
        .reproject(true)
        .target_crs(CRS::statistics_canada_lambert())
        .target_resolution_m(10.0)
        .area_mode(AreaMode::Uniform)
        .build()
        .unwrap();
    let projected = BatchRunner::new(projected).run(&heights, region()).unwrap();
    assert_eq!(projected.area_mode, AreaMode::Uniform);

    let total = |r: &BatchReport| r.records().next().unwrap().total_area_km2;
    (total(&native), total(&projected))
}

#[test]
fn area_modes_agree_on_standard_parallel() {
    let (native, projected) = both_paths(-91.87, 49.0, 0.05);
    assert!(native > 10.0 && native < 25.0, "native total {native}");
    assert!(
        (projected / native - 1.0).abs() < 0.01,
        "native {native} km², projected {projected} km²"
    );
}

#[test]
fn uniform_lambert_area_diverges_between_standard_parallels() {
    // Scale factor below 1 near the latitude of origin: uniform map area
    // underestimates ground area by roughly k²
    let (native, projected) = both_paths(-91.87, 63.39, 0.05);
    let ratio = projected / native;
    assert!(ratio < 0.97, "native {native} km², projected {projected} km²");
}
