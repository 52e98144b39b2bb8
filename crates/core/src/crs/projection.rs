//! Map projections used to georeference canopy grids.
//!
//! The [`Projection`] trait is the seam through which grids and region
//! footprints are moved between coordinate systems and through which the true
//! ground area of a grid cell is obtained. Two families are built in:
//!
//! - geographic longitude/latitude on an ellipsoid (EPSG:4326, EPSG:4269)
//! - ellipsoidal Lambert Conformal Conic with two standard parallels
//!   (Snyder 1987, USGS Prof. Paper 1395, pp. 104-110), including the
//!   Statistics Canada Lambert preset (EPSG:3347)
//!
//! Datum shifts are not applied: NAD83 and WGS84 coordinates are treated as
//! interchangeable, which holds to the metre level over North America.

use super::CRS;
use crate::error::{Error, Result};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};
use std::fmt;
use std::sync::Arc;

// ── Ellipsoids ───────────────────────────────────────────────────────────

/// Reference ellipsoid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis (m)
    pub semi_major: f64,
    /// Flattening
    pub flattening: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        semi_major: 6_378_137.0,
        flattening: 1.0 / 298.257_223_563,
    };

    pub const GRS80: Ellipsoid = Ellipsoid {
        semi_major: 6_378_137.0,
        flattening: 1.0 / 298.257_222_101,
    };

    /// First eccentricity squared
    pub fn e2(&self) -> f64 {
        2.0 * self.flattening - self.flattening * self.flattening
    }

    /// First eccentricity
    pub fn e(&self) -> f64 {
        self.e2().sqrt()
    }
}

// ── Projection seam ──────────────────────────────────────────────────────

/// A map projection between grid coordinates and geographic lon/lat degrees.
pub trait Projection: Send + Sync + fmt::Debug {
    /// CRS this projection implements
    fn crs(&self) -> CRS;

    /// Whether grid coordinates are longitude/latitude degrees
    fn is_geographic(&self) -> bool {
        false
    }

    /// Grid coordinates to (longitude, latitude) in degrees
    fn to_geographic(&self, x: f64, y: f64) -> (f64, f64);

    /// (longitude, latitude) in degrees to grid coordinates
    fn from_geographic(&self, lon: f64, lat: f64) -> (f64, f64);

    /// True ground area (m²) of a cell of size `dx` × `dy` grid units
    /// centred at grid coordinates (`x`, `y`).
    fn cell_ground_area(&self, x: f64, y: f64, dx: f64, dy: f64) -> f64;
}

/// Resolve a CRS to one of the built-in projections.
pub fn projection_for(crs: &CRS) -> Result<Arc<dyn Projection>> {
    match crs.epsg() {
        Some(4326) => Ok(Arc::new(Geographic::new(crs.clone(), Ellipsoid::WGS84))),
        Some(4269) => Ok(Arc::new(Geographic::new(crs.clone(), Ellipsoid::GRS80))),
        Some(3347) => Ok(Arc::new(LambertConformalConic::statistics_canada())),
        _ => Err(Error::UnsupportedCrs(crs.identifier())),
    }
}

// ── Geographic ───────────────────────────────────────────────────────────

/// Grid cell dimensions at a given latitude on the ellipsoid
#[derive(Debug, Clone, Copy)]
pub struct CellDimensions {
    /// East-West cell size in meters
    pub dx: f64,
    /// North-South cell size in meters
    pub dy: f64,
    /// Cell area in m²
    pub area: f64,
}

/// Compute cell dimensions at a given latitude for a geographic grid.
///
/// Uses the radius of curvature in the prime vertical (N) for the
/// East-West extent and the meridional radius (M) for the North-South one.
///
/// # Arguments
/// * `latitude_deg` - Latitude of the cell centre in degrees
/// * `d_lon` - Grid spacing in longitude (degrees)
/// * `d_lat` - Grid spacing in latitude (degrees)
/// * `ellipsoid` - Reference ellipsoid
pub fn cell_dimensions(
    latitude_deg: f64,
    d_lon: f64,
    d_lat: f64,
    ellipsoid: &Ellipsoid,
) -> CellDimensions {
    let lat = latitude_deg.to_radians();
    let a = ellipsoid.semi_major;
    let e2 = ellipsoid.e2();

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let w = 1.0 - e2 * sin_lat * sin_lat;

    // Radius of curvature in the prime vertical (N)
    let n = a / w.sqrt();

    // Radius of curvature in the meridional plane (M)
    let m = a * (1.0 - e2) / w.powf(1.5);

    let dx = (n * cos_lat * d_lon.to_radians()).abs();
    let dy = (m * d_lat.to_radians()).abs();

    CellDimensions { dx, dy, area: dx * dy }
}

/// Longitude/latitude in degrees on a reference ellipsoid
#[derive(Debug, Clone)]
pub struct Geographic {
    crs: CRS,
    ellipsoid: Ellipsoid,
}

impl Geographic {
    pub fn new(crs: CRS, ellipsoid: Ellipsoid) -> Self {
        Self { crs, ellipsoid }
    }

    pub fn wgs84() -> Self {
        Self::new(CRS::wgs84(), Ellipsoid::WGS84)
    }
}

impl Projection for Geographic {
    fn crs(&self) -> CRS {
        self.crs.clone()
    }

    fn is_geographic(&self) -> bool {
        true
    }

    fn to_geographic(&self, x: f64, y: f64) -> (f64, f64) {
        (x, y)
    }

    fn from_geographic(&self, lon: f64, lat: f64) -> (f64, f64) {
        (lon, lat)
    }

    fn cell_ground_area(&self, _x: f64, y: f64, dx: f64, dy: f64) -> f64 {
        cell_dimensions(y, dx, dy, &self.ellipsoid).area
    }
}

// ── Lambert Conformal Conic (2SP) ────────────────────────────────────────

/// Ellipsoidal Lambert Conformal Conic with two standard parallels.
///
/// Being conformal, the areal scale at a point is `k²`, so a cell of
/// `dx × dy` projected metres covers `dx·dy / k²` square metres of ground.
#[derive(Debug, Clone)]
pub struct LambertConformalConic {
    crs: CRS,
    ellipsoid: Ellipsoid,
    e: f64,
    /// Cone constant
    n: f64,
    /// a·F (Snyder eq. 15-10 scaled by the semi-major axis)
    a_f: f64,
    /// Radius at the latitude of origin
    rho0: f64,
    /// Central meridian (radians)
    lon0: f64,
    false_easting: f64,
    false_northing: f64,
}

impl LambertConformalConic {
    /// Build from standard parallels, origin and false offsets (degrees / metres).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        crs: CRS,
        ellipsoid: Ellipsoid,
        lat1_deg: f64,
        lat2_deg: f64,
        lat0_deg: f64,
        lon0_deg: f64,
        false_easting: f64,
        false_northing: f64,
    ) -> Result<Self> {
        if (lat1_deg + lat2_deg).abs() < 1e-10 {
            return Err(Error::InvalidParameter {
                name: "standard_parallels",
                value: format!("{}, {}", lat1_deg, lat2_deg),
                reason: "parallels must not be symmetric about the equator".into(),
            });
        }

        Ok(Self::build(
            crs,
            ellipsoid,
            lat1_deg,
            lat2_deg,
            lat0_deg,
            lon0_deg,
            false_easting,
            false_northing,
        ))
    }

    /// Statistics Canada Lambert (EPSG:3347): NAD83, parallels 49°N / 77°N,
    /// origin 63.390675°N 91.866667°W, false origin (6 200 000, 3 000 000).
    pub fn statistics_canada() -> Self {
        Self::build(
            CRS::statistics_canada_lambert(),
            Ellipsoid::GRS80,
            49.0,
            77.0,
            63.390675,
            -91.866_666_666_666_67,
            6_200_000.0,
            3_000_000.0,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        crs: CRS,
        ellipsoid: Ellipsoid,
        lat1_deg: f64,
        lat2_deg: f64,
        lat0_deg: f64,
        lon0_deg: f64,
        false_easting: f64,
        false_northing: f64,
    ) -> Self {
        let e = ellipsoid.e();
        let e2 = ellipsoid.e2();
        let (phi1, phi2, phi0) = (
            lat1_deg.to_radians(),
            lat2_deg.to_radians(),
            lat0_deg.to_radians(),
        );

        let m1 = m_factor(phi1, e2);
        let m2 = m_factor(phi2, e2);
        let t1 = t_factor(phi1, e);
        let t2 = t_factor(phi2, e);

        // Snyder eqs. 15-8, 15-10, 15-7a
        let n = if (lat1_deg - lat2_deg).abs() < 1e-10 {
            phi1.sin()
        } else {
            (m1.ln() - m2.ln()) / (t1.ln() - t2.ln())
        };
        let a_f = ellipsoid.semi_major * m1 / (n * t1.powf(n));
        let rho0 = a_f * t_factor(phi0, e).powf(n);

        Self {
            crs,
            ellipsoid,
            e,
            n,
            a_f,
            rho0,
            lon0: lon0_deg.to_radians(),
            false_easting,
            false_northing,
        }
    }

    /// Point scale factor `k` at a latitude (degrees). Equal to 1 on the
    /// standard parallels, below 1 between them, above 1 outside.
    pub fn scale_factor(&self, lat_deg: f64) -> f64 {
        let phi = lat_deg.to_radians();
        let rho = self.a_f * t_factor(phi, self.e).powf(self.n);
        rho * self.n / (self.ellipsoid.semi_major * m_factor(phi, self.ellipsoid.e2()))
    }
}

impl Projection for LambertConformalConic {
    fn crs(&self) -> CRS {
        self.crs.clone()
    }

    fn to_geographic(&self, x: f64, y: f64) -> (f64, f64) {
        let sign = self.n.signum();
        let dx = x - self.false_easting;
        let dy = self.rho0 - (y - self.false_northing);
        let rho = sign * (dx * dx + dy * dy).sqrt();

        let theta = (sign * dx).atan2(sign * dy);
        let lon = theta / self.n + self.lon0;

        if rho.abs() < 1e-12 {
            return (lon.to_degrees(), sign * 90.0);
        }

        let t = (rho / self.a_f).powf(1.0 / self.n);
        let half_e = self.e / 2.0;
        let mut phi = FRAC_PI_2 - 2.0 * t.atan();
        // Snyder eq. 7-9, converges in a handful of iterations
        for _ in 0..15 {
            let es = self.e * phi.sin();
            let next = FRAC_PI_2 - 2.0 * (t * ((1.0 - es) / (1.0 + es)).powf(half_e)).atan();
            let done = (next - phi).abs() < 1e-12;
            phi = next;
            if done {
                break;
            }
        }

        (normalize_lon(lon).to_degrees(), phi.to_degrees())
    }

    fn from_geographic(&self, lon: f64, lat: f64) -> (f64, f64) {
        let phi = lat.to_radians();
        let rho = self.a_f * t_factor(phi, self.e).powf(self.n);
        let theta = self.n * normalize_lon(lon.to_radians() - self.lon0);

        let x = self.false_easting + rho * theta.sin();
        let y = self.false_northing + self.rho0 - rho * theta.cos();
        (x, y)
    }

    fn cell_ground_area(&self, x: f64, y: f64, dx: f64, dy: f64) -> f64 {
        let (_, lat) = self.to_geographic(x, y);
        let k = self.scale_factor(lat);
        (dx * dy).abs() / (k * k)
    }
}

/// Snyder eq. 14-15
fn m_factor(phi: f64, e2: f64) -> f64 {
    let s = phi.sin();
    phi.cos() / (1.0 - e2 * s * s).sqrt()
}

/// Snyder eq. 15-9
fn t_factor(phi: f64, e: f64) -> f64 {
    let es = e * phi.sin();
    (FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
}

/// Wrap a longitude difference into [-π, π]
fn normalize_lon(lon: f64) -> f64 {
    let mut l = lon;
    while l > PI {
        l -= 2.0 * PI;
    }
    while l < -PI {
        l += 2.0 * PI;
    }
    l
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lcc_scale_is_unity_on_standard_parallels() {
        let lcc = LambertConformalConic::statistics_canada();
        assert_relative_eq!(lcc.scale_factor(49.0), 1.0, epsilon = 1e-9);
        assert_relative_eq!(lcc.scale_factor(77.0), 1.0, epsilon = 1e-9);
        assert!(lcc.scale_factor(63.39) < 0.975);
        assert!(lcc.scale_factor(43.7) > 1.02);
    }

    #[test]
    fn test_lcc_origin_maps_to_false_origin() {
        let lcc = LambertConformalConic::statistics_canada();
        let (x, y) = lcc.from_geographic(-91.866_666_666_666_67, 63.390675);
        assert_relative_eq!(x, 6_200_000.0, epsilon = 1e-6);
        assert_relative_eq!(y, 3_000_000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_lcc_toronto() {
        let lcc = LambertConformalConic::statistics_canada();
        let (x, y) = lcc.from_geographic(-79.38, 43.65);
        assert!((x - 7_225_147.84).abs() < 1.0, "easting {x}");
        assert!((y - 928_393.47).abs() < 1.0, "northing {y}");
    }

    #[test]
    fn test_lcc_roundtrip() {
        let lcc = LambertConformalConic::statistics_canada();
        for &(lon, lat) in &[(-79.38, 43.65), (-123.1, 49.25), (-68.5, 63.75), (-110.0, 80.0)] {
            let (x, y) = lcc.from_geographic(lon, lat);
            let (lon2, lat2) = lcc.to_geographic(x, y);
            assert_relative_eq!(lon2, lon, epsilon = 1e-9);
            assert_relative_eq!(lat2, lat, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_lcc_rejects_symmetric_parallels() {
        let result = LambertConformalConic::new(
            CRS::from_proj("+proj=lcc"),
            Ellipsoid::GRS80,
            30.0,
            -30.0,
            0.0,
            0.0,
            0.0,
            0.0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_lcc_custom_matches_preset() {
        let custom = LambertConformalConic::new(
            CRS::statistics_canada_lambert(),
            Ellipsoid::GRS80,
            49.0,
            77.0,
            63.390675,
            -91.866_666_666_666_67,
            6_200_000.0,
            3_000_000.0,
        )
        .unwrap();
        let preset = LambertConformalConic::statistics_canada();
        let a = custom.from_geographic(-100.0, 55.0);
        let b = preset.from_geographic(-100.0, 55.0);
        assert_relative_eq!(a.0, b.0, epsilon = 1e-6);
        assert_relative_eq!(a.1, b.1, epsilon = 1e-6);
    }

    #[test]
    fn test_geographic_cell_area_shrinks_poleward() {
        let geo = Geographic::wgs84();
        let equator = geo.cell_ground_area(0.0, 0.0, 1.0, 1.0);
        let sixty = geo.cell_ground_area(0.0, 60.0, 1.0, 1.0);
        // One square degree at the equator is ~12 308 km²
        assert!((equator / 1e6 - 12_308.0).abs() < 15.0, "{equator}");
        assert_relative_eq!(sixty / equator, 0.5, epsilon = 0.01);
    }

    #[test]
    fn test_projection_registry() {
        assert!(projection_for(&CRS::wgs84()).unwrap().is_geographic());
        assert!(projection_for(&CRS::nad83()).unwrap().is_geographic());
        assert!(!projection_for(&CRS::statistics_canada_lambert()).unwrap().is_geographic());
        assert!(matches!(
            projection_for(&CRS::from_epsg(32630)),
            Err(Error::UnsupportedCrs(_))
        ));
    }
}
