//! Per-region metrics records

use crate::error::AggregationError;
use crate::statistics::ZonalAreas;
use canopy_core::RegionId;

const M2_PER_KM2: f64 = 1_000_000.0;

/// Relative slack before canopy > total counts as a violation
const INVARIANT_TOLERANCE: f64 = 1e-9;

/// One output row: identifier, areas in km² and canopy percentage
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRecord {
    pub id: RegionId,
    pub total_area_km2: f64,
    pub canopy_area_km2: f64,
    /// `canopy / total × 100`; `None` when the region has no area
    pub canopy_proportion: Option<f64>,
}

impl MetricsRecord {
    /// Zero total area: kept in the output, filtered downstream
    pub fn is_degenerate(&self) -> bool {
        self.canopy_proportion.is_none()
    }
}

/// Convert aggregated m² into a metrics record.
///
/// A zero total yields a `None` proportion rather than a division error.
/// Canopy area above total area is refused: it only happens when the mask
/// and area grids disagree.
pub fn assemble(id: RegionId, areas: &ZonalAreas) -> Result<MetricsRecord, AggregationError> {
    let total = areas.total_area_m2;
    let canopy = areas.canopy_area_m2;

    if canopy > total * (1.0 + INVARIANT_TOLERANCE) {
        return Err(AggregationError::InvariantViolation {
            total_m2: total,
            canopy_m2: canopy,
        });
    }

    let total_area_km2 = total / M2_PER_KM2;
    let canopy_area_km2 = canopy.min(total) / M2_PER_KM2;
    let canopy_proportion = if total > 0.0 {
        Some(canopy_area_km2 / total_area_km2 * 100.0)
    } else {
        None
    };

    Ok(MetricsRecord {
        id,
        total_area_km2,
        canopy_area_km2,
        canopy_proportion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn areas(total: f64, canopy: f64) -> ZonalAreas {
        ZonalAreas {
            total_area_m2: total,
            canopy_area_m2: canopy,
            ..Default::default()
        }
    }

    #[test]
    fn test_units_and_percentage() {
        let r = assemble("A".into(), &areas(4_000_000.0, 1_000_000.0)).unwrap();
        assert_relative_eq!(r.total_area_km2, 4.0);
        assert_relative_eq!(r.canopy_area_km2, 1.0);
        assert_relative_eq!(r.canopy_proportion.unwrap(), 25.0);
        assert!(!r.is_degenerate());
    }

    #[test]
    fn test_zero_total_is_null_proportion() {
        let r = assemble("A".into(), &areas(0.0, 0.0)).unwrap();
        assert_eq!(r.canopy_proportion, None);
        assert!(r.is_degenerate());
    }

    #[test]
    fn test_canopy_above_total_is_a_violation() {
        let err = assemble("A".into(), &areas(100.0, 150.0)).unwrap_err();
        assert!(matches!(err, AggregationError::InvariantViolation { .. }));
    }

    #[test]
    fn test_rounding_noise_tolerated() {
        let total = 1_234_567.0;
        let r = assemble("A".into(), &areas(total, total * (1.0 + 1e-12))).unwrap();
        assert_relative_eq!(r.canopy_proportion.unwrap(), 100.0);
    }
}
