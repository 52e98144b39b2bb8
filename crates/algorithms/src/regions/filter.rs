//! Exclusion of regions by identifier

use canopy_core::{Region, RegionId};
use std::collections::HashSet;

/// Drop every region whose identifier is in `excluded`, keeping the
/// relative order of the rest. Identifiers that match no region are ignored.
pub fn exclude_regions(regions: Vec<Region>, excluded: &[RegionId]) -> Vec<Region> {
    if excluded.is_empty() {
        return regions;
    }
    let excluded: HashSet<&RegionId> = excluded.iter().collect();
    regions
        .into_iter()
        .filter(|r| !excluded.contains(&r.id))
        .collect()
}
