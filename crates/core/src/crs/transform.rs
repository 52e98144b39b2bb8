//! Point, bounds and geometry transforms between two CRSs

use super::{projection_for, Projection, CRS};
use crate::error::Result;
use geo::{Coord, MapCoords, MultiPolygon, Rect};
use std::sync::Arc;

/// A transform from one CRS to another.
///
/// Equivalent CRSs yield the identity without consulting the projection
/// registry, so grids in CRSs without a built-in projection can still be
/// used as long as nothing needs to move between systems.
#[derive(Debug, Clone)]
pub struct CoordTransform {
    source: CRS,
    target: CRS,
    steps: Option<(Arc<dyn Projection>, Arc<dyn Projection>)>,
}

impl CoordTransform {
    /// Build a transform from `source` coordinates to `target` coordinates.
    pub fn new(source: &CRS, target: &CRS) -> Result<Self> {
        let steps = if source.is_equivalent(target) {
            None
        } else {
            Some((projection_for(source)?, projection_for(target)?))
        };
        Ok(Self {
            source: source.clone(),
            target: target.clone(),
            steps,
        })
    }

    /// Identity transform within a single CRS
    pub fn identity(crs: &CRS) -> Self {
        Self {
            source: crs.clone(),
            target: crs.clone(),
            steps: None,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.steps.is_none()
    }

    pub fn source(&self) -> &CRS {
        &self.source
    }

    pub fn target(&self) -> &CRS {
        &self.target
    }

    /// The reverse transform
    pub fn inverse(&self) -> Self {
        Self {
            source: self.target.clone(),
            target: self.source.clone(),
            steps: self
                .steps
                .as_ref()
                .map(|(from, to)| (Arc::clone(to), Arc::clone(from))),
        }
    }

    /// Transform a single point
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        match &self.steps {
            None => (x, y),
            Some((from, to)) => {
                let (lon, lat) = from.to_geographic(x, y);
                to.from_geographic(lon, lat)
            }
        }
    }

    /// Transform a bounding rectangle.
    ///
    /// Each edge is sampled at `densify + 1` points so curved images of
    /// straight edges (parallels under a conic projection) are enclosed.
    pub fn transform_rect(&self, rect: Rect<f64>, densify: usize) -> Rect<f64> {
        if self.is_identity() {
            return rect;
        }

        let (min, max) = (rect.min(), rect.max());
        let steps = densify.max(1);
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;

        for i in 0..=steps {
            let f = i as f64 / steps as f64;
            let x = min.x + f * (max.x - min.x);
            let y = min.y + f * (max.y - min.y);
            for (px, py) in [(x, min.y), (x, max.y), (min.x, y), (max.x, y)] {
                let (tx, ty) = self.apply(px, py);
                min_x = min_x.min(tx);
                min_y = min_y.min(ty);
                max_x = max_x.max(tx);
                max_y = max_y.max(ty);
            }
        }

        Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y })
    }

    /// Transform every vertex of a multipolygon.
    ///
    /// Only vertices move; edges stay straight in the target CRS, so
    /// sparsely digitised boundaries should be densified upstream.
    pub fn transform_multipolygon(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        if self.is_identity() {
            return geometry.clone();
        }
        geometry.map_coords(|c| {
            let (x, y) = self.apply(c.x, c.y);
            Coord { x, y }
        })
    }
}
