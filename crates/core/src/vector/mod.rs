//! Regions: identified polygon footprints to aggregate over

use geo::{BoundingRect, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, equality-comparable region key (for example a census subdivision code).
///
/// Integer identifiers are normalised to their decimal text, so `3501005`,
/// `3501005.0` and `"3501005"` name the same region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawId", into = "String")]
pub struct RegionId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Float(f64),
    Text(String),
}

impl TryFrom<RawId> for RegionId {
    type Error = String;

    fn try_from(raw: RawId) -> Result<Self, Self::Error> {
        match raw {
            RawId::Int(v) => Ok(v.into()),
            RawId::Float(v) => RegionId::from_f64(v).ok_or_else(|| format!("{} is not an integer identifier", v)),
            RawId::Text(s) => Ok(s.into()),
        }
    }
}

impl RegionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_f64(v: f64) -> Option<Self> {
        if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 {
            Some(Self((v as i64).to_string()))
        } else {
            None
        }
    }

    /// Identifier from a JSON attribute value; `None` for null, booleans,
    /// containers, blank strings and non-integral numbers.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(Self::new(s.as_str())),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Some(v.into())
                } else if let Some(v) = n.as_u64() {
                    Some(Self(v.to_string()))
                } else {
                    n.as_f64().and_then(Self::from_f64)
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RegionId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<i64> for RegionId {
    fn from(v: i64) -> Self {
        Self(v.to_string())
    }
}

impl From<RegionId> for String {
    fn from(id: RegionId) -> Self {
        id.0
    }
}

/// A region to aggregate over.
///
/// The geometry is in whatever CRS the region source uses; it is never
/// mutated, only transformed into copies.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: RegionId,
    pub geometry: MultiPolygon<f64>,
}

impl Region {
    pub fn new(id: impl Into<RegionId>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            id: id.into(),
            geometry,
        }
    }

    pub fn from_polygon(id: impl Into<RegionId>, polygon: Polygon<f64>) -> Self {
        Self::new(id, MultiPolygon::new(vec![polygon]))
    }

    /// A region with no footprint (always aggregates to zero area)
    pub fn empty(id: impl Into<RegionId>) -> Self {
        Self::new(id, MultiPolygon::new(Vec::new()))
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.0.is_empty()
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use serde_json::json;

    #[test]
    fn test_region_id_normalisation() {
        assert_eq!(RegionId::from(3501005_i64), RegionId::from("3501005"));
        assert_eq!(RegionId::from(" 3501005 "), RegionId::from("3501005"));
        assert_eq!(RegionId::from_json(&json!(3501005.0)), Some(RegionId::from("3501005")));
        assert_eq!(RegionId::from_json(&json!("A12")), Some(RegionId::from("A12")));
        assert_eq!(RegionId::from_json(&json!(1.5)), None);
        assert_eq!(RegionId::from_json(&json!(null)), None);
        assert_eq!(RegionId::from_json(&json!("  ")), None);
    }

    #[test]
    fn test_region_id_deserializes_from_mixed_list() {
        let ids: Vec<RegionId> = serde_json::from_str(r#"["1001", 1002, 1003.0]"#).unwrap();
        assert_eq!(ids, vec!["1001".into(), "1002".into(), "1003".into()]);
        assert_eq!(serde_json::to_string(&ids[1]).unwrap(), "\"1002\"");
        assert!(serde_json::from_str::<RegionId>("2.5").is_err());
    }

    #[test]
    fn test_region_bounds() {
        let b = Region::from_polygon("b", polygon![(x: 5.0, y: -2.0), (x: 6.0, y: -2.0), (x: 6.0, y: 3.0)]);
        let r = b.bounding_rect().unwrap();
        assert_eq!((r.min().x, r.min().y, r.max().x, r.max().y), (5.0, -2.0, 6.0, 3.0));

        let empty = Region::empty("c");
        assert!(empty.is_empty());
        assert!(empty.bounding_rect().is_none());
    }
}
