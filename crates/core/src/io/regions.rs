//! Region loading from GeoJSON FeatureCollections

use crate::error::{Error, Result};
use crate::vector::{Region, RegionId};
use geo::{Geometry, MultiPolygon};
use geojson::{feature::Id, Feature, GeoJson};
use std::path::Path;

/// Read regions from a GeoJSON file, keyed by the `id_field` property
pub fn read_regions_geojson<P: AsRef<Path>>(path: P, id_field: &str) -> Result<Vec<Region>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    regions_from_geojson_str(&text, id_field)
}

/// Parse regions from GeoJSON text.
///
/// Accepts a FeatureCollection or a single Feature. The identifier comes
/// from the `id_field` property and falls back to the feature id. A null
/// geometry yields an empty region.
pub fn regions_from_geojson_str(text: &str, id_field: &str) -> Result<Vec<Region>> {
    let features = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(f) => vec![f],
        GeoJson::Geometry(_) => {
            return Err(Error::GeoJson(
                "expected a FeatureCollection, found a bare geometry".into(),
            ))
        }
    };

    features
        .into_iter()
        .enumerate()
        .map(|(index, feature)| region_from_feature(index, feature, id_field))
        .collect()
}

fn region_from_feature(index: usize, feature: Feature, id_field: &str) -> Result<Region> {
    let id = feature
        .property(id_field)
        .and_then(RegionId::from_json)
        .or_else(|| match &feature.id {
            Some(Id::String(s)) if !s.trim().is_empty() => Some(RegionId::new(s.as_str())),
            Some(Id::Number(n)) => RegionId::from_json(&serde_json::Value::Number(n.clone())),
            _ => None,
        })
        .ok_or_else(|| Error::MissingAttribute {
            index,
            field: id_field.to_string(),
        })?;

    let Some(geometry) = feature.geometry else {
        return Ok(Region::empty(id));
    };

    let geometry: Geometry<f64> = geometry
        .value
        .try_into()
        .map_err(|e: geojson::Error| Error::InvalidGeometry {
            id: id.to_string(),
            reason: e.to_string(),
        })?;

    let multi = match geometry {
        Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        Geometry::MultiPolygon(mp) => mp,
        Geometry::GeometryCollection(gc) => {
            let mut polygons = Vec::new();
            for g in gc.0 {
                match g {
                    Geometry::Polygon(p) => polygons.push(p),
                    Geometry::MultiPolygon(mp) => polygons.extend(mp.0),
                    other => return Err(not_areal(&id, &other)),
                }
            }
            MultiPolygon::new(polygons)
        }
        other => return Err(not_areal(&id, &other)),
    };

    Ok(Region::new(id, multi))
}

fn not_areal(id: &RegionId, geometry: &Geometry<f64>) -> Error {
    let kind = match geometry {
        Geometry::Point(_) => "Point",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::LineString(_) => "LineString",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::Line(_) => "Line",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
        _ => "non-polygonal geometry",
    };
    Error::InvalidGeometry {
        id: id.to_string(),
        reason: format!("{} has no area", kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const COLLECTION: &str = r#"{
      "type": "FeatureCollection",
      "features": [
        {"type": "Feature", "properties": {"CSDUID": "3501005", "CSDNAME": "South Glengarry"},
         "geometry": {"type": "Polygon", "coordinates": [[[-74.6, 45.0], [-74.4, 45.0], [-74.4, 45.2], [-74.6, 45.0]]]}},
        {"type": "Feature", "properties": {"CSDUID": 3501007},
         "geometry": {"type": "MultiPolygon", "coordinates": [
            [[[-74.9, 45.0], [-74.8, 45.0], [-74.8, 45.1], [-74.9, 45.0]]],
            [[[-74.7, 45.0], [-74.65, 45.0], [-74.65, 45.05], [-74.7, 45.0]]]]}},
        {"type": "Feature", "id": "fallback", "properties": {}, "geometry": null}
      ]
    }"#;

    #[test]
    fn test_parse_collection() {
        let regions = regions_from_geojson_str(COLLECTION, "CSDUID").unwrap();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].id.as_str(), "3501005");
        assert_eq!(regions[1].id.as_str(), "3501007");
        assert_eq!(regions[1].geometry.0.len(), 2);
        assert_eq!(regions[2].id.as_str(), "fallback");
        assert!(regions[2].is_empty());
    }

    #[test]
    fn test_missing_identifier_is_an_error() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"NAME": "x"}, "geometry": null}]}"#;
        assert!(matches!(
            regions_from_geojson_str(text, "CSDUID"),
            Err(Error::MissingAttribute { index: 0, .. })
        ));
    }

    #[test]
    fn test_point_geometry_rejected() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"CSDUID": "1"},
             "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}}]}"#;
        assert!(matches!(
            regions_from_geojson_str(text, "CSDUID"),
            Err(Error::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_read_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(COLLECTION.as_bytes()).unwrap();
        let regions = read_regions_geojson(tmp.path(), "CSDUID").unwrap();
        assert_eq!(regions.len(), 3);
    }
}
