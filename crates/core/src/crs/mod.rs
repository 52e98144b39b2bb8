//! Coordinate Reference System handling

mod projection;
mod transform;

pub use projection::{
    cell_dimensions, projection_for, CellDimensions, Ellipsoid, Geographic,
    LambertConformalConic, Projection,
};
pub use transform::CoordTransform;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coordinate Reference System representation
///
/// Serialized as its identifier string (`"EPSG:3347"`, a PROJ string or WKT).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CRS {
    /// WKT representation
    wkt: Option<String>,
    /// EPSG code if known
    epsg: Option<u32>,
    /// PROJ string if available
    proj: Option<String>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            wkt: None,
            epsg: Some(code),
            proj: None,
        }
    }

    /// Create a CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            wkt: Some(wkt.into()),
            epsg: None,
            proj: None,
        }
    }

    /// Create a CRS from a PROJ string
    pub fn from_proj(proj: impl Into<String>) -> Self {
        Self {
            wkt: None,
            epsg: None,
            proj: Some(proj.into()),
        }
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// NAD83 geographic CRS (EPSG:4269)
    pub fn nad83() -> Self {
        Self::from_epsg(4269)
    }

    /// Statistics Canada Lambert (EPSG:3347)
    pub fn statistics_canada_lambert() -> Self {
        Self::from_epsg(3347)
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get WKT representation
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// Get PROJ string
    pub fn proj(&self) -> Option<&str> {
        self.proj.as_deref()
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }

        // Textual comparison, imperfect for WKT
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return a == b;
        }

        if let (Some(a), Some(b)) = (&self.proj, &other.proj) {
            return a == b;
        }

        false
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(proj) = &self.proj {
            return proj.clone();
        }
        if let Some(wkt) = &self.wkt {
            return format!("WKT:{}", wkt.chars().take(50).collect::<String>());
        }
        "Unknown".to_string()
    }
}

impl FromStr for CRS {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();

        if let Some(code) = upper.strip_prefix("EPSG:") {
            return code
                .trim()
                .parse::<u32>()
                .map(CRS::from_epsg)
                .map_err(|_| Error::UnsupportedCrs(trimmed.to_string()));
        }
        if trimmed.starts_with("+proj") {
            return Ok(CRS::from_proj(trimmed));
        }
        if trimmed.contains('[') {
            return Ok(CRS::from_wkt(trimmed));
        }
        if let Ok(code) = trimmed.parse::<u32>() {
            return Ok(CRS::from_epsg(code));
        }

        Err(Error::UnsupportedCrs(trimmed.to_string()))
    }
}

impl TryFrom<String> for CRS {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CRS> for String {
    fn from(crs: CRS) -> Self {
        match (crs.epsg, crs.proj, crs.wkt) {
            (Some(code), _, _) => format!("EPSG:{}", code),
            (None, Some(proj), _) => proj,
            (None, None, Some(wkt)) => wkt,
            (None, None, None) => "Unknown".to_string(),
        }
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for CRS {
    fn default() -> Self {
        Self::wgs84()
    }
}
