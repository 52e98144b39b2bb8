//! Run parameters
//!
//! One configuration drives every variant of the pipeline: which regions,
//! which exclusions, whether the heights are reprojected before area
//! computation. Values come from an optional JSON file, then explicit
//! overrides, and are validated once by [`PipelineBuilder::build`].

use crate::canopy::AreaMode;
use canopy_core::{Error, RegionId, Result, CRS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Validated parameters for one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Minimum canopy height in metres (inclusive)
    pub threshold_meters: f64,
    /// CRS of the working grid when reprojecting
    pub target_crs: CRS,
    /// Working grid cell size in target CRS units when reprojecting
    pub target_resolution_m: f64,
    /// Resample heights onto a `target_crs` grid before masking
    pub reproject: bool,
    pub area_mode: AreaMode,
    pub batch_size: usize,
    pub batch_number: usize,
    /// Region identifiers dropped before batching
    pub exclusion_list: Vec<RegionId>,
    /// Most cells one region may touch
    pub pixel_count_ceiling: u64,
    /// Per-region time budget
    pub region_timeout_secs: Option<f64>,
    /// Worker threads for region aggregation; `None` uses all cores
    pub concurrency: Option<usize>,
    /// CRS of the region geometries
    pub region_crs: CRS,
    /// CRS of the height raster when the file does not declare one
    pub height_crs: Option<CRS>,
    /// Attribute holding the region identifier
    pub id_field: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold_meters: 2.0,
            target_crs: CRS::statistics_canada_lambert(),
            target_resolution_m: 1.0,
            reproject: true,
            area_mode: AreaMode::DistortionAware,
            batch_size: 50,
            batch_number: 0,
            exclusion_list: Vec::new(),
            pixel_count_ceiling: 10_000_000_000_000,
            region_timeout_secs: None,
            concurrency: None,
            region_crs: CRS::wgs84(),
            height_crs: None,
            id_field: "CSDUID".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| Error::Other(format!("invalid pipeline configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn region_timeout(&self) -> Option<Duration> {
        self.region_timeout_secs.map(Duration::from_secs_f64)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.threshold_meters.is_finite() {
            return Err(invalid("threshold_meters", self.threshold_meters, "must be finite"));
        }
        if !(self.target_resolution_m.is_finite() && self.target_resolution_m > 0.0) {
            return Err(invalid(
                "target_resolution_m",
                self.target_resolution_m,
                "must be a positive finite number",
            ));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", 0, "must be a positive integer"));
        }
        if self.pixel_count_ceiling == 0 {
            return Err(invalid("pixel_count_ceiling", 0, "must be a positive integer"));
        }
        if let Some(secs) = self.region_timeout_secs {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(invalid("region_timeout_secs", secs, "must be a positive number of seconds"));
            }
        }
        if self.concurrency == Some(0) {
            return Err(invalid("concurrency", 0, "must be at least 1"));
        }
        if self.id_field.trim().is_empty() {
            return Err(invalid("id_field", "\"\"", "must name a region attribute"));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, value: impl ToString, reason: &str) -> Error {
    Error::InvalidParameter {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Builder over [`PipelineConfig`]; starts from the defaults or a loaded file
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn threshold_meters(mut self, v: f64) -> Self {
        self.config.threshold_meters = v;
        self
    }

    pub fn target_crs(mut self, crs: CRS) -> Self {
        self.config.target_crs = crs;
        self
    }

    pub fn target_resolution_m(mut self, v: f64) -> Self {
        self.config.target_resolution_m = v;
        self
    }

    pub fn reproject(mut self, v: bool) -> Self {
        self.config.reproject = v;
        self
    }

    pub fn area_mode(mut self, mode: AreaMode) -> Self {
        self.config.area_mode = mode;
        self
    }

    pub fn batch_size(mut self, v: usize) -> Self {
        self.config.batch_size = v;
        self
    }

    pub fn batch_number(mut self, v: usize) -> Self {
        self.config.batch_number = v;
        self
    }

    pub fn exclusion_list<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<RegionId>,
    {
        self.config.exclusion_list = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn pixel_count_ceiling(mut self, v: u64) -> Self {
        self.config.pixel_count_ceiling = v;
        self
    }

    pub fn region_timeout_secs(mut self, v: Option<f64>) -> Self {
        self.config.region_timeout_secs = v;
        self
    }

    pub fn concurrency(mut self, v: Option<usize>) -> Self {
        self.config.concurrency = v;
        self
    }

    pub fn region_crs(mut self, crs: CRS) -> Self {
        self.config.region_crs = crs;
        self
    }

    pub fn height_crs(mut self, crs: Option<CRS>) -> Self {
        self.config.height_crs = crs;
        self
    }

    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.config.id_field = field.into();
        self
    }

    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = PipelineConfig::builder().build().unwrap();
        assert_eq!(c.threshold_meters, 2.0);
        assert_eq!(c.target_crs.epsg(), Some(3347));
        assert_eq!(c.target_resolution_m, 1.0);
        assert!(c.reproject);
        assert_eq!(c.area_mode, AreaMode::DistortionAware);
        assert_eq!(c.batch_size, 50);
        assert_eq!(c.batch_number, 0);
        assert!(c.exclusion_list.is_empty());
        assert_eq!(c.pixel_count_ceiling, 10_000_000_000_000);
        assert_eq!(c.id_field, "CSDUID");
        assert!(c.region_timeout().is_none());
    }

    #[test]
    fn test_partial_json_file() {
        let c = PipelineConfig::from_json_str(
            r#"{
                "batch_number": 3,
                "reproject": false,
                "area_mode": "uniform",
                "target_crs": "EPSG:3347",
                "exclusion_list": ["3501005", 3501007],
                "region_timeout_secs": 30
            }"#,
        )
        .unwrap();
        assert_eq!(c.batch_number, 3);
        assert!(!c.reproject);
        assert_eq!(c.area_mode, AreaMode::Uniform);
        assert_eq!(c.exclusion_list, vec![RegionId::from("3501005"), RegionId::from("3501007")]);
        assert_eq!(c.region_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(c.batch_size, 50);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"batch_size": 25, "id_field": "DGUID"}"#).unwrap();

        let c = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(c.batch_size, 25);
        assert_eq!(c.id_field, "DGUID");
        assert!(PipelineConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(PipelineConfig::from_json_str(r#"{"batchsize": 10}"#).is_err());
    }

    #[test]
    fn test_validation() {
        assert!(PipelineConfig::builder().batch_size(0).build().is_err());
        assert!(PipelineConfig::builder().target_resolution_m(-1.0).build().is_err());
        assert!(PipelineConfig::builder().threshold_meters(f64::INFINITY).build().is_err());
        assert!(PipelineConfig::builder().pixel_count_ceiling(0).build().is_err());
        assert!(PipelineConfig::builder().concurrency(Some(0)).build().is_err());
        assert!(PipelineConfig::builder().region_timeout_secs(Some(0.0)).build().is_err());
        assert!(PipelineConfig::builder().id_field(" ").build().is_err());
    }

    #[test]
    fn test_builder_overrides_file() {
        let file = PipelineConfig::from_json_str(r#"{"batch_number": 3}"#).unwrap();
        let c = PipelineBuilder::from_config(file)
            .batch_number(4)
            .exclusion_list(["A", "B"])
            .build()
            .unwrap();
        assert_eq!(c.batch_number, 4);
        assert_eq!(c.exclusion_list.len(), 2);
    }
}
