//! CSV output for batch reports

use anyhow::{Context, Result};
use canopy_algorithms::pipeline::BatchReport;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Output columns after the identifier column
pub const METRIC_COLUMNS: [&str; 3] = ["total_area_km2", "canopy_area_km2", "canopy_proportion"];

/// `canopy_cover_batch_<n>.csv`
pub fn default_output(batch_number: usize) -> PathBuf {
    PathBuf::from(format!("canopy_cover_batch_{}.csv", batch_number))
}

/// Sibling file for failed regions: `<stem>_failures.csv`
pub fn failures_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "canopy_cover".to_string());
    output.with_file_name(format!("{}_failures.csv", stem))
}

/// Write one row per completed region. A missing proportion is an empty field.
pub fn write_records(path: &Path, id_field: &str, report: &BatchReport) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header = vec![id_field];
    header.extend(METRIC_COLUMNS);
    writer.write_record(&header)?;

    let mut count = 0;
    for record in report.records() {
        writer.write_record([
            record.id.to_string(),
            record.total_area_km2.to_string(),
            record.canopy_area_km2.to_string(),
            record
                .canopy_proportion
                .map(|p| p.to_string())
                .unwrap_or_default(),
        ])?;
        count += 1;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(count)
}

/// Write `<id>,error` rows for failed regions. A batch without failures
/// writes nothing and removes a failures file left by an earlier run.
pub fn write_failures(path: &Path, id_field: &str, report: &BatchReport) -> Result<usize> {
    if report.failure_count() == 0 {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed stale {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
        return Ok(0);
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record([id_field, "error"])?;

    let mut count = 0;
    for (id, error) in report.failures() {
        writer.write_record([id.to_string(), format!("{}: {}", error.kind(), error)])?;
        count += 1;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(count)
}
