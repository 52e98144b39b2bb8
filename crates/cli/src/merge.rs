//! Fold batch CSVs into a master CSV
//!
//! Rows are keyed by the identifier column; the first row seen for an
//! identifier wins, so existing master rows are never replaced.

use anyhow::{bail, Context, Result};
use chrono::Local;
use csv::StringRecord;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeSummary {
    /// Rows in the master before merging
    pub existing: usize,
    /// Batch rows appended
    pub added: usize,
    /// Batch rows dropped because their identifier was already present
    pub duplicates: usize,
    /// Copy of the previous master, if there was one
    pub backup: Option<PathBuf>,
}

impl MergeSummary {
    pub fn total(&self) -> usize {
        self.existing + self.added
    }
}

struct Table {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

fn read_table(path: &Path) -> Result<Table> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .clone();
    let rows = reader
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read rows of {}", path.display()))?;
    Ok(Table { headers, rows })
}

fn id_column(headers: &StringRecord, id_field: &str, path: &Path) -> Result<usize> {
    match headers.iter().position(|h| h == id_field) {
        Some(i) => Ok(i),
        None => bail!("{} has no '{}' column", path.display(), id_field),
    }
}

/// Copy `master` to `<backup_dir>/<stem>_<YYYYmmdd_HHMMSS>.csv`
pub fn backup(master: &Path, backup_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(backup_dir)
        .with_context(|| format!("Failed to create backup directory {}", backup_dir.display()))?;
    let stem = master
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "master".to_string());
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let target = backup_dir.join(format!("{}_{}.csv", stem, stamp));
    std::fs::copy(master, &target)
        .with_context(|| format!("Failed to back up {} to {}", master.display(), target.display()))?;
    Ok(target)
}

/// Default backup location: a `backups` directory next to the master
pub fn default_backup_dir(master: &Path) -> PathBuf {
    master
        .parent()
        .map(|p| p.join("backups"))
        .unwrap_or_else(|| PathBuf::from("backups"))
}

/// Merge `batches` into `master`.
///
/// A missing master is created with the first batch's header. Every batch
/// must carry the same header as the master.
pub fn merge_batches(
    master: &Path,
    batches: &[PathBuf],
    id_field: &str,
    backup_dir: &Path,
) -> Result<MergeSummary> {
    let mut summary = MergeSummary::default();

    let (mut headers, mut rows) = if master.exists() {
        let table = read_table(master)?;
        summary.existing = table.rows.len();
        (Some(table.headers), table.rows)
    } else {
        info!("Master {} does not exist; creating it", master.display());
        (None, Vec::new())
    };

    let mut seen: HashSet<String> = HashSet::new();
    if let Some(h) = &headers {
        let idx = id_column(h, id_field, master)?;
        for row in &rows {
            if let Some(id) = row.get(idx) {
                seen.insert(id.to_string());
            }
        }
    }

    for batch in batches {
        let table = read_table(batch)?;
        let expected: &StringRecord = headers.get_or_insert_with(|| table.headers.clone());
        if table.headers != *expected {
            bail!(
                "{} has columns {:?}, expected {:?}",
                batch.display(),
                table.headers.iter().collect::<Vec<_>>(),
                expected.iter().collect::<Vec<_>>()
            );
        }
        let idx = id_column(expected, id_field, batch)?;

        let mut added = 0;
        for row in table.rows {
            let id = row.get(idx).unwrap_or_default().to_string();
            if seen.insert(id) {
                rows.push(row);
                added += 1;
            } else {
                summary.duplicates += 1;
            }
        }
        debug!("{}: {} rows added", batch.display(), added);
        summary.added += added;
    }

    let Some(headers) = headers else {
        bail!("No master and no batch files to take a header from");
    };

    if master.exists() {
        summary.backup = Some(backup(master, backup_dir)?);
    }

    let mut writer = csv::Writer::from_path(master)
        .with_context(|| format!("Failed to create {}", master.display()))?;
    writer.write_record(&headers)?;
    for row in &rows {
        writer.write_record(row)?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", master.display()))?;

    if summary.duplicates > 0 {
        warn!("{} duplicate rows skipped", summary.duplicates);
    }
    Ok(summary)
}
