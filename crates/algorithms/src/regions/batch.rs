//! Fixed-size contiguous batches over an ordered region sequence

use canopy_core::{Error, Region, Result};

/// One selected batch: a borrowed slice of the filtered regions
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub number: usize,
    pub size: usize,
    /// Index of the first region in the filtered sequence
    pub start: usize,
    /// Length of the filtered sequence the batch was cut from
    pub total: usize,
    pub regions: &'a [Region],
}

impl<'a> Batch<'a> {
    /// `true` when the batch starts past the end: no more batches remain
    pub fn is_exhausted(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Number of batches the whole sequence splits into
    pub fn count(&self) -> usize {
        batch_count(self.total, self.size)
    }
}

/// `ceil(total / batch_size)`
pub fn batch_count(total: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        total.div_ceil(batch_size)
    }
}

/// Select batch `batch_number` of `batch_size` regions.
///
/// The batch covers indices `[batch_number × batch_size, +batch_size)`
/// clipped to the sequence; past the end it is empty, which is how callers
/// learn that no batches remain.
pub fn select_batch(regions: &[Region], batch_size: usize, batch_number: usize) -> Result<Batch<'_>> {
    if batch_size == 0 {
        return Err(Error::InvalidParameter {
            name: "batch_size",
            value: "0".into(),
            reason: "must be a positive integer".into(),
        });
    }

    let total = regions.len();
    let start = batch_number.saturating_mul(batch_size).min(total);
    let end = start.saturating_add(batch_size).min(total);

    Ok(Batch {
        number: batch_number,
        size: batch_size,
        start,
        total,
        regions: &regions[start..end],
    })
}
