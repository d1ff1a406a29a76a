//! Series Buffer
//!
//! Ordered `(elapsed, value)` history of the current acquisition run.
//! Insertion order is time order. The series only ever grows by `append` or is
//! emptied by `clear`; samples are immutable once appended. No upper bound is
//! enforced here.

use serde::Serialize;

/// One recorded reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Seconds since the run's start time
    pub elapsed_s: f64,
    /// Parsed instrument reading
    pub value: f64,
}

impl Sample {
    /// Create a sample.
    pub fn new(elapsed_s: f64, value: f64) -> Self {
        Self { elapsed_s, value }
    }
}

/// Append-only sample history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Series {
    samples: Vec<Sample>,
}

impl Series {
    /// Empty series.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample. Amortized O(1).
    pub fn append(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Remove every sample, keeping the allocation for the next run.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no samples have been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// All samples in time order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Iterate over samples in time order.
    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    /// Elapsed-time column.
    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.elapsed_s).collect()
    }

    /// Value column.
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    /// Smallest and largest value, or `None` for an empty series.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.samples.iter().fold(None, |range, s| match range {
            None => Some((s.value, s.value)),
            Some((lo, hi)) => Some((lo.min(s.value), hi.max(s.value))),
        })
    }
}

impl<'a> IntoIterator for &'a Series {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}
