use std::sync::Arc;

use crate::{error::MetricError, histogram::HistogramSnapshot, registry::Family};

/// A monotonically increasing sum.
///
/// Cloning is cheap, and clones refer to the same family. Each distinct tag combination passed to
/// the recording methods gets its own series, created lazily on first use.
#[derive(Clone)]
pub struct Counter {
    family: Arc<Family>,
}

impl Counter {
    pub(crate) fn from_family(family: Arc<Family>) -> Self {
        Self { family }
    }

    /// Increments the counter by one for the given tag combination.
    pub fn increment<I, T>(&self, tags: I)
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Clone,
        T: AsRef<str>,
    {
        if let Some(series) = self.family.series(tags) {
            series.add(1.0);
        }
    }

    /// Increments the counter by `delta` for the given tag combination.
    ///
    /// # Errors
    ///
    /// If `delta` is negative or not finite, `InvalidObservation` is returned and no state is
    /// modified.
    pub fn increment_by<I, T>(&self, delta: f64, tags: I) -> Result<(), MetricError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Clone,
        T: AsRef<str>,
    {
        if !delta.is_finite() || delta < 0.0 {
            return Err(MetricError::InvalidObservation { value: delta });
        }

        if let Some(series) = self.family.series(tags) {
            series.add(delta);
        }

        Ok(())
    }
}

/// A sum that can increase and decrease.
///
/// Cloning is cheap, and clones refer to the same family.
#[derive(Clone)]
pub struct UpDownCounter {
    family: Arc<Family>,
}

impl UpDownCounter {
    pub(crate) fn from_family(family: Arc<Family>) -> Self {
        Self { family }
    }

    /// Adds `delta`, which may be negative, to the sum for the given tag combination.
    ///
    /// # Errors
    ///
    /// If `delta` is not finite, `InvalidObservation` is returned and no state is modified.
    pub fn add<I, T>(&self, delta: f64, tags: I) -> Result<(), MetricError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Clone,
        T: AsRef<str>,
    {
        if !delta.is_finite() {
            return Err(MetricError::InvalidObservation { value: delta });
        }

        if let Some(series) = self.family.series(tags) {
            series.add(delta);
        }

        Ok(())
    }
}

/// A point-in-time value.
///
/// Cloning is cheap, and clones refer to the same family.
#[derive(Clone)]
pub struct Gauge {
    family: Arc<Family>,
}

impl Gauge {
    pub(crate) fn from_family(family: Arc<Family>) -> Self {
        Self { family }
    }

    /// Sets the gauge to `value` for the given tag combination.
    ///
    /// # Errors
    ///
    /// If `value` is not finite, `InvalidObservation` is returned and no state is modified.
    pub fn set<I, T>(&self, value: f64, tags: I) -> Result<(), MetricError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Clone,
        T: AsRef<str>,
    {
        if !value.is_finite() {
            return Err(MetricError::InvalidObservation { value });
        }

        if let Some(series) = self.family.series(tags) {
            series.set(value);
        }

        Ok(())
    }
}

/// A distribution aggregated into cumulative buckets.
///
/// Cloning is cheap, and clones refer to the same family. All series of the family share the
/// bucket bounds given at registration.
#[derive(Clone)]
pub struct Histogram {
    family: Arc<Family>,
}

impl Histogram {
    pub(crate) fn from_family(family: Arc<Family>) -> Self {
        Self { family }
    }

    /// Records a single observation for the given tag combination.
    ///
    /// # Errors
    ///
    /// If `value` is NaN or infinite, `InvalidObservation` is returned and no state is modified,
    /// including series creation.
    pub fn record<I, T>(&self, value: f64, tags: I) -> Result<(), MetricError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Clone,
        T: AsRef<str>,
    {
        self.record_many(value, 1, tags)
    }

    /// Records `weight` identical observations of `value` for the given tag combination.
    ///
    /// # Errors
    ///
    /// If `value` is NaN or infinite, `InvalidObservation` is returned and no state is modified,
    /// including series creation.
    pub fn record_many<I, T>(&self, value: f64, weight: u64, tags: I) -> Result<(), MetricError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Clone,
        T: AsRef<str>,
    {
        if !value.is_finite() {
            return Err(MetricError::InvalidObservation { value });
        }

        match self.family.series(tags) {
            Some(series) => series.record(value, weight),
            None => Ok(()),
        }
    }

    /// Returns a snapshot of the series for the given tag combination, if it exists.
    ///
    /// Lookups never create series.
    pub fn snapshot<I, T>(&self, tags: I) -> Option<HistogramSnapshot>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.family
            .existing_series(tags)
            .and_then(|series| series.histogram_snapshot())
    }
}
