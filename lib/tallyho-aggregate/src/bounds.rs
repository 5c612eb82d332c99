use std::sync::Arc;

use crate::error::MetricError;

/// Default bucket upper bounds, in line with the conventional defaults for explicit-bucket
/// histograms: `[0, 5, 10, 25, 50, 75, 100, 250, 500, 750, 1000, 2500, 5000, 7500, 10000]`.
const DEFAULT_BOUNDS: &[f64] = &[
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0, 10000.0,
];

/// An ordered set of histogram bucket upper bounds.
///
/// Bounds are finite, strictly increasing, and immutable once constructed. Every histogram
/// additionally carries an implicit `+Inf` bucket after the last bound, which is not stored here.
///
/// Bounds are held behind a shared allocation, so cloning is cheap and every series of a histogram
/// family observes the exact same bucket layout.
#[derive(Clone, Debug)]
pub struct BucketBounds {
    bounds: Arc<[f64]>,
}

impl BucketBounds {
    /// Creates a set of bucket bounds from the given slice.
    ///
    /// # Errors
    ///
    /// If the slice is empty, contains a non-finite value, or is not strictly increasing,
    /// `InvalidConfiguration` is returned.
    pub fn from_slice(bounds: &[f64]) -> Result<Self, MetricError> {
        validate_bounds(bounds)?;

        Ok(Self {
            bounds: Arc::from(bounds),
        })
    }

    /// Creates `count` bucket bounds starting at `start`, spaced `width` apart.
    ///
    /// # Errors
    ///
    /// If `count` is zero, or the generated bounds are not finite and strictly increasing (for
    /// example, a non-positive `width`), `InvalidConfiguration` is returned.
    pub fn linear(start: f64, width: f64, count: usize) -> Result<Self, MetricError> {
        let bounds = (0..count).map(|i| start + width * i as f64).collect::<Vec<_>>();
        Self::from_slice(&bounds)
    }

    /// Creates `count` bucket bounds starting at `start`, each `factor` times the previous one.
    ///
    /// # Errors
    ///
    /// If `count` is zero, or the generated bounds are not finite and strictly increasing (for
    /// example, a non-positive `start` or a `factor` at or below one), `InvalidConfiguration` is
    /// returned.
    pub fn exponential(start: f64, factor: f64, count: usize) -> Result<Self, MetricError> {
        let bounds = (0..count).map(|i| start * factor.powi(i as i32)).collect::<Vec<_>>();
        Self::from_slice(&bounds)
    }

    /// Returns the bucket upper bounds, in ascending order.
    pub fn upper_bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Returns the number of finite buckets.
    ///
    /// The implicit `+Inf` bucket is not included in this count.
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    /// Returns `true` if there are no finite buckets.
    ///
    /// Construction rejects empty bound sets, so this is always `false`.
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

impl Default for BucketBounds {
    fn default() -> Self {
        Self {
            bounds: Arc::from(DEFAULT_BOUNDS),
        }
    }
}

impl PartialEq for BucketBounds {
    fn eq(&self, other: &Self) -> bool {
        self.bounds == other.bounds
    }
}

fn validate_bounds(bounds: &[f64]) -> Result<(), MetricError> {
    if bounds.is_empty() {
        return Err(MetricError::InvalidConfiguration {
            reason: "bucket bounds must contain at least one upper bound",
        });
    }

    if bounds.iter().any(|bound| !bound.is_finite()) {
        return Err(MetricError::InvalidConfiguration {
            reason: "bucket bounds must be finite",
        });
    }

    if bounds.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(MetricError::InvalidConfiguration {
            reason: "bucket bounds must be strictly increasing",
        });
    }

    Ok(())
}
