use std::sync::atomic::{AtomicU64, Ordering};

use crate::{bounds::BucketBounds, cell::FloatCell, error::MetricError};

/// A concurrent histogram with cumulative bucket counts.
///
/// Each observation increments the count of _every_ bucket whose upper bound is greater than or
/// equal to the observed value, so a bucket's count is the number of observations at or below its
/// bound, and counts are monotonically non-decreasing across ascending bounds. An implicit `+Inf`
/// bucket counts all observations and doubles as the total observation count. A running sum of
/// observed values is kept alongside the buckets.
///
/// All state is atomic: observations may be recorded from any number of threads, and snapshots may
/// be taken concurrently with recording. Snapshots are read-only and never reset the histogram.
pub struct CumulativeHistogram {
    bounds: BucketBounds,
    buckets: Box<[AtomicU64]>,
    count: AtomicU64,
    sum: FloatCell,
}

impl CumulativeHistogram {
    /// Creates a histogram with the given bucket bounds.
    pub fn new(bounds: BucketBounds) -> Self {
        let buckets = (0..bounds.len()).map(|_| AtomicU64::new(0)).collect();

        Self {
            bounds,
            buckets,
            count: AtomicU64::new(0),
            sum: FloatCell::new(),
        }
    }

    /// Returns the histogram's bucket bounds.
    pub fn bounds(&self) -> &BucketBounds {
        &self.bounds
    }

    /// Records a single observation.
    ///
    /// # Errors
    ///
    /// If the value is not finite (NaN or infinite), `InvalidObservation` is returned and the
    /// histogram is left untouched.
    pub fn record(&self, value: f64) -> Result<(), MetricError> {
        self.record_many(value, 1)
    }

    /// Records an observation `weight` times.
    ///
    /// Equivalent to calling [`record`][Self::record] `weight` times, but with a single pass over
    /// the buckets. A weight of zero is valid and records nothing.
    ///
    /// # Errors
    ///
    /// If the value is not finite (NaN or infinite), `InvalidObservation` is returned and the
    /// histogram is left untouched.
    pub fn record_many(&self, value: f64, weight: u64) -> Result<(), MetricError> {
        if !value.is_finite() {
            return Err(MetricError::InvalidObservation { value });
        }

        self.sum.add(value * weight as f64);
        self.count.fetch_add(weight, Ordering::Release);

        // Increment from the widest matching bucket down. Snapshots read buckets in ascending
        // order, so with release/acquire pairing they can never observe a narrower bucket ahead of
        // a wider one, keeping counts monotonic even mid-record.
        for (idx, upper_bound) in self.bounds.upper_bounds().iter().enumerate().rev() {
            if value <= *upper_bound {
                self.buckets[idx].fetch_add(weight, Ordering::Release);
            } else {
                // Bounds ascend, so no earlier bucket can contain the value either.
                break;
            }
        }

        Ok(())
    }

    /// Takes a point-in-time snapshot of the histogram.
    ///
    /// The snapshot holds `(upper_bound, cumulative_count)` pairs in ascending bound order, plus
    /// the total observation count (the implicit `+Inf` bucket) and the running sum. Taking a
    /// snapshot does not reset or otherwise modify the histogram.
    ///
    /// Each bucket is read atomically, but the snapshot as a whole is not a single atomic cut:
    /// observations recorded while the snapshot is being taken may be partially included. Counts
    /// still never decrease across ascending bounds within one snapshot.
    pub fn snapshot(&self) -> HistogramSnapshot {
        let buckets = self
            .bounds
            .upper_bounds()
            .iter()
            .zip(self.buckets.iter())
            .map(|(upper_bound, count)| (*upper_bound, count.load(Ordering::Acquire)))
            .collect();

        HistogramSnapshot {
            buckets,
            count: self.count.load(Ordering::Acquire),
            sum: self.sum.get(),
        }
    }
}

/// A point-in-time view of a [`CumulativeHistogram`].
#[derive(Clone, Debug)]
pub struct HistogramSnapshot {
    buckets: Vec<(f64, u64)>,
    count: u64,
    sum: f64,
}

impl HistogramSnapshot {
    /// Returns the `(upper_bound, cumulative_count)` pairs, in ascending bound order.
    ///
    /// The implicit `+Inf` bucket is not included; its count is [`count`][Self::count].
    pub fn buckets(&self) -> &[(f64, u64)] {
        &self.buckets
    }

    /// Returns the total number of observations, which is also the count of the implicit `+Inf`
    /// bucket.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns the sum of all observed values.
    pub fn sum(&self) -> f64 {
        self.sum
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::{collection::vec, prelude::*};

    use super::*;

    fn histogram(bounds: &[f64]) -> CumulativeHistogram {
        CumulativeHistogram::new(BucketBounds::from_slice(bounds).unwrap())
    }

    fn bucket_counts(snapshot: &HistogramSnapshot) -> Vec<u64> {
        snapshot.buckets().iter().map(|(_, count)| *count).collect()
    }

    #[test]
    fn record_increments_all_wider_buckets() {
        let histogram = histogram(&[10.0, 50.0, 100.0]);

        histogram.record(42.0).unwrap();

        let snapshot = histogram.snapshot();
        assert_eq!(bucket_counts(&snapshot), vec![0, 1, 1]);
        assert_eq!(snapshot.count(), 1);
        assert_eq!(snapshot.sum(), 42.0);
    }

    #[test]
    fn value_equal_to_bound_lands_in_that_bucket() {
        let histogram = histogram(&[10.0, 50.0, 100.0]);

        histogram.record(50.0).unwrap();

        assert_eq!(bucket_counts(&histogram.snapshot()), vec![0, 1, 1]);
    }

    #[test]
    fn value_above_all_bounds_only_counts_toward_total() {
        let histogram = histogram(&[10.0, 50.0, 100.0]);

        histogram.record(101.0).unwrap();

        let snapshot = histogram.snapshot();
        assert_eq!(bucket_counts(&snapshot), vec![0, 0, 0]);
        assert_eq!(snapshot.count(), 1);
    }

    #[test]
    fn worked_example_distribution() {
        let histogram = histogram(&[10.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 5000.0]);

        let values = [
            9.0, 24.0, 47.0, 75.0, 113.0, 421.0, 591.0, 891.0, 912.0, 1050.0, 1120.0, 1300.0, 1771.0, 1881.0, 5991.0,
        ];
        for value in values {
            histogram.record(value).unwrap();
        }

        let snapshot = histogram.snapshot();
        assert_eq!(bucket_counts(&snapshot), vec![1, 3, 4, 5, 6, 9, 14]);
        assert_eq!(snapshot.count(), 15);
    }

    #[test]
    fn record_many_weights_a_single_pass() {
        let histogram = histogram(&[1.0, 2.0]);

        histogram.record_many(1.5, 5).unwrap();
        histogram.record_many(0.5, 0).unwrap();

        let snapshot = histogram.snapshot();
        assert_eq!(bucket_counts(&snapshot), vec![0, 5]);
        assert_eq!(snapshot.count(), 5);
        assert_eq!(snapshot.sum(), 7.5);
    }

    #[test]
    fn non_finite_values_are_rejected_without_side_effects() {
        let histogram = histogram(&[10.0, 50.0]);
        histogram.record(7.0).unwrap();

        let before = histogram.snapshot();

        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            match histogram.record(value) {
                Err(MetricError::InvalidObservation { value: rejected }) => {
                    assert!(rejected.is_nan() || rejected.is_infinite())
                }
                other => panic!("expected InvalidObservation, got {:?}", other),
            }
        }

        let after = histogram.snapshot();
        assert_eq!(bucket_counts(&before), bucket_counts(&after));
        assert_eq!(before.count(), after.count());
        assert_eq!(before.sum(), after.sum());
    }

    #[test]
    fn snapshot_is_idempotent() {
        let histogram = histogram(&[10.0, 50.0]);
        histogram.record(25.0).unwrap();

        let first = histogram.snapshot();
        let second = histogram.snapshot();

        assert_eq!(bucket_counts(&first), bucket_counts(&second));
        assert_eq!(first.count(), second.count());
        assert_eq!(first.sum(), second.sum());
    }

    #[test]
    fn negative_values_land_in_negative_buckets() {
        let histogram = histogram(&[-10.0, 0.0, 10.0]);

        histogram.record(-15.0).unwrap();
        histogram.record(-5.0).unwrap();
        histogram.record(0.0).unwrap();

        let snapshot = histogram.snapshot();
        assert_eq!(bucket_counts(&snapshot), vec![1, 3, 3]);
        assert_eq!(snapshot.count(), 3);
    }

    #[test]
    fn concurrent_records_lose_no_updates() {
        let histogram = Arc::new(histogram(&[10.0, 100.0, 1000.0]));
        let per_thread = 25_000u64;

        let handles = (0..4)
            .map(|worker| {
                let histogram = Arc::clone(&histogram);
                std::thread::spawn(move || {
                    for i in 0..per_thread {
                        // Spread values across all buckets.
                        let value = ((worker * per_thread + i) % 2000) as f64;
                        histogram.record(value).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.count(), 4 * per_thread);

        // 0..=10 -> 11 of every 2000 values, 0..=100 -> 101, 0..=1000 -> 1001.
        assert_eq!(bucket_counts(&snapshot), vec![50 * 11, 50 * 101, 50 * 1001]);
    }

    #[test]
    fn snapshots_remain_monotonic_under_concurrent_records() {
        let histogram = Arc::new(histogram(&[10.0, 100.0, 1000.0]));
        let writer = {
            let histogram = Arc::clone(&histogram);
            std::thread::spawn(move || {
                for i in 0..50_000u64 {
                    histogram.record((i % 2000) as f64).unwrap();
                }
            })
        };

        while !writer.is_finished() {
            let snapshot = histogram.snapshot();
            let counts = bucket_counts(&snapshot);
            for pair in counts.windows(2) {
                assert!(pair[0] <= pair[1], "bucket counts must be monotonic: {:?}", counts);
            }
            assert!(*counts.last().unwrap() <= snapshot.count());
        }

        writer.join().unwrap();
    }

    fn recorded_values() -> impl Strategy<Value = Vec<f64>> {
        vec(-1_000_000.0..1_000_000.0f64, 0..64)
    }

    proptest! {
        #[test]
        fn property_test_counts_match_naive_counting(values in recorded_values()) {
            let bounds = [-1000.0, -10.0, 0.0, 10.0, 1000.0];
            let histogram = histogram(&bounds);

            for value in &values {
                histogram.record(*value).unwrap();
            }

            let snapshot = histogram.snapshot();
            for (upper_bound, count) in snapshot.buckets() {
                let expected = values.iter().filter(|v| **v <= *upper_bound).count() as u64;
                prop_assert_eq!(*count, expected);
            }
            prop_assert_eq!(snapshot.count(), values.len() as u64);
        }

        #[test]
        fn property_test_counts_are_monotonic(values in recorded_values()) {
            let histogram = histogram(&[-100.0, 0.0, 100.0, 10_000.0]);

            for value in &values {
                histogram.record(*value).unwrap();
            }

            let snapshot = histogram.snapshot();
            let counts = snapshot.buckets().iter().map(|(_, c)| *c).collect::<Vec<_>>();
            for pair in counts.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
            prop_assert!(*counts.last().unwrap() <= snapshot.count());
        }
    }
}
