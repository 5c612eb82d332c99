use std::{
    cell::RefCell,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use tallyho_common::collections::{FastConcurrentHashMap, PrehashedConcurrentHashMap, PrehashedHashSet};
use tallyho_context::{hash_series_with_seen, tags::TagSet, SeriesKey};
use tracing::debug;

use crate::{
    bounds::BucketBounds,
    cell::FloatCell,
    error::MetricError,
    histogram::{CumulativeHistogram, HistogramSnapshot},
    instrument::{Counter, Gauge, Histogram, UpDownCounter},
};

/// Default limit on the total number of series held across all families of a registry.
pub const DEFAULT_SERIES_LIMIT: usize = 10_000;

thread_local! {
    static SEEN_TAGS: RefCell<PrehashedHashSet<u64>> = RefCell::new(PrehashedHashSet::default());
}

/// The kind of instrument backing a metric family.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricKind {
    /// A monotonically increasing sum.
    Counter,

    /// A sum that can increase and decrease.
    UpDownCounter,

    /// A point-in-time value.
    Gauge,

    /// A distribution aggregated into cumulative buckets.
    Histogram,
}

/// A concurrent registry of metric families.
///
/// Families are registered once by name and hold one series per distinct tag combination, created
/// lazily on first use. The total number of series across all families is bounded: once the limit
/// is reached, observations for tag combinations that have not been seen before are dropped and
/// logged at debug level, while existing series keep aggregating.
///
/// `Registry` is cheap to clone, and clones share state.
#[derive(Clone)]
pub struct Registry {
    families: Arc<FastConcurrentHashMap<String, Arc<Family>>>,
    budget: Arc<SeriesBudget>,
}

impl Registry {
    /// Creates a registry with the default series limit.
    pub fn new() -> Self {
        Self::with_series_limit(DEFAULT_SERIES_LIMIT)
    }

    /// Creates a registry that holds at most `limit` series across all families.
    pub fn with_series_limit(limit: usize) -> Self {
        Self {
            families: Arc::new(FastConcurrentHashMap::default()),
            budget: Arc::new(SeriesBudget {
                limit,
                active: AtomicUsize::new(0),
            }),
        }
    }

    /// Registers a counter family and returns a handle to it.
    ///
    /// Registering the same name again with an identical shape returns a handle to the existing
    /// family.
    ///
    /// # Errors
    ///
    /// If the name is not a valid metric name, or the name is already registered with a different
    /// kind or help text, `InvalidConfiguration` is returned.
    pub fn register_counter(&self, name: &str, help: &str) -> Result<Counter, MetricError> {
        let family = self.family(name, help, MetricKind::Counter, None)?;
        Ok(Counter::from_family(family))
    }

    /// Registers an up/down counter family and returns a handle to it.
    ///
    /// Registering the same name again with an identical shape returns a handle to the existing
    /// family.
    ///
    /// # Errors
    ///
    /// If the name is not a valid metric name, or the name is already registered with a different
    /// kind or help text, `InvalidConfiguration` is returned.
    pub fn register_up_down_counter(&self, name: &str, help: &str) -> Result<UpDownCounter, MetricError> {
        let family = self.family(name, help, MetricKind::UpDownCounter, None)?;
        Ok(UpDownCounter::from_family(family))
    }

    /// Registers a gauge family and returns a handle to it.
    ///
    /// Registering the same name again with an identical shape returns a handle to the existing
    /// family.
    ///
    /// # Errors
    ///
    /// If the name is not a valid metric name, or the name is already registered with a different
    /// kind or help text, `InvalidConfiguration` is returned.
    pub fn register_gauge(&self, name: &str, help: &str) -> Result<Gauge, MetricError> {
        let family = self.family(name, help, MetricKind::Gauge, None)?;
        Ok(Gauge::from_family(family))
    }

    /// Registers a histogram family with the given bucket bounds and returns a handle to it.
    ///
    /// Every series of the family aggregates into the same buckets. Registering the same name
    /// again with an identical shape returns a handle to the existing family.
    ///
    /// # Errors
    ///
    /// If the name is not a valid metric name, or the name is already registered with a different
    /// kind, bucket bounds, or help text, `InvalidConfiguration` is returned.
    pub fn register_histogram(&self, name: &str, help: &str, bounds: BucketBounds) -> Result<Histogram, MetricError> {
        let family = self.family(name, help, MetricKind::Histogram, Some(bounds))?;
        Ok(Histogram::from_family(family))
    }

    fn family(
        &self, name: &str, help: &str, kind: MetricKind, bounds: Option<BucketBounds>,
    ) -> Result<Arc<Family>, MetricError> {
        validate_metric_name(name)?;

        let families = self.families.pin();
        let family = match families.get(name) {
            Some(existing) => existing,
            None => families.get_or_insert_with(name.to_string(), || {
                Arc::new(Family::new(name, help, kind, bounds.clone(), Arc::clone(&self.budget)))
            }),
        };

        family.ensure_matches(kind, bounds.as_ref(), help)?;

        Ok(Arc::clone(family))
    }

    /// Takes a snapshot of every family, sorted by metric name.
    ///
    /// Series within each family are sorted by their canonical tag order, so snapshot output is
    /// deterministic for a given registry state.
    pub fn snapshot(&self) -> Vec<FamilySnapshot> {
        let families = self.families.pin();
        let mut snapshots = families.values().map(|family| family.snapshot()).collect::<Vec<_>>();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Returns the number of live series across all families.
    pub fn series_count(&self) -> usize {
        self.budget.active.load(Ordering::Relaxed)
    }

    /// Returns the maximum number of series this registry will hold.
    pub fn series_limit(&self) -> usize {
        self.budget.limit
    }
}

struct SeriesBudget {
    limit: usize,
    active: AtomicUsize,
}

impl SeriesBudget {
    fn try_acquire(&self) -> bool {
        let mut active = self.active.load(Ordering::Relaxed);
        loop {
            if active >= self.limit {
                return false;
            }

            match self
                .active
                .compare_exchange_weak(active, active + 1, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => active = actual,
            }
        }
    }

    fn release(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

pub(crate) struct Family {
    name: String,
    help: String,
    kind: MetricKind,
    bounds: Option<BucketBounds>,
    series: PrehashedConcurrentHashMap<SeriesKey, Arc<Series>>,
    budget: Arc<SeriesBudget>,
}

impl Family {
    fn new(name: &str, help: &str, kind: MetricKind, bounds: Option<BucketBounds>, budget: Arc<SeriesBudget>) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind,
            bounds,
            series: PrehashedConcurrentHashMap::default(),
            budget,
        }
    }

    fn ensure_matches(&self, kind: MetricKind, bounds: Option<&BucketBounds>, help: &str) -> Result<(), MetricError> {
        if self.kind != kind {
            return Err(MetricError::InvalidConfiguration {
                reason: "an instrument with this name is already registered as a different kind",
            });
        }

        if self.bounds.as_ref() != bounds {
            return Err(MetricError::InvalidConfiguration {
                reason: "an instrument with this name is already registered with different bucket bounds",
            });
        }

        if self.help != help {
            return Err(MetricError::InvalidConfiguration {
                reason: "an instrument with this name is already registered with different help text",
            });
        }

        Ok(())
    }

    /// Returns the series for the given tag combination, creating it on first use.
    ///
    /// Returns `None` when creating the series would exceed the registry's series limit.
    pub(crate) fn series<I, T>(&self, tags: I) -> Option<Arc<Series>>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Clone,
        T: AsRef<str>,
    {
        let tags = tags.into_iter();
        let key = SEEN_TAGS.with(|seen| hash_series_with_seen(&self.name, tags.clone(), &mut seen.borrow_mut()));

        let series = self.series.pin();
        if let Some(existing) = series.get(&key) {
            return Some(Arc::clone(existing));
        }

        // Charge the new series against the budget before publishing it.
        if !self.budget.try_acquire() {
            debug!(
                metric_name = %self.name,
                "Series limit reached. Dropping observation for new series."
            );
            return None;
        }

        let created = Arc::new(Series {
            tags: canonical_tag_set(tags),
            value: SeriesValue::new(self.kind, self.bounds.as_ref()),
        });

        match series.try_insert(key, created) {
            Ok(inserted) => Some(Arc::clone(inserted)),
            Err(error) => {
                // Another thread published the same series first; hand back its charge.
                self.budget.release();
                Some(Arc::clone(error.current))
            }
        }
    }

    /// Returns the series for the given tag combination only if it already exists.
    pub(crate) fn existing_series<I, T>(&self, tags: I) -> Option<Arc<Series>>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let key = SEEN_TAGS.with(|seen| hash_series_with_seen(&self.name, tags, &mut seen.borrow_mut()));
        self.series.pin().get(&key).map(Arc::clone)
    }

    fn snapshot(&self) -> FamilySnapshot {
        let series = self.series.pin();
        let mut snapshots = series.values().map(|series| series.snapshot()).collect::<Vec<_>>();
        snapshots.sort_by(|a, b| compare_tag_sets(&a.tags, &b.tags));

        FamilySnapshot {
            name: self.name.clone(),
            help: self.help.clone(),
            kind: self.kind,
            series: snapshots,
        }
    }
}

pub(crate) struct Series {
    tags: TagSet,
    value: SeriesValue,
}

impl Series {
    pub(crate) fn add(&self, delta: f64) {
        match &self.value {
            SeriesValue::Counter(cell) | SeriesValue::UpDownCounter(cell) => cell.add(delta),
            _ => unreachable!("series value kind is fixed by its family"),
        }
    }

    pub(crate) fn set(&self, value: f64) {
        match &self.value {
            SeriesValue::Gauge(cell) => cell.set(value),
            _ => unreachable!("series value kind is fixed by its family"),
        }
    }

    pub(crate) fn record(&self, value: f64, weight: u64) -> Result<(), MetricError> {
        match &self.value {
            SeriesValue::Histogram(histogram) => histogram.record_many(value, weight),
            _ => unreachable!("series value kind is fixed by its family"),
        }
    }

    pub(crate) fn histogram_snapshot(&self) -> Option<HistogramSnapshot> {
        match &self.value {
            SeriesValue::Histogram(histogram) => Some(histogram.snapshot()),
            _ => None,
        }
    }

    fn snapshot(&self) -> SeriesSnapshot {
        let value = match &self.value {
            SeriesValue::Counter(cell) => ValueSnapshot::Counter(cell.get()),
            SeriesValue::UpDownCounter(cell) | SeriesValue::Gauge(cell) => ValueSnapshot::Gauge(cell.get()),
            SeriesValue::Histogram(histogram) => ValueSnapshot::Histogram(histogram.snapshot()),
        };

        SeriesSnapshot {
            tags: self.tags.clone(),
            value,
        }
    }
}

enum SeriesValue {
    Counter(FloatCell),
    UpDownCounter(FloatCell),
    Gauge(FloatCell),
    Histogram(CumulativeHistogram),
}

impl SeriesValue {
    fn new(kind: MetricKind, bounds: Option<&BucketBounds>) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(FloatCell::new()),
            MetricKind::UpDownCounter => Self::UpDownCounter(FloatCell::new()),
            MetricKind::Gauge => Self::Gauge(FloatCell::new()),
            // Histogram families always carry bounds; the registry enforces that at registration.
            MetricKind::Histogram => Self::Histogram(CumulativeHistogram::new(bounds.cloned().unwrap_or_default())),
        }
    }
}

/// A point-in-time view of a metric family and all of its series.
#[derive(Clone, Debug)]
pub struct FamilySnapshot {
    name: String,
    help: String,
    kind: MetricKind,
    series: Vec<SeriesSnapshot>,
}

impl FamilySnapshot {
    /// Returns the metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the family's help text.
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Returns the kind of instrument backing the family.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Returns the family's series, sorted by canonical tag order.
    pub fn series(&self) -> &[SeriesSnapshot] {
        &self.series
    }
}

/// A point-in-time view of a single series.
#[derive(Clone, Debug)]
pub struct SeriesSnapshot {
    tags: TagSet,
    value: ValueSnapshot,
}

impl SeriesSnapshot {
    /// Returns the series' canonical (deduplicated, sorted) tags.
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Returns the series' value.
    pub fn value(&self) -> &ValueSnapshot {
        &self.value
    }
}

/// A point-in-time value of a single series.
#[derive(Clone, Debug)]
pub enum ValueSnapshot {
    /// A monotonic sum.
    Counter(f64),

    /// A point-in-time value. Up/down counters also snapshot as gauges.
    Gauge(f64),

    /// A distribution aggregated into cumulative buckets.
    Histogram(HistogramSnapshot),
}

fn compare_tag_sets<'a>(a: &'a TagSet, b: &'a TagSet) -> std::cmp::Ordering {
    a.into_iter().cmp(b)
}

fn canonical_tag_set<I, T>(tags: I) -> TagSet
where
    I: Iterator<Item = T>,
    T: AsRef<str>,
{
    let mut set = TagSet::default();
    for tag in tags {
        set.insert_tag(tag.as_ref());
    }
    set.as_sorted()
}

fn validate_metric_name(name: &str) -> Result<(), MetricError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => is_valid_name_start_char(first) && chars.all(is_valid_name_char),
        None => false,
    };

    if !valid {
        return Err(MetricError::InvalidConfiguration {
            reason: "metric names must match [a-zA-Z_:][a-zA-Z0-9_:]*",
        });
    }

    Ok(())
}

#[inline]
fn is_valid_name_start_char(c: char) -> bool {
    // Matches a regular expression of [a-zA-Z_:].
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

#[inline]
fn is_valid_name_char(c: char) -> bool {
    // Matches a regular expression of [a-zA-Z0-9_:].
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates_per_tag_combination() {
        let registry = Registry::new();
        let requests = registry.register_counter("requests_total", "Total requests.").unwrap();

        requests.increment(["endpoint:/users"]);
        requests.increment(["endpoint:/users"]);
        requests.increment_by(3.0, ["endpoint:/health"]).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);

        let family = &snapshot[0];
        assert_eq!(family.name(), "requests_total");
        assert_eq!(family.kind(), MetricKind::Counter);
        assert_eq!(family.series().len(), 2);

        for series in family.series() {
            match series.value() {
                ValueSnapshot::Counter(value) => {
                    if series.tags().has_tag("endpoint:/users") {
                        assert_eq!(*value, 2.0);
                    } else {
                        assert_eq!(*value, 3.0);
                    }
                }
                other => panic!("expected counter snapshot, got {:?}", other),
            }
        }
    }

    #[test]
    fn permuted_tags_resolve_to_the_same_series() {
        let registry = Registry::new();
        let requests = registry.register_counter("requests_total", "Total requests.").unwrap();

        requests.increment(["env:prod", "service:web"]);
        requests.increment(["service:web", "env:prod"]);
        requests.increment(["service:web", "env:prod", "service:web"]);

        assert_eq!(registry.series_count(), 1);

        let snapshot = registry.snapshot();
        let series = &snapshot[0].series()[0];
        assert_eq!(series.tags().len(), 2);
        match series.value() {
            ValueSnapshot::Counter(value) => assert_eq!(*value, 3.0),
            other => panic!("expected counter snapshot, got {:?}", other),
        }
    }

    #[test]
    fn counter_rejects_invalid_deltas() {
        let registry = Registry::new();
        let requests = registry.register_counter("requests_total", "Total requests.").unwrap();

        assert!(requests.increment_by(-1.0, ["env:prod"]).is_err());
        assert!(requests.increment_by(f64::NAN, ["env:prod"]).is_err());

        // Rejected observations must not create series either.
        assert_eq!(registry.series_count(), 0);
    }

    #[test]
    fn up_down_counter_goes_both_ways() {
        let registry = Registry::new();
        let in_flight = registry
            .register_up_down_counter("requests_in_flight", "In-flight requests.")
            .unwrap();

        in_flight.add(5.0, ["env:prod"]).unwrap();
        in_flight.add(-2.0, ["env:prod"]).unwrap();
        assert!(in_flight.add(f64::INFINITY, ["env:prod"]).is_err());

        let snapshot = registry.snapshot();
        match snapshot[0].series()[0].value() {
            ValueSnapshot::Gauge(value) => assert_eq!(*value, 3.0),
            other => panic!("expected gauge snapshot, got {:?}", other),
        }
    }

    #[test]
    fn gauge_keeps_latest_value() {
        let registry = Registry::new();
        let temperature = registry.register_gauge("temperature_celsius", "Current temperature.").unwrap();

        temperature.set(20.0, ["room:lab"]).unwrap();
        temperature.set(-3.5, ["room:lab"]).unwrap();
        assert!(temperature.set(f64::NAN, ["room:lab"]).is_err());

        let snapshot = registry.snapshot();
        match snapshot[0].series()[0].value() {
            ValueSnapshot::Gauge(value) => assert_eq!(*value, -3.5),
            other => panic!("expected gauge snapshot, got {:?}", other),
        }
    }

    #[test]
    fn histogram_snapshot_by_tag_combination() {
        let registry = Registry::new();
        let latency = registry
            .register_histogram(
                "request_duration_ms",
                "Request duration.",
                BucketBounds::from_slice(&[10.0, 100.0]).unwrap(),
            )
            .unwrap();

        latency.record(5.0, ["endpoint:/users"]).unwrap();
        latency.record(50.0, ["endpoint:/users"]).unwrap();
        latency.record_many(7.0, 2, ["endpoint:/health"]).unwrap();

        let users = latency.snapshot(["endpoint:/users"]).unwrap();
        assert_eq!(users.count(), 2);
        assert_eq!(users.buckets(), &[(10.0, 1), (100.0, 2)]);

        // Tag order must not matter for lookup, and unknown combinations return nothing.
        assert!(latency.snapshot(["endpoint:/health"]).is_some());
        assert!(latency.snapshot(["endpoint:/missing"]).is_none());
        assert_eq!(registry.series_count(), 2);
    }

    #[test]
    fn snapshot_lookups_do_not_create_series() {
        let registry = Registry::new();
        let latency = registry
            .register_histogram("request_duration_ms", "Request duration.", BucketBounds::default())
            .unwrap();

        assert!(latency.snapshot(["endpoint:/users"]).is_none());
        assert_eq!(registry.series_count(), 0);
    }

    #[test]
    fn reregistration_requires_identical_shape() {
        let registry = Registry::new();
        let bounds = BucketBounds::from_slice(&[1.0, 2.0]).unwrap();

        let first = registry
            .register_histogram("request_duration_ms", "Request duration.", bounds.clone())
            .unwrap();

        // Identical shape returns a handle to the same family.
        let second = registry
            .register_histogram("request_duration_ms", "Request duration.", bounds)
            .unwrap();

        first.record(1.5, ["env:prod"]).unwrap();
        second.record(1.5, ["env:prod"]).unwrap();
        assert_eq!(registry.series_count(), 1);

        // Any shape difference is a configuration error.
        assert!(registry
            .register_histogram(
                "request_duration_ms",
                "Request duration.",
                BucketBounds::from_slice(&[1.0, 3.0]).unwrap()
            )
            .is_err());
        assert!(registry
            .register_counter("request_duration_ms", "Request duration.")
            .is_err());
        assert!(registry
            .register_histogram(
                "request_duration_ms",
                "Different help.",
                BucketBounds::from_slice(&[1.0, 2.0]).unwrap()
            )
            .is_err());
    }

    #[test]
    fn metric_names_are_validated_at_registration() {
        let registry = Registry::new();

        assert!(registry.register_counter("valid_name:total", "Valid.").is_ok());
        assert!(registry.register_counter("_leading_underscore", "Valid.").is_ok());

        for invalid in ["", "1starts_with_digit", "has space", "has-dash", "has.period"] {
            match registry.register_counter(invalid, "Invalid.") {
                Err(MetricError::InvalidConfiguration { .. }) => {}
                Err(other) => panic!("expected InvalidConfiguration for {:?}, got {:?}", invalid, other),
                Ok(_) => panic!("metric name {:?} should have been rejected", invalid),
            }
        }
    }

    #[test]
    fn series_limit_drops_new_series_but_keeps_existing_ones() {
        let registry = Registry::with_series_limit(2);
        let requests = registry.register_counter("requests_total", "Total requests.").unwrap();

        requests.increment(["endpoint:/a"]);
        requests.increment(["endpoint:/b"]);
        requests.increment(["endpoint:/c"]);
        requests.increment(["endpoint:/a"]);

        assert_eq!(registry.series_count(), 2);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].series().len(), 2);

        let total: f64 = snapshot[0]
            .series()
            .iter()
            .map(|series| match series.value() {
                ValueSnapshot::Counter(value) => *value,
                _ => 0.0,
            })
            .sum();
        assert_eq!(total, 3.0);
    }

    #[test]
    fn snapshot_is_sorted_by_family_name() {
        let registry = Registry::new();
        registry.register_counter("zeta_total", "Last.").unwrap().increment(["a:1"]);
        registry.register_counter("alpha_total", "First.").unwrap().increment(["a:1"]);
        registry.register_gauge("mu_value", "Middle.").unwrap().set(1.0, ["a:1"]).unwrap();

        let names = registry.snapshot().iter().map(|f| f.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names, vec!["alpha_total", "mu_value", "zeta_total"]);
    }

    #[test]
    fn empty_tag_combination_is_a_series() {
        let registry = Registry::new();
        let requests = registry.register_counter("requests_total", "Total requests.").unwrap();

        requests.increment(Vec::<String>::new());

        let snapshot = registry.snapshot();
        let series = &snapshot[0].series()[0];
        assert!(series.tags().is_empty());
        match series.value() {
            ValueSnapshot::Counter(value) => assert_eq!(*value, 1.0),
            other => panic!("expected counter snapshot, got {:?}", other),
        }
    }

    #[test]
    fn concurrent_first_use_creates_exactly_one_series() {
        let registry = Registry::new();
        let requests = registry.register_counter("requests_total", "Total requests.").unwrap();

        let handles = (0..8)
            .map(|_| {
                let requests = requests.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        requests.increment(["env:prod", "service:web"]);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.series_count(), 1);

        let snapshot = registry.snapshot();
        match snapshot[0].series()[0].value() {
            ValueSnapshot::Counter(value) => assert_eq!(*value, 8_000.0),
            other => panic!("expected counter snapshot, got {:?}", other),
        }
    }
}
