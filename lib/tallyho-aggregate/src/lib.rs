//! In-memory metric aggregation: cumulative histograms, scalar instruments, and the registry
//! that ties series state to metric names and tag combinations.
#![deny(warnings)]
#![deny(missing_docs)]

mod bounds;
mod cell;
mod error;
mod histogram;
mod instrument;
mod registry;

pub use self::bounds::BucketBounds;
pub use self::error::MetricError;
pub use self::histogram::{CumulativeHistogram, HistogramSnapshot};
pub use self::instrument::{Counter, Gauge, Histogram, UpDownCounter};
pub use self::registry::{FamilySnapshot, MetricKind, Registry, SeriesSnapshot, ValueSnapshot, DEFAULT_SERIES_LIMIT};
