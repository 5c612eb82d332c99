//! Metric tags and canonical series identity.
#![deny(warnings)]
#![deny(missing_docs)]

mod hash;
pub mod tags;

pub use self::hash::{hash_series, hash_series_with_seen, SeriesKey};
