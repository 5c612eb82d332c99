use std::hash::{Hash as _, Hasher as _};

use tallyho_common::{
    collections::PrehashedHashSet,
    hash::{get_fast_hasher, hash_single_fast},
};

/// The canonical identity of a single series: one metric name plus one combination of tags.
///
/// Keys are 64-bit hashes, so two distinct series can theoretically collide. At the cardinality
/// this crate permits, the probability is small enough that we treat keys as unique.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SeriesKey(u64);

impl SeriesKey {
    /// Returns the key as a raw 64-bit value.
    pub fn into_u64(self) -> u64 {
        self.0
    }
}

/// Hashes a series identity from a metric name and its tags.
///
/// Tags are hashed in an order-oblivious (XOR) manner, which allows tags to be hashed in any order
/// while still resulting in the same overall key. This function is _not_ oblivious to the actual
/// tag values themselves, so differences such as case or leading/trailing whitespace will
/// influence the resulting key.
///
/// If a tag is seen more than once, it is ignored and not included in the overall key. This
/// function allocates a hash set to track which tags have already been hashed, so hot paths should
/// allocate a single [`PrehashedHashSet`] and use [`hash_series_with_seen`] instead.
pub fn hash_series<I, T>(name: &str, tags: I) -> SeriesKey
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut seen = PrehashedHashSet::default();
    hash_series_with_seen(name, tags, &mut seen)
}

/// Hashes a series identity, using a provided set to track which tags have already been hashed.
///
/// Behaves exactly like [`hash_series`], but reuses the caller's duplicate-tracking set instead of
/// allocating a fresh one per call. The set is cleared before use.
pub fn hash_series_with_seen<I, T>(name: &str, tags: I, seen: &mut PrehashedHashSet<u64>) -> SeriesKey
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    seen.clear();

    let mut hasher = get_fast_hasher();
    name.hash(&mut hasher);

    // Hash the tags individually and XOR their hashes together, which allows us to be order-oblivious:
    let mut combined_tags_hash = 0;

    for tag in tags {
        let tag_hash = hash_single_fast(tag.as_ref());

        // If we've already seen this tag before, skip combining it again.
        if !seen.insert(tag_hash) {
            continue;
        }

        combined_tags_hash ^= tag_hash;
    }

    hasher.write_u64(combined_tags_hash);

    SeriesKey(hasher.finish())
}
