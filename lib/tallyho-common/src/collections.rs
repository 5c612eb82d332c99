//! Collection type aliases wired to the crate's hashers.

use crate::hash::{FastBuildHasher, NoopU64BuildHasher};

/// A hash set based on `hashbrown` ([`HashSet`][hashbrown::HashSet]) using [`FastHasher`][crate::hash::FastHasher].
pub type FastHashSet<T> = hashbrown::HashSet<T, FastBuildHasher>;

/// A hash map based on `hashbrown` ([`HashMap`][hashbrown::HashMap]) using [`FastHasher`][crate::hash::FastHasher].
pub type FastHashMap<K, V> = hashbrown::HashMap<K, V, FastBuildHasher>;

/// A concurrent hash map based on `papaya` ([`HashMap`][papaya::HashMap]) using [`FastHasher`][crate::hash::FastHasher].
pub type FastConcurrentHashMap<K, V> = papaya::HashMap<K, V, FastBuildHasher>;

/// A hash set based on `hashbrown` ([`HashSet`][hashbrown::HashSet]) using [`NoopU64Hasher`][crate::hash::NoopU64Hasher].
///
/// Only suitable for `u64` values, or values which only hash a single `u64`. See
/// [`NoopU64Hasher`][crate::hash::NoopU64Hasher] for more details.
pub type PrehashedHashSet<T> = hashbrown::HashSet<T, NoopU64BuildHasher>;

/// A concurrent hash map based on `papaya` ([`HashMap`][papaya::HashMap]) using [`NoopU64Hasher`][crate::hash::NoopU64Hasher].
///
/// Only suitable when the key type is `u64`, or a type which only hashes a single `u64`. See
/// [`NoopU64Hasher`][crate::hash::NoopU64Hasher] for more details.
pub type PrehashedConcurrentHashMap<K, V> = papaya::HashMap<K, V, NoopU64BuildHasher>;
