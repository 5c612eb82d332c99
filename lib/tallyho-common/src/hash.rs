//! Hashing primitives.

use std::{
    hash::{BuildHasher, Hasher},
    sync::LazyLock,
};

/// A fast, non-cryptographic hash implementation.
///
/// Suitable for hash tables and for deriving stable (within a single process) identifiers from
/// hashable values. Currently backed by [`foldhash`][foldhash].
///
/// [foldhash]: http://github.com/orlp/foldhash
pub type FastHasher = foldhash::quality::FoldHasher;

/// [`BuildHasher`][std::hash::BuildHasher] implementation for [`FastHasher`].
pub type FastBuildHasher = foldhash::quality::RandomState;

// Single global hasher state so that `get_fast_hasher` and `hash_single_fast` produce hashes that
// can be compared with each other anywhere in the process.
static BUILD_HASHER: LazyLock<FastBuildHasher> = LazyLock::new(foldhash::quality::RandomState::default);

/// Returns a `FastHasher` instance backed by a shared, global state.
///
/// Hashes produced by hashers from this function are consistent with each other, and with
/// [`hash_single_fast`], for the lifetime of the process. They are not stable across processes or
/// restarts.
#[inline]
pub fn get_fast_hasher() -> FastHasher {
    BUILD_HASHER.build_hasher()
}

/// Hashes a single value and returns the 64-bit hash value.
///
/// Consistent with hashers acquired from [`get_fast_hasher`]. See that function for details on
/// hash stability.
#[inline]
pub fn hash_single_fast<H: std::hash::Hash>(value: H) -> u64 {
    let mut hasher = get_fast_hasher();
    value.hash(&mut hasher);
    hasher.finish()
}

/// A no-op hasher for keys which are already hashes.
///
/// The `u64` value written to the hasher is passed through unchanged as the finished hash. Only
/// `write_u64` is supported: writing any other input panics, as it indicates the key is not
/// actually a pre-hashed 64-bit value.
#[derive(Default)]
pub struct NoopU64Hasher(u64);

impl Hasher for NoopU64Hasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write_u64(&mut self, value: u64) {
        self.0 = value;
    }

    fn write(&mut self, _: &[u8]) {
        panic!("`NoopU64Hasher` can only be used with u64 keys");
    }
}

/// [`BuildHasher`][std::hash::BuildHasher] implementation for [`NoopU64Hasher`].
#[derive(Clone, Default)]
pub struct NoopU64BuildHasher;

impl BuildHasher for NoopU64BuildHasher {
    type Hasher = NoopU64Hasher;

    fn build_hasher(&self) -> Self::Hasher {
        NoopU64Hasher(0)
    }
}
