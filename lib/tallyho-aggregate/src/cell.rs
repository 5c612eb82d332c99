use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe `f64` cell, stored as raw bits in an `AtomicU64`.
pub(crate) struct FloatCell(AtomicU64);

impl FloatCell {
    pub const fn new() -> Self {
        // 0.0f64 has an all-zeroes bit pattern.
        Self(AtomicU64::new(0))
    }

    /// Adds `delta` to the cell.
    pub fn add(&self, delta: f64) {
        let mut current_bits = self.0.load(Ordering::Relaxed);
        loop {
            let new_bits = (f64::from_bits(current_bits) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current_bits, new_bits, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current_bits = actual,
            }
        }
    }

    /// Replaces the cell's value with `value`.
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

impl std::fmt::Debug for FloatCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FloatCell").field(&self.get()).finish()
    }
}
