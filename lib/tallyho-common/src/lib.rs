//! Shared hashing and collection primitives.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod collections;
pub mod hash;
