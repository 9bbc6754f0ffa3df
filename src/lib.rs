//! Offset shifted range analysis over a typed SSA IR
//!
//! This crate computes, for each SSA value of a lifted function, an
//! affine relation `base + factor * x` to another tracked value (an
//! OSR), together with a per-block bounded range for the free variable.
//! Constraints gathered from conditional branches make the ranges
//! path-sensitive; loads are resolved through reaching definitions over
//! CPU-state locations.
//!
//! The entry point is [`osra::Osra::run`]; results are queried through
//! [`osra::Osra::osr`], [`osra::Osra::bounded_value`] and
//! [`osra::Osra::is_dead`].

pub mod cfg;
pub mod comparison;
pub mod ir;
pub mod osra;
pub mod reaching;

pub use osra::{Bound, BoundedValue, BvRef, MergePolicy, Osr, Osra, Signedness};
