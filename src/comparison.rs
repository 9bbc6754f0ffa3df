//! Comparison canonicalization
//!
//! Rewrites compares into the canonical shape the constraint extractor
//! expects: the non-constant operand on the left, the constant on the
//! right. Compares between two constants fold to a boolean; compares
//! with no constant side are reported as-is for the OSR-level fallback.

use crate::ir::{DataLayout, Function, Predicate, Value};

/// A compare in canonical `free <pred> known` form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalCmp {
    /// The non-constant operand
    pub free: Value,
    /// Operand index of `free` in the original compare (0 = lhs, 1 = rhs)
    pub free_index: usize,
    /// The constant side, truncated to the operand width
    pub known: u64,
    /// Width of the compared operands in bits
    pub bits: u8,
    pub predicate: Predicate,
}

/// Outcome of canonicalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canonicalized {
    /// One side is constant; the rewritten compare
    Cmp(CanonicalCmp),
    /// Both sides are constant; the compare folds to this value
    Folded(bool),
    /// Neither side is an IR constant
    Unresolved,
}

pub fn canonicalize(
    func: &Function,
    pred: Predicate,
    lhs: Value,
    rhs: Value,
) -> Canonicalized {
    let bits = func.value_bits(lhs);
    match (func.const_value(lhs), func.const_value(rhs)) {
        (Some(l), Some(r)) => Canonicalized::Folded(evaluate(pred, l, r, bits)),
        (None, Some(known)) => Canonicalized::Cmp(CanonicalCmp {
            free: lhs,
            free_index: 0,
            known,
            bits,
            predicate: pred,
        }),
        (Some(known), None) => Canonicalized::Cmp(CanonicalCmp {
            free: rhs,
            free_index: 1,
            known,
            bits,
            predicate: pred.swapped(),
        }),
        (None, None) => Canonicalized::Unresolved,
    }
}

/// Evaluate a predicate over two constant bit patterns of the given width
pub fn evaluate(pred: Predicate, lhs: u64, rhs: u64, bits: u8) -> bool {
    let (ul, ur) = (
        DataLayout::zero_extend(lhs, bits),
        DataLayout::zero_extend(rhs, bits),
    );
    let (sl, sr) = (
        DataLayout::sign_extend(lhs, bits) as i64,
        DataLayout::sign_extend(rhs, bits) as i64,
    );
    match pred {
        Predicate::Eq => ul == ur,
        Predicate::Ne => ul != ur,
        Predicate::Ult => ul < ur,
        Predicate::Ule => ul <= ur,
        Predicate::Ugt => ul > ur,
        Predicate::Uge => ul >= ur,
        Predicate::Slt => sl < sr,
        Predicate::Sle => sl <= sr,
        Predicate::Sgt => sl > sr,
        Predicate::Sge => sl >= sr,
    }
}

#[cfg(test)]
mod tests;
