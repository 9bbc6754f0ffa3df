//! Constraint construction from canonical compares
//!
//! Given `base + factor * x <pred> k`, derive the bound the taken edge
//! imposes on `x`. Rounding directions follow the sign of the factor so
//! the derived bound never excludes an admissible value; an equality
//! with no integer solution marks the taken edge unreachable.

use crate::ir::{DataLayout, Predicate, Value};

use super::bounded_value::BoundedValue;
use super::osr::{Osr, Solution};

/// The taken-edge constraint on the free variable implied by
/// `osr <pred> known`
///
/// `known` is the comparison constant extended to 64 bits under the
/// predicate's signedness. `None` when no bound can be derived (the
/// relation is constant, or the predicate is trivially true); a ⊥
/// constraint when the taken edge is infeasible.
pub(super) fn on_free_variable(
    osr: &Osr,
    pred: Predicate,
    known: u64,
    x: Value,
) -> Option<BoundedValue> {
    let signed = pred.is_signed();
    let bits = osr.bits();
    let extend = |v: u64| {
        if signed {
            DataLayout::sign_extend(v, bits)
        } else {
            DataLayout::zero_extend(v, bits)
        }
    };

    match pred {
        Predicate::Eq => match osr.solve_equation(known, false) {
            Some(Solution { value, exact: true }) => {
                Some(BoundedValue::create_eq(x, extend(value), signed))
            }
            Some(Solution { exact: false, .. }) => Some(BoundedValue::create_bottom(x)),
            None => None,
        },
        Predicate::Ne => match osr.solve_equation(known, false) {
            Some(Solution { value, exact: true }) => {
                Some(BoundedValue::create_ne(x, extend(value), signed))
            }
            // No integer ever satisfies the equality: always true.
            Some(Solution { exact: false, .. }) => None,
            None => None,
        },
        _ => {
            let factor = DataLayout::sign_extend(osr.factor(), bits) as i64;
            if factor == 0 {
                return None;
            }
            let negative = factor < 0;

            // For a positive factor, `o < k` bounds x from above and `o > k`
            // from below; a negative factor mirrors the direction. Rounding
            // is chosen so the integer bound is never tighter than the
            // rational one.
            enum Dir {
                Le,
                Ge,
            }
            let (dir, solution) = match pred {
                Predicate::Ult | Predicate::Slt => {
                    if !negative {
                        (Dir::Le, shift(osr.solve_equation(known, true), -1, bits))
                    } else {
                        (Dir::Ge, shift(osr.solve_equation(known, false), 1, bits))
                    }
                }
                Predicate::Ule | Predicate::Sle => {
                    if !negative {
                        (Dir::Le, osr.solve_equation(known, false))
                    } else {
                        (Dir::Ge, osr.solve_equation(known, true))
                    }
                }
                Predicate::Ugt | Predicate::Sgt => {
                    if !negative {
                        (Dir::Ge, shift(osr.solve_equation(known, false), 1, bits))
                    } else {
                        (Dir::Le, shift(osr.solve_equation(known, true), -1, bits))
                    }
                }
                Predicate::Uge | Predicate::Sge => {
                    if !negative {
                        (Dir::Ge, osr.solve_equation(known, true))
                    } else {
                        (Dir::Le, osr.solve_equation(known, false))
                    }
                }
                Predicate::Eq | Predicate::Ne => unreachable!(),
            };
            let bound = extend(solution?.value);
            Some(match dir {
                Dir::Le => BoundedValue::create_le(x, bound, signed),
                Dir::Ge => BoundedValue::create_ge(x, bound, signed),
            })
        }
    }
}

/// Adjust a solution by ±1, wrapping at the given width
fn shift(solution: Option<Solution>, delta: i64, bits: u8) -> Option<Solution> {
    solution.map(|s| Solution {
        value: DataLayout::wrapping_add(s.value, delta as u64, bits),
        ..s
    })
}
