use super::*;
use crate::ir::Predicate;

#[test]
fn test_constant_on_right_kept_as_is() {
    let mut func = Function::new();
    let x = func.alloc_param(32);
    let k = func.const_int(7, 32);
    let got = canonicalize(&func, Predicate::Ult, x, k);
    assert_eq!(
        got,
        Canonicalized::Cmp(CanonicalCmp {
            free: x,
            free_index: 0,
            known: 7,
            bits: 32,
            predicate: Predicate::Ult,
        })
    );
}

#[test]
fn test_constant_on_left_swaps_predicate() {
    let mut func = Function::new();
    let x = func.alloc_param(32);
    let k = func.const_int(7, 32);
    let got = canonicalize(&func, Predicate::Ult, k, x);
    assert_eq!(
        got,
        Canonicalized::Cmp(CanonicalCmp {
            free: x,
            free_index: 1,
            known: 7,
            bits: 32,
            predicate: Predicate::Ugt,
        })
    );
}

#[test]
fn test_two_constant_compare_folds() {
    let mut func = Function::new();
    let three = func.const_int(3, 32);
    let five = func.const_int(5, 32);
    assert_eq!(
        canonicalize(&func, Predicate::Slt, three, five),
        Canonicalized::Folded(true)
    );
    assert_eq!(
        canonicalize(&func, Predicate::Eq, three, five),
        Canonicalized::Folded(false)
    );
}

#[test]
fn test_signed_evaluate_uses_sign_extension() {
    // 0xFF at 8 bits is -1 signed, 255 unsigned.
    assert!(evaluate(Predicate::Slt, 0xFF, 0, 8));
    assert!(evaluate(Predicate::Ugt, 0xFF, 0, 8));
}

#[test]
fn test_unresolved_when_no_constant_side() {
    let mut func = Function::new();
    let x = func.alloc_param(32);
    let y = func.alloc_param(32);
    assert_eq!(
        canonicalize(&func, Predicate::Eq, x, y),
        Canonicalized::Unresolved
    );
}
