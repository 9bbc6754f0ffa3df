use super::*;

#[test]
fn test_const_interning_dedups_by_value_and_width() {
    let mut func = Function::new();
    let a = func.const_int(7, 32);
    let b = func.const_int(7, 32);
    let c = func.const_int(7, 64);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(func.const_value(a), Some(7));
    assert_eq!(func.value_bits(a), 32);
}

#[test]
fn test_const_interning_truncates_to_width() {
    let mut func = Function::new();
    let a = func.const_int(0x1_0000_0001, 32);
    assert_eq!(func.const_value(a), Some(1));
}

#[test]
fn test_successors_cover_switch_cases_and_default() {
    let mut func = Function::new();
    let entry = func.alloc_block();
    let a = func.alloc_block();
    let b = func.alloc_block();
    let dflt = func.alloc_block();
    let v = func.alloc_param(32);
    func.set_terminator(
        entry,
        Terminator::Switch {
            value: v,
            cases: vec![(1, a), (2, b)],
            default: dflt,
        },
    );
    assert_eq!(func.block(entry).successors(), vec![a, b, dflt]);
}

#[test]
fn test_validate_rejects_misplaced_phi() {
    let mut func = Function::new();
    let entry = func.alloc_block();
    let x = func.alloc_param(32);
    let y = func.alloc_value(32);
    let phi = func.alloc_value(32);
    func.push(
        entry,
        Inst::Binary {
            dst: y,
            op: BinOp::Add,
            lhs: x,
            rhs: x,
        },
    );
    func.push(
        entry,
        Inst::Phi {
            dst: phi,
            args: vec![(entry, x)],
        },
    );
    func.set_terminator(entry, Terminator::Return { val: None });
    assert_eq!(func.validate(), Err(IrError::MisplacedPhi(phi)));
}

#[test]
fn test_validate_rejects_wide_branch_condition() {
    let mut func = Function::new();
    let entry = func.alloc_block();
    let exit = func.alloc_block();
    let cond = func.alloc_param(32);
    func.set_terminator(
        entry,
        Terminator::Branch {
            cond,
            if_true: exit,
            if_false: exit,
        },
    );
    func.set_terminator(exit, Terminator::Return { val: None });
    assert_eq!(func.validate(), Err(IrError::BadCondition(cond, 32)));
}

#[test]
fn test_validate_rejects_load_width_mismatch() {
    let mut func = Function::new();
    let entry = func.alloc_block();
    let loc = func.alloc_location(64);
    let dst = func.alloc_value(32);
    func.push(entry, Inst::Load { dst, location: loc });
    func.set_terminator(entry, Terminator::Return { val: None });
    assert_eq!(
        func.validate(),
        Err(IrError::WidthMismatch {
            inst: dst,
            location: loc,
            got: 32,
            want: 64,
        })
    );
}

#[test]
fn test_layout_sign_extend() {
    assert_eq!(DataLayout::sign_extend(0xFF, 8), u64::MAX);
    assert_eq!(DataLayout::sign_extend(0x7F, 8), 0x7F);
    assert_eq!(DataLayout::sign_extend(0x8000_0000, 32), 0xFFFF_FFFF_8000_0000);
}

#[test]
fn test_layout_truncate_is_mod_two_pow_bits() {
    assert_eq!(DataLayout::truncate(0x1FF, 8), 0xFF);
    assert_eq!(DataLayout::truncate(u64::MAX, 64), u64::MAX);
    assert_eq!(DataLayout::wrapping_add(0xFF, 1, 8), 0);
    assert_eq!(DataLayout::wrapping_sub(0, 1, 8), 0xFF);
}
