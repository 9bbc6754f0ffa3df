//! End-to-end scenarios for the range analysis
//!
//! Each test builds a small function, runs the analysis to fixpoint and
//! checks the resulting relations and ranges.

use rustc_hash::FxHashSet;

use osra::ir::{BinOp, CastOp, DataLayout, Function, Inst, Predicate, Terminator};
use osra::{Osra, Signedness};

fn analyze(func: &Function) -> Osra {
    let _ = env_logger::builder().is_test(true).try_init();
    func.validate().expect("well-formed IR");
    Osra::run(func, DataLayout::default(), FxHashSet::default())
}

#[test]
fn linear_induction_variable_is_bounded_by_its_guard() {
    // entry -> header; header: i = phi(0 from entry, i + 1 from header);
    // branch (i < 10) back to header, else exit.
    let mut func = Function::with_name("induction");
    let entry = func.alloc_block();
    let header = func.alloc_block();
    let exit = func.alloc_block();
    let zero = func.const_int(0, 64);
    let one = func.const_int(1, 64);
    let ten = func.const_int(10, 64);

    let i = func.alloc_value(64);
    let i_next = func.alloc_value(64);
    let cond = func.alloc_value(1);

    func.set_terminator(entry, Terminator::Jump { target: header });
    func.push(
        header,
        Inst::Phi {
            dst: i,
            args: vec![(entry, zero), (header, i_next)],
        },
    );
    func.push(
        header,
        Inst::Binary {
            dst: i_next,
            op: BinOp::Add,
            lhs: i,
            rhs: one,
        },
    );
    func.push(
        header,
        Inst::Compare {
            dst: cond,
            pred: Predicate::Ult,
            lhs: i,
            rhs: ten,
        },
    );
    func.set_terminator(
        header,
        Terminator::Branch {
            cond,
            if_true: header,
            if_false: exit,
        },
    );
    func.set_terminator(exit, Terminator::Return { val: None });

    let osra = analyze(&func);

    // The induction variable stays its own free variable.
    let osr_i = osra.osr(i).expect("analyzed");
    assert_eq!((osr_i.base(), osr_i.factor()), (0, 1));
    assert!(osr_i.is_relative_to(i));

    // i + 1 is an affine step off i.
    let osr_next = osra.osr(i_next).expect("analyzed");
    assert_eq!((osr_next.base(), osr_next.factor()), (1, 1));
    assert!(osr_next.is_relative_to(i));

    // The loop guard bounds i to [0, 9] unsigned inside the loop.
    let bv = osra.bounded_value(header, i).expect("guard constraint");
    assert_eq!(bv.signedness(), Signedness::Unsigned);
    assert_eq!((bv.lower(), bv.upper()), (0, 9));

    // Falling out of the loop means i >= 10.
    let at_exit = osra.bounded_value(exit, i).expect("exit constraint");
    assert_eq!(at_exit.lower(), 10);
}

#[test]
fn sign_extended_constant_stays_constant() {
    let mut func = Function::with_name("sext-constant");
    let entry = func.alloc_block();
    let five = func.const_int(5, 32);
    let x = func.alloc_value(64);
    func.push(
        entry,
        Inst::Cast {
            dst: x,
            op: CastOp::SExt,
            src: five,
        },
    );
    func.set_terminator(entry, Terminator::Return { val: None });

    let osra = analyze(&func);
    let osr = osra.osr(x).expect("analyzed");
    assert_eq!(osr.factor(), 0);
    assert_eq!(osr.base(), 5);
    assert_eq!(osr.bits(), 64);
}

#[test]
fn equality_branch_narrows_to_singleton_and_co_interval() {
    let mut func = Function::with_name("eq-branch");
    let entry = func.alloc_block();
    let equal = func.alloc_block();
    let other = func.alloc_block();
    let x = func.alloc_param(64);
    let seven = func.const_int(7, 64);
    let cond = func.alloc_value(1);
    func.push(
        entry,
        Inst::Compare {
            dst: cond,
            pred: Predicate::Eq,
            lhs: x,
            rhs: seven,
        },
    );
    func.set_terminator(
        entry,
        Terminator::Branch {
            cond,
            if_true: equal,
            if_false: other,
        },
    );
    func.set_terminator(equal, Terminator::Return { val: None });
    func.set_terminator(other, Terminator::Return { val: None });

    let osra = analyze(&func);

    let at_equal = osra.bounded_value(equal, x).expect("singleton");
    assert!(at_equal.is_constant());
    assert_eq!(at_equal.lower(), 7);

    let at_other = osra.bounded_value(other, x).expect("co-interval");
    assert!(at_other.is_negated());
    assert_eq!((at_other.lower(), at_other.upper()), (7, 7));
    assert!(!at_other.is_single_range());
}

#[test]
fn switch_narrows_each_case_and_the_default() {
    let mut func = Function::with_name("dispatch");
    let entry = func.alloc_block();
    let s = func.alloc_param(64);
    let targets: Vec<_> = (0..3).map(|_| func.alloc_block()).collect();
    let default = func.alloc_block();
    func.set_terminator(
        entry,
        Terminator::Switch {
            value: s,
            cases: vec![(1, targets[0]), (2, targets[1]), (5, targets[2])],
            default,
        },
    );
    for block in targets.iter().chain([&default]) {
        func.set_terminator(*block, Terminator::Return { val: None });
    }

    let osra = analyze(&func);

    for (case, target) in [(1u64, targets[0]), (2, targets[1]), (5, targets[2])] {
        let bv = osra.bounded_value(target, s).expect("case constraint");
        assert!(bv.is_constant());
        assert_eq!(bv.lower(), case);
    }

    // The default edge meets the three exclusions; the disjoint third one
    // is dropped by the safe co-interval approximation.
    let bv = osra.bounded_value(default, s).expect("default constraint");
    assert!(bv.is_negated());
    assert_eq!((bv.lower(), bv.upper()), (1, 2));
}

#[test]
fn two_strided_stores_merge_into_an_indexed_relation() {
    // One path stores 0, the other 16; the load sees 0 + 16 * k with
    // k in [0, 1].
    let mut func = Function::with_name("strided-load");
    let entry = func.alloc_block();
    let left = func.alloc_block();
    let right = func.alloc_block();
    let join = func.alloc_block();
    let loc = func.alloc_location(64);
    let zero = func.const_int(0, 64);
    let sixteen = func.const_int(16, 64);
    let cond = func.alloc_param(1);

    func.set_terminator(
        entry,
        Terminator::Branch {
            cond,
            if_true: left,
            if_false: right,
        },
    );
    func.push(left, Inst::Store { location: loc, src: zero });
    func.set_terminator(left, Terminator::Jump { target: join });
    func.push(
        right,
        Inst::Store {
            location: loc,
            src: sixteen,
        },
    );
    func.set_terminator(right, Terminator::Jump { target: join });

    let load = func.alloc_value(64);
    func.push(join, Inst::Load { dst: load, location: loc });
    func.set_terminator(join, Terminator::Return { val: None });

    let osra = analyze(&func);

    let osr = osra.osr(load).expect("analyzed");
    assert_eq!((osr.base(), osr.factor()), (0, 16));
    assert!(osr.is_relative_to(load));

    let index = osra
        .bounded_value(join, load)
        .expect("index variable bounded");
    assert_eq!(index.signedness(), Signedness::Unsigned);
    assert_eq!((index.lower(), index.upper()), (0, 1));
}

#[test]
fn disjoint_stores_without_a_stride_fall_back_to_top() {
    let mut func = Function::with_name("unrelated-load");
    let entry = func.alloc_block();
    let left = func.alloc_block();
    let right = func.alloc_block();
    let join = func.alloc_block();
    let loc = func.alloc_location(64);
    let three = func.const_int(3, 64);
    let x = func.alloc_param(64);
    let cond = func.alloc_param(1);

    func.set_terminator(
        entry,
        Terminator::Branch {
            cond,
            if_true: left,
            if_false: right,
        },
    );
    func.push(left, Inst::Store { location: loc, src: three });
    func.set_terminator(left, Terminator::Jump { target: join });
    func.push(right, Inst::Store { location: loc, src: x });
    func.set_terminator(right, Terminator::Jump { target: join });

    let load = func.alloc_value(64);
    func.push(join, Inst::Load { dst: load, location: loc });
    func.set_terminator(join, Terminator::Return { val: None });

    let osra = analyze(&func);
    let osr = osra.osr(load).expect("analyzed");
    // The reachers do not unify: the load is its own free variable.
    assert_eq!((osr.base(), osr.factor()), (0, 1));
    assert!(osr.is_relative_to(load));
}

#[test]
fn store_change_re_enqueues_subscribers_to_a_new_fixpoint() {
    // sum = load(loc) + 1 depends on the store feeding the load; after
    // the stored constant changes, a targeted re-analysis must converge
    // to the new constant without a fresh analysis instance.
    let mut func = Function::with_name("subscription");
    let entry = func.alloc_block();
    let loc = func.alloc_location(64);
    let zero = func.const_int(0, 64);
    let seven = func.const_int(7, 64);
    let one = func.const_int(1, 64);

    func.push(entry, Inst::Store { location: loc, src: zero });
    let load = func.alloc_value(64);
    func.push(entry, Inst::Load { dst: load, location: loc });
    let sum = func.alloc_value(64);
    func.push(
        entry,
        Inst::Binary {
            dst: sum,
            op: BinOp::Add,
            lhs: load,
            rhs: one,
        },
    );
    func.set_terminator(entry, Terminator::Return { val: None });

    let mut osra = analyze(&func);
    let relation = |osra: &Osra, v| {
        let osr = *osra.osr(v).expect("analyzed");
        (osr.base(), osr.factor())
    };
    assert_eq!(relation(&osra, load), (0, 0));
    assert_eq!(relation(&osra, sum), (1, 0));

    // The host rewrites the store and reports the affected load.
    func.block_mut(entry).instructions[0] = Inst::Store {
        location: loc,
        src: seven,
    };
    func.validate().expect("still well-formed");
    osra.reanalyze(&func, &[load]);

    assert_eq!(relation(&osra, load), (7, 0));
    assert_eq!(relation(&osra, sum), (8, 0));
}

#[test]
fn dead_store_query_tracks_determined_readers() {
    use osra::reaching::DefSite;

    let mut func = Function::with_name("dead-store");
    let entry = func.alloc_block();
    let loc = func.alloc_location(64);
    let three = func.const_int(3, 64);
    func.push(entry, Inst::Store { location: loc, src: three });
    let load = func.alloc_value(64);
    func.push(entry, Inst::Load { dst: load, location: loc });
    func.set_terminator(entry, Terminator::Return { val: None });

    let osra = analyze(&func);
    assert!(osra.is_dead(
        &func,
        DefSite {
            block: entry,
            index: 0
        }
    ));
}

#[test]
fn describe_dumps_are_stable() {
    let mut func = Function::with_name("describe");
    let entry = func.alloc_block();
    let x = func.alloc_param(64);
    let nine = func.const_int(9, 64);
    let taken = func.alloc_block();
    let other = func.alloc_block();
    let cond = func.alloc_value(1);
    func.push(
        entry,
        Inst::Compare {
            dst: cond,
            pred: Predicate::Ule,
            lhs: x,
            rhs: nine,
        },
    );
    func.set_terminator(
        entry,
        Terminator::Branch {
            cond,
            if_true: taken,
            if_false: other,
        },
    );
    func.set_terminator(taken, Terminator::Return { val: None });
    func.set_terminator(other, Terminator::Return { val: None });

    let osra = analyze(&func);
    let mut out = String::new();
    osra.describe_block(&mut out, taken).unwrap();
    assert!(out.contains("[0, 9]"), "unexpected dump: {}", out);
}
