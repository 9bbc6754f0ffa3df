//! Offset shifted range analysis
//!
//! A flow- and path-sensitive abstract interpretation over the SSA IR.
//! For every value the analysis computes an [`Osr`], an affine relation
//! `base + factor * x` to another tracked value, and for every
//! `(block, value)` pair a [`BoundedValue`] over-approximating the
//! value's runtime range in that block.
//!
//! The fixpoint driver walks instructions over a worklist:
//! - arithmetic and casts transfer operand OSRs in closed form
//! - conditional branches and switches push range constraints onto their
//!   successor edges
//! - loads merge the OSRs of their reaching definitions, re-triggering
//!   every subscribed instruction when the merged relation changes
//!
//! Both lattices have finite height and every update is monotone, so the
//! worklist drains.

use std::collections::VecDeque;
use std::fmt;

use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::cfg::Cfg;
use crate::comparison::{self, Canonicalized};
use crate::ir::{BinOp, BlockId, CastOp, DataLayout, Function, Inst, Predicate, Terminator, Value};
use crate::reaching::{DefSite, ReachingDefinitions};

mod bounded_value;
mod bv_map;
mod constraints;
mod osr;

pub use bounded_value::{Bound, BoundedValue, MergePolicy, Signedness};
pub use bv_map::BvMap;
pub use osr::{BvRef, Osr, Solution};

/// Constraint set attached to one branch edge
pub type BvVector = SmallVec<[BoundedValue; 2]>;

/// The analysis instance: fixpoint state plus query results
pub struct Osra {
    layout: DataLayout,
    blacklist: FxHashSet<BlockId>,
    cfg: Cfg,
    defs: FxHashMap<Value, (BlockId, usize)>,
    users: FxHashMap<Value, Vec<(BlockId, usize)>>,
    rd: ReachingDefinitions,

    osrs: FxHashMap<Value, Osr>,
    bvs: BvMap,
    /// Latest constraints extracted per compare instruction (taken edge)
    constraints: FxHashMap<Value, BvVector>,
    /// Load -> (reaching definition, OSR as seen at the definition)
    load_reachers: FxHashMap<Value, Vec<(DefSite, Osr)>>,
    /// Load -> instruction sites whose OSR depended on the load
    subscriptions: FxHashMap<Value, FxHashSet<(BlockId, usize)>>,

    worklist: VecDeque<(BlockId, usize)>,
    queued: FxHashSet<(BlockId, usize)>,
}

impl Osra {
    /// Run the analysis to fixpoint over a function
    pub fn run(func: &Function, layout: DataLayout, blacklist: FxHashSet<BlockId>) -> Self {
        let cfg = Cfg::build(func);
        let rd = ReachingDefinitions::compute(func, &cfg, &blacklist);
        let mut analysis = Self {
            layout,
            bvs: BvMap::new(blacklist.clone()),
            blacklist,
            defs: func.definitions(),
            users: func.users(),
            rd,
            osrs: FxHashMap::default(),
            constraints: FxHashMap::default(),
            load_reachers: FxHashMap::default(),
            subscriptions: FxHashMap::default(),
            worklist: VecDeque::new(),
            queued: FxHashSet::default(),
            cfg,
        };

        let seeds: Vec<BlockId> = analysis.cfg.rpo.clone();
        for block in seeds {
            analysis.enqueue(block, 0);
        }
        debug!("running range analysis over {} blocks", analysis.cfg.rpo.len());
        analysis.solve(func);
        analysis
    }

    /// Re-enter the fixpoint after the stores feeding `loads` changed
    ///
    /// Recomputes reaching definitions, drops the stale reacher lists and
    /// re-enqueues the loads together with their subscribers; the rest of
    /// the state is reused.
    pub fn reanalyze(&mut self, func: &Function, loads: &[Value]) {
        self.cfg = Cfg::build(func);
        self.defs = func.definitions();
        self.users = func.users();
        self.rd = ReachingDefinitions::compute(func, &self.cfg, &self.blacklist);

        for load in loads {
            self.load_reachers.remove(load);
            if let Some((block, index)) = self.defs.get(load).copied() {
                self.enqueue(block, index);
            }
            if let Some(subscribers) = self.subscriptions.get(load) {
                for (block, index) in subscribers.clone() {
                    self.enqueue(block, index);
                }
            }
        }
        debug!("resuming range analysis for {} invalidated loads", loads.len());
        self.solve(func);
    }

    /// The OSR of a value, if analyzed
    pub fn osr(&self, v: Value) -> Option<&Osr> {
        self.osrs.get(&v)
    }

    /// The bounded value recorded for `value` in `block`, if any
    pub fn bounded_value(&self, block: BlockId, value: Value) -> Option<&BoundedValue> {
        self.bvs.lookup(block, value)
    }

    /// The component a predecessor edge contributed, if any
    pub fn edge_value(
        &self,
        block: BlockId,
        predecessor: BlockId,
        value: Value,
    ) -> Option<&BoundedValue> {
        self.bvs.get_edge(block, predecessor, value)
    }

    /// The constraints last extracted for a compare (taken edge)
    pub fn branch_constraints_of(&self, compare: Value) -> Option<&BvVector> {
        self.constraints.get(&compare)
    }

    /// True iff the store writes CPU state no reader depends on: every
    /// load it reaches has a fully determined OSR
    pub fn is_dead(&self, func: &Function, site: DefSite) -> bool {
        if !matches!(site.inst(func), Inst::Store { .. }) {
            return false;
        }
        self.rd.reached_loads(site).iter().all(|load| {
            let Some(osr) = self.osrs.get(load) else {
                return false;
            };
            match self.bvs.lookup(osr.bv().block, osr.bv().value) {
                Some(bv) => osr.known_constant(bv).is_some(),
                None => osr.factor() == 0,
            }
        })
    }

    /// Split a pair of operands into (constant bit pattern, free operand,
    /// free operand index)
    ///
    /// IR constants are preferred; otherwise an operand whose OSR is fully
    /// determined counts as the constant side.
    pub fn identify_operands(
        &self,
        func: &Function,
        lhs: Value,
        rhs: Value,
    ) -> Option<(u64, Value, usize)> {
        match (func.const_value(lhs), func.const_value(rhs)) {
            (_, Some(c)) => return Some((c, lhs, 0)),
            (Some(c), None) => return Some((c, rhs, 1)),
            (None, None) => {}
        }
        if let Some(c) = self.osr_constant(rhs) {
            return Some((c, lhs, 0));
        }
        if let Some(c) = self.osr_constant(lhs) {
            return Some((c, rhs, 1));
        }
        None
    }

    /// Write a human-readable dump of one value's analysis results
    pub fn describe(&self, f: &mut dyn fmt::Write, v: Value) -> fmt::Result {
        match self.osrs.get(&v) {
            None => writeln!(f, "{}: no relation", v),
            Some(osr) => {
                write!(f, "{} = ", v)?;
                osr.describe(f)?;
                if let Some(bv) = self.bvs.lookup(osr.bv().block, osr.bv().value) {
                    write!(f, ", ")?;
                    bv.describe(f)?;
                }
                writeln!(f)
            }
        }
    }

    /// Write a human-readable dump of every BV recorded for a block
    pub fn describe_block(&self, f: &mut dyn fmt::Write, block: BlockId) -> fmt::Result {
        writeln!(f, "{}:", block)?;
        self.bvs.describe(f, block)
    }

    /// Drop all analysis state
    pub fn release(&mut self) {
        debug!("releasing range analysis state");
        self.osrs.clear();
        self.bvs.clear();
        self.constraints.clear();
        self.load_reachers.clear();
        self.subscriptions.clear();
        self.worklist.clear();
        self.queued.clear();
    }

    fn enqueue(&mut self, block: BlockId, index: usize) {
        if self.blacklist.contains(&block) || !self.cfg.is_reachable(block) {
            return;
        }
        if self.queued.insert((block, index)) {
            trace!("enqueue {} from {}", block, index);
            self.worklist.push_back((block, index));
        }
    }

    fn solve(&mut self, func: &Function) {
        while let Some((block, start)) = self.worklist.pop_front() {
            self.queued.remove(&(block, start));
            let count = func.block(block).instructions.len();
            for index in start..count {
                self.transfer(func, block, index);
            }
            self.process_terminator(func, block);
        }
    }

    /// Per-instruction transfer: compute and store the result OSR
    fn transfer(&mut self, func: &Function, block: BlockId, index: usize) {
        let inst = func.block(block).instructions[index].clone();
        match inst {
            Inst::Binary { dst, op, lhs, rhs } => {
                let osr = self.transfer_binary(func, block, index, dst, op, lhs, rhs);
                self.store_osr(dst, osr);
            }
            Inst::Cast { dst, op, src } => {
                let osr = self.transfer_cast(func, block, index, dst, op, src);
                self.store_osr(dst, osr);
            }
            Inst::Compare { .. } => {
                // Compares are folded into branch constraints lazily.
            }
            Inst::Load { dst, .. } => {
                self.transfer_load(func, block, dst);
            }
            Inst::Store { src, .. } => {
                self.transfer_store(func, block, index, src);
            }
            Inst::Call { dst, .. } => {
                if let Some(dst) = dst {
                    let osr = self.self_osr(func, block, dst);
                    self.store_osr(dst, osr);
                }
            }
            Inst::Phi { dst, args } => {
                let osr = self.transfer_phi(func, block, dst, &args);
                self.store_osr(dst, osr);
            }
        }
    }

    fn transfer_binary(
        &mut self,
        func: &Function,
        block: BlockId,
        index: usize,
        dst: Value,
        op: BinOp,
        lhs: Value,
        rhs: Value,
    ) -> Osr {
        let Some((constant, free, free_index)) = self.identify_operands(func, lhs, rhs) else {
            return self.self_osr(func, block, dst);
        };
        self.subscribe_if_load(func, free, block, index);

        let mut osr = self.create_osr(func, free, block);
        if osr.is_relative_to(dst) {
            // A relation expressed in terms of the instruction itself says
            // nothing useful and can loop.
            return self.self_osr(func, block, dst);
        }
        let bounds = {
            let bv = self.bvs.get_copy(func, osr.bv().block, osr.bv().value);
            osr.boundaries(&bv)
        };
        match osr.combine_binary(op, constant, free_index, bounds) {
            Some(_) => osr,
            None => self.self_osr(func, block, dst),
        }
    }

    fn transfer_cast(
        &mut self,
        func: &Function,
        block: BlockId,
        index: usize,
        dst: Value,
        op: CastOp,
        src: Value,
    ) -> Osr {
        self.subscribe_if_load(func, src, block, index);
        let mut osr = self.create_osr(func, src, block);
        if osr.is_relative_to(dst) {
            return self.self_osr(func, block, dst);
        }
        // Pointer casts evaluate at the target pointer width.
        let to_bits = match op {
            CastOp::IntToPtr => self.layout.pointer_bits,
            _ => func.value_bits(dst),
        };
        osr.combine_cast(op, to_bits);
        match op {
            CastOp::SExt => {
                self.bvs
                    .set_signedness(func, osr.bv().block, osr.bv().value, true);
            }
            CastOp::ZExt => {
                self.bvs
                    .set_signedness(func, osr.bv().block, osr.bv().value, false);
            }
            _ => {}
        }
        osr
    }

    fn transfer_load(&mut self, func: &Function, block: BlockId, dst: Value) {
        let sites: Vec<DefSite> = self.rd.reaching(dst).to_vec();
        if sites.is_empty() {
            let osr = self.self_osr(func, block, dst);
            self.store_osr(dst, osr);
            return;
        }
        for site in sites {
            let def_osr = match site.inst(func).clone() {
                Inst::Store { src, .. } => {
                    if src == dst {
                        continue;
                    }
                    self.create_osr(func, src, site.block)
                }
                Inst::Load { dst: other, .. } => {
                    if other == dst {
                        // The load reaching itself around a loop adds no
                        // information.
                        continue;
                    }
                    self.create_osr(func, other, site.block)
                }
                _ => continue,
            };
            self.update_load_reacher(dst, site, def_osr);
        }
        let merged = self.merge_load_reachers(func, dst, block);
        self.store_osr(dst, merged);
    }

    fn transfer_store(&mut self, func: &Function, block: BlockId, index: usize, src: Value) {
        self.subscribe_if_load(func, src, block, index);
        let site = DefSite { block, index };
        let src_osr = self.create_osr(func, src, block);
        for load in self.rd.reached_loads(site).to_vec() {
            if load == src {
                continue;
            }
            if self.update_load_reacher(load, site, src_osr) {
                let Some((load_block, _)) = self.defs.get(&load).copied() else {
                    continue;
                };
                let merged = self.merge_load_reachers(func, load, load_block);
                self.store_osr(load, merged);
            }
        }
    }

    fn transfer_phi(
        &mut self,
        func: &Function,
        block: BlockId,
        dst: Value,
        args: &[(BlockId, Value)],
    ) -> Osr {
        let mut merged: Option<Osr> = None;
        for (pred, v) in args {
            if self.blacklist.contains(pred) || !self.cfg.is_reachable(*pred) {
                continue;
            }
            let incoming = self.create_osr(func, *v, *pred).rebased(block);
            self.bvs.get(func, block, incoming.bv().value);
            if incoming.is_relative_to(dst) {
                return self.self_osr(func, block, dst);
            }
            match merged {
                None => merged = Some(incoming),
                Some(existing) if existing == incoming => {}
                Some(_) => return self.self_osr(func, block, dst),
            }
        }
        match merged {
            Some(osr) => osr,
            None => self.self_osr(func, block, dst),
        }
    }

    /// Store the OSR computed for a value; on change, re-enqueue its
    /// users and, for loads, its subscribers
    fn store_osr(&mut self, v: Value, osr: Osr) {
        if self.osrs.get(&v) == Some(&osr) {
            return;
        }
        trace!("osr({}) <- {}", v, osr);
        self.osrs.insert(v, osr);
        if let Some(sites) = self.users.get(&v).cloned() {
            for (block, index) in sites {
                self.enqueue(block, index);
            }
        }
        if let Some(subscribers) = self.subscriptions.get(&v).cloned() {
            for (block, index) in subscribers {
                self.enqueue(block, index);
            }
        }
    }

    /// A copy of the OSR associated with `v` as seen from `block`,
    /// created on first query
    fn create_osr(&mut self, func: &Function, v: Value, block: BlockId) -> Osr {
        if let Some(osr) = self.osrs.get(&v).copied() {
            let rebased = osr.rebased(block);
            self.bvs.get(func, block, rebased.bv().value);
            return rebased;
        }
        let bits = func.value_bits(v);
        self.bvs.get(func, block, v);
        let bv = BvRef { block, value: v };
        match func.const_value(v) {
            Some(c) => Osr::constant(c, bv, bits),
            None => Osr::new(bv, bits),
        }
    }

    /// The unconstrained OSR `0 + 1 * v`
    fn self_osr(&mut self, func: &Function, block: BlockId, v: Value) -> Osr {
        self.bvs.get(func, block, v);
        Osr::new(
            BvRef { block, value: v },
            func.value_bits(v),
        )
    }

    fn osr_constant(&self, v: Value) -> Option<u64> {
        let osr = self.osrs.get(&v)?;
        let bv = self.bvs.lookup(osr.bv().block, osr.bv().value)?;
        osr.known_constant(bv)
    }

    fn is_load(&self, func: &Function, v: Value) -> bool {
        self.defs
            .get(&v)
            .is_some_and(|(block, index)| {
                matches!(
                    func.block(*block).instructions[*index],
                    Inst::Load { .. }
                )
            })
    }

    fn subscribe_if_load(&mut self, func: &Function, operand: Value, block: BlockId, index: usize) {
        if self.is_load(func, operand) {
            self.subscriptions
                .entry(operand)
                .or_default()
                .insert((block, index));
        }
    }

    /// Upsert one `(definition, OSR)` pair for a load; true when the
    /// recorded OSR changed
    fn update_load_reacher(&mut self, load: Value, site: DefSite, new_osr: Osr) -> bool {
        let reachers = self.load_reachers.entry(load).or_default();
        match reachers.iter_mut().find(|(existing, _)| *existing == site) {
            Some((_, osr)) => {
                if *osr == new_osr {
                    false
                } else {
                    *osr = new_osr;
                    true
                }
            }
            None => {
                reachers.push((site, new_osr));
                true
            }
        }
    }

    /// Unify a load's reacher list into a single OSR at the load's block
    fn merge_load_reachers(&mut self, func: &Function, load: Value, load_block: BlockId) -> Osr {
        let bits = func.value_bits(load);
        let reachers = self.load_reachers.get(&load).cloned().unwrap_or_default();
        if reachers.is_empty() {
            return self.self_osr(func, load_block, load);
        }

        let rebased: Vec<Osr> = reachers
            .iter()
            .map(|(_, osr)| osr.rebased(load_block))
            .collect();
        for osr in &rebased {
            self.bvs.get(func, load_block, osr.bv().value);
        }

        let first = rebased[0];
        if rebased.iter().all(|osr| *osr == first) {
            trace!("load {}: single reaching relation {}", load, first);
            return first;
        }

        // Constant reachers with a common stride: base + stride * k with a
        // fresh [0, n-1] index variable bound to the load itself.
        if rebased.iter().all(|osr| osr.factor() == 0) {
            let mut bases: Vec<u64> = rebased.iter().map(|osr| osr.base()).collect();
            bases.sort_unstable();
            bases.dedup();
            if bases.len() == 1 {
                // Distinct constant values that agree: one constant relation.
                self.bvs.get(func, load_block, load);
                return Osr::constant(
                    bases[0],
                    BvRef {
                        block: load_block,
                        value: load,
                    },
                    bits,
                );
            }
            if bases.len() > 1 {
                let stride = bases[1] - bases[0];
                let strided = stride > 0
                    && bases.windows(2).all(|pair| pair[1] - pair[0] == stride);
                if strided {
                    let count = bases.len() as u64;
                    let index_bv = BoundedValue::create_le(load, count - 1, false);
                    self.bvs.force_bv(load_block, load, index_bv);
                    trace!(
                        "load {}: {} strided reachers, {} + {} * k",
                        load, count, bases[0], stride
                    );
                    return Osr::strided(
                        bases[0],
                        stride,
                        BvRef {
                            block: load_block,
                            value: load,
                        },
                        bits,
                    );
                }
            }
        }

        trace!("load {}: reachers do not unify", load);
        self.self_osr(func, load_block, load)
    }

    /// Handle a block terminator: extract and push branch constraints
    fn process_terminator(&mut self, func: &Function, block: BlockId) {
        match func.block(block).terminator.clone() {
            Terminator::Branch {
                cond,
                if_true,
                if_false,
            } => {
                let Some((taken, not_taken)) = self.branch_constraints(func, cond, block) else {
                    return;
                };
                self.constraints.insert(cond, taken.clone());
                let mut changed_true = false;
                for bv in &taken {
                    changed_true |= self.bvs.update(func, if_true, block, *bv);
                }
                let mut changed_false = false;
                for bv in &not_taken {
                    changed_false |= self.bvs.update(func, if_false, block, *bv);
                }
                if changed_true {
                    self.enqueue(if_true, 0);
                }
                if changed_false {
                    self.enqueue(if_false, 0);
                }
            }
            Terminator::Switch {
                value,
                cases,
                default,
            } => {
                self.process_switch(func, block, value, &cases, default);
            }
            Terminator::Jump { .. } | Terminator::Return { .. } | Terminator::Unreachable => {}
        }
    }

    /// Per-case equality constraints; the default edge receives the
    /// complement, the meet of the negations
    fn process_switch(
        &mut self,
        func: &Function,
        block: BlockId,
        value: Value,
        cases: &[(u64, BlockId)],
        default: BlockId,
    ) {
        let osr = self.create_osr(func, value, block);
        let x = osr.bv().value;
        let mut default_changed = false;
        for (case, target) in cases {
            let constraint = match osr.solve_equation(*case, false) {
                Some(Solution { value, exact: true }) => BoundedValue::create_eq(x, value, false),
                Some(Solution { exact: false, .. }) => BoundedValue::create_bottom(x),
                // Constant dispatch value: nothing to narrow.
                None => continue,
            };
            if self.bvs.update(func, *target, block, constraint) {
                self.enqueue(*target, 0);
            }
            if !constraint.is_bottom() {
                let mut flipped = constraint;
                flipped.flip();
                default_changed |= self.bvs.update(func, default, block, flipped);
            }
        }
        if default_changed {
            self.enqueue(default, 0);
        }
    }

    /// Turn the compare guarding a branch into constraint vectors for the
    /// taken and not-taken edges
    fn branch_constraints(
        &mut self,
        func: &Function,
        cond: Value,
        block: BlockId,
    ) -> Option<(BvVector, BvVector)> {
        let (pred, lhs, rhs) = match self.defs.get(&cond) {
            Some((def_block, index)) => match &func.block(*def_block).instructions[*index] {
                Inst::Compare { pred, lhs, rhs, .. } => (*pred, *lhs, *rhs),
                _ => return None,
            },
            None => return None,
        };

        let canonical = match comparison::canonicalize(func, pred, lhs, rhs) {
            Canonicalized::Cmp(c) => c,
            Canonicalized::Folded(_) => return None,
            Canonicalized::Unresolved => {
                // Fall back to operands whose OSR pins them to a constant.
                let (known, free, free_index) = self.identify_operands(func, lhs, rhs)?;
                let predicate = if free_index == 0 { pred } else { pred.swapped() };
                comparison::CanonicalCmp {
                    free,
                    free_index,
                    known,
                    bits: func.value_bits(free),
                    predicate,
                }
            }
        };

        let osr = self.create_osr(func, canonical.free, block);
        let x = osr.bv().value;
        if !canonical.predicate.is_equality() {
            self.bvs
                .set_signedness(func, block, x, canonical.predicate.is_signed());
        }

        let known64 = if canonical.predicate.is_signed() {
            DataLayout::sign_extend(canonical.known, canonical.bits)
        } else {
            DataLayout::zero_extend(canonical.known, canonical.bits)
        };

        let mut taken = BvVector::new();
        if let Some(constraint) =
            constraints::on_free_variable(&osr, canonical.predicate, known64, x)
        {
            // Constrain every value whose relation is expressed in x.
            if !constraint.is_bottom() {
                for (v, other) in &self.osrs {
                    if *v != x && other.is_relative_to(x) && other.factor() != 0 {
                        let moved = other.apply(&constraint, *v);
                        if !moved.is_top() && moved.value() == *v {
                            taken.push(moved);
                        }
                    }
                }
            }
            taken.push(constraint);
        }

        let not_taken: BvVector = taken
            .iter()
            .filter(|bv| !bv.is_bottom())
            .map(|bv| {
                let mut flipped = *bv;
                flipped.flip();
                flipped
            })
            .collect();

        Some((taken, not_taken))
    }
}
