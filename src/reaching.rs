//! Reaching definitions for CPU-state locations
//!
//! Computes, for every load, the set of definitions of its location that
//! may flow to it. A definition is a store to the location or an earlier
//! load from it (a load republishes the value it observed); definitions
//! of the same location kill one another.
//!
//! Standard gen/kill worklist over the CFG:
//! - `GEN[B]` = last definition of each location inside B
//! - `KILL[B]` = every other definition of the locations B defines
//! - `IN[B]` = union of `OUT[P]` over non-blacklisted predecessors
//! - `OUT[B]` = GEN[B] ∪ (IN[B] − KILL[B])

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cfg::Cfg;
use crate::ir::{BlockId, Function, Inst, Location, Value};

/// Position of a defining instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefSite {
    pub block: BlockId,
    pub index: usize,
}

impl DefSite {
    /// The instruction at this site
    pub fn inst<'f>(&self, func: &'f Function) -> &'f Inst {
        &func.block(self.block).instructions[self.index]
    }
}

/// Reaching-definitions results, queryable per load
#[derive(Debug, Default)]
pub struct ReachingDefinitions {
    /// Load result value -> definitions that may reach the load
    reaching: FxHashMap<Value, Vec<DefSite>>,
    /// Definition -> loads it may reach
    reached: FxHashMap<DefSite, Vec<Value>>,
}

impl ReachingDefinitions {
    pub fn compute(func: &Function, cfg: &Cfg, blacklist: &FxHashSet<BlockId>) -> Self {
        let mut defs: Vec<(DefSite, Location)> = Vec::new();
        let mut defs_of_location: FxHashMap<Location, Vec<usize>> = FxHashMap::default();
        for block in &func.blocks {
            for (index, inst) in block.instructions.iter().enumerate() {
                let location = match inst {
                    Inst::Store { location, .. } | Inst::Load { location, .. } => *location,
                    _ => continue,
                };
                let id = defs.len();
                defs.push((
                    DefSite {
                        block: block.id,
                        index,
                    },
                    location,
                ));
                defs_of_location.entry(location).or_default().push(id);
            }
        }

        let mut gen_sets: FxHashMap<BlockId, FxHashSet<usize>> = FxHashMap::default();
        let mut kill_sets: FxHashMap<BlockId, FxHashSet<usize>> = FxHashMap::default();
        for block in &func.blocks {
            let mut last_def: FxHashMap<Location, usize> = FxHashMap::default();
            for (id, (site, location)) in defs.iter().enumerate() {
                if site.block == block.id {
                    last_def.insert(*location, id);
                }
            }
            let gen_set: FxHashSet<usize> = last_def.values().copied().collect();
            let mut kill_set = FxHashSet::default();
            for location in last_def.keys() {
                for &id in &defs_of_location[location] {
                    if !gen_set.contains(&id) {
                        kill_set.insert(id);
                    }
                }
            }
            gen_sets.insert(block.id, gen_set);
            kill_sets.insert(block.id, kill_set);
        }

        let mut in_sets: FxHashMap<BlockId, FxHashSet<usize>> = FxHashMap::default();
        let mut out_sets: FxHashMap<BlockId, FxHashSet<usize>> = FxHashMap::default();
        let mut worklist: VecDeque<BlockId> = cfg.rpo.iter().copied().collect();
        let mut queued: FxHashSet<BlockId> = worklist.iter().copied().collect();

        while let Some(block) = worklist.pop_front() {
            queued.remove(&block);
            if blacklist.contains(&block) {
                continue;
            }

            let mut in_set = FxHashSet::default();
            for pred in cfg.preds(block) {
                if blacklist.contains(pred) {
                    continue;
                }
                if let Some(out) = out_sets.get(pred) {
                    in_set.extend(out.iter().copied());
                }
            }

            let mut out_set: FxHashSet<usize> = in_set
                .iter()
                .copied()
                .filter(|id| !kill_sets[&block].contains(id))
                .collect();
            out_set.extend(gen_sets[&block].iter().copied());

            in_sets.insert(block, in_set);
            let changed = out_sets.get(&block) != Some(&out_set);
            out_sets.insert(block, out_set);
            if changed {
                for succ in cfg.succs(block) {
                    if queued.insert(*succ) {
                        worklist.push_back(*succ);
                    }
                }
            }
        }

        // Walk each block with the live per-location view to resolve loads.
        let mut reaching: FxHashMap<Value, Vec<DefSite>> = FxHashMap::default();
        let mut reached: FxHashMap<DefSite, Vec<Value>> = FxHashMap::default();
        for block in &func.blocks {
            if blacklist.contains(&block.id) || !cfg.is_reachable(block.id) {
                continue;
            }
            let mut live: FxHashMap<Location, Vec<usize>> = FxHashMap::default();
            if let Some(in_set) = in_sets.get(&block.id) {
                for &id in in_set {
                    live.entry(defs[id].1).or_default().push(id);
                }
            }
            for (index, inst) in block.instructions.iter().enumerate() {
                match inst {
                    Inst::Load { dst, location } => {
                        let mut sites: Vec<DefSite> = live
                            .get(location)
                            .map(|ids| ids.iter().map(|&id| defs[id].0).collect())
                            .unwrap_or_default();
                        sites.sort();
                        sites.dedup();
                        for site in &sites {
                            reached.entry(*site).or_default().push(*dst);
                        }
                        reaching.insert(*dst, sites);

                        let id = defs
                            .iter()
                            .position(|(site, _)| {
                                site.block == block.id && site.index == index
                            })
                            .expect("load is a definition");
                        live.insert(*location, vec![id]);
                    }
                    Inst::Store { location, .. } => {
                        let id = defs
                            .iter()
                            .position(|(site, _)| {
                                site.block == block.id && site.index == index
                            })
                            .expect("store is a definition");
                        live.insert(*location, vec![id]);
                    }
                    _ => {}
                }
            }
        }

        Self { reaching, reached }
    }

    /// Definitions that may reach the given load (identified by its result)
    pub fn reaching(&self, load: Value) -> &[DefSite] {
        self.reaching
            .get(&load)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Loads a definition may reach
    pub fn reached_loads(&self, def: DefSite) -> &[Value] {
        self.reached.get(&def).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All loads with at least one reaching definition
    pub fn loads(&self) -> impl Iterator<Item = Value> + '_ {
        self.reaching.keys().copied()
    }
}
