//! Per-(block, value) bounded-value store
//!
//! Each entry carries the per-edge constraint components and their
//! summary, the meet of the components visible at the block entry. An
//! entry is *forced* when its BV was set directly by an instruction
//! transfer; forced entries are never re-summarized.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::ir::{BlockId, Function, Value};

use super::bounded_value::{BoundedValue, MergePolicy};

#[derive(Debug, Clone)]
struct MapValue {
    summary: BoundedValue,
    /// Per-predecessor-edge contributions, meet-merged into the summary
    components: SmallVec<[(BlockId, BoundedValue); 2]>,
    forced: bool,
}

/// Mapping `(block, value) -> (summary, components)`
#[derive(Debug, Default)]
pub struct BvMap {
    map: FxHashMap<(BlockId, Value), MapValue>,
    blacklist: FxHashSet<BlockId>,
}

impl BvMap {
    pub fn new(blacklist: FxHashSet<BlockId>) -> Self {
        Self {
            map: FxHashMap::default(),
            blacklist,
        }
    }

    /// The BV of a value before any constraint: its constant BV for
    /// constants, the uninitialized top otherwise
    fn intrinsic(func: &Function, value: Value) -> BoundedValue {
        match func.const_value(value) {
            Some(c) => BoundedValue::create_constant(value, c),
            None => BoundedValue::new(value),
        }
    }

    /// The summary visible for `value` inside `block`, created lazily
    pub fn get(&mut self, func: &Function, block: BlockId, value: Value) -> &BoundedValue {
        let entry = self
            .map
            .entry((block, value))
            .or_insert_with(|| MapValue {
                summary: Self::intrinsic(func, value),
                components: SmallVec::new(),
                forced: false,
            });
        &entry.summary
    }

    pub fn get_copy(&mut self, func: &Function, block: BlockId, value: Value) -> BoundedValue {
        *self.get(func, block, value)
    }

    /// Non-creating lookup, for queries after the fixpoint
    pub fn lookup(&self, block: BlockId, value: Value) -> Option<&BoundedValue> {
        self.map.get(&(block, value)).map(|entry| &entry.summary)
    }

    /// The component contributed by one predecessor edge, if any
    pub fn get_edge(
        &self,
        block: BlockId,
        predecessor: BlockId,
        value: Value,
    ) -> Option<&BoundedValue> {
        self.map.get(&(block, value)).and_then(|entry| {
            entry
                .components
                .iter()
                .find(|(origin, _)| *origin == predecessor)
                .map(|(_, bv)| bv)
        })
    }

    /// Drive the signedness state machine for every view of `value` in
    /// `block`
    pub fn set_signedness(
        &mut self,
        func: &Function,
        block: BlockId,
        value: Value,
        is_signed: bool,
    ) {
        // Materialize the entry so the signedness survives later merges.
        self.get(func, block, value);
        let entry = self.map.get_mut(&(block, value)).expect("just created");
        for (_, bv) in entry.components.iter_mut() {
            bv.set_signedness(is_signed);
        }
        if !entry.forced && !entry.components.is_empty() {
            let mut summary = Self::intrinsic(func, value);
            for (origin, bv) in &entry.components {
                if !self.blacklist.contains(origin) {
                    summary.merge(bv, MergePolicy::And);
                }
            }
            entry.summary = summary;
        }
        entry.summary.set_signedness(is_signed);
    }

    /// Set the summary for an entry directly, bypassing summarization
    pub fn force_bv(&mut self, block: BlockId, value: Value, bv: BoundedValue) {
        self.map.insert(
            (block, value),
            MapValue {
                summary: bv,
                components: SmallVec::new(),
                forced: true,
            },
        );
    }

    /// Record the constraint `new_bv` on the edge `origin -> target`
    ///
    /// The component for that edge is meet-merged with `new_bv` and the
    /// summary recomputed. Returns whether the summary changed.
    pub fn update(
        &mut self,
        func: &Function,
        target: BlockId,
        origin: BlockId,
        new_bv: BoundedValue,
    ) -> bool {
        if self.blacklist.contains(&target) || self.blacklist.contains(&origin) {
            return false;
        }
        let value = new_bv.value();
        let entry = self
            .map
            .entry((target, value))
            .or_insert_with(|| MapValue {
                summary: Self::intrinsic(func, value),
                components: SmallVec::new(),
                forced: false,
            });
        if entry.forced {
            // Forced summaries are owned by the instruction transfer; an
            // edge constraint can only tighten them directly.
            return entry.summary.merge(&new_bv, MergePolicy::And);
        }

        match entry
            .components
            .iter_mut()
            .find(|(existing, _)| *existing == origin)
        {
            Some((_, component)) => {
                component.merge(&new_bv, MergePolicy::And);
            }
            None => entry.components.push((origin, new_bv)),
        }

        let mut summary = Self::intrinsic(func, value);
        for (component_origin, bv) in &entry.components {
            if !self.blacklist.contains(component_origin) {
                summary.merge(bv, MergePolicy::And);
            }
        }
        let changed = summary != entry.summary;
        entry.summary = summary;
        changed
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Dump every entry recorded for a block
    pub fn describe(&self, f: &mut dyn fmt::Write, block: BlockId) -> fmt::Result {
        let mut entries: Vec<_> = self
            .map
            .iter()
            .filter(|((b, _), _)| *b == block)
            .collect();
        entries.sort_by_key(|((_, v), _)| *v);
        for ((_, _), entry) in entries {
            write!(f, "  ")?;
            entry.summary.describe(f)?;
            if entry.forced {
                write!(f, " (forced)")?;
            }
            for (origin, bv) in &entry.components {
                write!(f, "\n    from {}: ", origin)?;
                bv.describe(f)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
