//! Control-flow graph construction
//!
//! Builds predecessor/successor maps and a reverse postorder from a
//! function's terminators. Blacklisted blocks are kept in the graph;
//! the analysis filters edges touching them at merge points.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{BlockId, Function};

/// Control-flow graph built from a function's terminators
#[derive(Debug)]
pub struct Cfg {
    /// Entry block
    pub entry: BlockId,
    /// Predecessors for each block
    pub predecessors: FxHashMap<BlockId, Vec<BlockId>>,
    /// Successors for each block
    pub successors: FxHashMap<BlockId, Vec<BlockId>>,
    /// Reverse post-order traversal (for dataflow analysis)
    pub rpo: Vec<BlockId>,
}

impl Cfg {
    pub fn build(func: &Function) -> Self {
        let mut predecessors: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        let mut successors: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();

        for block in &func.blocks {
            predecessors.entry(block.id).or_default();
            let succs = block.successors();
            for succ in &succs {
                let preds = predecessors.entry(*succ).or_default();
                // A switch can name the same target more than once.
                if !preds.contains(&block.id) {
                    preds.push(block.id);
                }
            }
            successors.insert(block.id, dedup_in_order(succs));
        }

        let rpo = Self::reverse_postorder(func.entry, &successors);

        Self {
            entry: func.entry,
            predecessors,
            successors,
            rpo,
        }
    }

    fn reverse_postorder(
        entry: BlockId,
        successors: &FxHashMap<BlockId, Vec<BlockId>>,
    ) -> Vec<BlockId> {
        let mut visited = FxHashSet::default();
        let mut post_order = Vec::new();
        // Iterative DFS; the second stack element tracks the next successor
        // to visit so blocks are emitted in true postorder.
        let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
        visited.insert(entry);

        while let Some((block, child_idx)) = stack.pop() {
            let succs = successors.get(&block).map(Vec::as_slice).unwrap_or(&[]);
            if child_idx < succs.len() {
                stack.push((block, child_idx + 1));
                let child = succs[child_idx];
                if visited.insert(child) {
                    stack.push((child, 0));
                }
            } else {
                post_order.push(block);
            }
        }

        post_order.reverse();
        post_order
    }

    pub fn preds(&self, block: BlockId) -> &[BlockId] {
        self.predecessors
            .get(&block)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn succs(&self, block: BlockId) -> &[BlockId] {
        self.successors
            .get(&block)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `block` is reachable from the entry
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo.contains(&block)
    }
}

fn dedup_in_order(blocks: Vec<BlockId>) -> Vec<BlockId> {
    let mut seen = FxHashSet::default();
    blocks.into_iter().filter(|b| seen.insert(*b)).collect()
}
