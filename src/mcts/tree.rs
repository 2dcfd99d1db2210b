//! Tree navigation and transposition sharing.
//!
//! `SearchTree` wraps the node store with index-based navigation and a
//! position-hash table mapping each position to the canonical node that
//! owns its subtree. When a freshly created leaf hashes to a position that
//! already has a canonical node, the leaf is linked instead of evaluated:
//! each visit draws the next previously computed value out of the
//! canonical subtree, in depth-first, left-to-right slot order, the node's
//! own evaluation before its children. Once the supply runs dry (or on an
//! explicit sweep) the link is materialized: the leaf receives its own
//! copy of the canonical node's evaluation and an edge block of entirely
//! unexpanded children, and the link is cleared.

use crate::errors::SearchError;
use crate::mcts::store::{ChildBlock, NodeIndex, NodeRecord, NodeStore, Terminal};
use crate::move_types::Move;
use fxhash::FxHashMap;
use std::ops::{Index, IndexMut};

/// A value drawn from a canonical subtree, already reoriented to the
/// borrowing node's side to move.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExtractedValue {
    pub v: f32,
    pub win_p: f32,
    pub draw_p: f32,
    pub loss_p: f32,
    pub m: f32,
}

/// Node arena plus transposition table.
pub struct SearchTree {
    store: NodeStore,
    table: FxHashMap<u64, NodeIndex>,
    root: NodeIndex,
}

impl SearchTree {
    pub fn new(capacity: u32, can_expand: bool) -> SearchTree {
        SearchTree {
            store: NodeStore::new(capacity, can_expand),
            table: FxHashMap::default(),
            root: NodeIndex::NULL,
        }
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub(crate) fn set_root(&mut self, idx: NodeIndex) {
        self.root = idx;
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut NodeStore {
        &mut self.store
    }

    /// Allocates a node, growing the arena when it is full and the limit
    /// allows expansion. Growth happens here on the exclusive mutation
    /// path, never inside the lock-free claim itself.
    pub(crate) fn allocate_node(
        &mut self,
        parent: NodeIndex,
        prior_move: Move,
        prior: f32,
        depth: u16,
    ) -> Result<NodeIndex, SearchError> {
        match self.store.allocate_node(parent, prior_move, prior, depth) {
            Err(SearchError::StoreExhausted(_)) if self.store.can_expand() => {
                self.store.expand();
                self.store.allocate_node(parent, prior_move, prior, depth)
            }
            result => result,
        }
    }

    /// Inserts a canonical entry for `hash` unless one exists; the first
    /// insertion always wins, which keeps concurrent duplicate creation
    /// deterministic. Returns the canonical index for `hash`.
    pub fn record_position(&mut self, hash: u64, idx: NodeIndex) -> NodeIndex {
        *self.table.entry(hash).or_insert(idx)
    }

    pub fn lookup_position(&self, hash: u64) -> Option<NodeIndex> {
        self.table.get(&hash).copied()
    }

    /// Number of nodes in the subtree rooted at `idx`, the root included.
    /// Linked nodes count as leaves; they own no children.
    pub fn subtree_size(&self, idx: NodeIndex) -> u32 {
        let mut count = 0;
        let mut stack = vec![idx];
        while let Some(cur) = stack.pop() {
            count += 1;
            for edge in self.store.edges_of(cur) {
                if edge.is_expanded() {
                    stack.push(edge.child);
                }
            }
        }
        count
    }

    /// Number of transposition-linked nodes in the whole store.
    pub fn transposition_link_count(&self) -> usize {
        self.store
            .indices()
            .filter(|&idx| self.store.node(idx).is_transposition_linked())
            .count()
    }

    /// Draws the `k`-th (0-based) previously computed value from the
    /// subtree under `root`. Traversal order is depth-first pre-order,
    /// children left-to-right by slot; only nodes carrying their own
    /// evaluation or terminal value participate. Values are reoriented to
    /// the borrowing node's side to move, which coincides with `root`'s at
    /// even depth. The moves-left figure is stretched by the depth at
    /// which the value was found.
    ///
    /// Returns `None` when the subtree has fewer than `k + 1` values,
    /// which is the materialization trigger.
    pub(crate) fn nth_extraction(&self, root: NodeIndex, k: u32) -> Option<ExtractedValue> {
        let mut remaining = k;
        // (node, depth) in pre-order; children pushed in reverse slot order
        // so that slot 0 pops first.
        let mut stack: Vec<(NodeIndex, u16)> = vec![(root, 0)];
        while let Some((cur, depth)) = stack.pop() {
            let record = self.store.node(cur);
            let has_own_value = !record.is_transposition_linked()
                && (record.terminal.is_terminal()
                    || record.child_block() != ChildBlock::Uninitialized);
            if has_own_value {
                if remaining == 0 {
                    return Some(orient_extraction(record, depth));
                }
                remaining -= 1;
            }
            let edges = self.store.edges_of(cur);
            for edge in edges.iter().rev() {
                if edge.is_expanded() {
                    stack.push((edge.child, depth + 1));
                }
            }
        }
        None
    }

    /// Copies the canonical node's evaluation and (unexpanded) child moves
    /// into `idx` and clears the link. Linked visits already backed up are
    /// kept; only the value source changes. A second call is a no-op.
    ///
    /// Must only be called while no batch is outstanding: the copied
    /// fields are the write-once kind.
    pub(crate) fn materialize(&mut self, idx: NodeIndex) -> Result<(), SearchError> {
        let source = self.store.node(idx).transposition_root;
        if source.is_null() {
            return Ok(());
        }

        let source_record = self.store.node(source);
        debug_assert!(
            !source_record.terminal.is_terminal(),
            "terminal positions are recognized directly, never linked"
        );
        if !source_record.is_evaluated() {
            // Nothing was ever drawn; the node reverts to a plain
            // unevaluated leaf.
            self.store.node_mut(idx).transposition_root = NodeIndex::NULL;
            return Ok(());
        }

        let v = source_record.v;
        let win_p = source_record.win_p;
        let draw_p = source_record.draw_p;
        let loss_p = source_record.loss_p;
        let m_position = source_record.m_position;
        let moves: Vec<_> = self
            .store
            .edges_of(source)
            .iter()
            .map(|edge| (edge.mv, edge.p))
            .collect();

        if moves.is_empty() {
            // The canonical node was evaluated but has no policy moves on
            // record; mirror its childless proof.
            let record = self.store.node_mut(idx);
            record.v = v;
            record.win_p = win_p;
            record.draw_p = draw_p;
            record.loss_p = loss_p;
            record.m_position = m_position;
            record.set_childless();
            record.transposition_root = NodeIndex::NULL;
            return Ok(());
        }

        let offset = self.store.allocate_children(moves.len())?;
        for (slot, (mv, p)) in moves.iter().enumerate() {
            let edge = self.store.edge_mut(offset, slot);
            edge.mv = *mv;
            edge.p = *p;
        }
        let record = self.store.node_mut(idx);
        record.v = v;
        record.win_p = win_p;
        record.draw_p = draw_p;
        record.loss_p = loss_p;
        record.m_position = m_position;
        record.set_child_block(offset, moves.len());
        record.transposition_root = NodeIndex::NULL;
        Ok(())
    }

    /// Materializes every transposition link in the store. Idempotent.
    pub fn materialize_all_transposition_links(&mut self) -> Result<(), SearchError> {
        let linked: Vec<_> = self
            .store
            .indices()
            .filter(|&idx| self.store.node(idx).is_transposition_linked())
            .collect();
        let count = linked.len();
        for idx in linked {
            self.materialize(idx)?;
        }
        if count > 0 {
            tracing::debug!(count, "materialized transposition links");
        }
        Ok(())
    }
}

/// Reorients a drawn value: at odd depth below the canonical root the side
/// to move is flipped, so the scalar negates and the win/loss components
/// swap.
fn orient_extraction(record: &NodeRecord, depth: u16) -> ExtractedValue {
    let (v, win_p, loss_p) = if record.terminal.is_terminal() {
        let v = record.terminal.value();
        (
            v,
            if record.terminal == Terminal::Win { 1.0 } else { 0.0 },
            if record.terminal == Terminal::Loss { 1.0 } else { 0.0 },
        )
    } else {
        (record.v, record.win_p, record.loss_p)
    };
    let draw_p = if record.terminal == Terminal::Draw {
        1.0
    } else if record.terminal.is_terminal() {
        0.0
    } else {
        record.draw_p
    };
    if depth % 2 == 0 {
        ExtractedValue {
            v,
            win_p,
            draw_p,
            loss_p,
            m: record.m_position + depth as f32,
        }
    } else {
        ExtractedValue {
            v: -v,
            win_p: loss_p,
            draw_p,
            loss_p: win_p,
            m: record.m_position + depth as f32,
        }
    }
}

impl Index<NodeIndex> for SearchTree {
    type Output = NodeRecord;

    fn index(&self, index: NodeIndex) -> &NodeRecord {
        self.store.node(index)
    }
}

impl IndexMut<NodeIndex> for SearchTree {
    fn index_mut(&mut self, index: NodeIndex) -> &mut NodeRecord {
        self.store.node_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::move_types::NULL_MOVE;

    #[test]
    fn test_record_position_first_wins() {
        let mut tree = SearchTree::new(8, false);
        let a = tree
            .store()
            .allocate_node(NodeIndex::NULL, NULL_MOVE, 0.0, 0)
            .unwrap();
        let b = tree
            .store()
            .allocate_node(NodeIndex::NULL, NULL_MOVE, 0.0, 0)
            .unwrap();
        assert_eq!(tree.record_position(42, a), a);
        // A later insertion for the same hash loses.
        assert_eq!(tree.record_position(42, b), a);
        assert_eq!(tree.lookup_position(42), Some(a));
        assert_eq!(tree.lookup_position(7), None);
    }
}
