//! PUCT descent with virtual loss.
//!
//! A selector walks from the root to a leaf, reserving one speculative
//! visit on every node it crosses so that the other selector is steered
//! away from the same path. Reserved visits make a child look both more
//! visited and more lost until the batch backs up, at which point the
//! reservations convert into completed visits.
//!
//! A descent ends at the first node that is terminal, transposition
//! linked, or not yet evaluated; what happens next is encoded in the
//! emission pushed onto the batch.

use crate::board::{Board, GameState};
use crate::errors::SearchError;
use crate::mcts::batch::LeafBatch;
use crate::mcts::params::SearchParams;
use crate::mcts::store::{ChildBlock, NodeIndex, Terminal};
use crate::mcts::tree::{ExtractedValue, SearchTree};
use crate::move_generation::MoveGen;

/// What a descent found at its leaf.
#[derive(Debug, Clone)]
pub(crate) enum EmissionKind {
    /// A new leaf; the position must go to the evaluator.
    Evaluate(Board),
    /// A terminal node; its exact value backs up without an evaluator call.
    Terminal,
    /// A transposition-linked node together with the value drawn from its
    /// canonical subtree during selection.
    LinkedDraw(ExtractedValue),
    /// A node linked to a canonical leaf that is itself still awaiting
    /// evaluation in this batch; the value is copied over once the source
    /// result lands.
    LinkedPending { source: NodeIndex },
}

/// One leaf selected for backup, with the visits reserved on it per
/// selector.
#[derive(Debug)]
pub(crate) struct LeafEmission {
    pub node: NodeIndex,
    pub visits: [u32; crate::mcts::store::NUM_SELECTORS],
    pub kind: EmissionKind,
}

impl LeafEmission {
    pub fn total_visits(&self) -> u32 {
        self.visits.iter().sum()
    }
}

/// Runs one descent for `selector`, reserving a single visit along the
/// path and emitting (or collapsing into) a leaf on the batch.
pub(crate) fn run_descent(
    tree: &mut SearchTree,
    move_gen: &MoveGen,
    params: &SearchParams,
    root_board: &Board,
    selector: usize,
    batch: &mut LeafBatch,
) -> Result<(), SearchError> {
    let root = tree.root();
    let mut idx = root;
    let mut board = root_board.clone();
    tree[idx].reserve(selector, 1);

    loop {
        if tree[idx].terminal.is_terminal() {
            batch.add(idx, selector, EmissionKind::Terminal);
            return Ok(());
        }

        if tree[idx].is_transposition_linked() {
            let source = tree[idx].transposition_root;
            if !tree[source].is_evaluated() {
                // The canonical leaf is in flight in this very batch.
                batch.add(idx, selector, EmissionKind::LinkedPending { source });
                return Ok(());
            }
            let cursor = tree[idx].num_transposition_extracted;
            match tree.nth_extraction(source, cursor) {
                Some(value) => {
                    tree[idx].num_transposition_extracted += 1;
                    batch.add(idx, selector, EmissionKind::LinkedDraw(value));
                    return Ok(());
                }
                None => {
                    // The canonical subtree has nothing left to give; the
                    // node becomes independent and selection continues
                    // through it.
                    if let Err(err) = tree.materialize(idx) {
                        release_path(tree, idx, selector);
                        return Err(err);
                    }
                    continue;
                }
            }
        }

        if tree[idx].child_block() == ChildBlock::Uninitialized {
            batch.add(idx, selector, EmissionKind::Evaluate(board.clone()));
            return Ok(());
        }

        if tree[idx].child_block() == ChildBlock::NoChildren {
            // Evaluated but provably childless without being a game-rules
            // terminal (an empty policy). Backs up its static value.
            batch.add(idx, selector, EmissionKind::Terminal);
            return Ok(());
        }

        if tree[idx].n() == 0 {
            // Evaluated but never visited, which happens when a link is
            // materialized before its first visit. The node serves its own
            // evaluation once before selection descends below it, so every
            // expanded node has absorbed at least one visit of its own.
            batch.add(idx, selector, EmissionKind::Terminal);
            return Ok(());
        }

        // Interior node: pick the best child under PUCT and recurse.
        let slot = select_child(tree, params, idx, idx == root);
        let offset = match tree[idx].child_block() {
            ChildBlock::Offset(offset) => offset,
            _ => unreachable!("interior node has an edge block"),
        };
        let (mv, existing) = {
            let edge = tree.store().edge(offset, slot);
            (edge.mv, edge.child)
        };
        let child = if existing.is_null() {
            match create_child(tree, move_gen, idx, offset, slot, &board) {
                Ok(child) => child,
                Err(err) => {
                    // The reservations already taken on this path are not
                    // yet tied to any emission; unwind them here.
                    release_path(tree, idx, selector);
                    return Err(err);
                }
            }
        } else {
            existing
        };
        board = board.apply_move(mv);
        idx = child;
        tree[idx].reserve(selector, 1);
    }
}

/// Releases the one-visit reservations a failed descent holds on the path
/// from `leaf` up to the root.
fn release_path(tree: &SearchTree, leaf: NodeIndex, selector: usize) {
    let mut idx = leaf;
    loop {
        let record = &tree[idx];
        record.release(selector, 1);
        if record.parent.is_null() {
            break;
        }
        idx = record.parent;
    }
}

/// Scores the expanded children and the best unexpanded edge of `parent`
/// and returns the winning slot.
///
/// Edges are laid out with the expanded children in the leading slots and
/// the unexpanded tail sorted by prior, so only the first unexpanded slot
/// can win among the unexpanded: the rest share its Q estimate with a
/// smaller prior.
pub(crate) fn select_child(
    tree: &SearchTree,
    params: &SearchParams,
    parent: NodeIndex,
    at_root: bool,
) -> usize {
    let record = &tree[parent];
    let edges = tree.store().edges_of(parent);
    let expanded = record.num_children_expanded as usize;
    debug_assert!(!edges.is_empty(), "selection in a childless node");

    let parent_visits = record.n() + record.in_flight_total();
    let cpuct = params.cpuct(parent_visits, at_root);
    let parent_term = (parent_visits.max(1) as f32)
        .powf(params.parent_visits_exponent)
        .sqrt();
    let denom_exp = if at_root {
        params.uct_root_denominator_exponent
    } else {
        1.0
    };

    // First-play urgency: an unvisited child is assumed a bit worse than
    // the parent's current estimate, more so the more policy mass has
    // already been tried below this parent.
    let fpu_offset = if at_root {
        params.fpu_offset_at_root
    } else {
        params.fpu_offset
    };
    let fpu = record.q() as f32 - fpu_offset - params.fpu_reduction * record.sum_p_visited.sqrt();

    let mut best_slot = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (slot, edge) in edges.iter().enumerate().take(expanded) {
        let child = &tree[edge.child];
        let in_flight = child.in_flight_total();
        let n_eff = child.n() + in_flight;
        let q = if n_eff == 0 {
            fpu
        } else {
            // Reserved visits count as wins for the child, pulling the
            // parent's view of it toward a loss.
            let w_eff = child.w() + in_flight as f64;
            -(w_eff / n_eff as f64) as f32
        };
        let u = cpuct * edge.p * parent_term / ((n_eff + 1) as f32).powf(denom_exp);
        let score = q + u;
        if score > best_score {
            best_score = score;
            best_slot = slot;
        }
    }

    if expanded < edges.len() {
        let edge = &edges[expanded];
        let u = cpuct * edge.p * parent_term;
        if fpu + u > best_score {
            best_slot = expanded;
        }
    }
    best_slot
}

/// Expands the edge at `slot`: allocates the child record, classifies the
/// successor position and either records it as the canonical node for its
/// hash or links it to the existing canonical node.
fn create_child(
    tree: &mut SearchTree,
    move_gen: &MoveGen,
    parent: NodeIndex,
    offset: u32,
    slot: usize,
    parent_board: &Board,
) -> Result<NodeIndex, SearchError> {
    debug_assert_eq!(
        slot,
        tree[parent].num_children_expanded as usize,
        "children expand in slot order"
    );
    let (mv, prior) = {
        let edge = tree.store().edge(offset, slot);
        (edge.mv, edge.p)
    };
    let child_board = parent_board.apply_move(mv);
    let depth = tree[parent].depth + 1;
    let child = tree.allocate_node(parent, mv, prior, depth)?;

    match child_board.game_state(move_gen) {
        GameState::Ongoing => {
            let hash = child_board.zobrist();
            let canonical = tree.record_position(hash, child);
            if canonical != child {
                tree[child].transposition_root = canonical;
            }
        }
        GameState::Checkmate => {
            let record = &mut tree[child];
            record.terminal = Terminal::Loss;
            record.set_childless();
        }
        GameState::Stalemate | GameState::DrawByFiftyMoves => {
            let record = &mut tree[child];
            record.terminal = Terminal::Draw;
            record.set_childless();
        }
    }

    tree.store_mut().edge_mut(offset, slot).child = child;
    tree[parent].num_children_expanded += 1;
    Ok(child)
}
