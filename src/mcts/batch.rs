//! Evaluator dispatch and backup.
//!
//! Selected leaves accumulate in a `LeafBatch`. When the batch is full the
//! dispatcher sends every position that needs a network evaluation to the
//! evaluator in one call, writes the results back, and propagates each
//! leaf's value to the root, converting reserved visits into completed
//! ones along the way. Terminal and transposition-linked leaves ride the
//! same batch but never touch the evaluator.
//!
//! If the evaluator fails, every reservation in the batch is released
//! untouched: no visit counts move, and the step reports the failure.

use crate::board::Board;
use crate::errors::SearchError;
use crate::mcts::params::SearchParams;
use crate::mcts::policy::{prepare_priors, EvalResult, Evaluator};
use crate::mcts::selection::{EmissionKind, LeafEmission};
use crate::mcts::store::{NodeIndex, Terminal, NUM_SELECTORS};
use crate::mcts::tree::SearchTree;
use crate::move_types::Move;
use fxhash::FxHashMap;

/// Leaves gathered by the selectors for one dispatch round.
#[derive(Default)]
pub(crate) struct LeafBatch {
    emissions: Vec<LeafEmission>,
    /// Collapsible emissions (everything except `LinkedDraw`) by node, so
    /// repeated arrivals at the same leaf merge into one emission instead
    /// of requesting duplicate evaluations.
    by_node: FxHashMap<NodeIndex, usize>,
}

impl LeafBatch {
    pub fn new() -> LeafBatch {
        LeafBatch::default()
    }

    /// Adds one reserved visit at `node` for `selector`. Draws from a
    /// transposition root are always distinct emissions (each visit drew a
    /// different value); everything else collapses into the existing
    /// emission for the node if there is one.
    pub fn add(&mut self, node: NodeIndex, selector: usize, kind: EmissionKind) {
        let collapsible = !matches!(kind, EmissionKind::LinkedDraw(_));
        if collapsible {
            if let Some(&i) = self.by_node.get(&node) {
                self.emissions[i].visits[selector] += 1;
                return;
            }
            self.by_node.insert(node, self.emissions.len());
        }
        let mut visits = [0u32; NUM_SELECTORS];
        visits[selector] = 1;
        self.emissions.push(LeafEmission { node, visits, kind });
    }

    pub fn total_visits(&self) -> u32 {
        self.emissions.iter().map(LeafEmission::total_visits).sum()
    }
}

/// Per-leaf value package carried up the tree during backup, oriented to
/// the current node's side to move.
#[derive(Debug, Clone, Copy)]
struct BackupValues {
    v: f64,
    win: f32,
    draw: f32,
    loss: f32,
    m: f32,
}

impl BackupValues {
    /// One step toward the root: the side to move flips.
    fn parent(self) -> BackupValues {
        BackupValues {
            v: -self.v,
            win: self.loss,
            draw: self.draw,
            loss: self.win,
            m: self.m + 1.0,
        }
    }
}

/// Evaluates and applies a gathered batch. Returns the number of
/// evaluator calls made (0 or 1).
pub(crate) fn dispatch_batch<E: Evaluator>(
    tree: &mut SearchTree,
    evaluator: &mut E,
    params: &SearchParams,
    batch: LeafBatch,
    search_moves: Option<&[Move]>,
) -> Result<u64, SearchError> {
    let mut positions: Vec<Board> = Vec::new();
    let mut eval_of_emission: Vec<Option<usize>> = vec![None; batch.emissions.len()];
    for (i, emission) in batch.emissions.iter().enumerate() {
        if let EmissionKind::Evaluate(board) = &emission.kind {
            eval_of_emission[i] = Some(positions.len());
            positions.push(board.clone());
        }
    }

    let results = if positions.is_empty() {
        Vec::new()
    } else {
        match evaluator.evaluate(&positions) {
            Ok(results) if results.len() == positions.len() => results,
            Ok(results) => {
                abandon_batch(tree, &batch);
                return Err(SearchError::EvaluatorFailure(format!(
                    "expected {} results, got {}",
                    positions.len(),
                    results.len()
                )));
            }
            Err(err) => {
                abandon_batch(tree, &batch);
                return Err(err);
            }
        }
    };
    let calls = u64::from(!positions.is_empty());

    for (i, emission) in batch.emissions.iter().enumerate() {
        match &emission.kind {
            EmissionKind::Evaluate(_) => {
                let result = &results[eval_of_emission[i].expect("evaluate emission indexed")];
                let at_root = emission.node == tree.root();
                write_eval(
                    tree,
                    emission.node,
                    result,
                    params,
                    if at_root { search_moves } else { None },
                )?;
                let values = BackupValues {
                    v: result.value() as f64,
                    win: result.win_p,
                    draw: result.draw_p,
                    loss: result.loss_p,
                    m: result.moves_left,
                };
                backup(tree, emission.node, emission.visits, values);
            }
            EmissionKind::Terminal => {
                let record = &tree[emission.node];
                let terminal = record.terminal;
                let values = if terminal.is_terminal() {
                    BackupValues {
                        v: terminal.value() as f64,
                        win: f32::from(terminal == Terminal::Win),
                        draw: f32::from(terminal == Terminal::Draw),
                        loss: f32::from(terminal == Terminal::Loss),
                        m: 0.0,
                    }
                } else {
                    // Not a game-rules terminal: either childless through
                    // an empty policy, or an evaluated node serving its
                    // own first visit. Its stored evaluation backs up.
                    BackupValues {
                        v: record.v as f64,
                        win: record.win_p,
                        draw: record.draw_p,
                        loss: record.loss_p,
                        m: record.m_position,
                    }
                };
                backup(tree, emission.node, emission.visits, values);
            }
            EmissionKind::LinkedDraw(value) => {
                let values = BackupValues {
                    v: value.v as f64,
                    win: value.win_p,
                    draw: value.draw_p,
                    loss: value.loss_p,
                    m: value.m,
                };
                backup(tree, emission.node, emission.visits, values);
            }
            EmissionKind::LinkedPending { source } => {
                // The canonical leaf is normally evaluated earlier in this
                // same batch (it was emitted before this node was created),
                // so its result is on record now. Same position, same side
                // to move: the value carries over without reorientation.
                // After a dropped batch the source can still be bare; the
                // visit then backs up a neutral value and the cursor stays
                // put so the first real draw happens later.
                let source_record = &tree[*source];
                let values = if source_record.is_evaluated() {
                    let values = BackupValues {
                        v: source_record.v as f64,
                        win: source_record.win_p,
                        draw: source_record.draw_p,
                        loss: source_record.loss_p,
                        m: source_record.m_position,
                    };
                    tree[emission.node].num_transposition_extracted = 1;
                    values
                } else {
                    BackupValues {
                        v: 0.0,
                        win: 0.0,
                        draw: 0.0,
                        loss: 0.0,
                        m: 0.0,
                    }
                };
                backup(tree, emission.node, emission.visits, values);
            }
        }
    }
    Ok(calls)
}

/// Writes an evaluator result into a fresh leaf: value head fields plus
/// the policy as a sorted edge block. A root result is first filtered down
/// to the restricted move set if one is active.
fn write_eval(
    tree: &mut SearchTree,
    node: NodeIndex,
    result: &EvalResult,
    params: &SearchParams,
    search_moves: Option<&[Move]>,
) -> Result<(), SearchError> {
    let mut priors = result.priors.clone();
    if let Some(allowed) = search_moves {
        priors.retain(|(mv, _)| allowed.contains(mv));
    }
    let priors = prepare_priors(priors, params);

    if priors.is_empty() {
        let record = &mut tree[node];
        record.v = result.value();
        record.win_p = result.win_p;
        record.draw_p = result.draw_p;
        record.loss_p = result.loss_p;
        record.m_position = result.moves_left;
        record.set_childless();
        return Ok(());
    }

    let offset = tree.store_mut().allocate_children(priors.len())?;
    for (slot, (mv, p)) in priors.iter().enumerate() {
        let edge = tree.store_mut().edge_mut(offset, slot);
        edge.mv = *mv;
        edge.p = *p;
    }
    let record = &mut tree[node];
    record.v = result.value();
    record.win_p = result.win_p;
    record.draw_p = result.draw_p;
    record.loss_p = result.loss_p;
    record.m_position = result.moves_left;
    record.set_child_block(offset, priors.len());
    Ok(())
}

/// Propagates a leaf's value to the root. At every node on the path the
/// reserved visits become completed visits, the value sum and running
/// aggregates take the new sample, and the value flips orientation before
/// moving to the parent. The first completed visit of a child also
/// registers it on its parent's visited-children accounting.
fn backup(
    tree: &mut SearchTree,
    leaf: NodeIndex,
    visits: [u32; NUM_SELECTORS],
    mut values: BackupValues,
) {
    let total: u32 = visits.iter().sum();
    debug_assert!(total > 0);
    let mut idx = leaf;
    loop {
        let record = &mut tree[idx];
        let first_visit = record.n() == 0;
        for (selector, &count) in visits.iter().enumerate() {
            if count > 0 {
                record.commit_visits(selector, count, values.v);
            }
        }
        let n_after = record.n();
        let weight = total as f32 / n_after as f32;
        record.w_avg += (values.win - record.w_avg) * weight;
        record.d_avg += (values.draw - record.d_avg) * weight;
        record.l_avg += (values.loss - record.l_avg) * weight;
        record.m_avg += (values.m - record.m_avg) * weight;
        record.w_squared += values.v * values.v * total as f64;

        let parent = record.parent;
        let child_prior = record.prior();
        if parent.is_null() {
            break;
        }
        if first_visit {
            let parent_record = &mut tree[parent];
            parent_record.num_children_visited += 1;
            parent_record.sum_p_visited += child_prior;
        }
        values = values.parent();
        idx = parent;
    }
}

/// Unwinds a batch without applying it: every reservation on every path
/// is released with no completed visits recorded, and draw cursors
/// advanced during selection are rolled back. Used after evaluator
/// failures and after a gather that died on store exhaustion.
pub(crate) fn abandon_batch(tree: &mut SearchTree, batch: &LeafBatch) {
    for emission in &batch.emissions {
        if matches!(emission.kind, EmissionKind::LinkedDraw(_)) {
            let record = &mut tree[emission.node];
            record.num_transposition_extracted -= 1;
        }
        let mut idx = emission.node;
        loop {
            let record = &tree[idx];
            for (selector, &count) in emission.visits.iter().enumerate() {
                if count > 0 {
                    record.release(selector, count);
                }
            }
            if record.parent.is_null() {
                break;
            }
            idx = record.parent;
        }
    }
}
