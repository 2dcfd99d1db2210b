//! Monte Carlo Tree Search with an external batched evaluator.
//!
//! The search grows a tree over a dense node arena. Each step gathers one
//! batch of leaves with two lockstep selectors under virtual loss, sends
//! the new positions to the evaluator in a single call, and backs the
//! results up to the root. Equivalent positions reached through different
//! move orders share one physical subtree through the transposition
//! table until the borrowing side is materialized into an independent
//! subtree of its own.

pub mod batch;
pub mod chooser;
pub mod params;
pub mod policy;
pub mod selection;
pub mod store;
pub mod tree;
pub mod verify;

use crate::board::{Board, GameState};
use crate::errors::SearchError;
use crate::limits::{LimitKind, SearchLimit};
use crate::move_generation::MoveGen;
use crate::move_types::NULL_MOVE;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub use chooser::BestMoveInfo;
pub use params::SearchParams;
pub use policy::{EvalResult, Evaluator, FailingEvaluator, UniformEvaluator};
pub use store::{NodeIndex, NodeStore, Terminal};
pub use tree::SearchTree;

/// Assumed throughput used to pre-size the node arena for time limits
/// before any search has been observed.
const PRIOR_NPS: f64 = 30_000.0;
const MIN_STORE_CAPACITY: u32 = 4_096;

/// Snapshot of search progress after a step.
#[derive(Debug, Clone, Copy)]
pub struct SearchProgress {
    /// Batches gathered, evaluated and backed up so far.
    pub batches: u64,
    /// Completed visits at the root.
    pub root_visits: u32,
    /// Nodes allocated in the store.
    pub nodes_allocated: u32,
    /// Calls made to the external evaluator.
    pub evaluator_calls: u64,
    /// True once the search will make no further progress.
    pub stopped: bool,
}

/// A running search: tree, evaluator, limit and termination state.
pub struct Search<E: Evaluator> {
    tree: SearchTree,
    root_board: Board,
    move_gen: MoveGen,
    evaluator: E,
    params: SearchParams,
    /// The caller's limit, projected onto a single move.
    limit: SearchLimit,
    stop: Arc<AtomicBool>,
    batches: u64,
    evaluator_calls: u64,
    started: Instant,
    aborted: bool,
}

impl<E: Evaluator> Search<E> {
    /// Sets up a search of `root_board`. `history` is the game so far and
    /// seeds the root's ply depth; per-game limits are projected onto this
    /// move up front.
    pub fn new(
        root_board: Board,
        history: &[Board],
        limit: SearchLimit,
        params: SearchParams,
        evaluator: E,
    ) -> Result<Search<E>, SearchError> {
        let limit = limit.converted_game_to_move_limit();
        let capacity = store_capacity(&limit, &params);
        let mut search = Search {
            tree: SearchTree::new(capacity, limit.search_can_be_expanded),
            root_board: Board::start_position(),
            move_gen: MoveGen::new(),
            evaluator,
            params,
            limit,
            stop: Arc::new(AtomicBool::new(false)),
            batches: 0,
            evaluator_calls: 0,
            started: Instant::now(),
            aborted: false,
        };
        search.install_root(root_board, history.len() as u16)?;
        tracing::info!(limit = %search.limit, "search created");
        Ok(search)
    }

    /// Starts a new search over a different root while keeping the node
    /// store and transposition table, so subtrees explored for earlier
    /// positions keep serving as canonical value sources.
    pub fn new_search(
        &mut self,
        root_board: Board,
        history: &[Board],
        limit: SearchLimit,
    ) -> Result<(), SearchError> {
        self.limit = limit.converted_game_to_move_limit();
        self.batches = 0;
        self.evaluator_calls = 0;
        self.started = Instant::now();
        self.aborted = false;
        self.stop.store(false, Ordering::Relaxed);
        self.install_root(root_board, history.len() as u16)
    }

    fn install_root(&mut self, root_board: Board, depth: u16) -> Result<(), SearchError> {
        let root = self.tree.allocate_node(NodeIndex::NULL, NULL_MOVE, 1.0, depth)?;
        match root_board.game_state(&self.move_gen) {
            GameState::Ongoing => {
                let hash = root_board.zobrist();
                let canonical = self.tree.record_position(hash, root);
                if canonical != root {
                    self.tree[root].transposition_root = canonical;
                }
            }
            GameState::Checkmate => {
                let record = &mut self.tree[root];
                record.terminal = Terminal::Loss;
                record.set_childless();
            }
            GameState::Stalemate | GameState::DrawByFiftyMoves => {
                let record = &mut self.tree[root];
                record.terminal = Terminal::Draw;
                record.set_childless();
            }
        }
        self.tree.set_root(root);
        self.root_board = root_board;
        Ok(())
    }

    /// Advances the search by one batch: gather, evaluate, back up.
    ///
    /// Returns the updated progress. A store-exhaustion error aborts the
    /// search (tree preserved); an evaluator failure aborts only this step
    /// after releasing every reservation the batch held.
    pub fn step(&mut self) -> Result<SearchProgress, SearchError> {
        if self.finished() {
            return Ok(self.progress());
        }

        let mut leaf_batch = batch::LeafBatch::new();
        for _ in 0..self.params.batch_size_per_selector {
            for selector in 0..store::NUM_SELECTORS {
                if let Err(err) = selection::run_descent(
                    &mut self.tree,
                    &self.move_gen,
                    &self.params,
                    &self.root_board,
                    selector,
                    &mut leaf_batch,
                ) {
                    // Allocation failed mid-descent: the partly gathered
                    // batch still holds reservations along every path.
                    batch::abandon_batch(&mut self.tree, &leaf_batch);
                    self.aborted = true;
                    tracing::warn!(error = %err, "search aborted with tree preserved");
                    return Err(err);
                }
            }
        }

        let gathered_visits = leaf_batch.total_visits();
        match batch::dispatch_batch(
            &mut self.tree,
            &mut self.evaluator,
            &self.params,
            leaf_batch,
            self.limit.search_moves.as_deref(),
        ) {
            Ok(calls) => self.evaluator_calls += calls,
            Err(err) => {
                tracing::warn!(error = %err, "batch dropped");
                return Err(err);
            }
        }
        self.batches += 1;

        if cfg!(debug_assertions) {
            verify::verify_quiescent(&self.tree)?;
        }

        tracing::debug!(
            batches = self.batches,
            visits = gathered_visits,
            root_visits = self.tree[self.tree.root()].n(),
            nodes = self.tree.store().len(),
            "batch complete"
        );
        Ok(self.progress())
    }

    /// Runs steps until the limit is reached or a stop is requested, then
    /// reports the final progress.
    pub fn run(&mut self) -> Result<SearchProgress, SearchError> {
        while !self.finished() {
            self.step()?;
        }
        Ok(self.progress())
    }

    /// Ranks the root's children and returns the move to play.
    pub fn best(&self) -> Option<BestMoveInfo> {
        chooser::choose_best_move(&self.tree, &self.params)
    }

    /// Requests cooperative termination: the in-flight batch completes and
    /// backs up, then the search stops.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Shared stop flag, for a driver thread enforcing a time limit.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Converts every transposition-linked node into an independent
    /// subtree. Must be called between steps.
    pub fn materialize_all_transposition_links(&mut self) -> Result<(), SearchError> {
        self.tree.materialize_all_transposition_links()
    }

    pub fn tree(&self) -> &SearchTree {
        &self.tree
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn root_visits(&self) -> u32 {
        let root = self.tree.root();
        if root.is_null() {
            0
        } else {
            self.tree[root].n()
        }
    }

    pub fn progress(&self) -> SearchProgress {
        SearchProgress {
            batches: self.batches,
            root_visits: self.root_visits(),
            nodes_allocated: self.tree.store().len(),
            evaluator_calls: self.evaluator_calls,
            stopped: self.finished(),
        }
    }

    fn finished(&self) -> bool {
        if self.aborted || self.stop.load(Ordering::Relaxed) {
            return true;
        }
        let root = self.tree.root();
        if root.is_null() || self.tree[root].terminal.is_terminal() {
            return true;
        }
        match self.limit.kind {
            LimitKind::NodesPerMove => self.root_visits() as f64 >= self.limit.value,
            LimitKind::SecondsPerMove => {
                self.started.elapsed().as_secs_f64() >= self.limit.value
            }
            // Per-game kinds were projected onto this move at construction.
            _ => unreachable!("per-game limit survived projection"),
        }
    }
}

fn store_capacity(limit: &SearchLimit, params: &SearchParams) -> u32 {
    let estimate = limit.estimate_nodes(PRIOR_NPS, false);
    // Transposition links and collapsed visits keep allocations near the
    // visit count; doubling leaves slack without pinning silly amounts.
    let wanted = (estimate * 2.0).min(u32::MAX as f64) as u32;
    let upper = params.max_tree_nodes.max(2);
    wanted.clamp(MIN_STORE_CAPACITY.min(upper), upper)
}
