//! Defines the evaluator contract the search core depends on.
//!
//! In a deployed engine the implementation wraps a neural network and runs
//! whole batches on a device; the mocks here stand in for it in tests and
//! benchmarks. The core only ever sees the trait.

use crate::board::Board;
use crate::errors::SearchError;
use crate::mcts::params::SearchParams;
use crate::move_generation::MoveGen;
use crate::move_types::Move;

/// Evaluation of a single position: a win/draw/loss distribution and a
/// moves-left estimate for the side to move, plus policy priors over the
/// legal moves.
#[derive(Debug, Clone)]
pub struct EvalResult {
    pub win_p: f32,
    pub draw_p: f32,
    pub loss_p: f32,
    pub moves_left: f32,
    pub priors: Vec<(Move, f32)>,
}

impl EvalResult {
    /// Scalar value for the side to move, in [-1, 1].
    pub fn value(&self) -> f32 {
        self.win_p - self.loss_p
    }
}

/// Batched position evaluator.
///
/// Given N positions the evaluator must return exactly N results, in
/// order. Any shortfall, surplus or error is treated as an
/// `EvaluatorFailure` by the dispatcher: the current step is aborted after
/// virtual loss has been released, leaving the tree consistent.
pub trait Evaluator {
    fn evaluate(&mut self, batch: &[Board]) -> Result<Vec<EvalResult>, SearchError>;
}

/// Evaluator returning a fixed value and uniform priors over the legal
/// moves of each position. The workhorse of the test suite.
pub struct UniformEvaluator {
    move_gen: MoveGen,
    win_p: f32,
    draw_p: f32,
    loss_p: f32,
    moves_left: f32,
    /// Number of batch evaluations performed, for call-count assertions.
    pub calls: u64,
    /// Total positions evaluated.
    pub positions_evaluated: u64,
}

impl UniformEvaluator {
    /// A dead-even evaluator: V = 0 everywhere.
    pub fn new() -> UniformEvaluator {
        UniformEvaluator::with_value(0.5, 0.0, 0.5, 40.0)
    }

    pub fn with_value(win_p: f32, draw_p: f32, loss_p: f32, moves_left: f32) -> UniformEvaluator {
        UniformEvaluator {
            move_gen: MoveGen::new(),
            win_p,
            draw_p,
            loss_p,
            moves_left,
            calls: 0,
            positions_evaluated: 0,
        }
    }
}

impl Default for UniformEvaluator {
    fn default() -> Self {
        UniformEvaluator::new()
    }
}

impl Evaluator for UniformEvaluator {
    fn evaluate(&mut self, batch: &[Board]) -> Result<Vec<EvalResult>, SearchError> {
        self.calls += 1;
        self.positions_evaluated += batch.len() as u64;
        Ok(batch
            .iter()
            .map(|board| {
                let moves = self.move_gen.legal_moves(board);
                let prior = if moves.is_empty() {
                    0.0
                } else {
                    1.0 / moves.len() as f32
                };
                EvalResult {
                    win_p: self.win_p,
                    draw_p: self.draw_p,
                    loss_p: self.loss_p,
                    moves_left: self.moves_left,
                    priors: moves.iter().map(|&mv| (mv, prior)).collect(),
                }
            })
            .collect())
    }
}

/// Evaluator that always fails, for error-path tests.
pub struct FailingEvaluator;

impl Evaluator for FailingEvaluator {
    fn evaluate(&mut self, _batch: &[Board]) -> Result<Vec<EvalResult>, SearchError> {
        Err(SearchError::EvaluatorFailure(
            "device unavailable".to_string(),
        ))
    }
}

/// Normalizes, sorts and truncates a raw prior list to the configured
/// policy-move cap: descending by prior, ties broken by move order for
/// determinism.
pub fn prepare_priors(mut priors: Vec<(Move, f32)>, params: &SearchParams) -> Vec<(Move, f32)> {
    priors.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    priors.truncate(params.max_policy_moves);
    let total: f32 = priors.iter().map(|(_, p)| p).sum();
    if total > 0.0 {
        for (_, p) in priors.iter_mut() {
            *p /= total;
        }
    }
    priors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_evaluator_counts_calls() {
        let mut evaluator = UniformEvaluator::new();
        let batch = vec![Board::start_position()];
        let results = evaluator.evaluate(&batch).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].priors.len(), 20);
        assert_eq!(evaluator.calls, 1);
        assert!((results[0].value()).abs() < 1e-6);
    }

    #[test]
    fn test_prepare_priors_sorts_and_truncates() {
        let params = SearchParams {
            max_policy_moves: 2,
            ..SearchParams::default()
        };
        let a = Move::from_coord("a2a3").unwrap();
        let b = Move::from_coord("b2b3").unwrap();
        let c = Move::from_coord("c2c3").unwrap();
        let prepared = prepare_priors(vec![(a, 0.1), (b, 0.6), (c, 0.3)], &params);
        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared[0].0, b);
        assert_eq!(prepared[1].0, c);
        // Renormalized over the surviving moves.
        assert!((prepared[0].1 + prepared[1].1 - 1.0).abs() < 1e-6);
    }
}
