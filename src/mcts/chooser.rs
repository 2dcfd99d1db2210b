//! Best-move selection at the end of a search.
//!
//! Root children are ranked by visit count with the mean value as the
//! tie-break. With a moves-left bonus configured, contenders whose visit
//! counts are within a small window of the leader are re-compared on
//! value plus a bonus that prefers shorter wins and longer losses.

use crate::mcts::params::SearchParams;
use crate::mcts::store::NodeIndex;
use crate::mcts::tree::SearchTree;
use crate::move_types::Move;

/// Scale that turns a moves-left difference into a value-comparable bonus.
const MLH_MOVES_SCALE: f64 = 100.0;

/// Outcome of the chooser.
#[derive(Debug, Clone)]
pub struct BestMoveInfo {
    /// Node index of the winning root child.
    pub best_move_node: NodeIndex,
    pub best_move: Move,
    /// Visits of the winning child.
    pub n: u32,
    /// Mean value of the winning child, from the root's perspective.
    pub q: f64,
    /// Highest mean value among all ranked root children.
    pub best_q: f64,
    /// Highest visit count among all ranked root children.
    pub best_n: u32,
    /// Leader visits over runner-up visits; infinite when unique.
    pub top_moves_n_ratio: f64,
    /// Moves-left bonus the winner received, 0 when the bonus is off or
    /// inactive.
    pub mlh_bonus_applied: f64,
}

struct Candidate {
    node: NodeIndex,
    mv: Move,
    n: u32,
    q: f64,
    m_avg: f64,
}

/// Ranks the root's children and picks the move to play. `None` when the
/// root has no visited children to choose from.
pub fn choose_best_move(tree: &SearchTree, params: &SearchParams) -> Option<BestMoveInfo> {
    let root = tree.root();
    if root.is_null() {
        return None;
    }

    let mut candidates: Vec<Candidate> = tree
        .store()
        .edges_of(root)
        .iter()
        .filter(|edge| edge.is_expanded())
        .map(|edge| {
            let child = &tree[edge.child];
            Candidate {
                node: edge.child,
                mv: edge.mv,
                n: child.n(),
                // The child's value is oriented to its own side to move;
                // negate for the root's view.
                q: -child.q(),
                m_avg: child.m_avg as f64,
            }
        })
        .filter(|candidate| candidate.n > 0)
        .collect();
    if candidates.is_empty() {
        return None;
    }

    candidates.sort_by(|a, b| {
        b.n.cmp(&a.n)
            .then_with(|| b.q.partial_cmp(&a.q).unwrap_or(std::cmp::Ordering::Equal))
    });

    let best_n = candidates[0].n;
    let second_n = candidates.get(1).map_or(0, |c| c.n);
    let top_moves_n_ratio = if second_n == 0 {
        f64::INFINITY
    } else {
        best_n as f64 / second_n as f64
    };
    let best_q = candidates
        .iter()
        .map(|c| c.q)
        .fold(f64::NEG_INFINITY, f64::max);

    let (winner, bonus) = pick_with_mlh(&candidates, params);

    let info = BestMoveInfo {
        best_move_node: winner.node,
        best_move: winner.mv,
        n: winner.n,
        q: winner.q,
        best_q,
        best_n,
        top_moves_n_ratio,
        mlh_bonus_applied: bonus,
    };
    tracing::info!(
        best_move = %info.best_move,
        n = info.n,
        q = info.q,
        ratio = info.top_moves_n_ratio,
        "best move chosen"
    );
    Some(info)
}

/// Applies the moves-left comparison among near-tied contenders; returns
/// the winner and the bonus it received.
fn pick_with_mlh<'a>(
    candidates: &'a [Candidate],
    params: &SearchParams,
) -> (&'a Candidate, f64) {
    if params.mlh_bonus_factor == 0.0 || candidates.len() < 2 {
        return (&candidates[0], 0.0);
    }
    let top_n = candidates[0].n as f64;
    let eligible: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| c.n as f64 >= top_n * (1.0 - params.mlh_n_window))
        .collect();
    if eligible.len() < 2 {
        return (&candidates[0], 0.0);
    }

    let mean_m: f64 = eligible.iter().map(|c| c.m_avg).sum::<f64>() / eligible.len() as f64;
    let bonus_of = |candidate: &Candidate| -> f64 {
        if candidate.q.abs() < params.mlh_q_threshold {
            return 0.0;
        }
        // A below-average moves-left estimate yields a positive bonus for
        // winning positions (shorter win) and a negative one for losing
        // positions (faster loss), and vice versa.
        params.mlh_bonus_factor * (mean_m - candidate.m_avg) / MLH_MOVES_SCALE
            * candidate.q.signum()
    };

    let mut winner = eligible[0];
    let mut winner_bonus = bonus_of(winner);
    for candidate in &eligible[1..] {
        let bonus = bonus_of(candidate);
        let better = (candidate.q + bonus, candidate.n) > (winner.q + winner_bonus, winner.n);
        if better {
            winner = candidate;
            winner_bonus = bonus;
        }
    }
    (winner, winner_bonus)
}
