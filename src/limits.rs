//! Search resource limits.
//!
//! A `SearchLimit` describes when a search should stop: a node or time
//! budget, scoped either to a single move or to the rest of the game.
//! Per-game limits carry an optional per-move increment and can be
//! projected down to an equivalent per-move limit with a fixed horizon.

use crate::errors::SearchError;
use crate::move_types::Move;
use std::fmt;
use std::ops::Mul;

/// Number of future moves assumed when projecting a per-game budget onto a
/// single move and no explicit moves-to-go is available.
const DEFAULT_MOVE_HORIZON: f64 = 20.0;

/// Estimates below this duration are unreliable when the NPS figure is a
/// prior rather than an observation; they get scaled down hard.
const SHORT_ESTIMATE_SECONDS: f64 = 0.1;
const SHORT_ESTIMATE_SCALE: f64 = 0.3;

/// The four limit kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    NodesPerMove,
    SecondsPerMove,
    NodesForAllMoves,
    SecondsForAllMoves,
}

impl LimitKind {
    /// Per-game kinds budget the remainder of the game rather than one move.
    pub fn is_per_game(self) -> bool {
        matches!(
            self,
            LimitKind::NodesForAllMoves | LimitKind::SecondsForAllMoves
        )
    }

    pub fn is_time_based(self) -> bool {
        matches!(
            self,
            LimitKind::SecondsPerMove | LimitKind::SecondsForAllMoves
        )
    }

    fn code(self) -> &'static str {
        match self {
            LimitKind::NodesPerMove => "NM",
            LimitKind::SecondsPerMove => "SM",
            LimitKind::NodesForAllMoves => "NG",
            LimitKind::SecondsForAllMoves => "SG",
        }
    }
}

/// A validated search stopping condition.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchLimit {
    pub kind: LimitKind,
    pub value: f64,
    pub value_increment: f64,
    pub max_moves_to_go: Option<u32>,
    pub search_can_be_expanded: bool,
    pub search_moves: Option<Vec<Move>>,
}

impl SearchLimit {
    /// Builds a limit, rejecting negative values and increments on per-move
    /// kinds.
    pub fn new(kind: LimitKind, value: f64, value_increment: f64) -> Result<SearchLimit, SearchError> {
        if value < 0.0 {
            return Err(SearchError::InvalidLimit(format!(
                "value must be non-negative, got {value}"
            )));
        }
        if value_increment < 0.0 {
            return Err(SearchError::InvalidLimit(format!(
                "increment must be non-negative, got {value_increment}"
            )));
        }
        if value_increment > 0.0 && !kind.is_per_game() {
            return Err(SearchError::InvalidLimit(
                "increment is only valid for per-game limits".to_string(),
            ));
        }
        Ok(SearchLimit {
            kind,
            value,
            value_increment,
            max_moves_to_go: None,
            search_can_be_expanded: true,
            search_moves: None,
        })
    }

    pub fn nodes_per_move(nodes: f64) -> Result<SearchLimit, SearchError> {
        SearchLimit::new(LimitKind::NodesPerMove, nodes, 0.0)
    }

    pub fn seconds_per_move(seconds: f64) -> Result<SearchLimit, SearchError> {
        SearchLimit::new(LimitKind::SecondsPerMove, seconds, 0.0)
    }

    pub fn nodes_for_all_moves(nodes: f64, increment: f64) -> Result<SearchLimit, SearchError> {
        SearchLimit::new(LimitKind::NodesForAllMoves, nodes, increment)
    }

    pub fn seconds_for_all_moves(seconds: f64, increment: f64) -> Result<SearchLimit, SearchError> {
        SearchLimit::new(LimitKind::SecondsForAllMoves, seconds, increment)
    }

    pub fn with_max_moves_to_go(mut self, moves: u32) -> SearchLimit {
        self.max_moves_to_go = Some(moves);
        self
    }

    pub fn with_search_moves(mut self, moves: Vec<Move>) -> SearchLimit {
        self.search_moves = Some(moves);
        self
    }

    pub fn with_expandable_store(mut self, expandable: bool) -> SearchLimit {
        self.search_can_be_expanded = expandable;
        self
    }

    fn move_horizon(&self) -> f64 {
        match self.max_moves_to_go {
            Some(moves) if moves > 0 => moves as f64,
            _ => DEFAULT_MOVE_HORIZON,
        }
    }

    /// Adds the per-move increment to the remaining budget. Per-move kinds
    /// have no increment, so this is the identity for them.
    pub fn with_increment_applied(mut self) -> SearchLimit {
        if self.kind.is_per_game() {
            self.value += self.value_increment;
        }
        self
    }

    /// Projects a per-game budget onto the next move: the remaining budget
    /// is spread over the move horizon and the increment (fully available
    /// each move) is added on top. Per-move limits pass through unchanged,
    /// which also makes the projection idempotent.
    pub fn converted_game_to_move_limit(&self) -> SearchLimit {
        if !self.kind.is_per_game() {
            return self.clone();
        }
        let per_move_kind = match self.kind {
            LimitKind::NodesForAllMoves => LimitKind::NodesPerMove,
            LimitKind::SecondsForAllMoves => LimitKind::SecondsPerMove,
            _ => unreachable!(),
        };
        SearchLimit {
            kind: per_move_kind,
            value: self.value / self.move_horizon() + self.value_increment,
            value_increment: 0.0,
            max_moves_to_go: self.max_moves_to_go,
            search_can_be_expanded: self.search_can_be_expanded,
            search_moves: self.search_moves.clone(),
        }
    }

    /// Heuristic node budget for this limit given a nodes-per-second figure.
    /// `nps_is_observed` distinguishes a measured throughput from an assumed
    /// prior; short time estimates based on a prior are scaled down.
    pub fn estimate_nodes(&self, nps: f64, nps_is_observed: bool) -> f64 {
        match self.kind {
            LimitKind::NodesPerMove => self.value,
            LimitKind::NodesForAllMoves => self.value / self.move_horizon() + self.value_increment,
            LimitKind::SecondsPerMove | LimitKind::SecondsForAllMoves => {
                let seconds = if self.kind.is_per_game() {
                    self.value / self.move_horizon() + self.value_increment
                } else {
                    self.value
                };
                let mut estimate = seconds * nps;
                if seconds < SHORT_ESTIMATE_SECONDS && !nps_is_observed {
                    estimate *= SHORT_ESTIMATE_SCALE;
                }
                estimate
            }
        }
    }
}

impl Mul<f64> for SearchLimit {
    type Output = SearchLimit;

    /// Scales both the value and the increment, e.g. to reserve a fraction
    /// of the remaining budget.
    fn mul(mut self, factor: f64) -> SearchLimit {
        self.value *= factor;
        self.value_increment *= factor;
        self
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

impl fmt::Display for SearchLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}", self.kind.code(), format_number(self.value))?;
        if self.value_increment > 0.0 {
            write!(f, " + {}", format_number(self.value_increment))?;
        }
        if let Some(moves) = self.max_moves_to_go {
            write!(f, " Moves {moves}")?;
        }
        if let Some(moves) = &self.search_moves {
            write!(f, " searchmoves")?;
            for mv in moves {
                write!(f, " {mv}")?;
            }
        }
        write!(f, ">")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_value_rejected() {
        assert!(matches!(
            SearchLimit::nodes_per_move(-1.0),
            Err(SearchError::InvalidLimit(_))
        ));
    }

    #[test]
    fn test_increment_on_per_move_rejected() {
        assert!(matches!(
            SearchLimit::new(LimitKind::NodesPerMove, 100.0, 1.0),
            Err(SearchError::InvalidLimit(_))
        ));
    }

    #[test]
    fn test_scalar_multiplication() {
        let limit = SearchLimit::nodes_per_move(1000.0).unwrap() * 2.5;
        assert_eq!(limit.value, 2500.0);

        let limit = SearchLimit::seconds_for_all_moves(60.0, 1.0).unwrap() * 0.5;
        assert_eq!(limit.value, 30.0);
        assert_eq!(limit.value_increment, 0.5);
    }

    #[test]
    fn test_multiplication_composes() {
        let limit = SearchLimit::seconds_for_all_moves(60.0, 2.0).unwrap();
        let a = (limit.clone() * 2.0) * 0.25;
        let b = limit * 0.5;
        assert_eq!(a, b);
    }

    #[test]
    fn test_game_to_move_projection_idempotent() {
        let game = SearchLimit::nodes_for_all_moves(2000.0, 10.0).unwrap();
        let per_move = game.converted_game_to_move_limit();
        assert_eq!(per_move.kind, LimitKind::NodesPerMove);
        assert_eq!(per_move.value, 2000.0 / 20.0 + 10.0);
        assert_eq!(per_move, per_move.converted_game_to_move_limit());

        let already = SearchLimit::nodes_per_move(500.0).unwrap();
        assert_eq!(already, already.converted_game_to_move_limit());
    }

    #[test]
    fn test_increment_applied_only_per_game() {
        let game = SearchLimit::seconds_for_all_moves(60.0, 1.5).unwrap();
        assert_eq!(game.with_increment_applied().value, 61.5);

        let per_move = SearchLimit::seconds_per_move(5.0).unwrap();
        assert_eq!(per_move.clone().with_increment_applied(), per_move);
    }

    #[test]
    fn test_estimate_nodes() {
        let nodes = SearchLimit::nodes_per_move(4096.0).unwrap();
        assert_eq!(nodes.estimate_nodes(30_000.0, false), 4096.0);

        let time = SearchLimit::seconds_per_move(2.0).unwrap();
        assert_eq!(time.estimate_nodes(30_000.0, false), 60_000.0);

        // Sub-100ms estimates from an assumed NPS prior get scaled by 0.3.
        let short = SearchLimit::seconds_per_move(0.05).unwrap();
        assert!((short.estimate_nodes(30_000.0, false) - 450.0).abs() < 1e-9);
        assert!((short.estimate_nodes(30_000.0, true) - 1500.0).abs() < 1e-9);

        let game = SearchLimit::seconds_for_all_moves(40.0, 0.0)
            .unwrap()
            .with_max_moves_to_go(10);
        assert_eq!(game.estimate_nodes(1000.0, true), 4000.0);
    }

    #[test]
    fn test_display_form() {
        let limit = SearchLimit::nodes_per_move(1000.0).unwrap();
        assert_eq!(limit.to_string(), "<NM, 1000>");

        let limit = SearchLimit::seconds_for_all_moves(60.0, 1.0)
            .unwrap()
            .with_max_moves_to_go(40);
        assert_eq!(limit.to_string(), "<SG, 60 + 1 Moves 40>");

        let limit = SearchLimit::nodes_per_move(64.0)
            .unwrap()
            .with_search_moves(vec![Move::from_coord("e2e4").unwrap()]);
        assert_eq!(limit.to_string(), "<NM, 64 searchmoves e2e4>");
    }
}
