//! # Osprey
//!
//! The search core of a neural-network-guided Monte Carlo Tree Search
//! chess engine. The tree lives in a dense arena of fixed-size node
//! records addressed by 32-bit indices; two lockstep selectors descend it
//! under a PUCT rule with virtual loss, leaves are evaluated in batches
//! by an external evaluator, and equivalent positions reached through
//! different move orders share subtrees through a transposition table
//! with lazy materialization.
//!
//! It provides modules for:
//! - Board representation and FEN handling (`board`)
//! - Move generation (`move_generation`)
//! - Core move and square types (`move_types`)
//! - Position hashing (`hash`)
//! - Search resource limits (`limits`)
//! - Error types (`errors`)
//! - The search itself (`mcts`): node store, tree index and transposition
//!   table, selection, evaluator dispatch and backup, best-move choice
//!
//! Network inference, opening books, tablebases and protocol handling are
//! deliberately outside this crate; the evaluator is abstract and the
//! driver-facing surface is `mcts::Search`.

pub mod board;
pub mod errors;
pub mod hash;
pub mod limits;
pub mod mcts;
pub mod move_generation;
pub mod move_types;

pub use board::{Board, Color, GameState, Piece, PieceKind};
pub use errors::SearchError;
pub use limits::{LimitKind, SearchLimit};
pub use mcts::{
    BestMoveInfo, EvalResult, Evaluator, NodeIndex, Search, SearchParams, SearchProgress,
    SearchTree, Terminal, UniformEvaluator,
};
pub use move_generation::{MoveGen, MoveList};
pub use move_types::Move;
