//! Zobrist Hashing Module
//!
//! Encodes positions as 64-bit integers for the transposition table. Two
//! positions reached by different move orders hash to the same value when
//! they agree on piece placement, side to move, castling rights and the
//! en-passant square, which is exactly the equivalence the search core uses
//! to share subtrees.
//!
//! The keys are generated randomly at program startup behind `lazy_static`
//! and stay constant for the life of the process, so hashes are stable
//! within a run but not across runs.

use crate::board::{Board, Color};
use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const PIECE_TYPES: usize = 6;
const COLORS: usize = 2;
const SQUARES: usize = 64;

/// The key tables for each hashable feature of a position.
pub struct ZobristKeys {
    piece_keys: [[[u64; SQUARES]; PIECE_TYPES]; COLORS],
    castling_keys: [u64; 4],
    en_passant_file_keys: [u64; 8],
    side_to_move_key: u64,
}

impl ZobristKeys {
    fn new() -> ZobristKeys {
        // Fixed seed: hashes are reproducible across runs, which the
        // transposition tests rely on.
        let mut rng = StdRng::seed_from_u64(0x0597_9E4B_17C2_D11E);
        let mut piece_keys = [[[0u64; SQUARES]; PIECE_TYPES]; COLORS];
        for color in piece_keys.iter_mut() {
            for piece in color.iter_mut() {
                for key in piece.iter_mut() {
                    *key = rng.gen();
                }
            }
        }
        ZobristKeys {
            piece_keys,
            castling_keys: rng.gen(),
            en_passant_file_keys: rng.gen(),
            side_to_move_key: rng.gen(),
        }
    }
}

lazy_static! {
    /// Global key set shared by every search in the process.
    pub static ref ZOBRIST_KEYS: ZobristKeys = ZobristKeys::new();
}

/// Computes the Zobrist hash of a position.
pub fn position_hash(board: &Board) -> u64 {
    let keys = &*ZOBRIST_KEYS;
    let mut hash = 0u64;
    for sq in 0..64u8 {
        if let Some(piece) = board.piece_at(sq) {
            let color = match piece.color {
                Color::White => 0,
                Color::Black => 1,
            };
            hash ^= keys.piece_keys[color][piece.kind.index()][sq as usize];
        }
    }
    for (i, flag) in board.castling.as_bits().iter().enumerate() {
        if *flag {
            hash ^= keys.castling_keys[i];
        }
    }
    if let Some(ep) = board.en_passant {
        hash ^= keys.en_passant_file_keys[(ep % 8) as usize];
    }
    if board.side_to_move == Color::Black {
        hash ^= keys.side_to_move_key;
    }
    hash
}
