//! Legal move generation.
//!
//! `MoveGen` precomputes knight and king destination tables at construction
//! and generates fully legal moves by filtering pseudo-legal candidates
//! through a king-safety check on the successor position.

use crate::board::{Board, Color, Piece, PieceKind};
use crate::move_types::Move;
use smallvec::SmallVec;

/// Legal-move buffer. Chess positions rarely exceed 64 legal moves, so the
/// common case stays on the stack.
pub type MoveList = SmallVec<[Move; 64]>;

const BISHOP_DIRS: [(i32, i32); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];
const ROOK_DIRS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const KNIGHT_JUMPS: [(i32, i32); 8] = [
    (1, 2),
    (2, 1),
    (2, -1),
    (1, -2),
    (-1, -2),
    (-2, -1),
    (-2, 1),
    (-1, 2),
];
const KING_STEPS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

fn offset(sq: u8, df: i32, dr: i32) -> Option<u8> {
    let file = (sq % 8) as i32 + df;
    let rank = (sq / 8) as i32 + dr;
    if (0..8).contains(&file) && (0..8).contains(&rank) {
        Some((rank * 8 + file) as u8)
    } else {
        None
    }
}

/// Move generator with precomputed leaper tables.
pub struct MoveGen {
    knight_targets: Vec<Vec<u8>>,
    king_targets: Vec<Vec<u8>>,
}

impl Default for MoveGen {
    fn default() -> Self {
        MoveGen::new()
    }
}

impl MoveGen {
    pub fn new() -> MoveGen {
        let mut knight_targets = Vec::with_capacity(64);
        let mut king_targets = Vec::with_capacity(64);
        for sq in 0..64u8 {
            knight_targets.push(
                KNIGHT_JUMPS
                    .iter()
                    .filter_map(|&(df, dr)| offset(sq, df, dr))
                    .collect(),
            );
            king_targets.push(
                KING_STEPS
                    .iter()
                    .filter_map(|&(df, dr)| offset(sq, df, dr))
                    .collect(),
            );
        }
        MoveGen {
            knight_targets,
            king_targets,
        }
    }

    /// Generates all legal moves for the side to move.
    pub fn legal_moves(&self, board: &Board) -> MoveList {
        let mut moves = MoveList::new();
        self.pseudo_legal(board, &mut moves);
        moves.retain(|&mut mv| {
            let next = board.apply_move(mv);
            // The move is legal if the mover's king is not left attacked.
            match next.king_square(board.side_to_move) {
                Some(king) => !self.is_square_attacked(&next, king, next.side_to_move),
                None => false,
            }
        });
        moves
    }

    /// True if `sq` is attacked by any piece of color `by`.
    pub fn is_square_attacked(&self, board: &Board, sq: u8, by: Color) -> bool {
        // Pawn attacks converge on the square from the defender's side.
        let pawn_dr = match by {
            Color::White => -1,
            Color::Black => 1,
        };
        for df in [-1, 1] {
            if let Some(from) = offset(sq, df, pawn_dr) {
                if board.piece_at(from) == Some(Piece::new(PieceKind::Pawn, by)) {
                    return true;
                }
            }
        }

        for &from in &self.knight_targets[sq as usize] {
            if board.piece_at(from) == Some(Piece::new(PieceKind::Knight, by)) {
                return true;
            }
        }
        for &from in &self.king_targets[sq as usize] {
            if board.piece_at(from) == Some(Piece::new(PieceKind::King, by)) {
                return true;
            }
        }

        for (dirs, kinds) in [
            (&BISHOP_DIRS, [PieceKind::Bishop, PieceKind::Queen]),
            (&ROOK_DIRS, [PieceKind::Rook, PieceKind::Queen]),
        ] {
            for &(df, dr) in dirs.iter() {
                let mut cur = sq;
                while let Some(next) = offset(cur, df, dr) {
                    if let Some(piece) = board.piece_at(next) {
                        if piece.color == by && kinds.contains(&piece.kind) {
                            return true;
                        }
                        break;
                    }
                    cur = next;
                }
            }
        }
        false
    }

    fn pseudo_legal(&self, board: &Board, moves: &mut MoveList) {
        let us = board.side_to_move;
        for sq in 0..64u8 {
            let piece = match board.piece_at(sq) {
                Some(p) if p.color == us => p,
                _ => continue,
            };
            match piece.kind {
                PieceKind::Pawn => self.pawn_moves(board, sq, us, moves),
                PieceKind::Knight => {
                    for &to in &self.knight_targets[sq as usize] {
                        if board.piece_at(to).map_or(true, |p| p.color != us) {
                            moves.push(Move::new(sq, to, None));
                        }
                    }
                }
                PieceKind::Bishop => self.slider_moves(board, sq, us, &BISHOP_DIRS, moves),
                PieceKind::Rook => self.slider_moves(board, sq, us, &ROOK_DIRS, moves),
                PieceKind::Queen => {
                    self.slider_moves(board, sq, us, &BISHOP_DIRS, moves);
                    self.slider_moves(board, sq, us, &ROOK_DIRS, moves);
                }
                PieceKind::King => {
                    for &to in &self.king_targets[sq as usize] {
                        if board.piece_at(to).map_or(true, |p| p.color != us) {
                            moves.push(Move::new(sq, to, None));
                        }
                    }
                    self.castling_moves(board, sq, us, moves);
                }
            }
        }
    }

    fn pawn_moves(&self, board: &Board, sq: u8, us: Color, moves: &mut MoveList) {
        let (dr, start_rank, promo_rank) = match us {
            Color::White => (1, 1, 7),
            Color::Black => (-1, 6, 0),
        };
        let push_promotions = |to: u8, moves: &mut MoveList| {
            if to / 8 == promo_rank {
                for kind in [
                    PieceKind::Queen,
                    PieceKind::Rook,
                    PieceKind::Bishop,
                    PieceKind::Knight,
                ] {
                    moves.push(Move::new(sq, to, Some(kind)));
                }
            } else {
                moves.push(Move::new(sq, to, None));
            }
        };

        if let Some(to) = offset(sq, 0, dr) {
            if board.piece_at(to).is_none() {
                push_promotions(to, moves);
                if sq / 8 == start_rank {
                    if let Some(two) = offset(sq, 0, 2 * dr) {
                        if board.piece_at(two).is_none() {
                            moves.push(Move::new(sq, two, None));
                        }
                    }
                }
            }
        }
        for df in [-1, 1] {
            if let Some(to) = offset(sq, df, dr) {
                let is_capture = board.piece_at(to).map_or(false, |p| p.color != us);
                if is_capture || Some(to) == board.en_passant {
                    push_promotions(to, moves);
                }
            }
        }
    }

    fn slider_moves(
        &self,
        board: &Board,
        sq: u8,
        us: Color,
        dirs: &[(i32, i32); 4],
        moves: &mut MoveList,
    ) {
        for &(df, dr) in dirs.iter() {
            let mut cur = sq;
            while let Some(to) = offset(cur, df, dr) {
                match board.piece_at(to) {
                    None => moves.push(Move::new(sq, to, None)),
                    Some(p) => {
                        if p.color != us {
                            moves.push(Move::new(sq, to, None));
                        }
                        break;
                    }
                }
                cur = to;
            }
        }
    }

    fn castling_moves(&self, board: &Board, king_sq: u8, us: Color, moves: &mut MoveList) {
        let (kingside, queenside, home) = match us {
            Color::White => (
                board.castling.white_kingside,
                board.castling.white_queenside,
                4u8,
            ),
            Color::Black => (
                board.castling.black_kingside,
                board.castling.black_queenside,
                60u8,
            ),
        };
        if king_sq != home {
            return;
        }
        let them = us.opponent();
        if self.is_square_attacked(board, king_sq, them) {
            return;
        }

        if kingside
            && board.piece_at(home + 3) == Some(Piece::new(PieceKind::Rook, us))
            && board.piece_at(home + 1).is_none()
            && board.piece_at(home + 2).is_none()
            && !self.is_square_attacked(board, home + 1, them)
            && !self.is_square_attacked(board, home + 2, them)
        {
            moves.push(Move::new(home, home + 2, None));
        }
        if queenside
            && board.piece_at(home - 4) == Some(Piece::new(PieceKind::Rook, us))
            && board.piece_at(home - 1).is_none()
            && board.piece_at(home - 2).is_none()
            && board.piece_at(home - 3).is_none()
            && !self.is_square_attacked(board, home - 1, them)
            && !self.is_square_attacked(board, home - 2, them)
        {
            moves.push(Move::new(home, home - 2, None));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::GameState;

    #[test]
    fn test_twenty_moves_from_start() {
        let move_gen = MoveGen::new();
        let board = Board::start_position();
        assert_eq!(move_gen.legal_moves(&board).len(), 20);
    }

    #[test]
    fn test_mate_in_one_has_rook_lift() {
        let move_gen = MoveGen::new();
        let board = Board::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
        let moves = move_gen.legal_moves(&board);
        assert!(moves.contains(&Move::from_coord("a1a8").unwrap()));

        let mated = board.apply_move(Move::from_coord("a1a8").unwrap());
        assert_eq!(mated.game_state(&move_gen), GameState::Checkmate);
    }

    #[test]
    fn test_stalemate_detected() {
        let move_gen = MoveGen::new();
        // Black king cornered on h8 by queen on g6; black to move, no check.
        let board = Board::from_fen("7k/8/6QK/8/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(board.game_state(&move_gen), GameState::Stalemate);
    }

    #[test]
    fn test_en_passant_capture_is_legal() {
        let move_gen = MoveGen::new();
        let board =
            Board::from_fen("rnbqkbnr/ppp1pppp/8/8/3pP3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 3")
                .unwrap();
        let moves = move_gen.legal_moves(&board);
        assert!(moves.contains(&Move::from_coord("d4e3").unwrap()));
    }
}
