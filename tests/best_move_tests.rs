#[cfg(test)]
mod best_move_tests {
    use osprey::board::{Board, Color, Piece, PieceKind};
    use osprey::errors::SearchError;
    use osprey::limits::SearchLimit;
    use osprey::mcts::policy::{EvalResult, Evaluator};
    use osprey::mcts::{Search, SearchParams};
    use osprey::move_generation::MoveGen;
    use osprey::move_types::{algebraic_to_sq, Move};

    /// Evaluator that sees a near-won game for White everywhere, but
    /// predicts a much shorter game in lines where the e-pawn stands on
    /// e4 than where the d-pawn stands on d4.
    struct MovesLeftEvaluator {
        move_gen: MoveGen,
    }

    impl Evaluator for MovesLeftEvaluator {
        fn evaluate(&mut self, batch: &[Board]) -> Result<Vec<EvalResult>, SearchError> {
            Ok(batch
                .iter()
                .map(|board| {
                    let (win_p, loss_p) = match board.side_to_move {
                        Color::White => (0.95, 0.05),
                        Color::Black => (0.05, 0.95),
                    };
                    let e4 = algebraic_to_sq("e4").unwrap();
                    let moves_left = if board.piece_at(e4)
                        == Some(Piece::new(PieceKind::Pawn, Color::White))
                    {
                        10.0
                    } else {
                        60.0
                    };
                    let moves = self.move_gen.legal_moves(board);
                    let prior = 1.0 / moves.len().max(1) as f32;
                    EvalResult {
                        win_p,
                        draw_p: 0.0,
                        loss_p,
                        moves_left,
                        priors: moves.iter().map(|&mv| (mv, prior)).collect(),
                    }
                })
                .collect())
        }
    }

    #[test]
    fn test_mlh_bonus_prefers_shorter_win() {
        let allowed = vec![
            Move::from_coord("e2e4").unwrap(),
            Move::from_coord("d2d4").unwrap(),
        ];
        let params = SearchParams {
            batch_size_per_selector: 4,
            mlh_bonus_factor: 1.0,
            mlh_q_threshold: 0.75,
            mlh_n_window: 0.5,
            ..SearchParams::default()
        };
        let limit = SearchLimit::nodes_per_move(40.0)
            .unwrap()
            .with_search_moves(allowed);
        let mut search = Search::new(
            Board::start_position(),
            &[],
            limit,
            params,
            MovesLeftEvaluator {
                move_gen: MoveGen::new(),
            },
        )
        .unwrap();
        search.run().unwrap();

        let best = search.best().unwrap();
        assert_eq!(best.best_move.to_string(), "e2e4", "shorter win preferred");
        assert!(best.mlh_bonus_applied > 0.0);
        assert!(best.q > 0.75, "the position is decisively won");
    }

    #[test]
    fn test_mlh_bonus_off_by_default() {
        let params = SearchParams {
            batch_size_per_selector: 4,
            ..SearchParams::default()
        };
        assert_eq!(params.mlh_bonus_factor, 0.0);
        let limit = SearchLimit::nodes_per_move(40.0).unwrap();
        let mut search = Search::new(
            Board::start_position(),
            &[],
            limit,
            params,
            MovesLeftEvaluator {
                move_gen: MoveGen::new(),
            },
        )
        .unwrap();
        search.run().unwrap();

        let best = search.best().unwrap();
        assert_eq!(best.mlh_bonus_applied, 0.0);
        assert!(best.n > 0);
        assert_eq!(best.best_n, best.n, "without the bonus the leader wins");
    }

    #[test]
    fn test_top_moves_ratio_reported() {
        let params = SearchParams {
            batch_size_per_selector: 8,
            ..SearchParams::default()
        };
        let limit = SearchLimit::nodes_per_move(128.0).unwrap();
        let mut search = Search::new(
            Board::start_position(),
            &[],
            limit,
            params,
            MovesLeftEvaluator {
                move_gen: MoveGen::new(),
            },
        )
        .unwrap();
        search.run().unwrap();

        let best = search.best().unwrap();
        assert!(best.top_moves_n_ratio >= 1.0);
        assert!(best.best_n >= best.n);
        assert!(best.best_q >= best.q);
    }
}
