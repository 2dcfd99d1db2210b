#[cfg(test)]
mod mcts_tests {
    use osprey::board::Board;
    use osprey::errors::SearchError;
    use osprey::limits::SearchLimit;
    use osprey::mcts::policy::{EvalResult, Evaluator, FailingEvaluator, UniformEvaluator};
    use osprey::mcts::{Search, SearchParams, Terminal};
    use osprey::move_generation::MoveGen;
    use osprey::move_types::Move;

    fn small_batch_params(batch: u32) -> SearchParams {
        SearchParams {
            batch_size_per_selector: batch,
            ..SearchParams::default()
        }
    }

    /// Evaluator that refuses positions with no legal moves: the search
    /// must classify those as terminal itself and never dispatch them.
    struct LegalOnlyEvaluator {
        inner: UniformEvaluator,
        move_gen: MoveGen,
    }

    impl LegalOnlyEvaluator {
        fn new() -> LegalOnlyEvaluator {
            LegalOnlyEvaluator {
                inner: UniformEvaluator::new(),
                move_gen: MoveGen::new(),
            }
        }
    }

    impl Evaluator for LegalOnlyEvaluator {
        fn evaluate(&mut self, batch: &[Board]) -> Result<Vec<EvalResult>, SearchError> {
            for board in batch {
                assert!(
                    !self.move_gen.legal_moves(board).is_empty(),
                    "terminal position sent to the evaluator: {}",
                    board.to_fen()
                );
            }
            self.inner.evaluate(batch)
        }
    }

    fn assert_no_in_flight<E: Evaluator>(search: &Search<E>) {
        let store = search.tree().store();
        for idx in store.indices() {
            let record = store.node(idx);
            assert_eq!(record.in_flight(0), 0, "selector 0 left visits in flight");
            assert_eq!(record.in_flight(1), 0, "selector 1 left visits in flight");
        }
    }

    #[test]
    fn test_mate_in_one_found() {
        let board = Board::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
        let limit = SearchLimit::nodes_per_move(256.0).unwrap();
        let mut search = Search::new(
            board,
            &[],
            limit,
            small_batch_params(8),
            LegalOnlyEvaluator::new(),
        )
        .unwrap();
        search.run().unwrap();

        assert!(search.root_visits() >= 256);
        let best = search.best().unwrap();
        assert_eq!(best.best_move.to_string(), "a1a8");
        assert_eq!(best.q, 1.0);
        assert_eq!(
            search.tree()[best.best_move_node].terminal,
            Terminal::Loss,
            "the mated side's node carries the loss"
        );
        assert_no_in_flight(&search);
    }

    #[test]
    fn test_virtual_loss_visit_conservation() {
        // Two selectors each reserving 64 visits per batch, ten batches:
        // every reserved visit must complete, no more, no fewer.
        let limit = SearchLimit::nodes_per_move(1_000_000.0).unwrap();
        let mut search = Search::new(
            Board::start_position(),
            &[],
            limit,
            small_batch_params(64),
            UniformEvaluator::new(),
        )
        .unwrap();

        for _ in 0..10 {
            search.step().unwrap();
        }

        assert_eq!(search.root_visits(), 1280);
        assert_no_in_flight(&search);
    }

    #[test]
    fn test_zero_evaluator_keeps_q_at_zero() {
        // A dead-even evaluator leaves every Q at exactly zero while the
        // visit counts still add up to the reserved batch totals.
        let limit = SearchLimit::nodes_per_move(96.0).unwrap();
        let mut search = Search::new(
            Board::start_position(),
            &[],
            limit,
            small_batch_params(16),
            UniformEvaluator::new(),
        )
        .unwrap();
        let progress = search.run().unwrap();

        assert_eq!(progress.root_visits, 96);
        let store = search.tree().store();
        for idx in store.indices() {
            assert_eq!(store.node(idx).q(), 0.0);
        }
        assert_no_in_flight(&search);
    }

    #[test]
    fn test_search_moves_restrict_root() {
        let allowed = vec![
            Move::from_coord("e2e4").unwrap(),
            Move::from_coord("d2d4").unwrap(),
        ];
        let limit = SearchLimit::nodes_per_move(64.0)
            .unwrap()
            .with_search_moves(allowed.clone());
        let mut search = Search::new(
            Board::start_position(),
            &[],
            limit,
            small_batch_params(8),
            UniformEvaluator::new(),
        )
        .unwrap();
        search.run().unwrap();

        let tree = search.tree();
        let edges = tree.store().edges_of(tree.root());
        assert_eq!(edges.len(), 2, "root keeps only the restricted moves");
        for edge in edges {
            assert!(allowed.contains(&edge.mv));
        }
        let best = search.best().unwrap();
        assert!(allowed.contains(&best.best_move));
    }

    #[test]
    fn test_evaluator_failure_releases_reservations() {
        let limit = SearchLimit::nodes_per_move(100.0).unwrap();
        let mut search = Search::new(
            Board::start_position(),
            &[],
            limit,
            small_batch_params(8),
            FailingEvaluator,
        )
        .unwrap();

        let err = search.step();
        assert!(matches!(err, Err(SearchError::EvaluatorFailure(_))));

        // No visit may have completed and nothing may be left reserved.
        assert_eq!(search.root_visits(), 0);
        assert_no_in_flight(&search);

        // The failure aborts the step, not the search.
        let again = search.step();
        assert!(matches!(again, Err(SearchError::EvaluatorFailure(_))));
    }

    #[test]
    fn test_store_exhaustion_aborts_with_tree_preserved() {
        let params = SearchParams {
            batch_size_per_selector: 8,
            max_tree_nodes: 128,
            ..SearchParams::default()
        };
        let limit = SearchLimit::nodes_per_move(100_000.0)
            .unwrap()
            .with_expandable_store(false);
        let mut search = Search::new(
            Board::start_position(),
            &[],
            limit,
            params,
            UniformEvaluator::new(),
        )
        .unwrap();

        let err = search.run();
        assert!(matches!(err, Err(SearchError::StoreExhausted(_))));

        // The tree built so far survives and the search reports itself
        // stopped.
        assert!(search.tree().store().len() > 0);
        assert!(search.progress().stopped);
        assert!(search.best().is_some());
    }

    #[test]
    fn test_stop_is_cooperative() {
        let limit = SearchLimit::nodes_per_move(1_000_000.0).unwrap();
        let mut search = Search::new(
            Board::start_position(),
            &[],
            limit,
            small_batch_params(8),
            UniformEvaluator::new(),
        )
        .unwrap();
        search.step().unwrap();
        search.stop();
        let progress = search.run().unwrap();

        // The completed batch stays; nothing further runs.
        assert_eq!(progress.root_visits, 16);
        assert!(progress.stopped);
        assert_no_in_flight(&search);
    }

    #[test]
    fn test_terminal_root_has_no_best_move() {
        // A checkmated root cannot search at all.
        let board = Board::from_fen("R5k1/5ppp/8/8/8/8/5PPP/6K1 b - - 0 1").unwrap();
        let limit = SearchLimit::nodes_per_move(100.0).unwrap();
        let mut search = Search::new(
            board,
            &[],
            limit,
            small_batch_params(4),
            UniformEvaluator::new(),
        )
        .unwrap();
        let progress = search.run().unwrap();
        assert!(progress.stopped);
        assert_eq!(progress.root_visits, 0);
        assert!(search.best().is_none());
    }

    #[test]
    fn test_progress_counts_evaluator_calls() {
        let limit = SearchLimit::nodes_per_move(64.0).unwrap();
        let mut search = Search::new(
            Board::start_position(),
            &[],
            limit,
            small_batch_params(16),
            UniformEvaluator::new(),
        )
        .unwrap();
        let progress = search.run().unwrap();
        assert_eq!(progress.batches, 2);
        assert_eq!(progress.evaluator_calls, search.evaluator().calls);
        assert!(search.evaluator().calls >= 1);
    }
}
