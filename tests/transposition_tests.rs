#[cfg(test)]
mod transposition_tests {
    use osprey::board::Board;
    use osprey::limits::SearchLimit;
    use osprey::mcts::policy::UniformEvaluator;
    use osprey::mcts::{Search, SearchParams};

    fn params(batch: u32) -> SearchParams {
        SearchParams {
            batch_size_per_selector: batch,
            ..SearchParams::default()
        }
    }

    /// An evaluator with a decisive lean so that borrowed values are
    /// visibly non-zero.
    fn leaning_evaluator() -> UniformEvaluator {
        UniformEvaluator::with_value(0.7, 0.2, 0.1, 30.0)
    }

    #[test]
    fn test_second_search_reuses_subtree_without_evaluator() {
        let limit = SearchLimit::nodes_per_move(300.0).unwrap();
        let mut search = Search::new(
            Board::start_position(),
            &[],
            limit,
            params(1),
            leaning_evaluator(),
        )
        .unwrap();
        search.run().unwrap();
        assert!(search.root_visits() >= 300);

        // The same position searched again (as after a move-order
        // transposition) links to the canonical subtree immediately.
        let calls_before = search.evaluator().calls;
        search
            .new_search(
                Board::start_position(),
                &[],
                SearchLimit::nodes_per_move(2.0).unwrap(),
            )
            .unwrap();
        let root = search.tree().root();
        assert!(search.tree()[root].is_transposition_linked());

        search.step().unwrap();

        // Both visits backed up borrowed values; the evaluator never ran.
        assert_eq!(search.evaluator().calls, calls_before);
        let record = &search.tree()[root];
        assert_eq!(record.n(), 2);
        assert!(
            record.v_variance() > 0.0,
            "the borrowed values were non-zero and sign-alternating"
        );

        // The extraction cursor never outruns the canonical subtree.
        let source = record.transposition_root;
        assert!(record.num_transposition_extracted <= search.tree().subtree_size(source));
    }

    #[test]
    fn test_materialization_is_idempotent() {
        let limit = SearchLimit::nodes_per_move(200.0).unwrap();
        let mut search = Search::new(
            Board::start_position(),
            &[],
            limit,
            params(4),
            leaning_evaluator(),
        )
        .unwrap();
        search.run().unwrap();

        // Re-rooting on the same position plants a guaranteed link.
        search
            .new_search(
                Board::start_position(),
                &[],
                SearchLimit::nodes_per_move(4.0).unwrap(),
            )
            .unwrap();
        search.step().unwrap();
        assert!(search.tree().transposition_link_count() > 0);

        search.materialize_all_transposition_links().unwrap();
        assert_eq!(search.tree().transposition_link_count(), 0);

        let snapshot: Vec<(u32, f64, f32, f32)> = search
            .tree()
            .store()
            .indices()
            .map(|idx| {
                let record = search.tree().store().node(idx);
                (record.n(), record.q(), record.w_avg, record.m_avg)
            })
            .collect();

        // A second sweep finds nothing to do and changes nothing.
        search.materialize_all_transposition_links().unwrap();
        let after: Vec<(u32, f64, f32, f32)> = search
            .tree()
            .store()
            .indices()
            .map(|idx| {
                let record = search.tree().store().node(idx);
                (record.n(), record.q(), record.w_avg, record.m_avg)
            })
            .collect();
        assert_eq!(snapshot, after);
    }

    #[test]
    fn test_materialized_root_copies_canonical_moves() {
        let limit = SearchLimit::nodes_per_move(100.0).unwrap();
        let mut search = Search::new(
            Board::start_position(),
            &[],
            limit,
            params(4),
            leaning_evaluator(),
        )
        .unwrap();
        search.run().unwrap();
        let canonical = search.tree().root();
        let canonical_moves: Vec<_> = search
            .tree()
            .store()
            .edges_of(canonical)
            .iter()
            .map(|edge| edge.mv)
            .collect();

        search
            .new_search(
                Board::start_position(),
                &[],
                SearchLimit::nodes_per_move(50.0).unwrap(),
            )
            .unwrap();
        let root = search.tree().root();
        search.materialize_all_transposition_links().unwrap();

        let record = &search.tree()[root];
        assert!(!record.is_transposition_linked());
        let moves: Vec<_> = search
            .tree()
            .store()
            .edges_of(root)
            .iter()
            .map(|edge| edge.mv)
            .collect();
        assert_eq!(moves, canonical_moves);
        // The copied edge block starts fully unexpanded.
        assert!(search
            .tree()
            .store()
            .edges_of(root)
            .iter()
            .all(|edge| !edge.is_expanded()));
        assert_eq!(record.num_children_expanded, 0);

        // The freshly independent root can now search on its own.
        search.run().unwrap();
        assert!(search.root_visits() >= 50);
    }

    #[test]
    fn test_interior_transpositions_are_shared() {
        // Restricting the root to two commuting pawn pushes guarantees
        // transposing move orders a few plies down; the transposed nodes
        // must borrow values instead of re-evaluating.
        let allowed = vec![
            osprey::move_types::Move::from_coord("a2a3").unwrap(),
            osprey::move_types::Move::from_coord("b2b3").unwrap(),
        ];
        let limit = SearchLimit::nodes_per_move(600.0)
            .unwrap()
            .with_search_moves(allowed);
        let mut search = Search::new(
            Board::start_position(),
            &[],
            limit,
            params(8),
            leaning_evaluator(),
        )
        .unwrap();
        search.run().unwrap();

        let evaluated = search.evaluator().positions_evaluated;
        let allocated = search.tree().store().len() as u64;
        assert!(
            evaluated < allocated,
            "linked nodes ({} allocated, {} evaluated) never reached the evaluator",
            allocated,
            evaluated
        );
    }
}
