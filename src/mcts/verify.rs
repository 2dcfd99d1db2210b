//! Consistency sweep over the whole tree.
//!
//! Run between batches (debug builds run it after every step), when no
//! reservations are outstanding. Every failure is reported as
//! `SearchError::Inconsistent` and treated as fatal by the driver.

use crate::errors::SearchError;
use crate::mcts::store::NodeIndex;
use crate::mcts::tree::SearchTree;

fn fail(idx: NodeIndex, what: &str) -> SearchError {
    SearchError::Inconsistent(format!("node {}: {}", idx.raw(), what))
}

/// Checks the quiescent-tree invariants:
///
/// * in-flight counters are zero for both selectors;
/// * visit conservation: `N` equals the children's visits plus what the
///   node absorbed itself while it was a leaf; an expanded interior node
///   absorbed at least one visit of its own, and a node with no value
///   source has no completed visits at all;
/// * expanded children occupy a prefix of the edge block, and children
///   with completed visits a prefix of that;
/// * the unexpanded tail is sorted by descending prior;
/// * visited-children accounting matches the edge block;
/// * a linked node owns no edges and its extraction cursor never exceeds
///   the canonical subtree's size.
pub fn verify_quiescent(tree: &SearchTree) -> Result<(), SearchError> {
    let store = tree.store();
    for idx in store.indices() {
        let record = store.node(idx);

        for selector in 0..crate::mcts::store::NUM_SELECTORS {
            if record.in_flight(selector) != 0 {
                return Err(fail(idx, "in-flight visits outstanding at rest"));
            }
        }

        let edges = store.edges_of(idx);
        let terminal = record.terminal.is_terminal();
        let linked = record.is_transposition_linked();

        if (terminal || linked) && !edges.is_empty() {
            return Err(fail(idx, "terminal or linked node owns edges"));
        }

        let child_visits: u32 = edges
            .iter()
            .filter(|edge| edge.is_expanded())
            .map(|edge| store.node(edge.child).n())
            .sum();
        if record.n() < child_visits {
            return Err(fail(idx, "children carry more visits than the node"));
        }
        // A node absorbs visits itself only while it is a leaf (its own
        // evaluation, repeated terminal or borrowed-value visits). A node
        // with no value source cannot have completed any.
        if !terminal && !linked && !record.is_evaluated() && record.n() != 0 {
            return Err(fail(idx, "unevaluated node has completed visits"));
        }

        let expanded = record.num_children_expanded as usize;
        if expanded > edges.len() {
            return Err(fail(idx, "expansion count exceeds edge block"));
        }
        // An expanded interior node absorbed at least one visit of its own
        // before selection descended below it (its evaluation, or its
        // borrowed-value draws while it was still linked).
        if !terminal && !linked && record.is_evaluated() && expanded > 0 && record.n() == child_visits
        {
            return Err(fail(idx, "expanded node absorbed no visit of its own"));
        }
        for (slot, edge) in edges.iter().enumerate() {
            if (slot < expanded) != edge.is_expanded() {
                return Err(fail(idx, "expanded children are not a slot prefix"));
            }
        }
        for pair in edges[expanded.min(edges.len())..].windows(2) {
            if pair[0].p < pair[1].p {
                return Err(fail(idx, "unexpanded edges not sorted by prior"));
            }
        }

        let visited = edges
            .iter()
            .filter(|edge| edge.is_expanded() && store.node(edge.child).n() > 0)
            .count();
        if record.num_children_visited as usize != visited {
            return Err(fail(idx, "visited-children count out of sync"));
        }
        if record.num_children_visited > record.num_policy_moves {
            return Err(fail(idx, "more children visited than policy moves"));
        }
        let mut seen_unvisited = false;
        for edge in edges.iter().filter(|edge| edge.is_expanded()) {
            let has_visits = store.node(edge.child).n() > 0;
            if has_visits && seen_unvisited {
                return Err(fail(idx, "visited children are not a slot prefix"));
            }
            seen_unvisited |= !has_visits;
        }

        if linked {
            let source = record.transposition_root;
            if record.num_transposition_extracted > tree.subtree_size(source) {
                return Err(fail(idx, "extraction cursor beyond canonical subtree"));
            }
        }
    }
    Ok(())
}
