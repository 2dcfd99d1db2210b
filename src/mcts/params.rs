//! Tunable search parameters.

/// Configuration for the PUCT search.
///
/// Exploration constants follow the logarithmically growing formula
/// `cpuct(N) = cpuct_base + cpuct_factor * ln((N + cpuct_init + 1) / cpuct_init)`,
/// with separate constants applied at the root and in the interior.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Additive exploration constant in the interior of the tree.
    pub cpuct_base: f32,
    /// Scale of the logarithmic growth term.
    pub cpuct_factor: f32,
    /// Visit offset inside the logarithm; larger values delay growth.
    pub cpuct_init: f32,
    /// Root-specific variants of the three constants above.
    pub cpuct_base_at_root: f32,
    pub cpuct_factor_at_root: f32,
    pub cpuct_init_at_root: f32,

    /// Exponent applied to the parent visit count before the square root in
    /// the exploration numerator. 1 yields the conventional sqrt(N).
    pub parent_visits_exponent: f32,
    /// Exponent applied to `(n + 1)` in the exploration denominator at the
    /// root. Interior nodes always use 1.
    pub uct_root_denominator_exponent: f32,

    /// First-play urgency: offset subtracted from the parent Q when scoring
    /// a child that has never been visited.
    pub fpu_offset: f32,
    pub fpu_offset_at_root: f32,
    /// Additional FPU reduction scaled by sqrt of the policy mass already
    /// visited below the parent. 0 disables the reduction.
    pub fpu_reduction: f32,

    /// Maximum number of child edges retained per node; the policy is
    /// sorted by prior and truncated to this many moves.
    pub max_policy_moves: usize,
    /// Visits each selector reserves per batch.
    pub batch_size_per_selector: u32,

    /// Moves-left-head bonus applied by the best-move chooser. 0 disables
    /// the bonus entirely.
    pub mlh_bonus_factor: f64,
    /// Absolute Q above which the MLH bonus activates.
    pub mlh_q_threshold: f64,
    /// Visit-count window (as a fraction of the top child's visits) within
    /// which contenders are eligible for the MLH comparison.
    pub mlh_n_window: f64,

    /// Node-arena capacity when the limit gives no better bound.
    pub max_tree_nodes: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            cpuct_base: 1.745,
            cpuct_factor: 3.894,
            cpuct_init: 38739.0,
            cpuct_base_at_root: 1.745,
            cpuct_factor_at_root: 3.894,
            cpuct_init_at_root: 38739.0,
            parent_visits_exponent: 1.0,
            uct_root_denominator_exponent: 1.0,
            fpu_offset: 0.44,
            fpu_offset_at_root: 0.44,
            fpu_reduction: 0.2,
            max_policy_moves: 64,
            batch_size_per_selector: 64,
            mlh_bonus_factor: 0.0,
            mlh_q_threshold: 0.75,
            mlh_n_window: 0.05,
            max_tree_nodes: 1 << 18,
        }
    }
}

impl SearchParams {
    /// Exploration constant for a parent with `n` effective visits.
    pub fn cpuct(&self, n: u32, at_root: bool) -> f32 {
        let (base, factor, init) = if at_root {
            (
                self.cpuct_base_at_root,
                self.cpuct_factor_at_root,
                self.cpuct_init_at_root,
            )
        } else {
            (self.cpuct_base, self.cpuct_factor, self.cpuct_init)
        };
        base + factor * ((n as f32 + init + 1.0) / init).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpuct_grows_with_visits() {
        let params = SearchParams::default();
        let small = params.cpuct(0, false);
        let large = params.cpuct(1_000_000, false);
        assert!(large > small);
        // At zero visits the growth term is near zero.
        assert!((small - params.cpuct_base).abs() < 1e-3);
    }
}
