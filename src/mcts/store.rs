//! Node and edge storage.
//!
//! The tree lives in two dense, append-only arenas: one of fixed-size node
//! records and one of child-edge slots. Records are addressed by 32-bit
//! `NodeIndex` handles (index 0 is reserved as null) and never move or get
//! freed while a search is running, so an index taken at any point stays
//! valid for the whole search. Allocation advances a fetch-and-add counter;
//! a record's cold fields are written exactly once, at expansion, before
//! its index is handed to anyone else.
//!
//! The visit count `N`, the value sum `W` and the two per-selector
//! in-flight reservations are the only fields mutated after publication,
//! and all of them are atomics.

use crate::errors::SearchError;
use crate::move_types::{Move, NULL_MOVE};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// Handle into the node arena. Index 0 is the null handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIndex(u32);

impl NodeIndex {
    pub const NULL: NodeIndex = NodeIndex(0);

    pub fn new(raw: u32) -> NodeIndex {
        NodeIndex(raw)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Terminal status of a node, from the perspective of its side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Terminal {
    #[default]
    NonTerminal,
    Win,
    Loss,
    Draw,
}

impl Terminal {
    pub fn is_terminal(self) -> bool {
        self != Terminal::NonTerminal
    }

    /// Exact value of a terminal node for its side to move.
    pub fn value(self) -> f32 {
        match self {
            Terminal::Win => 1.0,
            Terminal::Loss => -1.0,
            Terminal::Draw | Terminal::NonTerminal => 0.0,
        }
    }
}

/// State of a node's child block, encoded in `child_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildBlock {
    /// The policy has not been written yet.
    Uninitialized,
    /// The node is proven to have no children (terminal).
    NoChildren,
    /// Offset of the first edge slot in the edge arena.
    Offset(u32),
}

/// Fixed-point scale for the atomic value sum. Values lie in [-1, 1], so a
/// 16-bit fraction leaves ample headroom in an i64 for any visit count.
const W_SCALE: f64 = 65536.0;

/// Number of concurrent selectors the store tracks reservations for.
pub const NUM_SELECTORS: usize = 2;

/// One tree node. Evaluator outputs and structural fields are written once
/// at expansion; `n`, `w` and the in-flight counters evolve over the
/// node's lifetime.
#[derive(Debug)]
pub struct NodeRecord {
    /// Parent node, null for the root.
    pub parent: NodeIndex,
    /// Move played to reach this node, `NULL_MOVE` at the root.
    pub prior_move: Move,
    /// Policy prior of the edge leading here, stored as a 16-bit float.
    prior_bits: u16,

    /// Evaluator outputs for this position.
    pub v: f32,
    pub win_p: f32,
    pub draw_p: f32,
    pub loss_p: f32,
    pub m_position: f32,

    /// Completed visits.
    n: AtomicU32,
    /// Sum of backed-up values oriented to this node's side to move, in
    /// fixed point (see `W_SCALE`).
    w: AtomicI64,
    /// Visits reserved but not yet backed up, one counter per selector.
    n_in_flight: [AtomicU32; NUM_SELECTORS],

    /// Running subtree aggregates, updated during backup.
    pub w_avg: f32,
    pub d_avg: f32,
    pub l_avg: f32,
    pub m_avg: f32,
    /// Sum of squared backed-up values, for the value variance.
    pub w_squared: f64,

    /// 0 = uninitialized, -1 = proven childless, >0 = edge-arena offset.
    child_start: i32,
    pub num_policy_moves: u8,
    pub num_children_visited: u8,
    pub num_children_expanded: u8,
    /// Policy mass of children with at least one completed visit.
    pub sum_p_visited: f32,

    pub terminal: Terminal,

    /// Canonical subtree this node borrows values from, if any.
    pub transposition_root: NodeIndex,
    /// Number of values already drawn from the transposition root.
    pub num_transposition_extracted: u32,

    /// Ply depth below the game start, seeded from the root's history.
    pub depth: u16,
}

impl NodeRecord {
    pub fn new(parent: NodeIndex, prior_move: Move, prior: f32, depth: u16) -> NodeRecord {
        NodeRecord {
            parent,
            prior_move,
            prior_bits: f32_to_f16(prior),
            v: 0.0,
            win_p: 0.0,
            draw_p: 0.0,
            loss_p: 0.0,
            m_position: 0.0,
            n: AtomicU32::new(0),
            w: AtomicI64::new(0),
            n_in_flight: [AtomicU32::new(0), AtomicU32::new(0)],
            w_avg: 0.0,
            d_avg: 0.0,
            l_avg: 0.0,
            m_avg: 0.0,
            w_squared: 0.0,
            child_start: 0,
            num_policy_moves: 0,
            num_children_visited: 0,
            num_children_expanded: 0,
            sum_p_visited: 0.0,
            terminal: Terminal::NonTerminal,
            transposition_root: NodeIndex::NULL,
            num_transposition_extracted: 0,
            depth,
        }
    }

    pub fn prior(&self) -> f32 {
        f16_to_f32(self.prior_bits)
    }

    pub fn n(&self) -> u32 {
        self.n.load(Ordering::Relaxed)
    }

    /// Value sum oriented to this node's side to move.
    pub fn w(&self) -> f64 {
        self.w.load(Ordering::Relaxed) as f64 / W_SCALE
    }

    /// Mean value for this node's side to move; 0 before the first visit.
    pub fn q(&self) -> f64 {
        match self.n() {
            0 => 0.0,
            n => self.w() / n as f64,
        }
    }

    /// Variance of the backed-up values.
    pub fn v_variance(&self) -> f64 {
        match self.n() {
            0 => 0.0,
            n => {
                let mean = self.q();
                (self.w_squared / n as f64 - mean * mean).max(0.0)
            }
        }
    }

    pub fn in_flight(&self, selector: usize) -> u32 {
        self.n_in_flight[selector].load(Ordering::Relaxed)
    }

    pub fn in_flight_total(&self) -> u32 {
        self.n_in_flight
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Reserves `visits` speculative visits for `selector`.
    pub fn reserve(&self, selector: usize, visits: u32) {
        self.n_in_flight[selector].fetch_add(visits, Ordering::Relaxed);
    }

    /// Releases a reservation without recording completed visits. Used when
    /// an evaluator failure unwinds a batch.
    pub fn release(&self, selector: usize, visits: u32) {
        let prev = self.n_in_flight[selector].fetch_sub(visits, Ordering::Relaxed);
        debug_assert!(prev >= visits, "in-flight counter underflow");
    }

    /// Converts a reservation into completed visits carrying value `v`.
    pub fn commit_visits(&self, selector: usize, visits: u32, v: f64) {
        self.n.fetch_add(visits, Ordering::Relaxed);
        self.w
            .fetch_add((v * visits as f64 * W_SCALE) as i64, Ordering::Relaxed);
        self.release(selector, visits);
    }

    pub fn child_block(&self) -> ChildBlock {
        match self.child_start {
            0 => ChildBlock::Uninitialized,
            -1 => ChildBlock::NoChildren,
            offset => ChildBlock::Offset(offset as u32),
        }
    }

    pub fn set_childless(&mut self) {
        debug_assert_eq!(self.child_start, 0);
        self.child_start = -1;
    }

    pub fn set_child_block(&mut self, offset: u32, count: usize) {
        debug_assert!(offset > 0);
        self.child_start = offset as i32;
        self.num_policy_moves = count as u8;
    }

    pub fn is_transposition_linked(&self) -> bool {
        !self.transposition_root.is_null()
    }

    /// True once the evaluator result (or terminal value) has been written.
    pub fn is_evaluated(&self) -> bool {
        self.child_start != 0 || self.terminal.is_terminal()
    }
}

/// One slot in the child-edge arena.
#[derive(Debug, Clone)]
pub struct EdgeSlot {
    pub mv: Move,
    pub p: f32,
    /// Null until the child node record is allocated.
    pub child: NodeIndex,
}

impl EdgeSlot {
    fn empty() -> EdgeSlot {
        EdgeSlot {
            mv: NULL_MOVE,
            p: 0.0,
            child: NodeIndex::NULL,
        }
    }

    pub fn is_expanded(&self) -> bool {
        !self.child.is_null()
    }
}

/// The two arenas plus their allocation counters.
///
/// The node buffer is preallocated at full capacity so that claiming a
/// record is a single fetch-and-add on `next_node`: the claimant owns its
/// slot exclusively, writes the record, and only then hands the index
/// out. That makes `allocate_node` callable through a shared reference
/// from parallel selectors. Growing past the initial capacity is the one
/// operation outside that contract; see [`NodeStore::expand`].
pub struct NodeStore {
    nodes: Box<[UnsafeCell<NodeRecord>]>,
    edges: Vec<EdgeSlot>,
    next_node: AtomicU32,
    can_expand: bool,
}

// Writes through a shared reference happen only in `allocate_node`, into
// the slot the fetch-add just made this caller's alone; every published
// record is mutated through its atomic fields or under `&mut self`.
unsafe impl Sync for NodeStore {}

fn empty_record() -> UnsafeCell<NodeRecord> {
    UnsafeCell::new(NodeRecord::new(NodeIndex::NULL, NULL_MOVE, 0.0, 0))
}

impl NodeStore {
    /// Creates a store sized for `capacity` nodes. Slot 0 of both arenas is
    /// reserved so that 0 can serve as the null index/offset.
    pub fn new(capacity: u32, can_expand: bool) -> NodeStore {
        let capacity = capacity.max(2);
        let nodes: Box<[UnsafeCell<NodeRecord>]> =
            (0..capacity).map(|_| empty_record()).collect();
        let edges = vec![EdgeSlot::empty()];
        NodeStore {
            nodes,
            edges,
            next_node: AtomicU32::new(1),
            can_expand,
        }
    }

    /// Claims the next node slot lock-free and initializes its record
    /// before the index is returned to the caller. Fails once the claimed
    /// slot lies past the end of the buffer; a failed claim allocates
    /// nothing.
    pub fn allocate_node(
        &self,
        parent: NodeIndex,
        prior_move: Move,
        prior: f32,
        depth: u16,
    ) -> Result<NodeIndex, SearchError> {
        let idx = self.next_node.fetch_add(1, Ordering::Relaxed);
        if idx as usize >= self.nodes.len() {
            return Err(SearchError::StoreExhausted(self.len()));
        }
        // The fetch-add made this slot ours alone; no other caller can
        // observe the index before we return it.
        unsafe {
            *self.nodes[idx as usize].get() = NodeRecord::new(parent, prior_move, prior, depth);
        }
        Ok(NodeIndex::new(idx))
    }

    /// Whether the configured limit permits growing the arena.
    pub fn can_expand(&self) -> bool {
        self.can_expand
    }

    /// Doubles the node buffer. This is deliberately outside the lock-free
    /// allocation contract: records move to fresh addresses, so the caller
    /// must hold exclusive access with no selection in progress.
    /// Outstanding `NodeIndex` handles remain valid afterwards.
    pub fn expand(&mut self) {
        let initialized = self.len();
        let old = std::mem::take(&mut self.nodes);
        let mut nodes = old.into_vec();
        let target = nodes.len().saturating_mul(2);
        while nodes.len() < target {
            nodes.push(empty_record());
        }
        self.nodes = nodes.into_boxed_slice();
        // Failed claims may have pushed the counter past the old end;
        // reset it to the first free slot.
        self.next_node.store(initialized + 1, Ordering::Relaxed);
        tracing::debug!(capacity = self.nodes.len(), "node store expanded");
    }

    /// Reserves `count` contiguous edge slots and returns their offset.
    pub fn allocate_children(&mut self, count: usize) -> Result<u32, SearchError> {
        if self.edges.len() + count > u32::MAX as usize {
            return Err(SearchError::StoreExhausted(self.edges.len() as u32));
        }
        let offset = self.edges.len() as u32;
        self.edges
            .extend(std::iter::repeat_with(EdgeSlot::empty).take(count));
        Ok(offset)
    }

    pub fn node(&self, idx: NodeIndex) -> &NodeRecord {
        debug_assert!(idx.raw() <= self.len());
        // Initialized slots are only rewritten under `&mut self`.
        unsafe { &*self.nodes[idx.raw() as usize].get() }
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut NodeRecord {
        self.nodes[idx.raw() as usize].get_mut()
    }

    pub fn edge(&self, offset: u32, slot: usize) -> &EdgeSlot {
        &self.edges[offset as usize + slot]
    }

    pub fn edge_mut(&mut self, offset: u32, slot: usize) -> &mut EdgeSlot {
        &mut self.edges[offset as usize + slot]
    }

    /// The edge slots of a node, empty for unexpanded or childless nodes.
    pub fn edges_of(&self, idx: NodeIndex) -> &[EdgeSlot] {
        let record = self.node(idx);
        match record.child_block() {
            ChildBlock::Offset(offset) => {
                let start = offset as usize;
                &self.edges[start..start + record.num_policy_moves as usize]
            }
            _ => &[],
        }
    }

    /// Number of allocated nodes, excluding the reserved null slot.
    /// Failed claims never count: the counter can run past the buffer,
    /// but no record exists beyond its end.
    pub fn len(&self) -> u32 {
        let claimed = self.next_node.load(Ordering::Relaxed) - 1;
        claimed.min(self.nodes.len() as u32 - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total node slots currently available.
    pub fn capacity(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Iterates over all allocated node indices.
    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> {
        (1..=self.len()).map(NodeIndex::new)
    }
}

// 16-bit float conversion for the stored policy prior. Priors live in
// [0, 1], so overflow handling only matters for robustness.

pub(crate) fn f32_to_f16(x: f32) -> u16 {
    let bits = x.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mant = bits & 0x007f_ffff;
    if exp == 255 {
        // Inf and NaN.
        return sign | 0x7c00 | u16::from(mant != 0);
    }
    let unbiased = exp - 127 + 15;
    if unbiased >= 31 {
        return sign | 0x7c00;
    }
    if unbiased <= 0 {
        if unbiased < -10 {
            return sign;
        }
        let mant = mant | 0x0080_0000;
        let shift = (14 - unbiased) as u32;
        let half = 1u32 << (shift - 1);
        return sign | ((mant + half) >> shift) as u16;
    }
    let rounded = mant + 0x0000_1000;
    if rounded & 0x0080_0000 != 0 {
        let unbiased = unbiased + 1;
        if unbiased >= 31 {
            return sign | 0x7c00;
        }
        return sign | ((unbiased as u16) << 10);
    }
    sign | ((unbiased as u16) << 10) | (rounded >> 13) as u16
}

pub(crate) fn f16_to_f32(h: u16) -> f32 {
    let sign = if h & 0x8000 != 0 { -1.0f32 } else { 1.0 };
    let exp = (h >> 10) & 0x1f;
    let mant = (h & 0x3ff) as f32;
    match exp {
        0 => sign * mant * 2.0f32.powi(-24),
        0x1f => {
            if mant == 0.0 {
                sign * f32::INFINITY
            } else {
                f32::NAN
            }
        }
        e => sign * (1.0 + mant / 1024.0) * 2.0f32.powi(e as i32 - 15),
    }
}
