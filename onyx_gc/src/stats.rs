//! Collection statistics.

/// Counters accumulated over the heap's lifetime, queryable by the
/// embedder and printed by the gc tracer.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    /// Collections run.
    pub collections: u64,
    /// Cells reclaimed across all sweeps.
    pub cells_freed: u64,
    /// Arenas added after the initial allocation.
    pub arenas_grown: u64,
}
