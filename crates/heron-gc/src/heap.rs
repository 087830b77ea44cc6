//! Heap configuration and statistics

/// GC configuration
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Slots reserved up front in every arena (default: 256)
    pub initial_capacity: usize,
    /// Whether arenas keep allocation counters (default: true)
    pub collect_stats: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 256,
            collect_stats: true,
        }
    }
}

/// Allocation counters of one arena
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Cells allocated
    pub allocations: u64,
    /// Cells freed, explicitly or by a sweep
    pub frees: u64,
    /// Sweeps performed
    pub sweeps: u64,
}
